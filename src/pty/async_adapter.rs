//! Async adapters for PTY I/O.
//!
//! PTY file descriptors only offer blocking reads and writes. These adapters
//! run them on tokio's blocking pool and talk to the rest of the server
//! through channels.

use std::io::{Read, Write};

use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use super::native::PtyEvent;

/// Pumps PTY output into an event channel.
pub struct AsyncPtyReader<R: Read + Send + 'static> {
    reader: R,
    tx: mpsc::Sender<PtyEvent>,
    buffer_size: usize,
}

impl<R: Read + Send + 'static> AsyncPtyReader<R> {
    pub fn new(reader: R, tx: mpsc::Sender<PtyEvent>) -> Self {
        Self {
            reader,
            tx,
            buffer_size: 4096,
        }
    }

    /// Read in chunks of `size` bytes.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Read until EOF, EIO (slave side closed) or the receiver goes away.
    ///
    /// Chunks are sent in the order they were read.
    pub async fn run(self) {
        let buffer_size = self.buffer_size;
        let mut reader = self.reader;
        let tx = self.tx;

        let result = tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; buffer_size];

            loop {
                match reader.read(&mut buf) {
                    Ok(0) => {
                        debug!("pty output ended");
                        break;
                    }
                    Ok(n) => {
                        trace!(bytes = n, "pty output chunk");
                        if tx.blocking_send(PtyEvent::Output(buf[..n].to_vec())).is_err() {
                            debug!("pty output receiver gone");
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        #[cfg(unix)]
                        if e.raw_os_error() == Some(libc::EIO) {
                            debug!("pty slave closed");
                            break;
                        }

                        if e.kind() == std::io::ErrorKind::BrokenPipe {
                            debug!("pty output pipe broken");
                            break;
                        }

                        error!(error = %e, "pty read failed");
                        break;
                    }
                }
            }
        })
        .await;

        if let Err(e) = result {
            error!(error = %e, "pty reader task panicked");
        }
    }
}

/// Writes queued input to the PTY, one message at a time, in order.
pub struct AsyncPtyWriter<W: Write + Send + 'static> {
    writer: W,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl<W: Write + Send + 'static> AsyncPtyWriter<W> {
    pub fn new(writer: W, rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        Self { writer, rx }
    }

    /// Runs until every sender is dropped or a write fails.
    pub async fn run(self) {
        let mut writer = self.writer;
        let mut rx = self.rx;

        let result = tokio::task::spawn_blocking(move || {
            while let Some(data) = rx.blocking_recv() {
                trace!(bytes = data.len(), "pty input");
                if let Err(e) = writer.write_all(&data).and_then(|_| writer.flush()) {
                    if e.kind() == std::io::ErrorKind::BrokenPipe {
                        debug!("pty input pipe broken");
                    } else {
                        error!(error = %e, "pty write failed");
                    }
                    return;
                }
            }
            debug!("pty input queue closed");
        })
        .await;

        if let Err(e) = result {
            error!(error = %e, "pty writer task panicked");
        }
    }
}
