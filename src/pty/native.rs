//! Native PTY implementation using portable-pty.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use portable_pty::{
    native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize as NativePtySize,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::async_adapter::{AsyncPtyReader, AsyncPtyWriter};
use super::{PtySize, TerminalBounds};
use crate::error::RelayError;
use crate::Result;

/// How long to wait for buffered output after the child has been reaped.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// How often the exit watcher polls the child.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

const EVENT_CHANNEL_CAPACITY: usize = 256;

type SharedChild = Arc<Mutex<Box<dyn Child + Send + Sync>>>;

fn lock_child(child: &SharedChild) -> MutexGuard<'_, Box<dyn Child + Send + Sync>> {
    child.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Get the default shell for the current platform.
pub fn default_shell() -> String {
    #[cfg(unix)]
    {
        std::env::var("SHELL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "/bin/sh".to_string())
    }
    #[cfg(windows)]
    {
        "powershell.exe".to_string()
    }
}

/// How a shell process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: u32,
    pub signal: Option<String>,
}

impl From<portable_pty::ExitStatus> for ExitStatus {
    fn from(status: portable_pty::ExitStatus) -> Self {
        Self {
            code: status.exit_code(),
            signal: status.signal().map(str::to_string),
        }
    }
}

/// Notification emitted by a running PTY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PtyEvent {
    /// Raw bytes produced by the process.
    Output(Vec<u8>),
    /// The process ended. Sent exactly once, after all output.
    Exit(ExitStatus),
}

/// Event stream of one PTY. Consumed once; it cannot be restarted.
#[derive(Debug)]
pub struct PtyEvents {
    rx: mpsc::Receiver<PtyEvent>,
}

impl PtyEvents {
    /// Next event, or `None` once the exit notification has been delivered.
    pub async fn recv(&mut self) -> Option<PtyEvent> {
        self.rx.recv().await
    }
}

/// What to spawn.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    pub shell: String,
    pub cwd: Option<PathBuf>,
    pub size: PtySize,
    /// Complete environment of the child. Nothing is inherited.
    pub env: HashMap<String, String>,
}

impl SpawnOptions {
    pub fn new(shell: impl Into<String>, size: PtySize) -> Self {
        Self {
            shell: shell.into(),
            cwd: None,
            size,
            env: HashMap::new(),
        }
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }
}

/// Spawns shells attached to native pseudo-terminals.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativePty {
    bounds: TerminalBounds,
}

impl NativePty {
    pub fn new(bounds: TerminalBounds) -> Self {
        Self { bounds }
    }

    pub fn bounds(&self) -> TerminalBounds {
        self.bounds
    }

    /// Spawn a shell process in a new PTY.
    ///
    /// Must be called from within a tokio runtime: the reader, writer and
    /// exit watcher run as tasks.
    pub fn spawn(&self, opts: SpawnOptions) -> Result<(PtyProcess, PtyEvents)> {
        let size = self.bounds.check(opts.size)?;

        if let Some(dir) = &opts.cwd {
            if !dir.is_dir() {
                return Err(RelayError::SpawnFailure(format!(
                    "working directory {} does not exist",
                    dir.display()
                )));
            }
        }

        let pair = native_pty_system()
            .openpty(to_native(size))
            .map_err(|e| RelayError::SpawnFailure(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&opts.shell);
        cmd.env_clear();
        for (key, value) in &opts.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &opts.cwd {
            cmd.cwd(dir);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| RelayError::SpawnFailure(format!("{}: {}", opts.shell, e)))?;
        // The reader only sees EOF once every slave handle is closed.
        drop(pair.slave);

        let pid = child.process_id().unwrap_or(0);
        let killer = child.clone_killer();
        let child: SharedChild = Arc::new(Mutex::new(child));

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| RelayError::Pty(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| RelayError::Pty(e.to_string()))?;

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (input_tx, input_rx) = mpsc::unbounded_channel();

        tokio::spawn(AsyncPtyWriter::new(writer, input_rx).run());

        let mut read_task = tokio::spawn(AsyncPtyReader::new(reader, event_tx.clone()).run());
        let watched = Arc::clone(&child);
        tokio::spawn(async move {
            // Reaping happens under the child lock, so `kill` never signals a
            // pid that has already been released to the OS.
            let mut poll = tokio::time::interval(EXIT_POLL_INTERVAL);
            let status = loop {
                poll.tick().await;
                match lock_child(&watched).try_wait() {
                    Ok(Some(status)) => break ExitStatus::from(status),
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(pid, "failed to wait for shell: {}", e);
                        break ExitStatus { code: 1, signal: None };
                    }
                }
            };

            // Background jobs may keep the slave open; don't wait on them forever.
            if tokio::time::timeout(OUTPUT_DRAIN_GRACE, &mut read_task).await.is_err() {
                debug!(pid, "PTY still open after shell exit");
            }

            debug!(pid, code = status.code, signal = ?status.signal, "shell exited");
            let _ = event_tx.send(PtyEvent::Exit(status)).await;
        });

        debug!(pid, shell = %opts.shell, rows = size.rows, cols = size.cols, "spawned shell");

        let process = PtyProcess {
            pid,
            size,
            bounds: self.bounds,
            master: pair.master,
            input: Some(input_tx),
            child,
            killer,
        };
        Ok((process, PtyEvents { rx: event_rx }))
    }
}

fn to_native(size: PtySize) -> NativePtySize {
    NativePtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// Handle to a running shell. Exclusively owned by its session.
pub struct PtyProcess {
    pid: u32,
    size: PtySize,
    bounds: TerminalBounds,
    master: Box<dyn MasterPty + Send>,
    /// `None` once killed.
    input: Option<mpsc::UnboundedSender<Vec<u8>>>,
    child: SharedChild,
    killer: Box<dyn ChildKiller + Send + Sync>,
}

impl std::fmt::Debug for PtyProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyProcess")
            .field("pid", &self.pid)
            .field("size", &self.size)
            .field("killed", &self.is_killed())
            .finish()
    }
}

impl PtyProcess {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn size(&self) -> PtySize {
        self.size
    }

    pub fn is_killed(&self) -> bool {
        self.input.is_none()
    }

    /// Queue bytes for the process. Writes are applied in call order.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        let input = self.input.as_ref().ok_or_else(|| self.gone())?;
        input
            .send(data.to_vec())
            .map_err(|_| RelayError::ChannelClosed)
    }

    pub fn resize(&mut self, size: PtySize) -> Result<()> {
        if self.is_killed() {
            return Err(self.gone());
        }
        let size = self.bounds.check(size)?;
        self.master
            .resize(to_native(size))
            .map_err(|e| RelayError::Pty(e.to_string()))?;
        self.size = size;
        Ok(())
    }

    /// True once the child has been reaped.
    pub fn has_exited(&self) -> bool {
        matches!(lock_child(&self.child).try_wait(), Ok(Some(_)))
    }

    /// Request termination. Calling it again is a no-op, and so is calling
    /// it after the shell exited on its own.
    pub fn kill(&mut self) -> Result<()> {
        if self.input.take().is_none() {
            return Ok(());
        }
        let mut child = lock_child(&self.child);
        if let Ok(Some(_)) = child.try_wait() {
            debug!(pid = self.pid, "shell already exited, not signalling");
            return Ok(());
        }
        debug!(pid = self.pid, "killing shell");
        self.killer.kill().map_err(|e| RelayError::Pty(e.to_string()))
    }

    fn gone(&self) -> RelayError {
        RelayError::SessionNotFound(format!("process {} was killed", self.pid))
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        if let Err(e) = self.kill() {
            debug!(pid = self.pid, "kill on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_shell() {
        let shell = default_shell();
        assert!(!shell.is_empty());

        #[cfg(unix)]
        {
            assert!(shell.starts_with('/') || !shell.contains('/'));
        }

        #[cfg(windows)]
        {
            assert!(shell.ends_with(".exe"));
        }
    }

    #[cfg(unix)]
    fn sh() -> SpawnOptions {
        SpawnOptions::new("/bin/sh", PtySize::default())
            .env(crate::env::sanitize_current(&HashMap::new()))
    }

    #[cfg(unix)]
    async fn collect_until(events: &mut PtyEvents, needle: &str) -> String {
        let mut seen = String::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !seen.contains(needle) {
            match tokio::time::timeout_at(deadline, events.recv()).await {
                Ok(Some(PtyEvent::Output(bytes))) => {
                    seen.push_str(&String::from_utf8_lossy(&bytes))
                }
                _ => break,
            }
        }
        seen
    }

    #[cfg(unix)]
    async fn wait_exit(events: &mut PtyEvents) -> Option<ExitStatus> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            match tokio::time::timeout_at(deadline, events.recv()).await {
                Ok(Some(PtyEvent::Exit(status))) => return Some(status),
                Ok(Some(PtyEvent::Output(_))) => continue,
                _ => return None,
            }
        }
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_spawn_shell() {
        let pty = NativePty::default();
        let (process, _events) = pty.spawn(sh()).unwrap();
        assert!(process.pid() > 0, "PID should be positive");
        assert_eq!(process.size(), PtySize::default());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_write_and_read() {
        let pty = NativePty::default();
        let (process, mut events) = pty.spawn(sh()).unwrap();

        process.write(b"echo RELAY_$((40 + 2))\r").unwrap();
        let output = collect_until(&mut events, "RELAY_42").await;
        assert!(output.contains("RELAY_42"), "output was {:?}", output);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_exit_reported_once() {
        let pty = NativePty::default();
        let (process, mut events) = pty.spawn(sh()).unwrap();

        process.write(b"exit 3\r").unwrap();
        let status = wait_exit(&mut events).await.expect("exit event");
        assert_eq!(status.code, 3);

        let after = tokio::time::timeout(Duration::from_secs(2), events.recv()).await;
        assert!(matches!(after, Ok(None)));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_kill_after_exit_sends_no_signal() {
        let pty = NativePty::default();
        let (mut process, mut events) = pty.spawn(sh()).unwrap();
        assert!(!process.has_exited());

        process.write(b"exit 0\r").unwrap();
        assert!(wait_exit(&mut events).await.is_some());
        assert!(process.has_exited());

        // The reaped pid is never signalled; doing so would fail with ESRCH.
        assert!(process.kill().is_ok());
        assert!(process.is_killed());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_kill_then_write_and_resize_fail() {
        let pty = NativePty::default();
        let (mut process, mut events) = pty.spawn(sh()).unwrap();

        process.kill().unwrap();
        assert!(process.is_killed());
        assert!(process.kill().is_ok());

        assert!(matches!(
            process.write(b"echo hi\r"),
            Err(RelayError::SessionNotFound(_))
        ));
        assert!(matches!(
            process.resize(PtySize::new(30, 100)),
            Err(RelayError::SessionNotFound(_))
        ));

        assert!(wait_exit(&mut events).await.is_some());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_resize_validates_bounds() {
        let pty = NativePty::new(TerminalBounds::new(120, 40));
        let (mut process, _events) = pty.spawn(sh()).unwrap();

        process.resize(PtySize::new(40, 120)).unwrap();
        assert_eq!(process.size(), PtySize::new(40, 120));

        let err = process.resize(PtySize::new(41, 120)).unwrap_err();
        assert!(matches!(err, RelayError::InvalidDimensions { .. }));
        assert_eq!(process.size(), PtySize::new(40, 120));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_spawn_rejects_bad_size() {
        let pty = NativePty::new(TerminalBounds::new(100, 50));
        let err = pty
            .spawn(SpawnOptions::new("/bin/sh", PtySize::new(24, 101)))
            .unwrap_err();
        assert!(matches!(err, RelayError::InvalidDimensions { .. }));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_spawn_missing_cwd() {
        let pty = NativePty::default();
        let err = pty
            .spawn(sh().cwd("/definitely/not/a/real/dir"))
            .unwrap_err();
        assert!(matches!(err, RelayError::SpawnFailure(_)));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_spawn_missing_shell() {
        let pty = NativePty::default();
        let result = pty.spawn(SpawnOptions::new(
            "/definitely/not/a/shell",
            PtySize::default(),
        ));
        assert!(matches!(result, Err(RelayError::SpawnFailure(_))));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_env_is_not_inherited() {
        let pty = NativePty::default();
        let mut env = HashMap::new();
        env.insert("PATH".to_string(), "/usr/bin:/bin".to_string());
        env.insert("RELAY_MARK".to_string(), "visible".to_string());

        let (process, mut events) = pty
            .spawn(SpawnOptions::new("/bin/sh", PtySize::default()).env(env))
            .unwrap();

        process
            .write(b"echo \"mark=$RELAY_MARK home=${HOME:-unset}\"\r")
            .unwrap();
        let output = collect_until(&mut events, "home=").await;
        let output = collect_until_line(output, &mut events).await;
        assert!(output.contains("mark=visible"), "output was {:?}", output);
        assert!(output.contains("home=unset"), "output was {:?}", output);
    }

    #[cfg(unix)]
    async fn collect_until_line(mut seen: String, events: &mut PtyEvents) -> String {
        // The echoed command line also contains "home="; wait for the result line.
        while seen.matches("home=").count() < 2 {
            match tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
                Ok(Some(PtyEvent::Output(bytes))) => {
                    seen.push_str(&String::from_utf8_lossy(&bytes))
                }
                _ => break,
            }
        }
        seen
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_cwd_applied() {
        let dir = tempfile::tempdir().unwrap();
        let pty = NativePty::default();
        let (process, mut events) = pty.spawn(sh().cwd(dir.path())).unwrap();

        process.write(b"pwd\r").unwrap();
        let name = dir
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .into_owned();
        let output = collect_until(&mut events, &format!("{}\r\n", name)).await;
        assert!(output.contains(&name), "output was {:?}", output);
    }
}
