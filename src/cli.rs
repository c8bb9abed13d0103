//! Command-line interface for shell-relay.
//!
//! Parsed with lexopt.

use std::ffi::OsString;
use std::net::IpAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Command-line arguments. `None` means "not given", so lower-priority
/// sources keep their value.
#[derive(Debug, Clone, Default)]
pub struct Args {
    /// Host address to bind to.
    pub host: Option<IpAddr>,
    /// Port to listen on.
    pub port: Option<u16>,
    /// Path to configuration file.
    pub config: Option<PathBuf>,
    /// Shell to spawn for every terminal.
    pub shell: Option<String>,
    /// Working directory of new shells.
    pub workdir: Option<PathBuf>,
    /// `token=identity` pairs accepted at connect time.
    pub tokens: Vec<(String, String)>,
    /// Disable authentication.
    pub no_auth: bool,
    /// Seconds a detached session survives.
    pub session_timeout: Option<u64>,
    /// Log level or filter directive.
    pub log_level: Option<String>,
    /// Show version and exit.
    pub version: bool,
    /// Show help and exit.
    pub help: bool,
}

/// Parse command-line arguments.
pub fn parse_args() -> Result<Args, ArgsError> {
    parse_args_from(std::env::args_os())
}

/// Parse arguments from an iterator (for testing).
pub fn parse_args_from<I>(args: I) -> Result<Args, ArgsError>
where
    I: IntoIterator<Item = OsString>,
{
    use lexopt::prelude::*;

    let mut result = Args::default();
    let mut parser = lexopt::Parser::from_iter(args);

    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => {
                result.help = true;
            }
            Short('V') | Long("version") => {
                result.version = true;
            }
            Short('H') | Long("host") => {
                let value: String = parser.value()?.parse()?;
                result.host = Some(
                    value
                        .parse()
                        .map_err(|_| ArgsError::InvalidValue("host", value))?,
                );
            }
            Short('p') | Long("port") => {
                let value: String = parser.value()?.parse()?;
                result.port = Some(
                    value
                        .parse()
                        .map_err(|_| ArgsError::InvalidValue("port", value))?,
                );
            }
            Short('c') | Long("config") => {
                result.config = Some(parser.value()?.parse()?);
            }
            Short('s') | Long("shell") => {
                result.shell = Some(parser.value()?.parse()?);
            }
            Short('w') | Long("workdir") => {
                result.workdir = Some(parser.value()?.parse()?);
            }
            Short('t') | Long("token") => {
                let value: String = parser.value()?.parse()?;
                let pair = parse_token_pair(&value)
                    .ok_or_else(|| ArgsError::InvalidValue("token", value.clone()))?;
                result.tokens.push(pair);
            }
            Long("no-auth") => {
                result.no_auth = true;
            }
            Long("session-timeout") => {
                let value: String = parser.value()?.parse()?;
                result.session_timeout = Some(
                    value
                        .parse()
                        .map_err(|_| ArgsError::InvalidValue("session-timeout", value))?,
                );
            }
            Short('l') | Long("log-level") => {
                result.log_level = Some(parser.value()?.parse()?);
            }
            Value(val) => {
                return Err(ArgsError::UnexpectedArgument(val.to_string_lossy().into()));
            }
            _ => return Err(arg.unexpected().into()),
        }
    }

    Ok(result)
}

/// Split `token=identity`. Both halves must be non-empty.
pub fn parse_token_pair(value: &str) -> Option<(String, String)> {
    let (token, identity) = value.split_once('=')?;
    let (token, identity) = (token.trim(), identity.trim());
    if token.is_empty() || identity.is_empty() {
        return None;
    }
    Some((token.to_string(), identity.to_string()))
}

/// Print help message.
pub fn print_help() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        r#"shell-relay {version}
Resumable multi-terminal shell access over WebSocket

USAGE:
    shell-relay [OPTIONS]

OPTIONS:
    -H, --host <ADDR>           Host address to bind [default: 127.0.0.1]
    -p, --port <PORT>           Port to listen on [default: 3000]
    -c, --config <FILE>         Path to configuration file (JSON)
    -s, --shell <PATH>          Shell to spawn [default: $SHELL or /bin/sh]
    -w, --workdir <DIR>         Working directory of new shells
    -t, --token <TOKEN=ID>      Accept TOKEN as identity ID (repeatable)
        --no-auth               Disable authentication (identity "local")
        --session-timeout <S>   Seconds a detached session is kept [default: 1800]
    -l, --log-level <LVL>       Log level (error, warn, info, debug, trace)
    -h, --help                  Print help
    -V, --version               Print version

ENVIRONMENT VARIABLES:
    SHELL_RELAY_HOST             Host address (overrides config)
    SHELL_RELAY_PORT             Port number (overrides config)
    SHELL_RELAY_SHELL            Shell path (overrides config)
    SHELL_RELAY_WORKDIR          Working directory (overrides config)
    SHELL_RELAY_MAX_COLS         Maximum terminal columns
    SHELL_RELAY_MAX_ROWS         Maximum terminal rows
    SHELL_RELAY_SESSION_TIMEOUT  Detached session lifetime in seconds
    SHELL_RELAY_AUTH             Comma-separated TOKEN=ID pairs
    SHELL_RELAY_LOG_LEVEL        Log level (overrides config)
    RUST_LOG                     Alternative log level setting

EXAMPLES:
    # Local development, no authentication
    shell-relay --no-auth

    # Listen on all interfaces with two users
    shell-relay -H 0.0.0.0 -t s3cret=alice -t hunter2=bob

    # Start with config file
    shell-relay -c /etc/shell-relay/config.json
"#
    );
}

/// Print version.
pub fn print_version() {
    println!("shell-relay {}", env!("CARGO_PKG_VERSION"));
}

/// Argument parsing errors.
#[derive(Debug, Error)]
pub enum ArgsError {
    #[error("{0}")]
    Lexopt(#[from] lexopt::Error),

    #[error("invalid value for --{0}: '{1}'")]
    InvalidValue(&'static str, String),

    #[error("unexpected argument: '{0}'")]
    UnexpectedArgument(String),
}
