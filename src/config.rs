//! Configuration management for shell-relay.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file (JSON)
//! 4. Default values

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::{Keepalive, ServerConfig, StaticTokens};
use crate::cli::{parse_token_pair, Args};
use crate::protocol::Limits;
use crate::pty::{default_shell, TerminalBounds};
use crate::session::RegistryConfig;

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSection,
    pub security: SecuritySection,
    pub terminal: TerminalSection,
    pub logging: LoggingSection,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Enable graceful shutdown.
    pub graceful_shutdown: bool,
    /// Seconds between WebSocket pings.
    pub ping_interval_secs: u64,
    /// Seconds of silence after a ping before the connection is dropped.
    pub ping_timeout_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            graceful_shutdown: true,
            ping_interval_secs: 25,
            ping_timeout_secs: 20,
        }
    }
}

/// Security configuration section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySection {
    pub auth: AuthSection,
}

/// Authentication configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    /// Require a token on every connection.
    pub enabled: bool,
    /// Auth token -> identity.
    pub tokens: HashMap<String, String>,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            enabled: true,
            tokens: HashMap::new(),
        }
    }
}

impl std::fmt::Debug for AuthSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut identities: Vec<&String> = self.tokens.values().collect();
        identities.sort();
        f.debug_struct("AuthSection")
            .field("enabled", &self.enabled)
            .field("identities", &identities)
            .finish()
    }
}

/// Terminal and session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalSection {
    /// Shell binary; platform default when unset.
    pub shell: Option<String>,
    /// Working directory of new shells; the server's when unset.
    pub working_dir: Option<PathBuf>,
    pub max_cols: u16,
    pub max_rows: u16,
    pub max_input_bytes: usize,
    pub session_timeout_secs: u64,
    pub reap_interval_secs: u64,
    pub probe_timeout_ms: u64,
    pub backlog_bytes: usize,
}

impl Default for TerminalSection {
    fn default() -> Self {
        let bounds = TerminalBounds::default();
        Self {
            shell: None,
            working_dir: None,
            max_cols: bounds.max_cols,
            max_rows: bounds.max_rows,
            max_input_bytes: Limits::default().max_input_bytes,
            session_timeout_secs: 30 * 60,
            reap_interval_secs: 60,
            probe_timeout_ms: 1000,
            backlog_bytes: 64 * 1024,
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace) or a full filter directive.
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_env_from<F>(&mut self, var: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = var("SHELL_RELAY_HOST") {
            self.server.host = host;
        }
        if let Some(port) = var("SHELL_RELAY_PORT") {
            self.server.port = parse_var("SHELL_RELAY_PORT", port)?;
        }
        if let Some(shell) = var("SHELL_RELAY_SHELL").filter(|s| !s.is_empty()) {
            self.terminal.shell = Some(shell);
        }
        if let Some(dir) = var("SHELL_RELAY_WORKDIR").filter(|s| !s.is_empty()) {
            self.terminal.working_dir = Some(PathBuf::from(dir));
        }
        if let Some(cols) = var("SHELL_RELAY_MAX_COLS") {
            self.terminal.max_cols = parse_var("SHELL_RELAY_MAX_COLS", cols)?;
        }
        if let Some(rows) = var("SHELL_RELAY_MAX_ROWS") {
            self.terminal.max_rows = parse_var("SHELL_RELAY_MAX_ROWS", rows)?;
        }
        if let Some(secs) = var("SHELL_RELAY_SESSION_TIMEOUT") {
            self.terminal.session_timeout_secs = parse_var("SHELL_RELAY_SESSION_TIMEOUT", secs)?;
        }
        if let Some(pairs) = var("SHELL_RELAY_AUTH").filter(|s| !s.trim().is_empty()) {
            for pair in pairs.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let (token, identity) =
                    parse_token_pair(pair).ok_or_else(|| ConfigError::InvalidValue {
                        name: "SHELL_RELAY_AUTH",
                        value: "<redacted>".to_string(),
                    })?;
                self.security.auth.tokens.insert(token, identity);
            }
            self.security.auth.enabled = true;
        }

        if let Some(level) = var("SHELL_RELAY_LOG_LEVEL") {
            self.logging.level = level;
        } else if let Some(level) = var("RUST_LOG") {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Apply CLI argument overrides.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(host) = args.host {
            self.server.host = host.to_string();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(ref shell) = args.shell {
            self.terminal.shell = Some(shell.clone());
        }
        if let Some(ref dir) = args.workdir {
            self.terminal.working_dir = Some(dir.clone());
        }
        if let Some(secs) = args.session_timeout {
            self.terminal.session_timeout_secs = secs;
        }

        if !args.tokens.is_empty() {
            self.security.auth.enabled = true;
            self.security.auth.tokens.extend(args.tokens.iter().cloned());
        }
        if args.no_auth {
            self.security.auth.enabled = false;
        }

        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Load configuration with full priority chain.
    ///
    /// Priority: CLI args > env vars > config file > defaults
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut config = match args.config {
            Some(ref path) => Config::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env()?;
        config.apply_args(args);
        config.validate()?;
        Ok(config)
    }

    /// Reject values no server could run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.terminal;
        let server = &self.server;
        let checks: [(&'static str, bool, String); 7] = [
            (
                "server.ping_interval_secs",
                server.ping_interval_secs > 0,
                server.ping_interval_secs.to_string(),
            ),
            (
                "server.ping_timeout_secs",
                server.ping_timeout_secs > 0,
                server.ping_timeout_secs.to_string(),
            ),
            ("terminal.max_cols", t.max_cols > 0, t.max_cols.to_string()),
            ("terminal.max_rows", t.max_rows > 0, t.max_rows.to_string()),
            (
                "terminal.max_input_bytes",
                t.max_input_bytes > 0,
                t.max_input_bytes.to_string(),
            ),
            (
                "terminal.session_timeout_secs",
                t.session_timeout_secs > 0,
                t.session_timeout_secs.to_string(),
            ),
            (
                "terminal.reap_interval_secs",
                t.reap_interval_secs > 0,
                t.reap_interval_secs.to_string(),
            ),
        ];
        for (name, ok, value) in checks {
            if !ok {
                return Err(ConfigError::InvalidValue { name, value });
            }
        }
        Ok(())
    }

    /// Convert to ServerConfig for the API server.
    pub fn to_server_config(&self) -> Result<ServerConfig, ConfigError> {
        let host: IpAddr = self
            .server
            .host
            .parse()
            .map_err(|_| ConfigError::InvalidHost(self.server.host.clone()))?;

        let mut server_config = ServerConfig::new(host.to_string(), self.server.port);
        if !self.server.graceful_shutdown {
            server_config = server_config.without_graceful_shutdown();
        }
        Ok(server_config)
    }

    pub fn bounds(&self) -> TerminalBounds {
        TerminalBounds::new(self.terminal.max_cols, self.terminal.max_rows)
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            shell: self.terminal.shell.clone().unwrap_or_else(default_shell),
            working_dir: self.terminal.working_dir.clone(),
            bounds: self.bounds(),
            session_timeout: Duration::from_secs(self.terminal.session_timeout_secs),
            reap_interval: Duration::from_secs(self.terminal.reap_interval_secs),
            backlog_bytes: self.terminal.backlog_bytes,
        }
    }

    pub fn limits(&self) -> Limits {
        Limits {
            bounds: self.bounds(),
            max_input_bytes: self.terminal.max_input_bytes,
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.terminal.probe_timeout_ms)
    }

    pub fn keepalive(&self) -> Keepalive {
        Keepalive {
            interval: Duration::from_secs(self.server.ping_interval_secs),
            timeout: Duration::from_secs(self.server.ping_timeout_secs),
        }
    }

    pub fn authenticator(&self) -> StaticTokens {
        if self.security.auth.enabled {
            StaticTokens::new(self.security.auth.tokens.clone())
        } else {
            StaticTokens::disabled()
        }
    }

    /// Get the log level filter string.
    pub fn log_filter(&self) -> &str {
        &self.logging.level
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { name, value })
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid host address: {0}")]
    InvalidHost(String),

    #[error("invalid value for {name}: '{value}'")]
    InvalidValue { name: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Authenticator;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert!(config.security.auth.enabled);
        assert_eq!(config.terminal.max_cols, 300);
        assert_eq!(config.terminal.max_rows, 100);
        assert_eq!(config.terminal.max_input_bytes, 10_000);
        assert_eq!(config.terminal.session_timeout_secs, 1800);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.keepalive(), Keepalive::default());
    }

    #[test]
    fn test_keepalive_from_json() {
        let config: Config = serde_json::from_str(
            r#"{ "server": { "ping_interval_secs": 5, "ping_timeout_secs": 3 } }"#,
        )
        .unwrap();
        let keepalive = config.keepalive();
        assert_eq!(keepalive.interval, Duration::from_secs(5));
        assert_eq!(keepalive.timeout, Duration::from_secs(3));

        let mut config = Config::default();
        config.server.ping_timeout_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { name: "server.ping_timeout_secs", .. })
        ));
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "server": {
                "host": "0.0.0.0",
                "port": 8080
            },
            "security": {
                "auth": {
                    "tokens": {"t-alice": "alice", "t-bob": "bob"}
                }
            },
            "terminal": {
                "shell": "/bin/bash",
                "max_cols": 200
            }
        }"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert!(config.security.auth.enabled);
        assert_eq!(config.security.auth.tokens.len(), 2);
        assert_eq!(config.terminal.shell.as_deref(), Some("/bin/bash"));
        assert_eq!(config.terminal.max_cols, 200);
        assert_eq!(config.terminal.max_rows, 100);
    }

    #[test]
    fn test_config_bad_json() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn test_config_missing_file() {
        let err = Config::from_file(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_apply_env() {
        let mut config = Config::default();
        config
            .apply_env_from(env(&[
                ("SHELL_RELAY_PORT", "4000"),
                ("SHELL_RELAY_SHELL", "/bin/zsh"),
                ("SHELL_RELAY_WORKDIR", "/srv"),
                ("SHELL_RELAY_MAX_COLS", "120"),
                ("SHELL_RELAY_SESSION_TIMEOUT", "90"),
                ("SHELL_RELAY_AUTH", "a1=alice, b2=bob"),
                ("RUST_LOG", "debug"),
            ]))
            .unwrap();

        assert_eq!(config.server.port, 4000);
        assert_eq!(config.terminal.shell.as_deref(), Some("/bin/zsh"));
        assert_eq!(config.terminal.working_dir, Some(PathBuf::from("/srv")));
        assert_eq!(config.terminal.max_cols, 120);
        assert_eq!(config.terminal.session_timeout_secs, 90);
        assert_eq!(config.security.auth.tokens.get("b2").map(String::as_str), Some("bob"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_env_log_level_beats_rust_log() {
        let mut config = Config::default();
        config
            .apply_env_from(env(&[("SHELL_RELAY_LOG_LEVEL", "warn"), ("RUST_LOG", "trace")]))
            .unwrap();
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_env_bad_number() {
        let mut config = Config::default();
        let err = config
            .apply_env_from(env(&[("SHELL_RELAY_PORT", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("SHELL_RELAY_PORT"));
    }

    #[test]
    fn test_env_bad_auth_is_redacted() {
        let mut config = Config::default();
        let err = config
            .apply_env_from(env(&[("SHELL_RELAY_AUTH", "supersecret")]))
            .unwrap_err();
        assert!(!err.to_string().contains("supersecret"));
    }

    #[test]
    fn test_apply_args() {
        let mut config = Config::default();
        let args = Args {
            host: Some("192.168.1.1".parse().unwrap()),
            port: Some(5000),
            tokens: vec![("k".to_string(), "kim".to_string())],
            session_timeout: Some(30),
            ..Args::default()
        };

        config.apply_args(&args);

        assert_eq!(config.server.host, "192.168.1.1");
        assert_eq!(config.server.port, 5000);
        assert!(config.security.auth.enabled);
        assert_eq!(config.security.auth.tokens.get("k").map(String::as_str), Some("kim"));
        assert_eq!(config.terminal.session_timeout_secs, 30);
    }

    #[test]
    fn test_unset_args_keep_file_values() {
        let mut config = Config::default();
        config.server.port = 9000;
        config.apply_args(&Args::default());
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn test_apply_no_auth() {
        let mut config = Config::default();
        let args = Args {
            no_auth: true,
            ..Args::default()
        };

        config.apply_args(&args);
        assert!(!config.security.auth.enabled);
        assert_eq!(
            config.authenticator().identify(None).unwrap(),
            crate::api::LOCAL_IDENTITY
        );
    }

    #[test]
    fn test_authenticator_from_tokens() {
        let mut config = Config::default();
        config
            .security
            .auth
            .tokens
            .insert("t-alice".to_string(), "alice".to_string());
        let auth = config.authenticator();
        assert_eq!(auth.identify(Some("t-alice")).unwrap(), "alice");
        assert!(auth.identify(None).is_err());
    }

    #[test]
    fn test_derived_settings() {
        let mut config = Config::default();
        config.terminal.max_cols = 150;
        config.terminal.working_dir = Some(PathBuf::from("/tmp"));
        config.terminal.probe_timeout_ms = 250;

        let registry = config.registry_config();
        assert_eq!(registry.bounds.max_cols, 150);
        assert_eq!(registry.working_dir, Some(PathBuf::from("/tmp")));
        assert_eq!(registry.session_timeout, Duration::from_secs(1800));
        assert!(!registry.shell.is_empty());
        assert_eq!(config.limits().bounds.max_cols, 150);
        assert_eq!(config.probe_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_validate_rejects_zero_bounds() {
        let mut config = Config::default();
        config.terminal.max_rows = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_rows"));
    }

    #[test]
    fn test_to_server_config() {
        let config = Config::default();
        let server_config = config.to_server_config().unwrap();

        assert_eq!(server_config.host, "127.0.0.1");
        assert_eq!(server_config.port, 3000);
        assert!(server_config.graceful_shutdown);
    }

    #[test]
    fn test_invalid_host() {
        let mut config = Config::default();
        config.server.host = "not-an-ip".to_string();

        let result = config.to_server_config();
        assert!(matches!(result, Err(ConfigError::InvalidHost(_))));
    }

    #[test]
    fn test_debug_hides_tokens() {
        let mut config = Config::default();
        config
            .security
            .auth
            .tokens
            .insert("very-secret".to_string(), "alice".to_string());
        let shown = format!("{:?}", config);
        assert!(!shown.contains("very-secret"));
        assert!(shown.contains("alice"));
    }
}
