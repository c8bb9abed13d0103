//! Environment construction for spawned shells.
//!
//! The host environment of a server process routinely carries credentials
//! (API keys, database URLs, the server's own auth tokens). None of that may
//! leak into a shell handed to a remote client, so the environment is rebuilt
//! from scratch:
//!
//! 1. Allow-listed variables are copied from the host when present.
//! 2. Any other host variable is copied only if its name does not look secret.
//! 3. Caller overrides are accepted only for a small set of terminal/locale keys.
//! 4. `PATH`, `HOME`, `SHELL` and `TERM` are always present.

use std::collections::HashMap;

/// Variables copied from the host whenever they are set.
pub const ALLOWED_VARS: &[&str] = &[
    "PATH", "HOME", "USER", "SHELL", "TERM", "LANG", "LC_ALL", "PWD", "TMPDIR", "EDITOR", "PAGER",
];

/// Variables a client may override when creating a terminal.
pub const OVERRIDABLE_VARS: &[&str] = &[
    "TERM",
    "COLORTERM",
    "LANG",
    "LC_ALL",
    "LC_CTYPE",
    "EDITOR",
    "PAGER",
    "NO_COLOR",
    "CI",
];

/// Case-insensitive substrings that mark a variable name as secret.
const SECRET_PATTERNS: &[&str] = &["SECRET", "PASSWORD", "TOKEN", "KEY", "CREDENTIAL", "CERT"];

/// Well-known credential carriers whose names don't match a pattern.
const DENIED_VARS: &[&str] = &[
    "DATABASE_URL",
    "MONGODB_URI",
    "REDIS_URL",
    "AMQP_URL",
    "SENTRY_DSN",
    "PGPASS",
    "PGPASSFILE",
    "NETRC",
    "SSH_AUTH_SOCK",
    "GPG_AGENT_INFO",
];

/// Our own configuration namespace never reaches a shell.
const DENIED_PREFIXES: &[&str] = &["SHELL_RELAY_"];

const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";
const DEFAULT_TERM: &str = "xterm-256color";

/// Returns true if a variable name looks like it carries a credential.
pub fn is_sensitive(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    SECRET_PATTERNS.iter().any(|p| upper.contains(p))
        || DENIED_VARS.contains(&upper.as_str())
        || DENIED_PREFIXES.iter().any(|p| upper.starts_with(p))
}

/// Build a spawn environment from `host` plus caller `overrides`.
pub fn sanitize<I, K, V>(host: I, overrides: &HashMap<String, String>) -> HashMap<String, String>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let host: HashMap<String, String> = host
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect();

    let mut env = HashMap::with_capacity(host.len());

    for name in ALLOWED_VARS {
        if let Some(value) = host.get(*name).filter(|v| !v.is_empty()) {
            env.insert((*name).to_string(), value.clone());
        }
    }

    for (name, value) in &host {
        if value.is_empty() || env.contains_key(name) || is_sensitive(name) {
            continue;
        }
        env.insert(name.clone(), value.clone());
    }

    for (name, value) in overrides {
        if OVERRIDABLE_VARS.contains(&name.as_str()) {
            env.insert(name.clone(), value.clone());
        } else {
            tracing::debug!(var = %name, "dropping non-overridable environment variable");
        }
    }

    ensure_defaults(&mut env);
    env
}

/// Sanitize the current process environment.
pub fn sanitize_current(overrides: &HashMap<String, String>) -> HashMap<String, String> {
    // vars_os avoids panicking on non-UTF-8 entries
    let host = std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)));
    sanitize(host, overrides)
}

fn ensure_defaults(env: &mut HashMap<String, String>) {
    env.entry("PATH".into())
        .or_insert_with(|| DEFAULT_PATH.to_string());
    env.entry("HOME".into()).or_insert_with(|| {
        dirs::home_dir()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| "/".to_string())
    });
    env.entry("SHELL".into())
        .or_insert_with(crate::pty::default_shell);
    env.entry("TERM".into())
        .or_insert_with(|| DEFAULT_TERM.to_string());
}
