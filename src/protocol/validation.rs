//! Validation of client payloads.
//!
//! Everything here runs before the registry is touched, so a rejected
//! message has no side effects.

use serde_json::Value;

use crate::error::RelayError;
use crate::pty::{PtySize, TerminalBounds};
use crate::Result;

/// Longest accepted `clientTerminalId`.
pub const MAX_TERMINAL_ID_LEN: usize = 64;

/// Validation configuration.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub bounds: TerminalBounds,
    /// Maximum size of one `terminal.input` payload, in bytes.
    pub max_input_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            bounds: TerminalBounds::default(),
            max_input_bytes: 10_000,
        }
    }
}

impl Limits {
    /// Terminal ids are short printable tokens: letters, digits, `-_.:`.
    pub fn terminal_id(&self, id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(RelayError::InvalidInput("clientTerminalId is empty".into()));
        }
        if id.len() > MAX_TERMINAL_ID_LEN {
            return Err(RelayError::InvalidInput(format!(
                "clientTerminalId longer than {} bytes",
                MAX_TERMINAL_ID_LEN
            )));
        }
        if let Some(c) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')))
        {
            return Err(RelayError::InvalidInput(format!(
                "clientTerminalId contains {:?}",
                c
            )));
        }
        Ok(())
    }

    /// Input must be a string of at most `max_input_bytes`.
    pub fn input<'a>(&self, data: &'a Value) -> Result<&'a str> {
        let text = data
            .as_str()
            .ok_or_else(|| RelayError::InvalidInput("terminal data must be a string".into()))?;
        if text.len() > self.max_input_bytes {
            return Err(RelayError::InvalidInput(format!(
                "terminal data too large ({} > {} bytes)",
                text.len(),
                self.max_input_bytes
            )));
        }
        Ok(text)
    }

    /// Both dimensions must be integers within the configured bounds.
    pub fn dimensions(&self, cols: &Value, rows: &Value) -> Result<PtySize> {
        self.bounds.validate(as_number(cols), as_number(rows))
    }

    /// Dimensions of a `create`: both or neither. Absent means the default
    /// size for a new terminal and no resize on resumption.
    pub fn optional_dimensions(
        &self,
        cols: Option<&Value>,
        rows: Option<&Value>,
    ) -> Result<Option<PtySize>> {
        match (cols, rows) {
            (None, None) => Ok(None),
            (cols, rows) => self
                .dimensions(cols.unwrap_or(&Value::Null), rows.unwrap_or(&Value::Null))
                .map(Some),
        }
    }
}

/// Non-numbers become NaN, which the bounds check rejects.
fn as_number(value: &Value) -> f64 {
    value.as_f64().unwrap_or(f64::NAN)
}
