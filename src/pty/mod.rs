//! PTY (Pseudo-Terminal) abstraction layer.
//!
//! Spawns shells attached to a pseudo-terminal and exposes them as a
//! [`PtyProcess`] (write, resize, kill) plus a one-shot [`PtyEvents`] stream
//! of output chunks followed by exactly one exit notification.

mod async_adapter;
mod native;

pub use async_adapter::{AsyncPtyReader, AsyncPtyWriter};
pub use native::{
    default_shell, ExitStatus, NativePty, PtyEvent, PtyEvents, PtyProcess, SpawnOptions,
};

use crate::error::RelayError;
use crate::Result;

/// Size of a PTY in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtySize {
    /// Number of rows (height).
    pub rows: u16,
    /// Number of columns (width).
    pub cols: u16,
}

impl PtySize {
    /// Create a new PtySize with the given dimensions.
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }
}

impl Default for PtySize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

/// Upper limits for terminal dimensions. The lower limit is always 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalBounds {
    pub max_cols: u16,
    pub max_rows: u16,
}

impl Default for TerminalBounds {
    fn default() -> Self {
        Self {
            max_cols: 300,
            max_rows: 100,
        }
    }
}

impl TerminalBounds {
    pub fn new(max_cols: u16, max_rows: u16) -> Self {
        Self { max_cols, max_rows }
    }

    /// Validate client-supplied dimensions.
    ///
    /// Dimensions arrive as JSON numbers, so they are checked for being
    /// finite integers before the range check.
    pub fn validate(&self, cols: f64, rows: f64) -> Result<PtySize> {
        let in_range = |v: f64, max: u16| {
            v.is_finite() && v.fract() == 0.0 && v >= 1.0 && v <= f64::from(max)
        };

        if !in_range(cols, self.max_cols) || !in_range(rows, self.max_rows) {
            return Err(RelayError::InvalidDimensions {
                cols,
                rows,
                max_cols: self.max_cols,
                max_rows: self.max_rows,
            });
        }
        Ok(PtySize::new(rows as u16, cols as u16))
    }

    /// Check an already-typed size.
    pub fn check(&self, size: PtySize) -> Result<PtySize> {
        self.validate(f64::from(size.cols), f64::from(size.rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pty_size_default() {
        let size = PtySize::default();
        assert_eq!(size.rows, 24);
        assert_eq!(size.cols, 80);
    }

    #[test]
    fn test_bounds_accept_edges() {
        let bounds = TerminalBounds::new(300, 100);
        assert_eq!(bounds.validate(1.0, 1.0).unwrap(), PtySize::new(1, 1));
        assert_eq!(bounds.validate(300.0, 100.0).unwrap(), PtySize::new(100, 300));
        assert_eq!(bounds.validate(80.0, 24.0).unwrap(), PtySize::default());
    }

    #[test]
    fn test_bounds_reject_out_of_range() {
        let bounds = TerminalBounds::new(300, 100);
        for (cols, rows) in [(0.0, 24.0), (80.0, 0.0), (301.0, 24.0), (80.0, 101.0), (-5.0, 24.0)] {
            let err = bounds.validate(cols, rows).unwrap_err();
            assert!(matches!(err, RelayError::InvalidDimensions { .. }), "{cols}x{rows}");
        }
    }

    #[test]
    fn test_bounds_reject_non_integer() {
        let bounds = TerminalBounds::default();
        assert!(bounds.validate(80.5, 24.0).is_err());
        assert!(bounds.validate(f64::NAN, 24.0).is_err());
        assert!(bounds.validate(80.0, f64::INFINITY).is_err());
    }

    #[test]
    fn test_bounds_check_typed() {
        let bounds = TerminalBounds::new(100, 50);
        assert!(bounds.check(PtySize::new(24, 80)).is_ok());
        assert!(bounds.check(PtySize::new(60, 80)).is_err());
        assert!(bounds.check(PtySize::new(24, 0)).is_err());
    }
}
