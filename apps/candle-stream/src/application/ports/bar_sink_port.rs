//! Bar Sink Port (Driven Port)
//!
//! Interface for durably storing received bars, one append per bar.

use std::path::PathBuf;

use crate::domain::streaming::Bar;
use crate::domain::subscription::Symbol;

/// Errors from storing a bar.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    /// File system operation failed.
    #[error("{op} {}: {source}", path.display())]
    Io {
        /// Operation that failed (e.g. "open", "append").
        op: &'static str,
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Row encoding failed.
    #[error("failed to encode row for {}: {reason}", path.display())]
    Encode {
        /// Target file.
        path: PathBuf,
        /// Cause.
        reason: String,
    },
}

/// Append-only storage for bars.
///
/// Each call to [`BarSink::append`] must either store the complete row or
/// nothing.
pub trait BarSink: Send {
    /// Append one bar for `symbol`.
    ///
    /// # Errors
    ///
    /// Returns an error if the bar could not be stored; the bar is lost.
    fn append(&mut self, symbol: &Symbol, bar: &Bar) -> Result<(), WriteError>;

    /// Flush and release every open resource.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered; remaining resources are still
    /// released.
    fn close(&mut self) -> Result<(), WriteError>;
}
