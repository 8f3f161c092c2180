//! Error types for `clipreplay_core`.
//!
//! All Rust-side failures are funnelled through [`ClipReplayError`], which
//! uses `thiserror` for `Display` and `Error` derives.  Transient OS
//! contention is not an error: it degrades to `None` at the call site.

use thiserror::Error;

/// Top-level error type for the `clipreplay_core` library.
///
/// Each variant corresponds to a distinct subsystem.
#[derive(Debug, Error)]
pub enum ClipReplayError {
    /// Clipboard access failure (open, read, write, listener registration).
    #[error("ClipboardError: {0}")]
    Clipboard(String),

    /// A candidate could not be built from the clipboard payload.
    #[error("ExtractionError: {0}")]
    Extraction(String),

    /// Keyboard synthesis failure.
    #[error("InputError: {0}")]
    Input(String),

    /// No usable replay target, or the target could not be activated.
    #[error("TargetError: {0}")]
    Target(String),

    /// Configuration could not be read or parsed.
    #[error("ConfigError: {0}")]
    Config(String),

    /// The dispatch queue was closed before the write.
    #[error("dispatch queue is closed")]
    QueueClosed,

    /// A replay was cancelled between macro tokens.
    #[error("replay cancelled")]
    Cancelled,

    /// A required argument was missing or malformed.
    #[error("InvalidArgument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, ClipReplayError>;

/// Convert a `windows::core::Error` (Win32 HRESULT failure) into a
/// `ClipReplayError::Clipboard`.
#[cfg(windows)]
impl From<windows::core::Error> for ClipReplayError {
    fn from(err: windows::core::Error) -> Self {
        ClipReplayError::Clipboard(format!("Windows error: {err}"))
    }
}

impl From<toml::de::Error> for ClipReplayError {
    fn from(err: toml::de::Error) -> Self {
        ClipReplayError::Config(format!("invalid TOML: {err}"))
    }
}

impl From<serde_json::Error> for ClipReplayError {
    fn from(err: serde_json::Error) -> Self {
        ClipReplayError::Config(format!("invalid JSON: {err}"))
    }
}
