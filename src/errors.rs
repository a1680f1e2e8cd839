//! Error types for the streaming engine.
//!
//! Follows the hand-rolled enum + manual `Display`/`Error` impl style rather than
//! deriving with a helper crate: `?` ergonomics come from explicit `From` conversions.

use std::fmt;

/// Errors from the upstream exchange adapter and the stream task that consumes it.
#[derive(Debug)]
pub enum HubError {
    /// Connect failure or timeout talking to the upstream exchange.
    Unreachable(String),
    /// Upstream sent a frame that didn't match the expected shape; the caller should
    /// skip the message and keep reading, not tear down the connection.
    Protocol(String),
    /// The stream task was cancelled (unsubscribe of the last subscriber). Not a real
    /// error — kept distinct so callers never log it as one.
    Cancelled,
}

impl fmt::Display for HubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HubError::Unreachable(msg) => write!(f, "upstream unreachable: {msg}"),
            HubError::Protocol(msg) => write!(f, "upstream protocol error: {msg}"),
            HubError::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for HubError {}

impl From<reqwest::Error> for HubError {
    fn from(err: reqwest::Error) -> Self {
        HubError::Unreachable(err.to_string())
    }
}

impl From<tungstenite::Error> for HubError {
    fn from(err: tungstenite::Error) -> Self {
        HubError::Unreachable(err.to_string())
    }
}

impl From<serde_json::Error> for HubError {
    fn from(err: serde_json::Error) -> Self {
        HubError::Protocol(err.to_string())
    }
}

/// Errors from the trade journal's on-disk I/O.
#[derive(Debug)]
pub enum JournalError {
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for JournalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JournalError::Io(e) => write!(f, "journal I/O error: {e}"),
            JournalError::Json(e) => write!(f, "journal JSON error: {e}"),
        }
    }
}

impl std::error::Error for JournalError {}

impl From<std::io::Error> for JournalError {
    fn from(err: std::io::Error) -> Self {
        JournalError::Io(err)
    }
}

impl From<serde_json::Error> for JournalError {
    fn from(err: serde_json::Error) -> Self {
        JournalError::Json(err)
    }
}
