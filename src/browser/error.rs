use std::time::Duration;

use thiserror::Error;

pub type BrowserResult<T> = Result<T, BrowserError>;

/// Failure of a single browser call.
///
/// Only [`BrowserError::is_fatal`] errors end a browser lifecycle; everything
/// else is retried on the next poll tick.
#[derive(Debug, Clone, Error)]
pub enum BrowserError {
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    #[error("no element matched {0}")]
    NotFound(String),
    #[error("script evaluation failed: {0}")]
    Evaluation(String),
    #[error("devtools protocol error: {0}")]
    Protocol(String),
    #[error("browser disconnected: {0}")]
    Disconnected(String),
    #[error("browser launch failed: {0}")]
    Launch(String),
    #[error("i/o error: {0}")]
    Io(String),
}

impl BrowserError {
    pub fn timeout(operation: &'static str, after: Duration) -> Self {
        Self::Timeout { operation, after }
    }

    /// The browser process or its debugging connection is gone.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Disconnected(_) | Self::Launch(_))
    }
}

impl From<std::io::Error> for BrowserError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for BrowserError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(format!("malformed payload: {err}"))
    }
}

/// Bounds a browser call so a stuck page cannot wedge the caller.
pub async fn bounded<T, F>(operation: &'static str, after: Duration, fut: F) -> BrowserResult<T>
where
    F: std::future::Future<Output = BrowserResult<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(BrowserError::timeout(operation, after)),
    }
}
