use std::time::Duration;

use thiserror::Error;

/// Failure of an exchange that is shown to the user.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Network or connection failure before or during streaming.
    #[error("{0}")]
    Transport(#[from] reqwest::Error),
    /// The producer answered with a non-success status.
    #[error("Server error: {0}")]
    Status(u16),
    /// No bytes arrived within the configured idle limit.
    #[error("idle timeout after {} ms", .0.as_millis())]
    IdleTimeout(Duration),
}

/// Reason a new exchange could not be started.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartError {
    #[error("an exchange is already streaming")]
    AlreadyStreaming,
}
