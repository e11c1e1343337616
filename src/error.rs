use std::time::Duration;

use thiserror::Error;

/// Failure to obtain a fresh snapshot from a device or the backend.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection refused, DNS failure, timeout.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    /// The body arrived but could not be mapped to a reading.
    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl FetchError {
    /// Transport and status failures mean "unreachable"; a malformed body means
    /// the peer answered but said nothing usable.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, FetchError::Transport(_) | FetchError::Status(_))
    }
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error(
        "no device answered within {}s; check that the unit is powered and on the same network, \
         or enter its address manually",
        .timeout.as_secs()
    )]
    Exhausted { timeout: Duration },
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("no delivery channel configured")]
    NoChannel,

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("{0}")]
    Rejected(String),
}
