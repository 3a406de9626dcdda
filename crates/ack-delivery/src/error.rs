use std::fmt;

use ack_worker::WorkerError;
use serde::Serialize;

/// Which sliding-window limit refused a magic-link request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateScope {
    Email,
    Ip,
}

impl fmt::Display for RateScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Email => f.write_str("email"),
            Self::Ip => f.write_str("ip"),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum MagicLinkError {
    #[error("too many magic links requested for this {scope}")]
    RateLimited { scope: RateScope },

    #[error("magic link is unknown or no longer usable")]
    InvalidToken,

    #[error("invalid email address: {0:?}")]
    InvalidEmail(String),

    #[error(transparent)]
    Store(#[from] WorkerError),
}
