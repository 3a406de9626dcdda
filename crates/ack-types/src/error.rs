use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("tenant id must not be empty")]
    EmptyTenant,

    #[error("unknown item status: {0}")]
    UnknownStatus(String),

    #[error("invalid item id: {0}")]
    InvalidItemId(String),

    #[error("invalid item transition: {from} -> {to}")]
    InvalidTransition {
        from: crate::item::ItemStatus,
        to: crate::item::ItemStatus,
    },

    #[error("attempt counter cannot decrease ({current} -> {requested})")]
    AttemptDecreased { current: u32, requested: u32 },
}
