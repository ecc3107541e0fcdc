use crate::item::ItemId;
use thiserror::Error;

/// Errors returned by the [`Reactor`](super::Reactor)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactorError {
    #[error("reactor already initialized")]
    AlreadyInitialized,

    #[error("reactor not initialized")]
    NotInitialized,

    #[error("reactor token pool capacity must be at least 1")]
    InvalidCapacity,

    #[error("reactor is shutting down")]
    ShuttingDown,

    #[error("reactor is frozen")]
    Frozen,

    #[error("item {0} is already in the state table")]
    AlreadyPresent(ItemId),

    #[error("feedback item {0} is not present in the state table")]
    FeedbackItemNotPresent(ItemId),

    #[error("finished item {0} not found in the state table")]
    FinishedItemNotFound(ItemId),
}

impl ReactorError {
    /// Returns true for the expected control-flow signals
    ///
    /// Callers receiving one of these must stop offering work; retrying is
    /// pointless.
    pub fn is_stop_signal(&self) -> bool {
        matches!(self, Self::ShuttingDown | Self::Frozen)
    }

    /// Returns true when the error reveals broken bookkeeping in a caller
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::AlreadyPresent(_) | Self::FeedbackItemNotPresent(_) | Self::FinishedItemNotFound(_)
        )
    }
}
