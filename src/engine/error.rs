use thiserror::Error;

/// The closed set of domain failures. All are non-fatal and meant to be
/// relayed to an operator; anything from the storage layer propagates
/// opaque through `Storage` and is never retried here.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no active poll exists for this venue")]
    NoActivePoll,

    #[error("no cancelled poll exists for this venue")]
    NoCancelledPoll,

    #[error("an active poll already exists for this venue")]
    PollExists,

    #[error("the poll's event date has already passed")]
    PollDatePassed,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
