pub mod error;
pub mod identity;
pub mod ledger;
pub mod lifecycle;
pub mod quorum;

use std::sync::Arc;

use crate::config::ConfigTable;
use crate::db::store::{NicknameStore, PollStore, VoteStore};

pub use error::{EngineError, EngineResult};

/// The poll/vote domain engine. Every operation is a synchronous
/// request/response call against the stores; atomicity of read-then-write
/// sequences is delegated to the storage layer.
pub struct Engine {
    polls: Arc<dyn PollStore>,
    votes: Arc<dyn VoteStore>,
    nicknames: Arc<dyn NicknameStore>,
    config: ConfigTable,
}

impl Engine {
    pub fn new(
        polls: Arc<dyn PollStore>,
        votes: Arc<dyn VoteStore>,
        nicknames: Arc<dyn NicknameStore>,
        config: ConfigTable,
    ) -> Self {
        Self {
            polls,
            votes,
            nicknames,
            config,
        }
    }

    pub fn config(&self) -> &ConfigTable {
        &self.config
    }
}
