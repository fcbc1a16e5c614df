use async_trait::async_trait;
use chrono::NaiveDate;

use crate::db::schema::{NewVote, NicknameMapping, Poll, Vote};

/// Outcome of the transactional poll-creation operation.
#[derive(Debug)]
pub enum PollCreation {
    Created {
        poll: Poll,
        /// A stale active poll that was retired to make room.
        replaced: Option<Poll>,
    },
    /// An active poll whose event date is still current blocks creation.
    ActiveExists(Poll),
}

/// Outcome of the transactional poll-restore operation.
#[derive(Debug)]
pub enum PollRestore {
    Restored(Poll),
    /// The cancelled poll exists but its event date has passed.
    DatePassed(Poll),
    NoneCancelled,
}

/// Storage contract for polls. Each mutating operation is a single
/// transaction serialized per venue: the read-then-write sequences
/// (validate the current poll, then create/deactivate/reactivate/pin) must
/// be atomic or two concurrent callers could both observe "no active poll"
/// and both create one. The engine performs no locking of its own.
#[async_trait]
pub trait PollStore: Send + Sync {
    /// Creates a poll for the venue unless an active poll with
    /// `event_date >= today` exists. An active poll dated strictly before
    /// `today` is retired (deactivated, un-pinned) in the same transaction
    /// and returned as `replaced`.
    async fn create(
        &self,
        venue_id: i64,
        event_date: NaiveDate,
        today: NaiveDate,
        pinned: bool,
    ) -> anyhow::Result<PollCreation>;

    /// Deactivates and un-pins the venue's active poll, returning it;
    /// `None` when the venue has no active poll.
    async fn deactivate_active(&self, venue_id: i64) -> anyhow::Result<Option<Poll>>;

    /// Reactivates the venue's most recently cancelled poll unless its
    /// event date is strictly before `today`.
    async fn reactivate_cancelled(
        &self,
        venue_id: i64,
        today: NaiveDate,
    ) -> anyhow::Result<PollRestore>;

    /// Updates the pinned flag on the venue's active poll; `None` when the
    /// venue has no active poll.
    async fn set_pinned_active(&self, venue_id: i64, pinned: bool)
        -> anyhow::Result<Option<Poll>>;

    async fn latest_active_by_venue(&self, venue_id: i64) -> anyhow::Result<Option<Poll>>;

    async fn latest_cancelled_by_venue(&self, venue_id: i64) -> anyhow::Result<Option<Poll>>;

    async fn latest_any_by_venue(&self, venue_id: i64) -> anyhow::Result<Option<Poll>>;

    async fn by_external_ref(&self, external_ref: &str) -> anyhow::Result<Option<Poll>>;

    /// Full replace by id, used for attaching message-reference slots.
    async fn update(&self, poll: &Poll) -> anyhow::Result<()>;
}

/// Storage contract for the append-only vote ledger. The store never
/// deduplicates; the engine derives the current set itself.
#[async_trait]
pub trait VoteStore: Send + Sync {
    async fn append(&self, vote: &NewVote) -> anyhow::Result<Vote>;

    /// All rows for the poll in insertion order.
    async fn all_for_poll(&self, poll_id: i64) -> anyhow::Result<Vec<Vote>>;

    /// Most recent real (positive) numeric id seen voting under this handle.
    async fn user_id_by_handle(&self, handle: &str) -> anyhow::Result<Option<i64>>;

    /// Most recent handle seen on a vote by this numeric id.
    async fn handle_by_user_id(&self, user_id: i64) -> anyhow::Result<Option<String>>;

    /// Re-attributes every vote in the poll owned by `from_id` to `to_id`,
    /// filling in `new_handle` on rows that lacked a handle. Option and
    /// timestamp are never touched. Returns the number of rows rewritten.
    async fn rewrite_ownership(
        &self,
        poll_id: i64,
        from_id: i64,
        to_id: i64,
        new_handle: Option<&str>,
    ) -> anyhow::Result<u64>;

    /// Consolidates one participant in a single transaction: re-points
    /// nickname mappings (matched by handle or owned by a placeholder
    /// derived from the handle or from one of the nicknames) at `real_id`,
    /// then rewrites ownership of every vote in the poll held by one of
    /// those placeholder ids. A crash can never leave the mappings
    /// re-pointed while the votes are stranded. Returns the number of
    /// votes rewritten.
    async fn consolidate_placeholders(
        &self,
        poll_id: i64,
        real_id: i64,
        handle: Option<&str>,
        nicknames: &[String],
    ) -> anyhow::Result<u64>;
}

/// Storage contract for nickname mappings. Nicknames are globally unique,
/// first-writer-wins. Mapping re-pointing during consolidation happens
/// inside `VoteStore::consolidate_placeholders`, in the same transaction as
/// the vote rewrites.
#[async_trait]
pub trait NicknameStore: Send + Sync {
    /// Returns false (without touching the existing row) when the nickname
    /// is already taken.
    async fn create_if_unique(&self, mapping: &NicknameMapping) -> anyhow::Result<bool>;

    async fn by_nickname(&self, nickname: &str) -> anyhow::Result<Option<NicknameMapping>>;

    async fn by_handle(&self, handle: &str) -> anyhow::Result<Option<NicknameMapping>>;

    async fn by_user_id(&self, user_id: i64) -> anyhow::Result<Option<NicknameMapping>>;

    /// Batch lookup for building a render cache.
    async fn by_identities(&self, user_ids: &[i64]) -> anyhow::Result<Vec<NicknameMapping>>;

    /// Every nickname string ever associated with this participant, by id
    /// or by handle.
    async fn nicknames_for_participant(
        &self,
        user_id: i64,
        handle: Option<&str>,
    ) -> anyhow::Result<Vec<String>>;
}
