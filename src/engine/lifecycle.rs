use chrono::NaiveDate;
use evlog::meta;

use crate::db::schema::Poll;
use crate::db::store::{PollCreation, PollRestore};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::Engine;
use crate::runtime::get_logger;

/// Result of a successful poll creation. `replaced` carries a stale poll
/// that was auto-retired to make room, so the caller can clean up its
/// external message state.
#[derive(Debug)]
pub struct CreatedPoll {
    pub poll: Poll,
    pub replaced: Option<Poll>,
}

impl Engine {
    /// Creates a poll for the venue. Fails with `PollExists` when an active
    /// poll with an event date of today or later already exists; an active
    /// poll whose event date is strictly past is retired and never blocks
    /// the new one. The check-retire-create sequence runs as one storage
    /// transaction, so concurrent callers can never both create. The new
    /// poll starts pinned when the venue's auto-pin setting is on.
    pub async fn create_poll(&self, venue_id: i64, event_date: NaiveDate) -> EngineResult<CreatedPoll> {
        let venue = self.config.venue(venue_id);
        let today = venue.today();

        match self.polls.create(venue_id, event_date, today, venue.auto_pin).await? {
            PollCreation::ActiveExists(_) => Err(EngineError::PollExists),
            PollCreation::Created { poll, replaced } => {
                if let Some(stale) = &replaced {
                    get_logger().info("Retired stale poll before creating a new one.", meta! {
                        "VenueID" => venue_id,
                        "PollID" => stale.id,
                        "EventDate" => stale.event_date,
                    });
                }

                get_logger().info("Created poll.", meta! {
                    "VenueID" => venue_id,
                    "PollID" => poll.id,
                    "EventDate" => poll.event_date,
                });

                Ok(CreatedPoll { poll, replaced })
            }
        }
    }

    /// Deactivates and un-pins the venue's active poll, returning it so the
    /// caller can post its cancellation notice.
    pub async fn cancel_poll(&self, venue_id: i64) -> EngineResult<Poll> {
        let poll = self
            .polls
            .deactivate_active(venue_id)
            .await?
            .ok_or(EngineError::NoActivePoll)?;

        get_logger().info("Cancelled poll.", meta! {
            "VenueID" => venue_id,
            "PollID" => poll.id,
        });

        Ok(poll)
    }

    /// Reactivates the venue's most recently cancelled poll, provided its
    /// event date hasn't passed. The cancellation-message slot is left
    /// untouched: the caller still needs it to remove the notice before
    /// clearing the field.
    pub async fn restore_poll(&self, venue_id: i64) -> EngineResult<Poll> {
        let today = self.config.venue(venue_id).today();

        match self.polls.reactivate_cancelled(venue_id, today).await? {
            PollRestore::NoneCancelled => Err(EngineError::NoCancelledPoll),
            PollRestore::DatePassed(_) => Err(EngineError::PollDatePassed),
            PollRestore::Restored(poll) => {
                get_logger().info("Restored poll.", meta! {
                    "VenueID" => venue_id,
                    "PollID" => poll.id,
                });

                Ok(poll)
            }
        }
    }

    pub async fn set_pinned(&self, venue_id: i64, pinned: bool) -> EngineResult<Poll> {
        self.polls
            .set_pinned_active(venue_id, pinned)
            .await?
            .ok_or(EngineError::NoActivePoll)
    }

    pub async fn active_poll(&self, venue_id: i64) -> EngineResult<Option<Poll>> {
        Ok(self.polls.latest_active_by_venue(venue_id).await?)
    }

    /// The venue's most recent poll regardless of state, for showing the
    /// results of a finished cycle.
    pub async fn latest_poll(&self, venue_id: i64) -> EngineResult<Option<Poll>> {
        Ok(self.polls.latest_any_by_venue(venue_id).await?)
    }

    pub async fn poll_by_external_ref(&self, external_ref: &str) -> EngineResult<Option<Poll>> {
        Ok(self.polls.by_external_ref(external_ref).await?)
    }

    /// Full replace, used by the caller to attach message-reference slots
    /// after it sends messages.
    pub async fn update_poll(&self, poll: &Poll) -> EngineResult<()> {
        Ok(self.polls.update(poll).await?)
    }
}
