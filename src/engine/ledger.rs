use std::collections::HashMap;

use chrono::{DateTime, Utc};
use evlog::meta;
use itertools::Itertools;

use crate::db::schema::{NewVote, OptionKind, Vote};
use crate::engine::error::EngineResult;
use crate::engine::Engine;
use crate::runtime::get_logger;

impl Engine {
    /// Appends a vote submitted by the participant themselves on the
    /// platform. The platform just proved this numeric id, so any
    /// placeholder history for the participant is folded in afterwards;
    /// a failed consolidation only degrades display quality and is logged,
    /// not surfaced.
    pub async fn record_platform_vote(
        &self,
        venue_id: i64,
        poll_id: i64,
        user_id: i64,
        handle: Option<&str>,
        display_name: &str,
        option: OptionKind,
        submitted_at: DateTime<Utc>,
    ) -> EngineResult<Vote> {
        let vote = self
            .votes
            .append(&NewVote {
                poll_id,
                user_id,
                handle: handle.map(str::to_owned),
                display_name: display_name.to_owned(),
                option,
                manual: false,
                submitted_at,
            })
            .await?;

        if user_id > 0 {
            if let Err(e) = self
                .ensure_user_data_consistency(venue_id, user_id, handle)
                .await
            {
                let e = anyhow::Error::new(e);
                get_logger().error_with_err("Identity consolidation failed after platform vote.", &*e, None);
            }
        }

        Ok(vote)
    }

    /// Appends a vote entered by an operator on someone's behalf. The
    /// free-text target is resolved to a canonical identity first, so
    /// repeated entries under the same text land on one participant.
    pub async fn record_manual_vote(
        &self,
        poll_id: i64,
        target: &str,
        option: OptionKind,
        submitted_at: DateTime<Utc>,
    ) -> EngineResult<Vote> {
        let resolved = self.resolve_vote_target(target).await?;

        let vote = self
            .votes
            .append(&NewVote {
                poll_id,
                user_id: resolved.user_id,
                handle: resolved.handle,
                display_name: resolved.display_name,
                option,
                manual: true,
                submitted_at,
            })
            .await?;

        get_logger().debug("Recorded manual vote.", meta! {
            "PollID" => poll_id,
            "UserID" => vote.user_id,
        });

        Ok(vote)
    }

    /// The single current-state read every downstream consumer uses. Derived
    /// from the full ledger on every call; there is no materialized current
    /// table to drift out of sync.
    pub async fn current_votes(&self, poll_id: i64) -> EngineResult<Vec<Vote>> {
        let all = self.votes.all_for_poll(poll_id).await?;

        Ok(reduce_current(all))
    }

    /// Current votes whose option counts as attending (either band or
    /// arriving later).
    pub async fn attending(&self, poll_id: i64) -> EngineResult<Vec<Vote>> {
        let current = self.current_votes(poll_id).await?;

        Ok(current.into_iter().filter(|v| v.option.is_attending()).collect())
    }

    pub async fn undecided(&self, poll_id: i64) -> EngineResult<Vec<Vote>> {
        let current = self.current_votes(poll_id).await?;

        Ok(current
            .into_iter()
            .filter(|v| v.option == OptionKind::Undecided)
            .collect())
    }
}

/// Latest-wins reduction over the raw ledger: one winning record per
/// participant (maximum timestamp; ties go to the record observed last in
/// insertion order), retracted winners dropped, output ordered by option
/// then submission time.
pub(crate) fn reduce_current(all: Vec<Vote>) -> Vec<Vote> {
    let mut latest: HashMap<i64, Vote> = HashMap::new();

    for vote in all {
        match latest.get(&vote.user_id) {
            Some(winner) if vote.submitted_at < winner.submitted_at => {}
            _ => {
                latest.insert(vote.user_id, vote);
            }
        }
    }

    latest
        .into_values()
        .filter(|v| v.option != OptionKind::Retracted)
        .sorted_by_key(|v| (v.option.index(), v.submitted_at))
        .collect()
}
