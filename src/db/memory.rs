//! In-memory store, used by the test suite and handy for local development
//! without a database. One struct implements all three contracts over a
//! single lock, so the compound operations (poll lifecycle mutations,
//! consolidation) are atomic the same way the Postgres transactions are.
//! Insertion order is preserved and ids are monotonic, matching the
//! Postgres adapter.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use crate::db::schema::{NewVote, NicknameMapping, Poll, Vote};
use crate::db::store::{NicknameStore, PollCreation, PollRestore, PollStore, VoteStore};
use crate::engine::identity::placeholder_id;

#[derive(Default)]
struct MemoryState {
    polls: Vec<Poll>,
    votes: Vec<Vote>,
    mappings: Vec<NicknameMapping>,
}

impl MemoryState {
    fn rewrite_ownership(
        &mut self,
        poll_id: i64,
        from_id: i64,
        to_id: i64,
        new_handle: Option<&str>,
    ) -> u64 {
        let mut rewritten = 0;
        for vote in self.votes.iter_mut() {
            if vote.poll_id != poll_id || vote.user_id != from_id {
                continue;
            }

            vote.user_id = to_id;
            if vote.handle.is_none() {
                vote.handle = new_handle.map(str::to_owned);
            }
            rewritten += 1;
        }

        rewritten
    }
}

#[derive(Default)]
pub struct MemoryDb {
    state: Mutex<MemoryState>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PollStore for MemoryDb {
    async fn create(
        &self,
        venue_id: i64,
        event_date: NaiveDate,
        today: NaiveDate,
        pinned: bool,
    ) -> anyhow::Result<PollCreation> {
        let mut state = self.state.lock().unwrap();

        let mut replaced = None;
        if let Some(existing) = state
            .polls
            .iter_mut()
            .rev()
            .find(|p| p.venue_id == venue_id && p.active)
        {
            if existing.event_date >= today {
                return Ok(PollCreation::ActiveExists(existing.clone()));
            }

            existing.active = false;
            existing.pinned = false;
            replaced = Some(existing.clone());
        }

        let poll = Poll {
            id: state.polls.len() as i64 + 1,
            venue_id,
            event_date,
            active: true,
            pinned,
            invite_message_id: None,
            results_message_id: None,
            cancel_message_id: None,
            collected_message_id: None,
            external_ref: None,
            time_created: Utc::now(),
        };
        state.polls.push(poll.clone());

        Ok(PollCreation::Created { poll, replaced })
    }

    async fn deactivate_active(&self, venue_id: i64) -> anyhow::Result<Option<Poll>> {
        let mut state = self.state.lock().unwrap();

        Ok(state
            .polls
            .iter_mut()
            .rev()
            .find(|p| p.venue_id == venue_id && p.active)
            .map(|poll| {
                poll.active = false;
                poll.pinned = false;
                poll.clone()
            }))
    }

    async fn reactivate_cancelled(
        &self,
        venue_id: i64,
        today: NaiveDate,
    ) -> anyhow::Result<PollRestore> {
        let mut state = self.state.lock().unwrap();

        let poll = match state
            .polls
            .iter_mut()
            .rev()
            .find(|p| p.venue_id == venue_id && !p.active)
        {
            Some(v) => v,
            None => return Ok(PollRestore::NoneCancelled),
        };

        if poll.event_date < today {
            return Ok(PollRestore::DatePassed(poll.clone()));
        }

        poll.active = true;
        Ok(PollRestore::Restored(poll.clone()))
    }

    async fn set_pinned_active(
        &self,
        venue_id: i64,
        pinned: bool,
    ) -> anyhow::Result<Option<Poll>> {
        let mut state = self.state.lock().unwrap();

        Ok(state
            .polls
            .iter_mut()
            .rev()
            .find(|p| p.venue_id == venue_id && p.active)
            .map(|poll| {
                poll.pinned = pinned;
                poll.clone()
            }))
    }

    async fn latest_active_by_venue(&self, venue_id: i64) -> anyhow::Result<Option<Poll>> {
        let state = self.state.lock().unwrap();

        Ok(state
            .polls
            .iter()
            .rev()
            .find(|p| p.venue_id == venue_id && p.active)
            .cloned())
    }

    async fn latest_cancelled_by_venue(&self, venue_id: i64) -> anyhow::Result<Option<Poll>> {
        let state = self.state.lock().unwrap();

        Ok(state
            .polls
            .iter()
            .rev()
            .find(|p| p.venue_id == venue_id && !p.active)
            .cloned())
    }

    async fn latest_any_by_venue(&self, venue_id: i64) -> anyhow::Result<Option<Poll>> {
        let state = self.state.lock().unwrap();

        Ok(state.polls.iter().rev().find(|p| p.venue_id == venue_id).cloned())
    }

    async fn by_external_ref(&self, external_ref: &str) -> anyhow::Result<Option<Poll>> {
        let state = self.state.lock().unwrap();

        Ok(state
            .polls
            .iter()
            .rev()
            .find(|p| p.external_ref.as_deref() == Some(external_ref))
            .cloned())
    }

    async fn update(&self, poll: &Poll) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();

        match state.polls.iter_mut().find(|p| p.id == poll.id) {
            Some(slot) => {
                *slot = poll.clone();
                Ok(())
            }
            None => Err(anyhow::Error::msg(format!("no poll with id {}", poll.id))),
        }
    }
}

#[async_trait]
impl VoteStore for MemoryDb {
    async fn append(&self, vote: &NewVote) -> anyhow::Result<Vote> {
        let mut state = self.state.lock().unwrap();

        let vote = Vote {
            id: state.votes.len() as i64 + 1,
            poll_id: vote.poll_id,
            user_id: vote.user_id,
            handle: vote.handle.clone(),
            display_name: vote.display_name.clone(),
            option: vote.option,
            manual: vote.manual,
            submitted_at: vote.submitted_at,
        };
        state.votes.push(vote.clone());

        Ok(vote)
    }

    async fn all_for_poll(&self, poll_id: i64) -> anyhow::Result<Vec<Vote>> {
        let state = self.state.lock().unwrap();

        Ok(state.votes.iter().filter(|v| v.poll_id == poll_id).cloned().collect())
    }

    async fn user_id_by_handle(&self, handle: &str) -> anyhow::Result<Option<i64>> {
        let state = self.state.lock().unwrap();

        Ok(state
            .votes
            .iter()
            .rev()
            .find(|v| v.handle.as_deref() == Some(handle) && v.user_id > 0)
            .map(|v| v.user_id))
    }

    async fn handle_by_user_id(&self, user_id: i64) -> anyhow::Result<Option<String>> {
        let state = self.state.lock().unwrap();

        Ok(state
            .votes
            .iter()
            .rev()
            .find(|v| v.user_id == user_id && v.handle.is_some())
            .and_then(|v| v.handle.clone()))
    }

    async fn rewrite_ownership(
        &self,
        poll_id: i64,
        from_id: i64,
        to_id: i64,
        new_handle: Option<&str>,
    ) -> anyhow::Result<u64> {
        let mut state = self.state.lock().unwrap();

        Ok(state.rewrite_ownership(poll_id, from_id, to_id, new_handle))
    }

    async fn consolidate_placeholders(
        &self,
        poll_id: i64,
        real_id: i64,
        handle: Option<&str>,
        nicknames: &[String],
    ) -> anyhow::Result<u64> {
        let mut placeholders = Vec::new();
        if let Some(h) = handle {
            placeholders.push(placeholder_id(h));
        }
        for nick in nicknames {
            placeholders.push(placeholder_id(nick));
        }
        placeholders.sort_unstable();
        placeholders.dedup();

        // One lock hold covers mappings and votes together.
        let mut state = self.state.lock().unwrap();

        for mapping in state.mappings.iter_mut() {
            let by_handle = handle.is_some() && mapping.handle.as_deref() == handle;
            let by_placeholder = placeholders.contains(&mapping.user_id);

            if by_placeholder {
                mapping.user_id = real_id;
                if let Some(h) = handle {
                    mapping.handle = Some(h.to_owned());
                }
            } else if by_handle {
                mapping.user_id = real_id;
            }
        }

        let mut rewritten = 0;
        for from_id in placeholders {
            rewritten += state.rewrite_ownership(poll_id, from_id, real_id, handle);
        }

        Ok(rewritten)
    }
}

#[async_trait]
impl NicknameStore for MemoryDb {
    async fn create_if_unique(&self, mapping: &NicknameMapping) -> anyhow::Result<bool> {
        let mut state = self.state.lock().unwrap();

        if state.mappings.iter().any(|m| m.nickname == mapping.nickname) {
            return Ok(false);
        }

        state.mappings.push(mapping.clone());
        Ok(true)
    }

    async fn by_nickname(&self, nickname: &str) -> anyhow::Result<Option<NicknameMapping>> {
        let state = self.state.lock().unwrap();

        Ok(state.mappings.iter().find(|m| m.nickname == nickname).cloned())
    }

    async fn by_handle(&self, handle: &str) -> anyhow::Result<Option<NicknameMapping>> {
        let state = self.state.lock().unwrap();

        Ok(state
            .mappings
            .iter()
            .find(|m| m.handle.as_deref() == Some(handle))
            .cloned())
    }

    async fn by_user_id(&self, user_id: i64) -> anyhow::Result<Option<NicknameMapping>> {
        let state = self.state.lock().unwrap();

        Ok(state.mappings.iter().find(|m| m.user_id == user_id).cloned())
    }

    async fn by_identities(&self, user_ids: &[i64]) -> anyhow::Result<Vec<NicknameMapping>> {
        let state = self.state.lock().unwrap();

        Ok(state
            .mappings
            .iter()
            .filter(|m| user_ids.contains(&m.user_id))
            .cloned()
            .collect())
    }

    async fn nicknames_for_participant(
        &self,
        user_id: i64,
        handle: Option<&str>,
    ) -> anyhow::Result<Vec<String>> {
        let state = self.state.lock().unwrap();

        Ok(state
            .mappings
            .iter()
            .filter(|m| {
                m.user_id == user_id || (handle.is_some() && m.handle.as_deref() == handle)
            })
            .map(|m| m.nickname.clone())
            .collect())
    }
}
