use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tokio_stream::StreamExt;

use crate::db::schema::{Gender, NewVote, NicknameMapping, OptionKind, Poll, Vote};
use crate::db::store::{NicknameStore, PollCreation, PollRestore, PollStore, VoteStore};
use crate::engine::identity::placeholder_id;

pub struct PgPollStore {
    pool: PgPool,
}

impl PgPollStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn poll_from_row(row: &PgRow) -> anyhow::Result<Poll> {
    Ok(Poll {
        id: row.try_get("id")?,
        venue_id: row.try_get("venue_id")?,
        event_date: row.try_get("event_date")?,
        active: row.try_get("active")?,
        pinned: row.try_get("pinned")?,
        invite_message_id: row.try_get("invite_message_id")?,
        results_message_id: row.try_get("results_message_id")?,
        cancel_message_id: row.try_get("cancel_message_id")?,
        collected_message_id: row.try_get("collected_message_id")?,
        external_ref: row.try_get("external_ref")?,
        time_created: row.try_get("time_created")?,
    })
}

/// Serializes lifecycle mutations for one venue within the surrounding
/// transaction. Row locks alone can't do this: `FOR UPDATE` has nothing to
/// lock when the venue has no active poll yet, so two concurrent creates
/// would both insert.
async fn lock_venue(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, venue_id: i64) -> anyhow::Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock($1);")
        .bind(venue_id)
        .execute(tx)
        .await?;

    Ok(())
}

#[async_trait]
impl PollStore for PgPollStore {
    async fn create(
        &self,
        venue_id: i64,
        event_date: NaiveDate,
        today: NaiveDate,
        pinned: bool,
    ) -> anyhow::Result<PollCreation> {
        let mut tx = self.pool.begin().await?;
        lock_venue(&mut tx, venue_id).await?;

        let row = sqlx::query(
            "SELECT * FROM poll WHERE venue_id=$1 AND active=TRUE ORDER BY id DESC LIMIT 1 FOR UPDATE;",
        )
        .bind(venue_id)
        .fetch_optional(&mut tx)
        .await?;

        let mut replaced = None;
        if let Some(row) = row {
            let mut existing = poll_from_row(&row)?;
            if existing.event_date >= today {
                return Ok(PollCreation::ActiveExists(existing));
            }

            sqlx::query("UPDATE poll SET active=FALSE, pinned=FALSE WHERE id=$1;")
                .bind(existing.id)
                .execute(&mut tx)
                .await?;

            existing.active = false;
            existing.pinned = false;
            replaced = Some(existing);
        }

        let row = sqlx::query(
            "INSERT INTO poll (venue_id, event_date, active, pinned, time_created)
             VALUES ($1, $2, TRUE, $3, NOW())
             RETURNING id, time_created;",
        )
        .bind(venue_id)
        .bind(event_date)
        .bind(pinned)
        .fetch_one(&mut tx)
        .await?;

        let poll = Poll {
            id: row.try_get("id")?,
            venue_id,
            event_date,
            active: true,
            pinned,
            invite_message_id: None,
            results_message_id: None,
            cancel_message_id: None,
            collected_message_id: None,
            external_ref: None,
            time_created: row.try_get("time_created")?,
        };

        tx.commit().await?;

        Ok(PollCreation::Created { poll, replaced })
    }

    async fn deactivate_active(&self, venue_id: i64) -> anyhow::Result<Option<Poll>> {
        let mut tx = self.pool.begin().await?;
        lock_venue(&mut tx, venue_id).await?;

        let row = sqlx::query(
            "SELECT * FROM poll WHERE venue_id=$1 AND active=TRUE ORDER BY id DESC LIMIT 1 FOR UPDATE;",
        )
        .bind(venue_id)
        .fetch_optional(&mut tx)
        .await?;

        let mut poll = match row {
            Some(row) => poll_from_row(&row)?,
            None => return Ok(None),
        };

        sqlx::query("UPDATE poll SET active=FALSE, pinned=FALSE WHERE id=$1;")
            .bind(poll.id)
            .execute(&mut tx)
            .await?;

        tx.commit().await?;

        poll.active = false;
        poll.pinned = false;
        Ok(Some(poll))
    }

    async fn reactivate_cancelled(
        &self,
        venue_id: i64,
        today: NaiveDate,
    ) -> anyhow::Result<PollRestore> {
        let mut tx = self.pool.begin().await?;
        lock_venue(&mut tx, venue_id).await?;

        let row = sqlx::query(
            "SELECT * FROM poll WHERE venue_id=$1 AND active=FALSE ORDER BY id DESC LIMIT 1 FOR UPDATE;",
        )
        .bind(venue_id)
        .fetch_optional(&mut tx)
        .await?;

        let mut poll = match row {
            Some(row) => poll_from_row(&row)?,
            None => return Ok(PollRestore::NoneCancelled),
        };

        if poll.event_date < today {
            return Ok(PollRestore::DatePassed(poll));
        }

        sqlx::query("UPDATE poll SET active=TRUE WHERE id=$1;")
            .bind(poll.id)
            .execute(&mut tx)
            .await?;

        tx.commit().await?;

        poll.active = true;
        Ok(PollRestore::Restored(poll))
    }

    async fn set_pinned_active(
        &self,
        venue_id: i64,
        pinned: bool,
    ) -> anyhow::Result<Option<Poll>> {
        let mut tx = self.pool.begin().await?;
        lock_venue(&mut tx, venue_id).await?;

        let row = sqlx::query(
            "SELECT * FROM poll WHERE venue_id=$1 AND active=TRUE ORDER BY id DESC LIMIT 1 FOR UPDATE;",
        )
        .bind(venue_id)
        .fetch_optional(&mut tx)
        .await?;

        let mut poll = match row {
            Some(row) => poll_from_row(&row)?,
            None => return Ok(None),
        };

        sqlx::query("UPDATE poll SET pinned=$2 WHERE id=$1;")
            .bind(poll.id)
            .bind(pinned)
            .execute(&mut tx)
            .await?;

        tx.commit().await?;

        poll.pinned = pinned;
        Ok(Some(poll))
    }

    async fn latest_active_by_venue(&self, venue_id: i64) -> anyhow::Result<Option<Poll>> {
        let row = sqlx::query(
            "SELECT * FROM poll WHERE venue_id=$1 AND active=TRUE ORDER BY id DESC LIMIT 1;",
        )
        .bind(venue_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(poll_from_row).transpose()
    }

    async fn latest_cancelled_by_venue(&self, venue_id: i64) -> anyhow::Result<Option<Poll>> {
        let row = sqlx::query(
            "SELECT * FROM poll WHERE venue_id=$1 AND active=FALSE ORDER BY id DESC LIMIT 1;",
        )
        .bind(venue_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(poll_from_row).transpose()
    }

    async fn latest_any_by_venue(&self, venue_id: i64) -> anyhow::Result<Option<Poll>> {
        let row = sqlx::query("SELECT * FROM poll WHERE venue_id=$1 ORDER BY id DESC LIMIT 1;")
            .bind(venue_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(poll_from_row).transpose()
    }

    async fn by_external_ref(&self, external_ref: &str) -> anyhow::Result<Option<Poll>> {
        let row = sqlx::query("SELECT * FROM poll WHERE external_ref=$1 ORDER BY id DESC LIMIT 1;")
            .bind(external_ref)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(poll_from_row).transpose()
    }

    async fn update(&self, poll: &Poll) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE poll
             SET venue_id=$2, event_date=$3, active=$4, pinned=$5,
                 invite_message_id=$6, results_message_id=$7,
                 cancel_message_id=$8, collected_message_id=$9, external_ref=$10
             WHERE id=$1;",
        )
        .bind(poll.id)
        .bind(poll.venue_id)
        .bind(poll.event_date)
        .bind(poll.active)
        .bind(poll.pinned)
        .bind(poll.invite_message_id)
        .bind(poll.results_message_id)
        .bind(poll.cancel_message_id)
        .bind(poll.collected_message_id)
        .bind(poll.external_ref.as_deref())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

pub struct PgVoteStore {
    pool: PgPool,
}

impl PgVoteStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn vote_from_row(row: &PgRow) -> anyhow::Result<Vote> {
    let index: i16 = row.try_get("option_kind")?;
    let option = OptionKind::from_index(index)
        .ok_or_else(|| anyhow::Error::msg(format!("unknown option index {}", index)))?;

    Ok(Vote {
        id: row.try_get("id")?,
        poll_id: row.try_get("poll_id")?,
        user_id: row.try_get("user_id")?,
        handle: row.try_get("handle")?,
        display_name: row.try_get("display_name")?,
        option,
        manual: row.try_get("manual")?,
        submitted_at: row.try_get("submitted_at")?,
    })
}

#[async_trait]
impl VoteStore for PgVoteStore {
    async fn append(&self, vote: &NewVote) -> anyhow::Result<Vote> {
        let row = sqlx::query(
            "INSERT INTO vote (poll_id, user_id, handle, display_name, option_kind, manual, submitted_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING id;",
        )
        .bind(vote.poll_id)
        .bind(vote.user_id)
        .bind(vote.handle.as_deref())
        .bind(&vote.display_name)
        .bind(vote.option.index())
        .bind(vote.manual)
        .bind(vote.submitted_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(Vote {
            id: row.try_get("id")?,
            poll_id: vote.poll_id,
            user_id: vote.user_id,
            handle: vote.handle.clone(),
            display_name: vote.display_name.clone(),
            option: vote.option,
            manual: vote.manual,
            submitted_at: vote.submitted_at,
        })
    }

    async fn all_for_poll(&self, poll_id: i64) -> anyhow::Result<Vec<Vote>> {
        let mut stream = sqlx::query("SELECT * FROM vote WHERE poll_id=$1 ORDER BY id;")
            .bind(poll_id)
            .fetch(&self.pool);

        let mut result = Vec::new();
        while let Some(row) = stream.try_next().await? {
            result.push(vote_from_row(&row)?);
        }

        Ok(result)
    }

    async fn user_id_by_handle(&self, handle: &str) -> anyhow::Result<Option<i64>> {
        let row = sqlx::query(
            "SELECT user_id FROM vote WHERE handle=$1 AND user_id > 0 ORDER BY id DESC LIMIT 1;",
        )
        .bind(handle)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.try_get("user_id")).transpose().map_err(Into::into)
    }

    async fn handle_by_user_id(&self, user_id: i64) -> anyhow::Result<Option<String>> {
        let row = sqlx::query(
            "SELECT handle FROM vote WHERE user_id=$1 AND handle IS NOT NULL ORDER BY id DESC LIMIT 1;",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.try_get("handle")).transpose().map_err(Into::into)
    }

    async fn rewrite_ownership(
        &self,
        poll_id: i64,
        from_id: i64,
        to_id: i64,
        new_handle: Option<&str>,
    ) -> anyhow::Result<u64> {
        let r = sqlx::query(
            "UPDATE vote SET user_id=$3, handle=COALESCE(handle, $4)
             WHERE poll_id=$1 AND user_id=$2;",
        )
        .bind(poll_id)
        .bind(from_id)
        .bind(to_id)
        .bind(new_handle)
        .execute(&self.pool)
        .await?;

        Ok(r.rows_affected())
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

        let mut tx = self.pool.begin().await?;

        // Mappings move in the same transaction as the votes; a crash here
        // can never re-point the mapping while its votes stay stranded.
        if let Some(h) = handle {
            sqlx::query("UPDATE nickname SET user_id=$2 WHERE handle=$1;")
                .bind(h)
                .bind(real_id)
                .execute(&mut tx)
                .await?;

            for from_id in &placeholders {
                sqlx::query("UPDATE nickname SET user_id=$2, handle=$3 WHERE user_id=$1;")
                    .bind(*from_id)
                    .bind(real_id)
                    .bind(h)
                    .execute(&mut tx)
                    .await?;
            }
        } else {
            for from_id in &placeholders {
                sqlx::query("UPDATE nickname SET user_id=$2 WHERE user_id=$1;")
                    .bind(*from_id)
                    .bind(real_id)
                    .execute(&mut tx)
                    .await?;
            }
        }

        let mut rewritten = 0;
        for from_id in placeholders {
            let r = sqlx::query(
                "UPDATE vote SET user_id=$3, handle=COALESCE(handle, $4)
                 WHERE poll_id=$1 AND user_id=$2;",
            )
            .bind(poll_id)
            .bind(from_id)
            .bind(real_id)
            .bind(handle)
            .execute(&mut tx)
            .await?;

            rewritten += r.rows_affected();
        }

        tx.commit().await?;

        Ok(rewritten)
    }
}

pub struct PgNicknameStore {
    pool: PgPool,
}

impl PgNicknameStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn nickname_from_row(row: &PgRow) -> anyhow::Result<NicknameMapping> {
    let gender: Option<String> = row.try_get("gender")?;

    Ok(NicknameMapping {
        nickname: row.try_get("nickname")?,
        user_id: row.try_get("user_id")?,
        handle: row.try_get("handle")?,
        gender: gender.as_deref().and_then(Gender::from_code),
    })
}

#[async_trait]
impl NicknameStore for PgNicknameStore {
    async fn create_if_unique(&self, mapping: &NicknameMapping) -> anyhow::Result<bool> {
        let r = sqlx::query(
            "INSERT INTO nickname (nickname, user_id, handle, gender)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (nickname) DO NOTHING;",
        )
        .bind(&mapping.nickname)
        .bind(mapping.user_id)
        .bind(mapping.handle.as_deref())
        .bind(mapping.gender.map(Gender::code))
        .execute(&self.pool)
        .await?;

        Ok(r.rows_affected() > 0)
    }

    async fn by_nickname(&self, nickname: &str) -> anyhow::Result<Option<NicknameMapping>> {
        let row = sqlx::query("SELECT * FROM nickname WHERE nickname=$1;")
            .bind(nickname)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(nickname_from_row).transpose()
    }

    async fn by_handle(&self, handle: &str) -> anyhow::Result<Option<NicknameMapping>> {
        let row = sqlx::query("SELECT * FROM nickname WHERE handle=$1 LIMIT 1;")
            .bind(handle)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(nickname_from_row).transpose()
    }

    async fn by_user_id(&self, user_id: i64) -> anyhow::Result<Option<NicknameMapping>> {
        let row = sqlx::query("SELECT * FROM nickname WHERE user_id=$1 LIMIT 1;")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(nickname_from_row).transpose()
    }

    async fn by_identities(&self, user_ids: &[i64]) -> anyhow::Result<Vec<NicknameMapping>> {
        let mut stream = sqlx::query("SELECT * FROM nickname WHERE user_id = ANY($1);")
            .bind(user_ids.to_vec())
            .fetch(&self.pool);

        let mut result = Vec::new();
        while let Some(row) = stream.try_next().await? {
            result.push(nickname_from_row(&row)?);
        }

        Ok(result)
    }

    async fn nicknames_for_participant(
        &self,
        user_id: i64,
        handle: Option<&str>,
    ) -> anyhow::Result<Vec<String>> {
        let mut stream = sqlx::query(
            "SELECT nickname FROM nickname
             WHERE user_id=$1 OR ($2::TEXT IS NOT NULL AND handle=$2);",
        )
        .bind(user_id)
        .bind(handle)
        .fetch(&self.pool);

        let mut result = Vec::new();
        while let Some(row) = stream.try_next().await? {
            result.push(row.try_get("nickname")?);
        }

        Ok(result)
    }
}
