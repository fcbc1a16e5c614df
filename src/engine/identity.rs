use std::collections::HashMap;

use evlog::meta;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::db::schema::{Gender, NicknameMapping};
use crate::engine::error::EngineResult;
use crate::engine::Engine;
use crate::runtime::get_logger;

const HANDLE_MARKER: char = '@';

static VALIDATE_NICKNAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_ \-]*$").unwrap());

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Deterministic negative identifier for a participant known only by text
/// (a handle or a nickname). FNV-1a 64 over the UTF-8 bytes, sign bit masked
/// off, negated; real platform ids are non-negative, so the spaces never
/// collide.
///
/// Placeholder ids are persisted in the vote table. The hash is a versioned
/// format: changing it strands every vote recorded under the old values.
pub fn placeholder_id(text: &str) -> i64 {
    let mut hash = FNV_OFFSET;
    for byte in text.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }

    -((hash & 0x7fff_ffff_ffff_ffff) as i64)
}

fn normalize_handle(handle: &str) -> String {
    handle.trim().trim_start_matches(HANDLE_MARKER).to_owned()
}

/// Canonical identity resolved for a manually entered vote target.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTarget {
    pub user_id: i64,
    pub handle: Option<String>,
    pub display_name: String,
}

impl Engine {
    /// Registers a nickname for a participant. When no numeric id is given,
    /// one is backfilled from vote history by handle; failing that, the
    /// mapping is parked on a placeholder id so later votes under the same
    /// text converge on it. When the mapping lands on a real id, the
    /// participant's placeholder votes in the venue's active poll are
    /// consolidated right away. Returns false (not an error) when the
    /// nickname is already taken or malformed.
    pub async fn create_nickname(
        &self,
        venue_id: i64,
        user_id: Option<i64>,
        handle: Option<&str>,
        nickname: &str,
        gender: Option<Gender>,
    ) -> EngineResult<bool> {
        let nickname = nickname.trim();
        if !VALIDATE_NICKNAME.is_match(nickname) {
            get_logger().info("Rejected malformed nickname.", meta! {
                "Nickname" => nickname.to_owned(),
            });
            return Ok(false);
        }

        let handle = handle.map(normalize_handle);

        let mut user_id = user_id.unwrap_or(0);
        if user_id == 0 {
            if let Some(h) = handle.as_deref() {
                if let Some(known) = self.votes.user_id_by_handle(h).await? {
                    user_id = known;
                }
            }
        }
        if user_id == 0 {
            user_id = placeholder_id(handle.as_deref().unwrap_or(nickname));
        }

        let created = self
            .nicknames
            .create_if_unique(&NicknameMapping {
                nickname: nickname.to_owned(),
                user_id,
                handle: handle.clone(),
                gender,
            })
            .await?;

        if created {
            get_logger().info("Registered nickname.", meta! {
                "Nickname" => nickname.to_owned(),
                "UserID" => user_id,
            });

            // A real id means any votes parked on placeholders for this
            // participant can be folded in now instead of waiting for the
            // next platform vote.
            if user_id > 0 {
                if let Err(e) = self
                    .ensure_user_data_consistency(venue_id, user_id, handle.as_deref())
                    .await
                {
                    let e = anyhow::Error::new(e);
                    get_logger().error_with_err(
                        "Identity consolidation failed after nickname link.",
                        &*e,
                        None,
                    );
                }
            }
        }

        Ok(created)
    }

    /// Resolves a free-text vote target to a canonical identity.
    ///
    /// `@handle` targets: nickname-linked numeric id, then vote-history id,
    /// then a placeholder from the handle text. Bare targets are nicknames:
    /// the owning identity if the nickname is known, else a placeholder from
    /// the nickname text. The priority order is what makes two manual
    /// entries under the same text converge on one identity before any real
    /// account is known.
    pub async fn resolve_vote_target(&self, target: &str) -> EngineResult<ResolvedTarget> {
        let target = target.trim();

        if let Some(rest) = target.strip_prefix(HANDLE_MARKER) {
            let handle = rest.to_owned();

            let user_id = match self.nicknames.by_handle(&handle).await? {
                Some(mapping) if mapping.user_id != 0 => mapping.user_id,
                _ => match self.votes.user_id_by_handle(&handle).await? {
                    Some(id) => id,
                    None => placeholder_id(&handle),
                },
            };

            return Ok(ResolvedTarget {
                user_id,
                handle: Some(handle.clone()),
                display_name: handle,
            });
        }

        match self.nicknames.by_nickname(target).await? {
            Some(mapping) => Ok(ResolvedTarget {
                user_id: mapping.user_id,
                handle: mapping.handle,
                display_name: target.to_owned(),
            }),
            None => Ok(ResolvedTarget {
                user_id: placeholder_id(target),
                handle: None,
                display_name: target.to_owned(),
            }),
        }
    }

    /// Reconciles a participant's history once a real numeric id is
    /// authoritatively known. Scoped to the venue's active poll: recovers a
    /// missing handle from vote history, then hands the store one
    /// transaction that points the nickname mapping(s) at the real identity
    /// and folds every placeholder-owned vote into it. Option and timestamp
    /// are never altered, and the operation is idempotent. Returns the
    /// number of votes re-owned.
    pub async fn ensure_user_data_consistency(
        &self,
        venue_id: i64,
        real_user_id: i64,
        handle: Option<&str>,
    ) -> EngineResult<u64> {
        let poll = match self.polls.latest_active_by_venue(venue_id).await? {
            Some(v) => v,
            // Nothing to consolidate without an active poll.
            None => return Ok(0),
        };

        let handle = match handle {
            Some(h) => Some(normalize_handle(h)),
            None => self.votes.handle_by_user_id(real_user_id).await?,
        };

        let nicknames = self
            .nicknames
            .nicknames_for_participant(real_user_id, handle.as_deref())
            .await?;

        let rewritten = self
            .votes
            .consolidate_placeholders(poll.id, real_user_id, handle.as_deref(), &nicknames)
            .await?;

        if rewritten > 0 {
            get_logger().info("Consolidated placeholder votes.", meta! {
                "VenueID" => venue_id,
                "PollID" => poll.id,
                "UserID" => real_user_id,
                "Rewritten" => rewritten,
            });
        }

        Ok(rewritten)
    }

    /// Batch nickname lookup keyed by numeric id, for the caller's
    /// mention/rendering layer.
    pub async fn nickname_cache(
        &self,
        user_ids: &[i64],
    ) -> EngineResult<HashMap<i64, NicknameMapping>> {
        let mappings = self.nicknames.by_identities(user_ids).await?;

        Ok(mappings.into_iter().map(|m| (m.user_id, m)).collect())
    }
}
