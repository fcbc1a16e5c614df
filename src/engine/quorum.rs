use chrono::NaiveTime;

use crate::db::schema::{OptionKind, Poll, Vote};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::Engine;

/// The two concrete start bands an invitation offers. Voters who picked
/// `Later` have no band of their own; they only ever count as arriving late.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    First,
    Second,
}

/// Current votes split by attendance band, the input to the quorum decision.
#[derive(Debug, Default)]
pub struct BandVotes {
    pub first: Vec<Vote>,
    pub second: Vec<Vote>,
    pub later: Vec<Vote>,
}

impl BandVotes {
    pub fn from_current(current: Vec<Vote>) -> Self {
        let mut bands = BandVotes::default();

        for vote in current {
            match vote.option {
                OptionKind::FirstTime => bands.first.push(vote),
                OptionKind::SecondTime => bands.second.push(vote),
                OptionKind::Later => bands.later.push(vote),
                _ => {}
            }
        }

        bands
    }
}

#[derive(Debug)]
pub struct StartDecision {
    /// False is a normal outcome, not an error; callers branch on it.
    pub enough_players: bool,
    pub start: Option<Band>,
    pub playing: Vec<Vote>,
    pub arriving_later: Vec<Vote>,
}

/// Decides whether the event proceeds and from which band, always starting
/// as early as possible. Thresholds are inclusive. The asymmetry is
/// deliberate: the first band alone can carry the game, the second band only
/// ever tops it up.
pub fn determine_start(bands: BandVotes, minimum: usize) -> StartDecision {
    let BandVotes { first, second, later } = bands;

    if first.len() >= minimum {
        let mut arriving_later = second;
        arriving_later.extend(later);

        return StartDecision {
            enough_players: true,
            start: Some(Band::First),
            playing: first,
            arriving_later,
        };
    }

    if first.len() + second.len() >= minimum {
        let mut playing = first;
        playing.extend(second);

        return StartDecision {
            enough_players: true,
            start: Some(Band::Second),
            playing,
            arriving_later: later,
        };
    }

    StartDecision {
        enough_players: false,
        start: None,
        playing: Vec::new(),
        arriving_later: Vec::new(),
    }
}

/// Quorum decision for a venue's active poll, with the winning band mapped
/// to the venue's configured start time.
#[derive(Debug)]
pub struct QuorumReport {
    pub poll: Poll,
    pub start_time: Option<NaiveTime>,
    pub decision: StartDecision,
}

impl Engine {
    pub async fn quorum_for_venue(&self, venue_id: i64) -> EngineResult<QuorumReport> {
        let poll = self
            .polls
            .latest_active_by_venue(venue_id)
            .await?
            .ok_or(EngineError::NoActivePoll)?;

        let current = self.current_votes(poll.id).await?;
        let bands = BandVotes::from_current(current);

        let venue = self.config.venue(venue_id);
        let decision = determine_start(bands, venue.min_players);

        let start_time = decision.start.map(|band| match band {
            Band::First => venue.first_time,
            Band::Second => venue.second_time,
        });

        Ok(QuorumReport {
            poll,
            start_time,
            decision,
        })
    }
}
