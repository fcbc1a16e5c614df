use std::collections::HashMap;

use chrono::{FixedOffset, NaiveDate, NaiveTime, Utc};

pub const DEFAULT_MIN_PLAYERS: usize = 11;

/// Per-venue settings, passed into the engine at construction. There is no
/// process-global venue registry; anything the engine needs to know about a
/// venue lives here.
#[derive(Debug, Clone)]
pub struct VenueConfig {
    pub venue_id: i64,
    pub admins: Vec<i64>,
    pub min_players: usize,
    /// Earliest start the invitation offers.
    pub first_time: NaiveTime,
    /// Fallback start when the first band alone can't field a game.
    pub second_time: NaiveTime,
    pub utc_offset_hours: i32,
    pub auto_pin: bool,
}

impl VenueConfig {
    pub fn defaults(venue_id: i64) -> Self {
        Self {
            venue_id,
            admins: Vec::new(),
            min_players: DEFAULT_MIN_PLAYERS,
            first_time: NaiveTime::from_hms_opt(19, 0, 0).expect("valid time"),
            second_time: NaiveTime::from_hms_opt(20, 0, 0).expect("valid time"),
            utc_offset_hours: 0,
            auto_pin: true,
        }
    }

    /// The venue-local calendar day. Event-date comparisons are date-only,
    /// never timestamp comparisons.
    pub fn today(&self) -> NaiveDate {
        let offset = FixedOffset::east_opt(self.utc_offset_hours * 3600)
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset"));
        Utc::now().with_timezone(&offset).date_naive()
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admins.contains(&user_id)
    }
}

pub struct ConfigTable {
    venues: HashMap<i64, VenueConfig>,
    fallback: VenueConfig,
}

impl ConfigTable {
    pub fn new(venues: Vec<VenueConfig>) -> Self {
        Self {
            venues: venues.into_iter().map(|v| (v.venue_id, v)).collect(),
            fallback: VenueConfig::defaults(0),
        }
    }

    /// Unconfigured venues fall back to the defaults, so a poll in a venue
    /// the operator never described still behaves sensibly.
    pub fn venue(&self, venue_id: i64) -> &VenueConfig {
        self.venues.get(&venue_id).unwrap_or(&self.fallback)
    }
}
