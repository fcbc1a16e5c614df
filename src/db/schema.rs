use chrono::{DateTime, NaiveDate, Utc};

/// One invitation cycle for a single event date within a venue. At most one
/// poll per venue is active at any instant; polls are deactivated, never
/// deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct Poll {
    pub id: i64,
    pub venue_id: i64,
    pub event_date: NaiveDate,
    pub active: bool,
    pub pinned: bool,
    /// Opaque message handles owned by the caller; the engine only stores
    /// them.
    pub invite_message_id: Option<i64>,
    pub results_message_id: Option<i64>,
    pub cancel_message_id: Option<i64>,
    pub collected_message_id: Option<i64>,
    /// Opaque platform poll reference, used for reverse lookup of answers.
    pub external_ref: Option<String>,
    pub time_created: DateTime<Utc>,
}

/// One timestamped attendance submission. The vote table is append-only;
/// consolidation may rewrite `user_id`/`handle`, nothing else.
#[derive(Debug, Clone, PartialEq)]
pub struct Vote {
    pub id: i64,
    pub poll_id: i64,
    /// Negative values are deterministic placeholders for participants not
    /// yet linked to a real platform account.
    pub user_id: i64,
    pub handle: Option<String>,
    pub display_name: String,
    pub option: OptionKind,
    /// True when an operator entered the vote on someone's behalf.
    pub manual: bool,
    pub submitted_at: DateTime<Utc>,
}

/// A vote about to be appended; the store assigns the row id.
#[derive(Debug, Clone)]
pub struct NewVote {
    pub poll_id: i64,
    pub user_id: i64,
    pub handle: Option<String>,
    pub display_name: String,
    pub option: OptionKind,
    pub manual: bool,
    pub submitted_at: DateTime<Utc>,
}

/// Links a globally unique display nickname to a participant identity.
#[derive(Debug, Clone, PartialEq)]
pub struct NicknameMapping {
    pub nickname: String,
    pub user_id: i64,
    pub handle: Option<String>,
    pub gender: Option<Gender>,
}

/// Display prefixing only; never consulted by ranking or quorum logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn code(self) -> &'static str {
        match self {
            Gender::Male => "m",
            Gender::Female => "f",
        }
    }

    pub fn from_code(code: &str) -> Option<Gender> {
        match code {
            "m" => Some(Gender::Male),
            "f" => Some(Gender::Female),
            _ => None,
        }
    }
}

/// The closed set of attendance choices. Declaration order is the display
/// and grouping order; `Retracted` sorts before everything and is excluded
/// from the current-vote view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OptionKind {
    Retracted,
    FirstTime,
    SecondTime,
    Later,
    Undecided,
    NotComing,
}

impl OptionKind {
    pub fn index(self) -> i16 {
        match self {
            OptionKind::Retracted => -1,
            OptionKind::FirstTime => 0,
            OptionKind::SecondTime => 1,
            OptionKind::Later => 2,
            OptionKind::Undecided => 3,
            OptionKind::NotComing => 4,
        }
    }

    pub fn from_index(index: i16) -> Option<OptionKind> {
        match index {
            -1 => Some(OptionKind::Retracted),
            0 => Some(OptionKind::FirstTime),
            1 => Some(OptionKind::SecondTime),
            2 => Some(OptionKind::Later),
            3 => Some(OptionKind::Undecided),
            4 => Some(OptionKind::NotComing),
            _ => None,
        }
    }

    pub fn is_attending(self) -> bool {
        matches!(
            self,
            OptionKind::FirstTime | OptionKind::SecondTime | OptionKind::Later
        )
    }
}
