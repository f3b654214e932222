//! Canonical Event / Bout entities as persisted by the store.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

pub type EventId = i64;
pub type BoutId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Numbered,
    FightNight,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Numbered => "numbered",
            Self::FightNight => "fight_night",
        }
    }
}

/// Event lifecycle. Only moves `Scheduled -> Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    #[default]
    Scheduled,
    Completed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Location {
    pub venue: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub name: Option<String>,
    pub slug: String,
    pub url: Option<String>,
    pub promotion: String,
    pub category: EventCategory,
    pub date: Option<NaiveDate>,
    /// Civil start time in `timezone`; resolved to an instant only when scheduling.
    pub start_time: Option<NaiveTime>,
    /// IANA timezone name the start time is expressed in.
    pub timezone: String,
    pub location: Option<Location>,
    pub broadcast: Option<String>,
    pub total_bouts: u32,
    pub status: EventStatus,
    pub main_event_bout_id: Option<BoutId>,
    /// Asset key of the event poster, set by the poster pipeline only.
    #[serde(default)]
    pub poster_key: Option<String>,
    /// Indices of result windows already fired. Append-only.
    #[serde(default)]
    pub fired_windows: BTreeSet<u8>,
    pub last_updated: DateTime<Utc>,
}

impl Event {
    pub fn is_scheduled(&self) -> bool {
        self.status == EventStatus::Scheduled
    }

    pub fn has_fired(&self, window: u8) -> bool {
        self.fired_windows.contains(&window)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardSection {
    Main,
    Prelim,
    EarlyPrelim,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoutStatus {
    Scheduled,
    Cancelled,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CornerSide {
    Red,
    Blue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FightRecord {
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
}

/// One entry of a fighter's recent-form sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormMark {
    #[serde(rename = "W")]
    Win,
    #[serde(rename = "L")]
    Loss,
    #[serde(rename = "D")]
    Draw,
    #[serde(rename = "NC")]
    NoContest,
}

impl FormMark {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "W" | "WIN" => Some(Self::Win),
            "L" | "LOSS" => Some(Self::Loss),
            "D" | "DRAW" => Some(Self::Draw),
            "NC" | "NO CONTEST" => Some(Self::NoContest),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ranking {
    pub position: u32,
    pub division: String,
}

/// Snapshot of one participant as of this bout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Corner {
    pub name: String,
    pub nickname: Option<String>,
    pub nationality: Option<String>,
    pub fighting_out_of: Option<String>,
    pub age_at_fight_years: Option<u32>,
    pub height_cm: Option<u32>,
    pub reach_cm: Option<u32>,
    pub record: FightRecord,
    pub recent_form: Vec<FormMark>,
    pub ranking: Option<Ranking>,
    /// Source-assigned fighter id, stable across bouts.
    pub external_id: Option<String>,
    pub external_url: Option<String>,
    /// Asset key of the fighter's stored headshot, joined by `external_id`.
    #[serde(default)]
    pub image_key: Option<String>,
}

impl Corner {
    pub const PLACEHOLDER_NAME: &'static str = "TBD";

    /// Complete stand-in used when the source has no fighter for a corner yet.
    pub fn placeholder() -> Self {
        Self {
            name: Self::PLACEHOLDER_NAME.to_string(),
            nickname: None,
            nationality: None,
            fighting_out_of: None,
            age_at_fight_years: None,
            height_cm: None,
            reach_cm: None,
            record: FightRecord::default(),
            recent_form: Vec::new(),
            ranking: None,
            external_id: None,
            external_url: None,
            image_key: None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.external_id.is_none() && self.name == Self::PLACEHOLDER_NAME
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinishMethod {
    #[serde(rename = "KO/TKO")]
    KoTko,
    #[serde(rename = "Submission")]
    Submission,
    #[serde(rename = "Decision")]
    Decision,
    #[serde(rename = "DQ")]
    Dq,
    #[serde(rename = "No Contest")]
    NoContest,
    #[serde(rename = "Draw")]
    Draw,
}

impl FinishMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KoTko => "KO/TKO",
            Self::Submission => "Submission",
            Self::Decision => "Decision",
            Self::Dq => "DQ",
            Self::NoContest => "No Contest",
            Self::Draw => "Draw",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoutResult {
    /// `None` for draws and no contests.
    pub winner: Option<CornerSide>,
    pub method: Option<FinishMethod>,
    pub method_detail: Option<String>,
    pub round: Option<u32>,
    pub time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bout {
    pub id: BoutId,
    pub event_id: EventId,
    pub slug: String,
    pub url: Option<String>,
    pub weight_class: Option<String>,
    pub weight_lbs: Option<u32>,
    pub gender: Gender,
    pub rounds_scheduled: u32,
    pub is_title_fight: bool,
    pub card_section: CardSection,
    pub card_order: Option<u32>,
    pub is_main_event: bool,
    pub is_co_main_event: bool,
    pub status: BoutStatus,
    pub red: Corner,
    pub blue: Corner,
    pub result: Option<BoutResult>,
    pub bout_date: Option<NaiveDate>,
    pub broadcast: Option<String>,
    pub last_updated: DateTime<Utc>,
}

impl Bout {
    /// A recorded result freezes the bout against further ingestion writes.
    pub fn is_final(&self) -> bool {
        self.result.is_some()
    }

    pub fn corner(&self, side: CornerSide) -> &Corner {
        match side {
            CornerSide::Red => &self.red,
            CornerSide::Blue => &self.blue,
        }
    }

    pub fn corner_mut(&mut self, side: CornerSide) -> &mut Corner {
        match side {
            CornerSide::Red => &mut self.red,
            CornerSide::Blue => &mut self.blue,
        }
    }

    /// Corners whose source id is `external_id`.
    pub fn sides_of(&self, external_id: &str) -> Vec<CornerSide> {
        [CornerSide::Red, CornerSide::Blue]
            .into_iter()
            .filter(|side| self.corner(*side).external_id.as_deref() == Some(external_id))
            .collect()
    }
}
