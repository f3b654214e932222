//! Raw extractor records, decoded once at the extractor boundary.
//!
//! Identifiers are required and must be numeric (JSON numbers or numeric
//! strings). Every other field is optional and decodes leniently: a value of
//! the wrong shape becomes `None` instead of rejecting the whole record.

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::model::{BoutId, EventId};

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("malformed record: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Event,
    Bout,
    BoutDetail,
    FighterImage,
    FighterDetails,
    EventPoster,
}

/// One record emitted by an extractor, tagged by its `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawRecord {
    Event(EventRecord),
    Bout(BoutRecord),
    BoutDetail(BoutDetailRecord),
    FighterImage(FighterImageRecord),
    FighterDetails(FighterDetailsRecord),
    EventPoster(EventPosterRecord),
}

impl RawRecord {
    pub fn from_json_line(line: &str) -> Result<Self, RecordError> {
        Ok(serde_json::from_str(line)?)
    }

    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Event(_) => RecordKind::Event,
            Self::Bout(_) => RecordKind::Bout,
            Self::BoutDetail(_) => RecordKind::BoutDetail,
            Self::FighterImage(_) => RecordKind::FighterImage,
            Self::FighterDetails(_) => RecordKind::FighterDetails,
            Self::EventPoster(_) => RecordKind::EventPoster,
        }
    }

    /// Owning event, for record kinds that have one.
    pub fn event_id(&self) -> Option<EventId> {
        match self {
            Self::Event(r) => Some(r.event_id),
            Self::Bout(r) => Some(r.event_id),
            Self::BoutDetail(r) => Some(r.event_id),
            Self::EventPoster(r) => Some(r.event_id),
            Self::FighterImage(_) | Self::FighterDetails(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(deserialize_with = "numeric_id")]
    pub event_id: EventId,
    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<String>,
    /// ISO calendar date (`YYYY-MM-DD`).
    #[serde(default, deserialize_with = "lenient")]
    pub event_date: Option<String>,
    /// Civil clock time (`HH:MM`).
    #[serde(default, alias = "start_time_et", deserialize_with = "lenient")]
    pub start_time: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub timezone: Option<String>,
    #[serde(default, alias = "broadcast_us", deserialize_with = "lenient")]
    pub broadcast: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub promotion: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub owner: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub venue: Option<String>,
    /// Combined "city, country" string.
    #[serde(default, deserialize_with = "lenient")]
    pub location: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub total_bouts: Option<u32>,
    #[serde(default, alias = "tapology_url", deserialize_with = "lenient")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BoutRecord {
    #[serde(deserialize_with = "numeric_id")]
    pub event_id: EventId,
    #[serde(deserialize_with = "numeric_id")]
    pub bout_id: BoutId,
    /// Free-text card label, e.g. "Main Card" or "Early Prelim".
    #[serde(default, deserialize_with = "lenient")]
    pub card: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub order: Option<u32>,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub is_main_event: bool,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub is_co_main_event: bool,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub is_title_fight: bool,
    #[serde(default, deserialize_with = "lenient")]
    pub weight_lbs: Option<u32>,
    #[serde(default, deserialize_with = "lenient")]
    pub weight_class: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub scheduled_rounds: Option<u32>,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub cancelled: bool,
    #[serde(default, deserialize_with = "lenient")]
    pub fighters: Option<RawCorners>,
    #[serde(default, alias = "tapology_url", deserialize_with = "lenient")]
    pub url: Option<String>,
}

/// Detail-page enrichment for a bout already listed on its event card.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BoutDetailRecord {
    #[serde(deserialize_with = "numeric_id")]
    pub event_id: EventId,
    #[serde(deserialize_with = "numeric_id")]
    pub bout_id: BoutId,
    #[serde(default, deserialize_with = "lenient")]
    pub bout_date: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub broadcast: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub weight_info: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub fighters: Option<RawCorners>,
    #[serde(default, deserialize_with = "lenient")]
    pub result: Option<RawResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FighterImageRecord {
    #[serde(alias = "tapology_id", deserialize_with = "text_id")]
    pub external_id: String,
    #[serde(default, deserialize_with = "lenient")]
    pub fighter_name: Option<String>,
    pub image_url: String,
    #[serde(default, deserialize_with = "lenient")]
    pub image_type: Option<String>,
}

/// Profile-page data for one fighter, keyed by the source fighter id rather
/// than by bout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FighterDetailsRecord {
    #[serde(alias = "tapology_id", deserialize_with = "text_id")]
    pub external_id: String,
    #[serde(default, deserialize_with = "lenient")]
    pub fighter_name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub nationality: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub fighting_out_of: Option<String>,
    #[serde(default, alias = "age", deserialize_with = "lenient")]
    pub age_years: Option<u32>,
    #[serde(default, deserialize_with = "lenient")]
    pub height_cm: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub reach_cm: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub record: Option<RecordLine>,
    #[serde(default, deserialize_with = "lenient")]
    pub ranking: Option<RawRanking>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPosterRecord {
    #[serde(deserialize_with = "numeric_id")]
    pub event_id: EventId,
    #[serde(alias = "poster_image_url")]
    pub image_url: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawCorners {
    #[serde(default, deserialize_with = "lenient")]
    pub red: Option<RawFighter>,
    #[serde(default, deserialize_with = "lenient")]
    pub blue: Option<RawFighter>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawFighter {
    #[serde(default, alias = "fighter_name", deserialize_with = "lenient")]
    pub name: Option<String>,
    #[serde(default, alias = "tapology_id", deserialize_with = "lenient_text")]
    pub external_id: Option<String>,
    #[serde(default, alias = "tapology_url", deserialize_with = "lenient")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub nickname: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub nationality: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub fighting_out_of: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub age_at_fight: Option<RawAge>,
    #[serde(default, deserialize_with = "lenient")]
    pub height: Option<RawMeasure>,
    #[serde(default, deserialize_with = "lenient")]
    pub reach: Option<RawMeasure>,
    #[serde(default, deserialize_with = "lenient")]
    pub record_at_fight: Option<RecordLine>,
    #[serde(default, alias = "last_5_fights", deserialize_with = "lenient")]
    pub recent_form: Option<Vec<String>>,
    #[serde(default, alias = "ufc_ranking", deserialize_with = "lenient")]
    pub ranking: Option<RawRanking>,
}

impl RawFighter {
    /// True when the payload carries nothing that identifies or describes a fighter.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Layer `detail` over `self`; fields present in `detail` win.
    pub fn overlay(self, detail: RawFighter) -> RawFighter {
        RawFighter {
            name: detail.name.or(self.name),
            external_id: detail.external_id.or(self.external_id),
            url: detail.url.or(self.url),
            nickname: detail.nickname.or(self.nickname),
            nationality: detail.nationality.or(self.nationality),
            fighting_out_of: detail.fighting_out_of.or(self.fighting_out_of),
            age_at_fight: detail.age_at_fight.or(self.age_at_fight),
            height: detail.height.or(self.height),
            reach: detail.reach.or(self.reach),
            record_at_fight: detail.record_at_fight.or(self.record_at_fight),
            recent_form: detail.recent_form.or(self.recent_form),
            ranking: detail.ranking.or(self.ranking),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RawAge {
    #[serde(default, deserialize_with = "lenient")]
    pub years: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RawMeasure {
    #[serde(default, deserialize_with = "lenient")]
    pub cm: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecordLine {
    #[serde(default)]
    pub wins: u32,
    #[serde(default)]
    pub losses: u32,
    #[serde(default)]
    pub draws: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RawRanking {
    pub position: u32,
    #[serde(default)]
    pub division: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawResult {
    #[serde(default, deserialize_with = "lenient")]
    pub winner: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub method: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub method_detail: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub round: Option<u32>,
    #[serde(default, deserialize_with = "lenient")]
    pub time: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Int(i64),
    Text(String),
}

fn numeric_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    match IdRepr::deserialize(deserializer)? {
        IdRepr::Int(id) => Ok(id),
        IdRepr::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| D::Error::custom(format!("identifier {text:?} is not numeric"))),
    }
}

fn text_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let id = match IdRepr::deserialize(deserializer)? {
        IdRepr::Int(id) => id.to_string(),
        IdRepr::Text(text) => text.trim().to_string(),
    };
    if id.is_empty() {
        return Err(D::Error::custom("identifier is empty"));
    }
    Ok(id)
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

fn lenient_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(lenient::<D, bool>(deserializer)?.unwrap_or(false))
}

fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
