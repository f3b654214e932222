//! Core domain model and raw extractor record types for cardwatch.

mod model;
mod record;

pub use model::{
    Bout, BoutId, BoutResult, BoutStatus, CardSection, Corner, CornerSide, Event, EventCategory,
    EventId, EventStatus, FightRecord, FinishMethod, FormMark, Gender, Location, Ranking,
};
pub use record::{
    BoutDetailRecord, BoutRecord, EventPosterRecord, EventRecord, FighterDetailsRecord,
    FighterImageRecord, RawAge, RawCorners, RawFighter, RawMeasure, RawRanking, RawRecord,
    RawResult, RecordError, RecordKind, RecordLine,
};

pub const CRATE_NAME: &str = "cardwatch-core";
