use cardwatch_core::EventRecord;

use crate::config::IngestRules;
use crate::normalize::parse_date;
use crate::run::RunStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// `undated` is set when the event date could not be parsed; such events
    /// are kept rather than silently dropped.
    Accepted { undated: bool },
    RejectedNonMatching,
    RejectedTooOld,
}

impl Classification {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Decides whether an event record belongs to the tracked promotion and is
/// recent enough to ingest.
#[derive(Debug, Clone, Copy)]
pub struct Classifier<'a> {
    rules: &'a IngestRules,
}

impl<'a> Classifier<'a> {
    pub fn new(rules: &'a IngestRules) -> Self {
        Self { rules }
    }

    pub fn matches_promotion(&self, name: Option<&str>, url: Option<&str>) -> bool {
        let name = name.unwrap_or_default().trim().to_lowercase();
        let url = url.unwrap_or_default().to_lowercase();
        name.starts_with(&self.rules.numbered_prefix)
            || name.contains(&self.rules.fight_night_marker)
            || url.contains(&self.rules.url_segment)
    }

    /// Age cutoff first, then domain match.
    pub fn classify(&self, record: &EventRecord, stats: &mut RunStats) -> Classification {
        stats.events_processed += 1;
        let date = parse_date(record.event_date.as_deref());

        if date.is_some_and(|d| d < self.rules.min_event_date) {
            stats.events_skipped_old += 1;
            return Classification::RejectedTooOld;
        }
        if !self.matches_promotion(record.name.as_deref(), record.url.as_deref()) {
            stats.events_skipped_non_matching += 1;
            return Classification::RejectedNonMatching;
        }
        if date.is_none() {
            stats.events_undated += 1;
        }
        Classification::Accepted {
            undated: date.is_none(),
        }
    }
}
