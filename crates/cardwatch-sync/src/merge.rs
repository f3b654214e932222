use std::collections::BTreeSet;

use cardwatch_core::{Bout, Event, EventId};
use cardwatch_storage::{MergeOutcome, Store, StoreError};

use crate::run::RunStats;

/// Applies normalized entities to the store through its conditional upserts
/// and tracks which events were accepted in this run.
pub struct Merger<'a> {
    store: &'a dyn Store,
    accepted: BTreeSet<EventId>,
}

impl<'a> Merger<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self {
            store,
            accepted: BTreeSet::new(),
        }
    }

    pub fn store(&self) -> &'a dyn Store {
        self.store
    }

    pub fn is_accepted(&self, event_id: EventId) -> bool {
        self.accepted.contains(&event_id)
    }

    /// Events inserted or updated in this run, ascending. Completed events
    /// are never accepted, so their bouts stay untouched.
    pub fn accepted_events(&self) -> impl Iterator<Item = EventId> + '_ {
        self.accepted.iter().copied()
    }

    pub async fn merge_event(
        &mut self,
        event: &Event,
        stats: &mut RunStats,
    ) -> Result<MergeOutcome, StoreError> {
        let outcome = self.store.merge_event(event).await?;
        match outcome {
            MergeOutcome::Inserted => stats.events_inserted += 1,
            MergeOutcome::Updated => stats.events_updated += 1,
            MergeOutcome::Skipped => {
                tracing::debug!(event_id = event.id, "event completed, leaving untouched");
                stats.events_skipped_completed += 1;
                return Ok(outcome);
            }
        }
        self.accepted.insert(event.id);
        Ok(outcome)
    }

    /// `Ok(None)` when the bout's event was not accepted in this run; such
    /// bouts never reach the store.
    pub async fn merge_bout(
        &self,
        bout: &Bout,
        stats: &mut RunStats,
    ) -> Result<Option<MergeOutcome>, StoreError> {
        if !self.is_accepted(bout.event_id) {
            tracing::debug!(bout_id = bout.id, event_id = bout.event_id, "dropping orphan bout");
            stats.bouts_orphaned += 1;
            return Ok(None);
        }
        let outcome = self.store.merge_bout(bout).await?;
        match outcome {
            MergeOutcome::Inserted => stats.bouts_inserted += 1,
            MergeOutcome::Updated => stats.bouts_updated += 1,
            MergeOutcome::Skipped => {
                tracing::debug!(bout_id = bout.id, "bout has a result, leaving untouched");
                stats.bouts_skipped_final += 1;
            }
        }
        Ok(Some(outcome))
    }
}

#[cfg(test)]
mod tests {
    use cardwatch_core::{
        BoutResult, BoutStatus, CardSection, Corner, CornerSide, EventCategory, EventStatus,
        FinishMethod, Gender, Location,
    };
    use cardwatch_storage::MemoryStore;
    use chrono::{NaiveDate, Utc};

    use super::*;

    fn event(id: EventId, venue: &str) -> Event {
        Event {
            id,
            name: Some("Fight Night 50".into()),
            slug: "ufc-fight-night-50".into(),
            url: None,
            promotion: "UFC".into(),
            category: EventCategory::FightNight,
            date: NaiveDate::from_ymd_opt(2026, 3, 1),
            start_time: None,
            timezone: "America/New_York".into(),
            location: Some(Location {
                venue: Some(venue.into()),
                city: None,
                country: None,
            }),
            broadcast: None,
            total_bouts: 0,
            status: EventStatus::Scheduled,
            main_event_bout_id: None,
            poster_key: None,
            fired_windows: Default::default(),
            last_updated: Utc::now(),
        }
    }

    fn bout(id: i64, event_id: EventId, result: Option<BoutResult>) -> Bout {
        Bout {
            id,
            event_id,
            slug: String::new(),
            url: None,
            weight_class: Some("Lightweight".into()),
            weight_lbs: Some(155),
            gender: Gender::Male,
            rounds_scheduled: 3,
            is_title_fight: false,
            card_section: CardSection::Main,
            card_order: Some(1),
            is_main_event: false,
            is_co_main_event: false,
            status: if result.is_some() {
                BoutStatus::Completed
            } else {
                BoutStatus::Scheduled
            },
            red: Corner::placeholder(),
            blue: Corner::placeholder(),
            result,
            bout_date: None,
            broadcast: None,
            last_updated: Utc::now(),
        }
    }

    fn strip_timestamp<T: serde::Serialize>(value: &T) -> serde_json::Value {
        let mut json = serde_json::to_value(value).unwrap();
        json.as_object_mut().unwrap().remove("last_updated");
        json
    }

    #[tokio::test]
    async fn event_merge_inserts_then_updates_changed_venue() {
        let store = MemoryStore::new();
        let mut stats = RunStats::default();
        let mut merger = Merger::new(&store);

        let first = merger.merge_event(&event(500, "UFC APEX"), &mut stats).await.unwrap();
        let second = merger
            .merge_event(&event(500, "Meta APEX"), &mut stats)
            .await
            .unwrap();

        assert_eq!(first, MergeOutcome::Inserted);
        assert_eq!(second, MergeOutcome::Updated);
        let stored = store.event(500).await.unwrap().unwrap();
        assert_eq!(
            stored.location.unwrap().venue.as_deref(),
            Some("Meta APEX")
        );
        assert!(merger.is_accepted(500));
    }

    #[tokio::test]
    async fn merging_twice_is_idempotent() {
        let store = MemoryStore::new();
        let mut stats = RunStats::default();
        let mut merger = Merger::new(&store);

        let e = event(1, "UFC APEX");
        merger.merge_event(&e, &mut stats).await.unwrap();
        let once = strip_timestamp(&store.event(1).await.unwrap().unwrap());
        let mut again = e.clone();
        again.last_updated = Utc::now();
        merger.merge_event(&again, &mut stats).await.unwrap();
        let twice = strip_timestamp(&store.event(1).await.unwrap().unwrap());
        assert_eq!(once, twice);

        let b = bout(10, 1, None);
        merger.merge_bout(&b, &mut stats).await.unwrap();
        let once = strip_timestamp(&store.bout(10).await.unwrap().unwrap());
        merger.merge_bout(&b, &mut stats).await.unwrap();
        let twice = strip_timestamp(&store.bout(10).await.unwrap().unwrap());
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn bout_result_survives_later_merge_without_result() {
        let store = MemoryStore::new();
        let mut stats = RunStats::default();
        let mut merger = Merger::new(&store);
        merger.merge_event(&event(1, "APEX"), &mut stats).await.unwrap();

        let ko = BoutResult {
            winner: Some(CornerSide::Red),
            method: Some(FinishMethod::KoTko),
            method_detail: None,
            round: None,
            time: None,
        };

        merger.merge_bout(&bout(900, 1, None), &mut stats).await.unwrap();
        let with_result = bout(900, 1, Some(ko.clone()));
        assert_eq!(
            merger.merge_bout(&with_result, &mut stats).await.unwrap(),
            Some(MergeOutcome::Updated)
        );
        assert_eq!(
            merger.merge_bout(&bout(900, 1, None), &mut stats).await.unwrap(),
            Some(MergeOutcome::Skipped)
        );

        let stored = store.bout(900).await.unwrap().unwrap();
        assert_eq!(stored, with_result);
        assert_eq!(stored.result, Some(ko));
        assert_eq!(stats.bouts_inserted, 1);
        assert_eq!(stats.bouts_updated, 1);
        assert_eq!(stats.bouts_skipped_final, 1);
    }

    #[tokio::test]
    async fn bouts_of_unaccepted_events_are_dropped() {
        let store = MemoryStore::new();
        let mut stats = RunStats::default();
        let merger = Merger::new(&store);

        let outcome = merger.merge_bout(&bout(5, 77, None), &mut stats).await.unwrap();
        assert_eq!(outcome, None);
        assert_eq!(stats.bouts_orphaned, 1);
        assert_eq!(store.bout_count().await, 0);
    }

    #[tokio::test]
    async fn completed_event_is_skipped_and_its_bouts_orphaned() {
        let store = MemoryStore::new();
        let mut stats = RunStats::default();
        store.merge_event(&event(2, "before")).await.unwrap();
        store.complete_event(2).await.unwrap();

        let mut merger = Merger::new(&store);
        let outcome = merger.merge_event(&event(2, "after"), &mut stats).await.unwrap();
        assert_eq!(outcome, MergeOutcome::Skipped);
        assert_eq!(stats.events_skipped_completed, 1);
        let stored = store.event(2).await.unwrap().unwrap();
        assert_eq!(stored.location.unwrap().venue.as_deref(), Some("before"));
        assert!(!merger.is_accepted(2));

        // A bout added to the card after completion never reaches the store.
        let late = merger.merge_bout(&bout(20, 2, None), &mut stats).await.unwrap();
        assert_eq!(late, None);
        assert_eq!(stats.bouts_orphaned, 1);
        assert!(store.bout(20).await.unwrap().is_none());
        assert_eq!(merger.accepted_events().count(), 0);
    }
}
