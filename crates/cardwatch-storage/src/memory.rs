use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use cardwatch_core::{Bout, BoutId, Event, EventId, EventStatus};
use chrono::Utc;
use tokio::sync::Mutex;

use crate::{MergeOutcome, Store, StoreError};

#[derive(Debug, Default)]
struct Tables {
    events: BTreeMap<EventId, Event>,
    bouts: BTreeMap<BoutId, Bout>,
    fighter_images: HashMap<String, String>,
}

/// In-process store. One lock guards all tables, so each operation is atomic
/// with respect to every other.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn event_count(&self) -> usize {
        self.tables.lock().await.events.len()
    }

    pub async fn bout_count(&self) -> usize {
        self.tables.lock().await.bouts.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn merge_event(&self, event: &Event) -> Result<MergeOutcome, StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.events.get_mut(&event.id) {
            None => {
                let mut fresh = event.clone();
                fresh.main_event_bout_id = None;
                fresh.poster_key = None;
                fresh.fired_windows.clear();
                tables.events.insert(event.id, fresh);
                Ok(MergeOutcome::Inserted)
            }
            Some(stored) if stored.status == EventStatus::Completed => Ok(MergeOutcome::Skipped),
            Some(stored) => {
                let main_event_bout_id = stored.main_event_bout_id;
                let poster_key = stored.poster_key.take();
                let fired_windows = std::mem::take(&mut stored.fired_windows);
                *stored = event.clone();
                stored.main_event_bout_id = main_event_bout_id;
                stored.poster_key = poster_key;
                stored.fired_windows = fired_windows;
                Ok(MergeOutcome::Updated)
            }
        }
    }

    async fn merge_bout(&self, bout: &Bout) -> Result<MergeOutcome, StoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.events.contains_key(&bout.event_id) {
            return Err(StoreError::MissingEvent {
                bout_id: bout.id,
                event_id: bout.event_id,
            });
        }
        match tables.bouts.get(&bout.id) {
            None => {
                tables.bouts.insert(bout.id, bout.clone());
                Ok(MergeOutcome::Inserted)
            }
            Some(stored) if stored.is_final() => Ok(MergeOutcome::Skipped),
            Some(_) => {
                tables.bouts.insert(bout.id, bout.clone());
                Ok(MergeOutcome::Updated)
            }
        }
    }

    async fn event(&self, id: EventId) -> Result<Option<Event>, StoreError> {
        Ok(self.tables.lock().await.events.get(&id).cloned())
    }

    async fn bout(&self, id: BoutId) -> Result<Option<Bout>, StoreError> {
        Ok(self.tables.lock().await.bouts.get(&id).cloned())
    }

    async fn bouts_for_event(&self, event_id: EventId) -> Result<Vec<Bout>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .bouts
            .values()
            .filter(|b| b.event_id == event_id)
            .cloned()
            .collect())
    }

    async fn bouts_for_fighter(&self, external_id: &str) -> Result<Vec<Bout>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .bouts
            .values()
            .filter(|b| !b.sides_of(external_id).is_empty())
            .cloned()
            .collect())
    }

    async fn find_main_event_bout(&self, event_id: EventId) -> Result<Option<BoutId>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .bouts
            .values()
            .find(|b| b.event_id == event_id && b.is_main_event)
            .map(|b| b.id))
    }

    async fn set_main_event_bout(
        &self,
        event_id: EventId,
        bout_id: BoutId,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let Some(event) = tables.events.get_mut(&event_id) else {
            return Ok(false);
        };
        if !event.is_scheduled() || event.main_event_bout_id == Some(bout_id) {
            return Ok(false);
        }
        event.main_event_bout_id = Some(bout_id);
        Ok(true)
    }

    async fn set_event_poster(
        &self,
        event_id: EventId,
        poster_key: &str,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.events.get_mut(&event_id) {
            Some(event) if event.is_scheduled() && event.poster_key.as_deref() != Some(poster_key) => {
                event.poster_key = Some(poster_key.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn scheduled_events(&self) -> Result<Vec<Event>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .events
            .values()
            .filter(|e| e.is_scheduled())
            .cloned()
            .collect())
    }

    async fn mark_window_fired(&self, event_id: EventId, window: u8) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.events.get_mut(&event_id) {
            Some(event) if event.is_scheduled() => Ok(event.fired_windows.insert(window)),
            _ => Ok(false),
        }
    }

    async fn complete_event(&self, event_id: EventId) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.events.get_mut(&event_id) {
            Some(event) if event.is_scheduled() => {
                event.status = EventStatus::Completed;
                event.last_updated = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn put_fighter_image(
        &self,
        external_id: &str,
        image_key: &str,
    ) -> Result<(), StoreError> {
        self.tables
            .lock()
            .await
            .fighter_images
            .insert(external_id.to_string(), image_key.to_string());
        Ok(())
    }

    async fn fighter_image(&self, external_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .tables
            .lock()
            .await
            .fighter_images
            .get(external_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use cardwatch_core::{
        BoutResult, BoutStatus, CardSection, Corner, CornerSide, EventCategory, FinishMethod,
        Gender,
    };
    use chrono::NaiveDate;

    use super::*;

    fn mk_event(id: EventId, name: &str) -> Event {
        Event {
            id,
            name: Some(name.to_string()),
            slug: format!("event-{id}"),
            url: None,
            promotion: "UFC".to_string(),
            category: EventCategory::FightNight,
            date: NaiveDate::from_ymd_opt(2026, 3, 14),
            start_time: None,
            timezone: "America/New_York".to_string(),
            location: None,
            broadcast: None,
            total_bouts: 0,
            status: EventStatus::Scheduled,
            main_event_bout_id: None,
            poster_key: None,
            fired_windows: BTreeSet::new(),
            last_updated: Utc::now(),
        }
    }

    fn mk_bout(id: BoutId, event_id: EventId, is_main_event: bool) -> Bout {
        Bout {
            id,
            event_id,
            slug: format!("bout-{id}"),
            url: None,
            weight_class: Some("Lightweight".to_string()),
            weight_lbs: Some(155),
            gender: Gender::Male,
            rounds_scheduled: 3,
            is_title_fight: false,
            card_section: CardSection::Main,
            card_order: Some(1),
            is_main_event,
            is_co_main_event: false,
            status: BoutStatus::Scheduled,
            red: Corner::placeholder(),
            blue: Corner::placeholder(),
            result: None,
            bout_date: None,
            broadcast: None,
            last_updated: Utc::now(),
        }
    }

    #[tokio::test]
    async fn completed_event_is_never_overwritten() {
        let store = MemoryStore::new();
        assert_eq!(
            store.merge_event(&mk_event(1, "before")).await.unwrap(),
            MergeOutcome::Inserted
        );
        assert!(store.complete_event(1).await.unwrap());

        let outcome = store.merge_event(&mk_event(1, "after")).await.unwrap();
        assert_eq!(outcome, MergeOutcome::Skipped);
        let stored = store.event(1).await.unwrap().unwrap();
        assert_eq!(stored.name.as_deref(), Some("before"));
        assert_eq!(stored.status, EventStatus::Completed);
        assert!(!store.complete_event(1).await.unwrap());
    }

    #[tokio::test]
    async fn event_update_keeps_backreference_and_fired_windows() {
        let store = MemoryStore::new();
        store.merge_event(&mk_event(7, "v1")).await.unwrap();
        store.merge_bout(&mk_bout(70, 7, true)).await.unwrap();
        assert!(store.set_main_event_bout(7, 70).await.unwrap());
        assert!(!store.set_main_event_bout(7, 70).await.unwrap());
        assert!(store.mark_window_fired(7, 0).await.unwrap());

        let outcome = store.merge_event(&mk_event(7, "v2")).await.unwrap();
        assert_eq!(outcome, MergeOutcome::Updated);
        let stored = store.event(7).await.unwrap().unwrap();
        assert_eq!(stored.name.as_deref(), Some("v2"));
        assert_eq!(stored.main_event_bout_id, Some(70));
        assert!(stored.has_fired(0));
    }

    #[tokio::test]
    async fn bout_with_result_is_frozen() {
        let store = MemoryStore::new();
        store.merge_event(&mk_event(1, "e")).await.unwrap();

        let mut finished = mk_bout(900, 1, false);
        finished.status = BoutStatus::Completed;
        finished.result = Some(BoutResult {
            winner: Some(CornerSide::Red),
            method: Some(FinishMethod::KoTko),
            method_detail: None,
            round: Some(2),
            time: Some("3:12".to_string()),
        });
        assert_eq!(
            store.merge_bout(&finished).await.unwrap(),
            MergeOutcome::Inserted
        );

        let outcome = store.merge_bout(&mk_bout(900, 1, false)).await.unwrap();
        assert_eq!(outcome, MergeOutcome::Skipped);
        assert_eq!(store.bout(900).await.unwrap().unwrap(), finished);
    }

    #[tokio::test]
    async fn bout_for_unknown_event_is_rejected() {
        let store = MemoryStore::new();
        let err = store.merge_bout(&mk_bout(5, 99, false)).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::MissingEvent {
                bout_id: 5,
                event_id: 99
            }
        ));
    }

    #[tokio::test]
    async fn main_bout_lookup_picks_lowest_id() {
        let store = MemoryStore::new();
        store.merge_event(&mk_event(3, "e")).await.unwrap();
        store.merge_bout(&mk_bout(32, 3, true)).await.unwrap();
        store.merge_bout(&mk_bout(31, 3, true)).await.unwrap();
        store.merge_bout(&mk_bout(30, 3, false)).await.unwrap();
        assert_eq!(store.find_main_event_bout(3).await.unwrap(), Some(31));
        assert_eq!(store.bouts_for_event(3).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn poster_key_survives_event_updates_but_not_completion() {
        let store = MemoryStore::new();
        store.merge_event(&mk_event(8, "v1")).await.unwrap();
        assert!(store.set_event_poster(8, "posters/8.jpg").await.unwrap());
        assert!(!store.set_event_poster(8, "posters/8.jpg").await.unwrap());

        store.merge_event(&mk_event(8, "v2")).await.unwrap();
        let stored = store.event(8).await.unwrap().unwrap();
        assert_eq!(stored.poster_key.as_deref(), Some("posters/8.jpg"));

        store.complete_event(8).await.unwrap();
        assert!(!store.set_event_poster(8, "posters/8.png").await.unwrap());
        assert!(!store.set_event_poster(99, "posters/99.jpg").await.unwrap());
    }

    #[tokio::test]
    async fn bouts_are_found_by_either_corner() {
        let store = MemoryStore::new();
        store.merge_event(&mk_event(1, "e")).await.unwrap();
        let mut red = mk_bout(11, 1, false);
        red.red.external_id = Some("4242".to_string());
        let mut blue = mk_bout(12, 1, false);
        blue.blue.external_id = Some("4242".to_string());
        store.merge_bout(&red).await.unwrap();
        store.merge_bout(&blue).await.unwrap();
        store.merge_bout(&mk_bout(13, 1, false)).await.unwrap();

        let ids: Vec<_> = store
            .bouts_for_fighter("4242")
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(ids, vec![11, 12]);
        assert!(store.bouts_for_fighter("7").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn window_marks_are_append_only_and_scheduled_only() {
        let store = MemoryStore::new();
        store.merge_event(&mk_event(4, "e")).await.unwrap();
        assert!(store.mark_window_fired(4, 1).await.unwrap());
        assert!(!store.mark_window_fired(4, 1).await.unwrap());
        assert_eq!(store.scheduled_events().await.unwrap().len(), 1);

        store.complete_event(4).await.unwrap();
        assert!(!store.mark_window_fired(4, 2).await.unwrap());
        assert!(store.scheduled_events().await.unwrap().is_empty());
    }
}
