//! Fighter-keyed enrichment: profile details and headshot keys reach every
//! open bout a fighter appears in.

use std::collections::HashMap;

use cardwatch_core::{Bout, CornerSide, EventId, FighterDetailsRecord};
use cardwatch_storage::{MergeOutcome, Store, StoreError};
use chrono::{DateTime, Utc};

use crate::assets::sanitize_id;
use crate::normalize::apply_fighter_details;

/// Result of applying one fighter's details.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Applied {
    /// Open bouts featuring the fighter.
    pub matched: usize,
    /// Those actually rewritten.
    pub updated: usize,
}

/// Writes fighter data onto open bouts. A bout is open while it has no
/// result and its event is scheduled; the store's conditional merge checks
/// the result guard again at write time.
pub struct Enricher<'a> {
    store: &'a dyn Store,
    scheduled: HashMap<EventId, bool>,
}

impl<'a> Enricher<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self {
            store,
            scheduled: HashMap::new(),
        }
    }

    async fn event_is_scheduled(&mut self, event_id: EventId) -> Result<bool, StoreError> {
        if let Some(open) = self.scheduled.get(&event_id) {
            return Ok(*open);
        }
        let open = self
            .store
            .event(event_id)
            .await?
            .is_some_and(|event| event.is_scheduled());
        self.scheduled.insert(event_id, open);
        Ok(open)
    }

    /// Open bouts featuring `external_id`, ascending by id.
    pub async fn open_bouts(&mut self, external_id: &str) -> Result<Vec<Bout>, StoreError> {
        let mut open = Vec::new();
        for bout in self.store.bouts_for_fighter(external_id).await? {
            if !bout.is_final() && self.event_is_scheduled(bout.event_id).await? {
                open.push(bout);
            }
        }
        Ok(open)
    }

    pub async fn apply_details(
        &mut self,
        details: &FighterDetailsRecord,
        now: DateTime<Utc>,
    ) -> Result<Applied, StoreError> {
        let bouts = self.open_bouts(&details.external_id).await?;
        let mut applied = Applied {
            matched: bouts.len(),
            updated: 0,
        };
        for mut bout in bouts {
            let mut changed = false;
            for side in bout.sides_of(&details.external_id) {
                changed |= apply_fighter_details(bout.corner_mut(side), details);
            }
            if changed && self.write(&mut bout, now).await? {
                applied.updated += 1;
            }
        }
        Ok(applied)
    }

    /// Points the fighter's corners at `image_key`. Returns how many bouts
    /// were rewritten.
    pub async fn attach_image(
        &mut self,
        external_id: &str,
        image_key: &str,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut updated = 0;
        for mut bout in self.open_bouts(external_id).await? {
            let mut changed = false;
            for side in bout.sides_of(external_id) {
                let corner = bout.corner_mut(side);
                if corner.image_key.as_deref() != Some(image_key) {
                    corner.image_key = Some(image_key.to_string());
                    changed = true;
                }
            }
            if changed && self.write(&mut bout, now).await? {
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn write(&self, bout: &mut Bout, now: DateTime<Utc>) -> Result<bool, StoreError> {
        bout.last_updated = now;
        let outcome = self.store.merge_bout(bout).await?;
        if outcome == MergeOutcome::Skipped {
            tracing::debug!(bout_id = bout.id, "bout gained a result, enrichment not applied");
        }
        Ok(outcome == MergeOutcome::Updated)
    }
}

/// Fill each corner's `image_key` from the fighter images already stored,
/// so a re-merged bout keeps its headshot.
pub async fn join_known_images(store: &dyn Store, bout: &mut Bout) -> Result<(), StoreError> {
    for side in [CornerSide::Red, CornerSide::Blue] {
        let corner = bout.corner_mut(side);
        let Some(id) = corner.external_id.as_deref().and_then(sanitize_id) else {
            continue;
        };
        corner.image_key = store.fighter_image(&id).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use cardwatch_core::{
        BoutResult, BoutStatus, CardSection, Corner, Event, EventCategory, EventStatus,
        FinishMethod, Gender, RecordLine,
    };
    use cardwatch_storage::MemoryStore;
    use chrono::NaiveDate;

    use super::*;

    fn event(id: EventId) -> Event {
        Event {
            id,
            name: Some("UFC 330".into()),
            slug: "ufc-330".into(),
            url: None,
            promotion: "UFC".into(),
            category: EventCategory::Numbered,
            date: NaiveDate::from_ymd_opt(2026, 4, 11),
            start_time: None,
            timezone: "America/New_York".into(),
            location: None,
            broadcast: None,
            total_bouts: 0,
            status: EventStatus::Scheduled,
            main_event_bout_id: None,
            poster_key: None,
            fired_windows: Default::default(),
            last_updated: Utc::now(),
        }
    }

    fn fighter(name: &str, id: &str) -> Corner {
        Corner {
            name: name.into(),
            external_id: Some(id.into()),
            ..Corner::placeholder()
        }
    }

    fn bout(id: i64, event_id: EventId, red: Corner, blue: Corner) -> Bout {
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
            card_order: None,
            is_main_event: false,
            is_co_main_event: false,
            status: BoutStatus::Scheduled,
            red,
            blue,
            result: None,
            bout_date: None,
            broadcast: None,
            last_updated: Utc::now(),
        }
    }

    fn details(id: &str) -> FighterDetailsRecord {
        FighterDetailsRecord {
            external_id: id.into(),
            fighter_name: None,
            nationality: Some("Brazil".into()),
            fighting_out_of: None,
            age_years: Some(36),
            height_cm: None,
            reach_cm: None,
            record: Some(RecordLine {
                wins: 35,
                losses: 10,
                draws: 0,
            }),
            ranking: None,
        }
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.merge_event(&event(1)).await.unwrap();
        store.merge_event(&event(2)).await.unwrap();
        store
            .merge_bout(&bout(10, 1, fighter("Oliveira", "4242"), fighter("Gaethje", "77")))
            .await
            .unwrap();
        store
            .merge_bout(&bout(11, 1, fighter("Holloway", "88"), fighter("Oliveira", "4242")))
            .await
            .unwrap();
        let mut finished = bout(12, 1, fighter("Oliveira", "4242"), fighter("Chandler", "99"));
        finished.status = BoutStatus::Completed;
        finished.result = Some(BoutResult {
            winner: None,
            method: Some(FinishMethod::Draw),
            method_detail: None,
            round: Some(3),
            time: Some("5:00".into()),
        });
        store.merge_bout(&finished).await.unwrap();
        store
            .merge_bout(&bout(20, 2, fighter("Oliveira", "4242"), fighter("Poirier", "55")))
            .await
            .unwrap();
        store.complete_event(2).await.unwrap();
        store
    }

    #[tokio::test]
    async fn details_reach_every_open_bout_of_the_fighter() {
        let store = seeded().await;
        let before_final = store.bout(12).await.unwrap().unwrap();
        let before_completed = store.bout(20).await.unwrap().unwrap();

        let mut enricher = Enricher::new(&store);
        let applied = enricher.apply_details(&details("4242"), Utc::now()).await.unwrap();

        assert_eq!(applied, Applied { matched: 2, updated: 2 });
        let red = store.bout(10).await.unwrap().unwrap().red;
        assert_eq!(red.nationality.as_deref(), Some("Brazil"));
        assert_eq!(red.record.wins, 35);
        let blue = store.bout(11).await.unwrap().unwrap().blue;
        assert_eq!(blue.age_at_fight_years, Some(36));
        // Opponents are untouched.
        assert_eq!(store.bout(10).await.unwrap().unwrap().blue.nationality, None);
        // A bout with a result and a bout of a completed event are frozen.
        assert_eq!(store.bout(12).await.unwrap().unwrap(), before_final);
        assert_eq!(store.bout(20).await.unwrap().unwrap(), before_completed);

        let again = enricher.apply_details(&details("4242"), Utc::now()).await.unwrap();
        assert_eq!(again, Applied { matched: 2, updated: 0 });
        let nobody = enricher.apply_details(&details("31337"), Utc::now()).await.unwrap();
        assert_eq!(nobody, Applied::default());
    }

    #[tokio::test]
    async fn image_keys_attach_once_and_join_on_remerge() {
        let store = seeded().await;
        let mut enricher = Enricher::new(&store);
        let key = "fighters/4242.jpg";

        assert_eq!(enricher.attach_image("4242", key, Utc::now()).await.unwrap(), 2);
        assert_eq!(enricher.attach_image("4242", key, Utc::now()).await.unwrap(), 0);
        assert_eq!(
            store.bout(11).await.unwrap().unwrap().blue.image_key.as_deref(),
            Some(key)
        );
        assert_eq!(store.bout(12).await.unwrap().unwrap().red.image_key, None);

        store.put_fighter_image("4242", key).await.unwrap();
        let mut fresh = bout(10, 1, fighter("Oliveira", "4242"), fighter("Gaethje", "77"));
        join_known_images(&store, &mut fresh).await.unwrap();
        assert_eq!(fresh.red.image_key.as_deref(), Some(key));
        assert_eq!(fresh.blue.image_key, None);
    }
}
