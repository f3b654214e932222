use cardwatch_core::{BoutId, EventId};
use cardwatch_storage::{Store, StoreError};

/// Points each event at its main-event bout once that bout is stored.
pub struct BackreferenceResolver<'a> {
    store: &'a dyn Store,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// No bout of the event is flagged main event; the reference stays null.
    NoMainEvent,
    Unchanged(BoutId),
    Updated(BoutId),
}

impl<'a> BackreferenceResolver<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    pub async fn resolve_main_event(&self, event_id: EventId) -> Result<Resolution, StoreError> {
        let Some(bout_id) = self.store.find_main_event_bout(event_id).await? else {
            return Ok(Resolution::NoMainEvent);
        };
        if self.store.set_main_event_bout(event_id, bout_id).await? {
            Ok(Resolution::Updated(bout_id))
        } else {
            Ok(Resolution::Unchanged(bout_id))
        }
    }
}
