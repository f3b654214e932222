//! Persistence for cardwatch: the canonical event/bout store, fighter image
//! assets, and the HTTP client used to fetch them.

mod assets;
mod fetch;
mod memory;
mod postgres;

use async_trait::async_trait;
use cardwatch_core::{Bout, BoutId, Event, EventId};
use thiserror::Error;

pub use assets::{extension_for_content_type, AssetError, AssetStore, LocalAssetStore, StoredAsset};
pub use fetch::{
    inspect_image, DownloadedImage, FetchError, HttpClientConfig, HttpImageFetcher,
    ImageDownloader, ImageFormat, RetryPolicy,
};
pub use memory::MemoryStore;
pub use postgres::PgStore;

pub const CRATE_NAME: &str = "cardwatch-storage";

/// What a conditional upsert did with the candidate entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Updated,
    /// The stored entity is frozen (completed event, or bout with a result).
    Skipped,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("encoding {kind} {id}: {source}")]
    Encode {
        kind: &'static str,
        id: i64,
        #[source]
        source: serde_json::Error,
    },
    #[error("stored {kind} {id} is unreadable: {source}")]
    Corrupt {
        kind: &'static str,
        id: i64,
        #[source]
        source: serde_json::Error,
    },
    #[error("bout {bout_id} references unknown event {event_id}")]
    MissingEvent { bout_id: BoutId, event_id: EventId },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Persistent keyed store of events and bouts.
///
/// Every `merge_*` is a single atomic check-and-write: the frozen-state guard
/// and the write never interleave with another writer.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert, or overwrite while the stored event is still scheduled.
    /// Never touches `main_event_bout_id`, `poster_key` or `fired_windows`.
    async fn merge_event(&self, event: &Event) -> Result<MergeOutcome, StoreError>;

    /// Insert, or overwrite while the stored bout has no result.
    async fn merge_bout(&self, bout: &Bout) -> Result<MergeOutcome, StoreError>;

    async fn event(&self, id: EventId) -> Result<Option<Event>, StoreError>;

    async fn bout(&self, id: BoutId) -> Result<Option<Bout>, StoreError>;

    async fn bouts_for_event(&self, event_id: EventId) -> Result<Vec<Bout>, StoreError>;

    /// Bouts with either corner's `external_id` equal to `external_id`, by id.
    async fn bouts_for_fighter(&self, external_id: &str) -> Result<Vec<Bout>, StoreError>;

    /// Lowest-id bout of the event flagged as main event.
    async fn find_main_event_bout(&self, event_id: EventId) -> Result<Option<BoutId>, StoreError>;

    /// Returns `true` when the stored reference actually changed.
    async fn set_main_event_bout(
        &self,
        event_id: EventId,
        bout_id: BoutId,
    ) -> Result<bool, StoreError>;

    /// Record the poster asset key while the event is scheduled. Returns
    /// `true` when the stored key changed.
    async fn set_event_poster(&self, event_id: EventId, poster_key: &str)
        -> Result<bool, StoreError>;

    /// All events with status scheduled, ordered by id.
    async fn scheduled_events(&self) -> Result<Vec<Event>, StoreError>;

    /// Append `window` to the event's fired set. Returns `false` if it was
    /// already present or the event is no longer scheduled.
    async fn mark_window_fired(&self, event_id: EventId, window: u8) -> Result<bool, StoreError>;

    /// The only transition to completed.
    async fn complete_event(&self, event_id: EventId) -> Result<bool, StoreError>;

    async fn put_fighter_image(&self, external_id: &str, image_key: &str)
        -> Result<(), StoreError>;

    async fn fighter_image(&self, external_id: &str) -> Result<Option<String>, StoreError>;
}
