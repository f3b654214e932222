use std::sync::Arc;

use cardwatch_core::{EventPosterRecord, FighterImageRecord};
use cardwatch_storage::{AssetStore, ImageDownloader, Store};
use chrono::Utc;

use crate::enrich::Enricher;
use crate::run::RunStats;

/// Resolve a scraped image reference against the image host.
pub fn absolutize_image_url(raw: &str, base_url: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return Some(raw.to_string());
    }
    if let Some(rest) = raw.strip_prefix("//") {
        return Some(format!("https://{rest}"));
    }
    let base = base_url.trim_end_matches('/');
    Some(format!("{base}/{}", raw.trim_start_matches('/')))
}

/// Keep an external id usable as a single path segment.
pub(crate) fn sanitize_id(raw: &str) -> Option<String> {
    let id: String = raw
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        .collect();
    (!id.is_empty()).then_some(id)
}

/// Downloads fighter headshots and event posters and records only the
/// resulting asset keys. Best-effort: every failure is counted, none is fatal.
pub struct AssetPipeline {
    downloader: Arc<dyn ImageDownloader>,
    assets: Arc<dyn AssetStore>,
    base_url: String,
}

impl AssetPipeline {
    pub fn new(
        downloader: Arc<dyn ImageDownloader>,
        assets: Arc<dyn AssetStore>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            downloader,
            assets,
            base_url: base_url.into(),
        }
    }

    /// Download `url` and put it under `stem`. Failures are logged here.
    async fn fetch_asset(&self, url: &str, stem: &str) -> Option<String> {
        let image = match self.downloader.download(url).await {
            Ok(image) => image,
            Err(err) => {
                tracing::warn!(url = %url, transient = err.is_transient(), error = %err, "image download failed");
                return None;
            }
        };
        match self.assets.put(stem, &image.bytes, &image.content_type).await {
            Ok(stored) => {
                tracing::debug!(key = %stored.key, bytes = stored.byte_size, "image stored");
                Some(stored.key)
            }
            Err(err) => {
                tracing::warn!(stem = %stem, error = %err, "image write failed");
                None
            }
        }
    }

    pub async fn process(&self, record: &FighterImageRecord, store: &dyn Store, stats: &mut RunStats) {
        let Some(id) = sanitize_id(&record.external_id) else {
            tracing::warn!(external_id = %record.external_id, "fighter image without usable id");
            stats.images_failed += 1;
            return;
        };
        let Some(url) = absolutize_image_url(&record.image_url, &self.base_url) else {
            tracing::warn!(external_id = %id, "fighter image without url");
            stats.images_failed += 1;
            return;
        };

        let key = match store.fighter_image(&id).await {
            Ok(Some(key)) => {
                tracing::debug!(external_id = %id, key = %key, "fighter image already stored");
                stats.images_skipped += 1;
                key
            }
            Ok(None) => {
                let Some(key) = self.fetch_asset(&url, &format!("fighters/{id}")).await else {
                    stats.images_failed += 1;
                    return;
                };
                if let Err(err) = store.put_fighter_image(&id, &key).await {
                    tracing::warn!(external_id = %id, error = %err, "fighter image key not recorded");
                    stats.images_failed += 1;
                    return;
                }
                stats.images_stored += 1;
                key
            }
            Err(err) => {
                tracing::warn!(external_id = %id, error = %err, "fighter image lookup failed");
                stats.images_failed += 1;
                return;
            }
        };

        match Enricher::new(store)
            .attach_image(&record.external_id, &key, Utc::now())
            .await
        {
            Ok(bouts) => stats.images_attached += bouts,
            Err(err) => {
                tracing::warn!(external_id = %id, error = %err, "fighter image not attached to bouts");
            }
        }
    }

    /// Store the poster of a scheduled event that has none yet.
    pub async fn process_poster(&self, record: &EventPosterRecord, store: &dyn Store, stats: &mut RunStats) {
        let event_id = record.event_id;
        match store.event(event_id).await {
            Ok(Some(event)) if event.is_scheduled() && event.poster_key.is_none() => {}
            Ok(Some(_)) => {
                tracing::debug!(event_id, "event completed or poster already stored");
                stats.posters_skipped += 1;
                return;
            }
            Ok(None) => {
                tracing::debug!(event_id, "poster for an event not in the store");
                stats.posters_skipped += 1;
                return;
            }
            Err(err) => {
                tracing::warn!(event_id, error = %err, "poster event lookup failed");
                stats.posters_failed += 1;
                return;
            }
        }
        let Some(url) = absolutize_image_url(&record.image_url, &self.base_url) else {
            tracing::warn!(event_id, "poster without url");
            stats.posters_failed += 1;
            return;
        };
        let Some(key) = self.fetch_asset(&url, &format!("posters/{event_id}")).await else {
            stats.posters_failed += 1;
            return;
        };
        match store.set_event_poster(event_id, &key).await {
            Ok(true) => stats.posters_stored += 1,
            Ok(false) => stats.posters_skipped += 1,
            Err(err) => {
                tracing::warn!(event_id, error = %err, "poster key not recorded");
                stats.posters_failed += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use cardwatch_storage::{DownloadedImage, FetchError, LocalAssetStore, MemoryStore};

    use super::*;

    struct FakeDownloader {
        calls: Mutex<Vec<String>>,
        fail: bool,
    }

    impl FakeDownloader {
        fn new(fail: bool) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail,
            }
        }
    }

    #[async_trait]
    impl ImageDownloader for FakeDownloader {
        async fn download(&self, url: &str) -> Result<DownloadedImage, FetchError> {
            self.calls.lock().unwrap().push(url.to_string());
            if self.fail {
                return Err(FetchError::HttpStatus {
                    status: 404,
                    url: url.to_string(),
                });
            }
            Ok(DownloadedImage {
                final_url: url.to_string(),
                content_type: "image/png".to_string(),
                bytes: vec![0x89, b'P', b'N', b'G'],
            })
        }
    }

    fn record(id: &str, url: &str) -> FighterImageRecord {
        FighterImageRecord {
            external_id: id.to_string(),
            fighter_name: None,
            image_url: url.to_string(),
            image_type: None,
        }
    }

    #[test]
    fn image_urls_are_absolutized() {
        let base = "https://images.tapology.com/";
        assert_eq!(
            absolutize_image_url("//cdn.example.com/a.jpg", base).as_deref(),
            Some("https://cdn.example.com/a.jpg")
        );
        assert_eq!(
            absolutize_image_url("/letterbox/1.jpg", base).as_deref(),
            Some("https://images.tapology.com/letterbox/1.jpg")
        );
        assert_eq!(
            absolutize_image_url("letterbox/1.jpg", base).as_deref(),
            Some("https://images.tapology.com/letterbox/1.jpg")
        );
        assert_eq!(absolutize_image_url("  ", base), None);
    }

    #[tokio::test]
    async fn stores_key_then_skips_known_fighters() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Arc::new(FakeDownloader::new(false));
        let pipeline = AssetPipeline::new(
            downloader.clone(),
            Arc::new(LocalAssetStore::new(dir.path())),
            "https://images.tapology.com",
        );
        let store = MemoryStore::new();
        let mut stats = RunStats::default();

        let rec = record("12345", "/letterbox_images/12345.png");
        pipeline.process(&rec, &store, &mut stats).await;
        pipeline.process(&rec, &store, &mut stats).await;

        assert_eq!(stats.images_stored, 1);
        assert_eq!(stats.images_skipped, 1);
        assert_eq!(
            store.fighter_image("12345").await.unwrap().as_deref(),
            Some("fighters/12345.png")
        );
        assert!(dir.path().join("fighters/12345.png").exists());
        assert_eq!(downloader.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn download_failures_are_counted_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = AssetPipeline::new(
            Arc::new(FakeDownloader::new(true)),
            Arc::new(LocalAssetStore::new(dir.path())),
            "https://images.tapology.com",
        );
        let store = MemoryStore::new();
        let mut stats = RunStats::default();

        pipeline
            .process(&record("777", "https://img/777.jpg"), &store, &mut stats)
            .await;
        pipeline.process(&record("../", "https://img/x.jpg"), &store, &mut stats).await;

        assert_eq!(stats.images_failed, 2);
        assert_eq!(stats.images_stored, 0);
        assert!(store.fighter_image("777").await.unwrap().is_none());
    }
}
