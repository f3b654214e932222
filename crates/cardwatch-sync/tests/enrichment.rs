use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cardwatch_adapters::{ExtractScope, Extractor, JsonlFileExtractor};
use cardwatch_storage::{DownloadedImage, FetchError, ImageDownloader, LocalAssetStore, MemoryStore, Store};
use cardwatch_sync::{ingest, AssetPipeline, IngestContext, IngestRules, RunReport};

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures/ufc")
        .join(name)
}

/// Serves a tiny JPEG for every URL and remembers what was asked for.
#[derive(Default)]
struct JpegHost {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl ImageDownloader for JpegHost {
    async fn download(&self, url: &str) -> Result<DownloadedImage, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        Ok(DownloadedImage {
            final_url: url.to_string(),
            content_type: "image/jpeg".to_string(),
            bytes: vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10],
        })
    }
}

async fn run(ctx: &IngestContext, name: &str) -> RunReport {
    let extraction = JsonlFileExtractor::new(fixture(name))
        .extract(ExtractScope::Discovery)
        .await
        .expect("extract fixture");
    ingest(ctx, ExtractScope::Discovery, extraction).await
}

#[tokio::test]
async fn enrichment_reaches_corners_and_events() {
    let assets_dir = tempfile::tempdir().unwrap();
    let host = Arc::new(JpegHost::default());
    let store = Arc::new(MemoryStore::new());
    let plain = IngestContext::new(store.clone(), IngestRules::default());
    let with_assets = plain.clone().with_assets(AssetPipeline::new(
        host.clone(),
        Arc::new(LocalAssetStore::new(assets_dir.path())),
        "https://images.tapology.com",
    ));

    assert!(run(&plain, "discovery.jsonl").await.is_complete());
    let report = run(&with_assets, "enrichment.jsonl").await;
    let s = &report.stats;

    assert!(report.is_complete());
    assert_eq!(s.fighter_details_applied, 2);
    assert_eq!(s.fighter_details_unmatched, 1);
    assert_eq!(s.fighter_details_duplicate, 1);
    assert_eq!(s.images_stored, 1);
    assert_eq!(s.images_attached, 1);
    assert_eq!(s.posters_stored, 2);
    // 1400 was never accepted, so there is no event to hang a poster on.
    assert_eq!(s.posters_skipped, 1);

    let main = store.bout(13011).await.unwrap().unwrap();
    assert_eq!(main.blue.fighting_out_of.as_deref(), Some("Monterrey, Mexico"));
    assert_eq!(main.blue.nationality.as_deref(), Some("Brazil"));
    assert_eq!(main.blue.reach_cm, Some(183));
    assert_eq!(main.blue.ranking.as_ref().unwrap().position, 1);
    assert_eq!(main.blue.image_key.as_deref(), Some("fighters/23456.jpg"));
    // Detail-page data on the other corner is untouched.
    assert_eq!(main.red.nationality.as_deref(), Some("Australia"));
    assert_eq!(main.red.image_key, None);

    let co_main = store.bout(13012).await.unwrap().unwrap();
    assert_eq!(co_main.red.record.wins, 14);
    assert_eq!(co_main.red.nationality, None);
    assert_eq!(co_main.red.age_at_fight_years, None);

    let event = store.event(1301).await.unwrap().unwrap();
    assert_eq!(event.poster_key.as_deref(), Some("posters/1301.jpg"));
    assert!(assets_dir.path().join("posters/1301.jpg").exists());
    assert!(host
        .calls
        .lock()
        .unwrap()
        .contains(&"https://images.tapology.com/poster_images/1301/ufc-325.jpg".to_string()));

    // A later discovery rewrites the card but keeps asset keys.
    assert!(run(&plain, "discovery.jsonl").await.is_complete());
    let main = store.bout(13011).await.unwrap().unwrap();
    assert_eq!(main.blue.image_key.as_deref(), Some("fighters/23456.jpg"));
    let event = store.event(1301).await.unwrap().unwrap();
    assert_eq!(event.poster_key.as_deref(), Some("posters/1301.jpg"));

    // Re-running enrichment downloads nothing new.
    let downloads = host.calls.lock().unwrap().len();
    let again = run(&with_assets, "enrichment.jsonl").await;
    assert_eq!(again.stats.images_skipped, 1);
    assert_eq!(again.stats.posters_skipped, 3);
    assert_eq!(host.calls.lock().unwrap().len(), downloads);
}

#[tokio::test]
async fn enrichment_leaves_final_bouts_alone() {
    let store = Arc::new(MemoryStore::new());
    let ctx = IngestContext::new(store.clone(), IngestRules::default());
    assert!(run(&ctx, "discovery.jsonl").await.is_complete());
    let results = JsonlFileExtractor::new(fixture("event_1301_results.jsonl"))
        .extract(ExtractScope::Event(1301))
        .await
        .unwrap();
    assert!(ingest(&ctx, ExtractScope::Event(1301), results).await.is_complete());
    let before = store.bout(13011).await.unwrap().unwrap();
    assert!(before.result.is_some());

    let report = run(&ctx, "enrichment.jsonl").await;
    // 13011 and 13012 now have results, so none of the fighters has an open bout.
    assert_eq!(report.stats.fighter_details_unmatched, 3);
    assert_eq!(report.stats.fighter_details_applied, 0);
    assert_eq!(store.bout(13011).await.unwrap().unwrap(), before);
}
