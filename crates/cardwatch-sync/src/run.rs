use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use cardwatch_adapters::{ExtractScope, Extraction};
use cardwatch_core::{
    BoutDetailRecord, BoutId, BoutRecord, EventId, EventPosterRecord, EventRecord,
    FighterDetailsRecord, FighterImageRecord, RawRecord,
};
use cardwatch_storage::Store;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::assets::AssetPipeline;
use crate::classify::{Classification, Classifier};
use crate::config::IngestRules;
use crate::dedup::SeenIds;
use crate::enrich::{join_known_images, Enricher};
use crate::merge::Merger;
use crate::normalize::{normalize_bout, normalize_event};
use crate::resolve::{BackreferenceResolver, Resolution};

/// Store, rules and optional asset pipeline shared by every run.
#[derive(Clone)]
pub struct IngestContext {
    pub store: Arc<dyn Store>,
    pub rules: Arc<IngestRules>,
    pub assets: Option<Arc<AssetPipeline>>,
}

impl IngestContext {
    pub fn new(store: Arc<dyn Store>, rules: IngestRules) -> Self {
        Self {
            store,
            rules: Arc::new(rules),
            assets: None,
        }
    }

    pub fn with_assets(mut self, assets: AssetPipeline) -> Self {
        self.assets = Some(Arc::new(assets));
        self
    }
}

/// Per-run outcome counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub records: usize,
    pub malformed: usize,

    pub events_processed: usize,
    pub events_skipped_non_matching: usize,
    pub events_skipped_old: usize,
    pub events_undated: usize,
    pub events_duplicate: usize,
    pub events_inserted: usize,
    pub events_updated: usize,
    pub events_skipped_completed: usize,

    pub bouts_processed: usize,
    pub bouts_duplicate: usize,
    pub bouts_orphaned: usize,
    pub bouts_inserted: usize,
    pub bouts_updated: usize,
    pub bouts_skipped_final: usize,

    pub details_folded: usize,
    pub details_duplicate: usize,
    pub details_orphaned: usize,

    pub main_events_resolved: usize,

    pub fighter_details_applied: usize,
    pub fighter_details_unmatched: usize,
    pub fighter_details_duplicate: usize,

    pub images_stored: usize,
    pub images_failed: usize,
    pub images_skipped: usize,
    pub images_attached: usize,

    pub posters_stored: usize,
    pub posters_failed: usize,
    pub posters_skipped: usize,

    pub store_errors: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub scope: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Events inserted or updated by this run, ascending.
    #[serde(default)]
    pub accepted_events: Vec<EventId>,
    pub stats: RunStats,
}

impl RunReport {
    /// False when any store write failed; a window is only marked fired for
    /// complete runs.
    pub fn is_complete(&self) -> bool {
        self.stats.store_errors == 0
    }

    pub fn accepted(&self, event_id: EventId) -> bool {
        self.accepted_events.binary_search(&event_id).is_ok()
    }

    pub fn to_markdown(&self) -> String {
        let s = &self.stats;
        format!(
            "# Ingestion Run\n\n\
             - Run ID: `{}`\n- Scope: {}\n- Started: {}\n- Finished: {}\n- Complete: {}\n\n\
             ## Records\n- decoded: {}\n- malformed: {}\n\n\
             ## Events\n- processed: {}\n- inserted: {}\n- updated: {}\n- skipped (completed): {}\n\
             - skipped (non-matching): {}\n- skipped (too old): {}\n- undated: {}\n- duplicate: {}\n\n\
             ## Bouts\n- processed: {}\n- inserted: {}\n- updated: {}\n- skipped (final): {}\n\
             - orphaned: {}\n- duplicate: {}\n- details folded: {}\n- details orphaned: {}\n\n\
             ## Fighters\n- details applied (bouts): {}\n- details unmatched: {}\n- details duplicate: {}\n\n\
             ## Assets\n- images stored: {}\n- images failed: {}\n- images skipped: {}\n\
             - images attached (bouts): {}\n- posters stored: {}\n- posters failed: {}\n- posters skipped: {}\n\n\
             ## Other\n- main events resolved: {}\n- store errors: {}\n",
            self.run_id,
            self.scope,
            self.started_at,
            self.finished_at,
            self.is_complete(),
            s.records,
            s.malformed,
            s.events_processed,
            s.events_inserted,
            s.events_updated,
            s.events_skipped_completed,
            s.events_skipped_non_matching,
            s.events_skipped_old,
            s.events_undated,
            s.events_duplicate,
            s.bouts_processed,
            s.bouts_inserted,
            s.bouts_updated,
            s.bouts_skipped_final,
            s.bouts_orphaned,
            s.bouts_duplicate,
            s.details_folded,
            s.details_orphaned,
            s.fighter_details_applied,
            s.fighter_details_unmatched,
            s.fighter_details_duplicate,
            s.images_stored,
            s.images_failed,
            s.images_skipped,
            s.images_attached,
            s.posters_stored,
            s.posters_failed,
            s.posters_skipped,
            s.main_events_resolved,
            s.store_errors,
        )
    }

    /// Writes `<reports_root>/<run_id>/ingest_run.json` and `summary.md`.
    pub async fn write_to(&self, reports_root: &Path) -> Result<PathBuf> {
        let dir = reports_root.join(self.run_id.to_string());
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;

        let json = serde_json::to_vec_pretty(self).context("serializing run report")?;
        fs::write(dir.join("ingest_run.json"), json)
            .await
            .context("writing ingest_run.json")?;
        fs::write(dir.join("summary.md"), self.to_markdown())
            .await
            .context("writing summary.md")?;
        Ok(dir)
    }
}

#[derive(Default)]
struct Batches {
    events: Vec<EventRecord>,
    bouts: Vec<BoutRecord>,
    details: HashMap<BoutId, BoutDetailRecord>,
    fighter_details: Vec<FighterDetailsRecord>,
    images: Vec<FighterImageRecord>,
    posters: Vec<EventPosterRecord>,
}

/// One pass of classify -> normalize -> dedup -> merge -> resolve -> enrich
/// over an extraction. Events are merged before any bout, whatever the input
/// order, and fighter enrichment runs after every bout is in place.
pub struct IngestionRun<'a> {
    ctx: &'a IngestContext,
    run_id: Uuid,
    scope: ExtractScope,
    stats: RunStats,
}

impl<'a> IngestionRun<'a> {
    pub fn new(ctx: &'a IngestContext, scope: ExtractScope) -> Self {
        Self {
            ctx,
            run_id: Uuid::new_v4(),
            scope,
            stats: RunStats::default(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Never fails as a whole: bad records and store errors are counted and
    /// the batch continues.
    pub async fn execute(self, extraction: Extraction) -> RunReport {
        let span = info_span!("ingest_run", run_id = %self.run_id, scope = %self.scope.label());
        self.execute_inner(extraction).instrument(span).await
    }

    async fn execute_inner(mut self, extraction: Extraction) -> RunReport {
        let started_at = Utc::now();
        self.stats.records = extraction.records.len();
        self.stats.malformed = extraction.malformed;

        let batches = self.partition(extraction.records);
        let ctx = self.ctx;
        let mut merger = Merger::new(ctx.store.as_ref());

        self.merge_events(&mut merger, batches.events, started_at).await;
        let orphaned_details = self
            .merge_bouts(&merger, batches.bouts, batches.details, started_at)
            .await;
        self.stats.details_orphaned = orphaned_details;
        self.resolve_backreferences(&merger).await;
        self.apply_fighter_details(batches.fighter_details, started_at).await;
        self.process_images(batches.images).await;
        self.process_posters(batches.posters).await;

        let report = RunReport {
            run_id: self.run_id,
            scope: self.scope.label(),
            started_at,
            finished_at: Utc::now(),
            accepted_events: merger.accepted_events().collect(),
            stats: self.stats,
        };
        tracing::info!(
            events_inserted = report.stats.events_inserted,
            events_updated = report.stats.events_updated,
            bouts_inserted = report.stats.bouts_inserted,
            bouts_updated = report.stats.bouts_updated,
            store_errors = report.stats.store_errors,
            "ingestion run finished"
        );
        report
    }

    fn partition(&mut self, records: Vec<RawRecord>) -> Batches {
        let mut batches = Batches::default();
        for record in records {
            match record {
                RawRecord::Event(r) => batches.events.push(r),
                RawRecord::Bout(r) => batches.bouts.push(r),
                RawRecord::BoutDetail(r) => {
                    if batches.details.contains_key(&r.bout_id) {
                        self.stats.details_duplicate += 1;
                    } else {
                        batches.details.insert(r.bout_id, r);
                    }
                }
                RawRecord::FighterImage(r) => batches.images.push(r),
                RawRecord::FighterDetails(r) => batches.fighter_details.push(r),
                RawRecord::EventPoster(r) => batches.posters.push(r),
            }
        }
        batches
    }

    async fn merge_events(
        &mut self,
        merger: &mut Merger<'_>,
        events: Vec<EventRecord>,
        now: DateTime<Utc>,
    ) {
        let ctx = self.ctx;
        let classifier = Classifier::new(&ctx.rules);
        let mut seen = SeenIds::new();

        for record in events {
            if !seen.first_sighting(record.event_id) {
                tracing::debug!(event_id = record.event_id, "skipping duplicate event record");
                self.stats.events_duplicate += 1;
                continue;
            }
            let classification = classifier.classify(&record, &mut self.stats);
            if let Classification::Accepted { undated } = classification {
                if undated {
                    tracing::debug!(event_id = record.event_id, "event has no parsable date");
                }
                let event = normalize_event(&record, &ctx.rules, now);
                if let Err(err) = merger.merge_event(&event, &mut self.stats).await {
                    tracing::error!(event_id = event.id, error = %err, "event merge failed");
                    self.stats.store_errors += 1;
                }
            } else {
                tracing::debug!(event_id = record.event_id, ?classification, "event rejected");
            }
        }
    }

    /// Returns how many detail records had no base bout in this run.
    async fn merge_bouts(
        &mut self,
        merger: &Merger<'_>,
        bouts: Vec<BoutRecord>,
        mut details: HashMap<BoutId, BoutDetailRecord>,
        now: DateTime<Utc>,
    ) -> usize {
        let mut seen = SeenIds::new();

        for record in bouts {
            self.stats.bouts_processed += 1;
            if !seen.first_sighting(record.bout_id) {
                tracing::debug!(bout_id = record.bout_id, "skipping duplicate bout record");
                self.stats.bouts_duplicate += 1;
                continue;
            }
            let detail = details.remove(&record.bout_id);
            if detail.is_some() {
                self.stats.details_folded += 1;
            }
            let mut bout = normalize_bout(&record, detail.as_ref(), now);
            if merger.is_accepted(bout.event_id) {
                if let Err(err) = join_known_images(merger.store(), &mut bout).await {
                    tracing::warn!(bout_id = bout.id, error = %err, "fighter image lookup failed");
                }
            }
            if let Err(err) = merger.merge_bout(&bout, &mut self.stats).await {
                tracing::error!(bout_id = bout.id, error = %err, "bout merge failed");
                self.stats.store_errors += 1;
            }
        }

        for bout_id in details.keys() {
            tracing::debug!(bout_id, "dropping bout detail without a base bout");
        }
        details.len()
    }

    async fn resolve_backreferences(&mut self, merger: &Merger<'_>) {
        let ctx = self.ctx;
        let resolver = BackreferenceResolver::new(ctx.store.as_ref());
        for event_id in merger.accepted_events() {
            match resolver.resolve_main_event(event_id).await {
                Ok(Resolution::Updated(bout_id)) => {
                    tracing::debug!(event_id, bout_id, "main event resolved");
                    self.stats.main_events_resolved += 1;
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::error!(event_id, error = %err, "main event resolution failed");
                    self.stats.store_errors += 1;
                }
            }
        }
    }

    async fn apply_fighter_details(
        &mut self,
        records: Vec<FighterDetailsRecord>,
        now: DateTime<Utc>,
    ) {
        let ctx = self.ctx;
        let mut enricher = Enricher::new(ctx.store.as_ref());
        let mut seen = std::collections::HashSet::new();
        for record in records {
            if !seen.insert(record.external_id.clone()) {
                self.stats.fighter_details_duplicate += 1;
                continue;
            }
            match enricher.apply_details(&record, now).await {
                Ok(applied) if applied.matched == 0 => {
                    tracing::debug!(external_id = %record.external_id, "no open bout for fighter");
                    self.stats.fighter_details_unmatched += 1;
                }
                Ok(applied) => self.stats.fighter_details_applied += applied.updated,
                Err(err) => {
                    tracing::error!(external_id = %record.external_id, error = %err, "fighter details not applied");
                    self.stats.store_errors += 1;
                }
            }
        }
    }

    async fn process_images(&mut self, images: Vec<FighterImageRecord>) {
        let Some(pipeline) = self.ctx.assets.clone() else {
            self.stats.images_skipped += images.len();
            return;
        };
        let mut seen = std::collections::HashSet::new();
        for record in images {
            if !seen.insert(record.external_id.clone()) {
                self.stats.images_skipped += 1;
                continue;
            }
            pipeline
                .process(&record, self.ctx.store.as_ref(), &mut self.stats)
                .await;
        }
    }

    async fn process_posters(&mut self, posters: Vec<EventPosterRecord>) {
        let Some(pipeline) = self.ctx.assets.clone() else {
            self.stats.posters_skipped += posters.len();
            return;
        };
        let mut seen = SeenIds::new();
        for record in posters {
            if !seen.first_sighting(record.event_id) {
                self.stats.posters_skipped += 1;
                continue;
            }
            pipeline
                .process_poster(&record, self.ctx.store.as_ref(), &mut self.stats)
                .await;
        }
    }
}

/// Convenience wrapper: one run over an already-fetched extraction.
pub async fn ingest(ctx: &IngestContext, scope: ExtractScope, extraction: Extraction) -> RunReport {
    IngestionRun::new(ctx, scope).execute(extraction).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardwatch_adapters::decode_jsonl;
    use cardwatch_storage::MemoryStore;

    fn ctx(store: Arc<MemoryStore>) -> IngestContext {
        IngestContext::new(store, IngestRules::default())
    }

    #[tokio::test]
    async fn bouts_before_their_event_in_input_still_merge() {
        let store = Arc::new(MemoryStore::new());
        let text = r#"{"type":"bout","event_id":500,"bout_id":900,"is_main_event":true}
{"type":"event","event_id":500,"name":"Fight Night 50","event_date":"2026-03-01","tapology_url":"https://www.tapology.com/fightcenter/events/500-ufc-fight-night-50"}"#;
        let report = ingest(&ctx(store.clone()), ExtractScope::Discovery, decode_jsonl(text)).await;

        assert!(report.is_complete());
        assert_eq!(report.stats.events_inserted, 1);
        assert_eq!(report.stats.bouts_inserted, 1);
        assert_eq!(report.stats.main_events_resolved, 1);
        assert_eq!(report.accepted_events, vec![500]);
        assert!(report.accepted(500));
        assert!(!report.accepted(501));
        let event = store.event(500).await.unwrap().unwrap();
        assert_eq!(event.main_event_bout_id, Some(900));
    }

    #[tokio::test]
    async fn duplicate_bout_ids_keep_first_occurrence() {
        let store = Arc::new(MemoryStore::new());
        let text = r#"{"type":"event","event_id":1,"name":"UFC 400","event_date":"2026-05-01"}
{"type":"bout","event_id":1,"bout_id":10,"weight_class":"Lightweight"}
{"type":"bout","event_id":1,"bout_id":10,"weight_class":"Heavyweight"}"#;
        let report = ingest(&ctx(store.clone()), ExtractScope::Discovery, decode_jsonl(text)).await;

        assert_eq!(report.stats.bouts_processed, 2);
        assert_eq!(report.stats.bouts_duplicate, 1);
        assert_eq!(report.stats.bouts_inserted, 1);
        assert_eq!(report.stats.bouts_updated, 0);
        let bout = store.bout(10).await.unwrap().unwrap();
        assert_eq!(bout.weight_class.as_deref(), Some("Lightweight"));
    }

    #[tokio::test]
    async fn first_detail_folds_and_orphan_details_are_counted() {
        let store = Arc::new(MemoryStore::new());
        let text = r#"{"type":"event","event_id":1,"name":"UFC 400","event_date":"2026-05-01"}
{"type":"bout_detail","event_id":1,"bout_id":10,"result":{"winner":"red","method":"Submission"}}
{"type":"bout_detail","event_id":1,"bout_id":10,"result":{"winner":"blue","method":"KO/TKO"}}
{"type":"bout_detail","event_id":1,"bout_id":11}
{"type":"bout","event_id":1,"bout_id":10}"#;
        let report = ingest(&ctx(store.clone()), ExtractScope::Event(1), decode_jsonl(text)).await;

        assert_eq!(report.scope, "event:1");
        assert_eq!(report.stats.details_folded, 1);
        assert_eq!(report.stats.details_duplicate, 1);
        assert_eq!(report.stats.details_orphaned, 1);
        let bout = store.bout(10).await.unwrap().unwrap();
        assert_eq!(
            bout.result.unwrap().method,
            Some(cardwatch_core::FinishMethod::Submission)
        );
        assert!(store.bout(11).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn images_without_pipeline_are_skipped() {
        let store = Arc::new(MemoryStore::new());
        let text = r#"{"type":"fighter_image","tapology_id":"1","image_url":"https://img/1.jpg"}"#;
        let report = ingest(&ctx(store), ExtractScope::Discovery, decode_jsonl(text)).await;
        assert_eq!(report.stats.images_skipped, 1);
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn reports_are_written_as_json_and_markdown() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let report = ingest(&ctx(store), ExtractScope::Discovery, Extraction::default()).await;

        let written = report.write_to(dir.path()).await.unwrap();
        assert_eq!(written, dir.path().join(report.run_id.to_string()));
        let json = std::fs::read_to_string(written.join("ingest_run.json")).unwrap();
        let parsed: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.stats, report.stats);
        let md = std::fs::read_to_string(written.join("summary.md")).unwrap();
        assert!(md.contains("# Ingestion Run"));
        assert!(md.contains("- Scope: discovery"));
    }
}
