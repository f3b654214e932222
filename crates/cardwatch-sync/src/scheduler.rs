use std::sync::Arc;

use anyhow::{Context, Result};
use cardwatch_adapters::{ExtractScope, Extractor};
use cardwatch_core::{Event, EventId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info_span, Instrument};

use crate::config::SyncConfig;
use crate::run::{IngestContext, IngestionRun, RunReport};
use crate::window::{event_start_instant, window_state, windows_for, Window, WindowState};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    pub events_checked: usize,
    pub unresolvable: usize,
    pub fired: usize,
    pub failed: usize,
    pub fired_windows: Vec<(EventId, u8)>,
}

/// Decides which scheduled events have a result window due and runs one
/// event-scoped extract and merge per due event.
pub struct WindowScheduler {
    ctx: IngestContext,
    extractor: Arc<dyn Extractor>,
}

impl WindowScheduler {
    pub fn new(ctx: IngestContext, extractor: Arc<dyn Extractor>) -> Self {
        Self { ctx, extractor }
    }

    pub fn context(&self) -> &IngestContext {
        &self.ctx
    }

    /// One pass over scheduled events, ascending by id. A tick that finds
    /// nothing due changes nothing.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickSummary> {
        let mut events = self
            .ctx
            .store
            .scheduled_events()
            .await
            .context("listing scheduled events")?;
        events.sort_by_key(|e| e.id);

        let mut summary = TickSummary::default();
        for event in &events {
            summary.events_checked += 1;
            let start = match event_start_instant(event) {
                Ok(start) => start,
                Err(err) => {
                    tracing::warn!(event_id = event.id, error = %err, "cannot schedule event");
                    summary.unresolvable += 1;
                    continue;
                }
            };
            let windows = windows_for(event.category, start, &self.ctx.rules.windows);
            let WindowState::WindowDue(window) = window_state(event, &windows, now) else {
                continue;
            };

            match self.fire(event, window).await {
                Ok(WindowState::WindowFired(w)) => {
                    summary.fired += 1;
                    summary.fired_windows.push((event.id, w.index));
                }
                Ok(_) => summary.failed += 1,
                Err(err) => {
                    tracing::error!(event_id = event.id, window = window.index, error = %err, "window fire failed");
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            checked = summary.events_checked,
            fired = summary.fired,
            failed = summary.failed,
            unresolvable = summary.unresolvable,
            "scheduler tick finished"
        );
        Ok(summary)
    }

    /// Extract, ingest, and only then record the window as fired. An
    /// incomplete run, or one whose extraction did not carry the event
    /// itself, leaves the window due for the next tick.
    pub async fn fire(&self, event: &Event, window: Window) -> Result<WindowState> {
        let span = info_span!("window_fire", event_id = event.id, window = window.index);
        async {
            let report = self.fire_inner(event.id).await?;
            if !report.is_complete() {
                tracing::warn!(
                    run_id = %report.run_id,
                    store_errors = report.stats.store_errors,
                    "ingestion incomplete, window stays due"
                );
                return Ok(WindowState::WindowDue(window));
            }
            if !report.accepted(event.id) {
                tracing::warn!(
                    run_id = %report.run_id,
                    bouts_orphaned = report.stats.bouts_orphaned,
                    "extraction did not include the event, window stays due"
                );
                return Ok(WindowState::WindowDue(window));
            }
            let marked = self
                .ctx
                .store
                .mark_window_fired(event.id, window.index)
                .await
                .context("marking window fired")?;
            if !marked {
                tracing::info!("event no longer scheduled or window already fired");
            }
            Ok(WindowState::WindowFired(window))
        }
        .instrument(span)
        .await
    }

    async fn fire_inner(&self, event_id: EventId) -> Result<RunReport> {
        let scope = ExtractScope::Event(event_id);
        let extraction = self
            .extractor
            .extract(scope)
            .await
            .with_context(|| format!("extractor {} for {}", self.extractor.name(), scope.label()))?;
        Ok(IngestionRun::new(&self.ctx, scope).execute(extraction).await)
    }
}

/// Cron-driven ticks, only when the scheduler is enabled.
pub async fn maybe_build_scheduler(
    config: &SyncConfig,
    scheduler: Arc<WindowScheduler>,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let cron = config.tick_cron.as_str();
    let job = Job::new_async(cron, move |_uuid, _l| {
        let scheduler = scheduler.clone();
        Box::pin(async move {
            if let Err(err) = scheduler.tick(Utc::now()).await {
                tracing::error!(error = %err, "scheduled tick failed");
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}
