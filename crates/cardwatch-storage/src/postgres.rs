use anyhow::Context;
use async_trait::async_trait;
use cardwatch_core::{Bout, BoutId, Event, EventId, EventStatus};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

use crate::{MergeOutcome, Store, StoreError};

/// Postgres-backed store. The JSON document carries the entity; the guard
/// columns (`status`, `has_result`) and the columns owned by the scheduler
/// and the poster pipeline (`main_event_bout_id`, `fired_windows`,
/// `poster_key`) live beside it and win on read.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("connecting to postgres")?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!()
            .run(&self.pool)
            .await
            .context("applying cardwatch migrations")
    }
}

fn outcome_from_row(row: Option<PgRow>) -> Result<MergeOutcome, StoreError> {
    match row {
        None => Ok(MergeOutcome::Skipped),
        Some(row) => {
            if row.try_get::<bool, _>("inserted")? {
                Ok(MergeOutcome::Inserted)
            } else {
                Ok(MergeOutcome::Updated)
            }
        }
    }
}

fn event_from_row(row: &PgRow) -> Result<Event, StoreError> {
    let id: i64 = row.try_get("id")?;
    let doc: serde_json::Value = row.try_get("doc")?;
    let mut event: Event = serde_json::from_value(doc).map_err(|source| StoreError::Corrupt {
        kind: "event",
        id,
        source,
    })?;
    let status: String = row.try_get("status")?;
    event.status = if status == EventStatus::Completed.as_str() {
        EventStatus::Completed
    } else {
        EventStatus::Scheduled
    };
    event.main_event_bout_id = row.try_get("main_event_bout_id")?;
    event.poster_key = row.try_get("poster_key")?;
    let fired: Vec<i16> = row.try_get("fired_windows")?;
    event.fired_windows = fired
        .into_iter()
        .filter_map(|w| u8::try_from(w).ok())
        .collect();
    Ok(event)
}

fn bout_from_row(row: &PgRow) -> Result<Bout, StoreError> {
    let id: i64 = row.try_get("id")?;
    let doc: serde_json::Value = row.try_get("doc")?;
    serde_json::from_value(doc).map_err(|source| StoreError::Corrupt {
        kind: "bout",
        id,
        source,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn merge_event(&self, event: &Event) -> Result<MergeOutcome, StoreError> {
        let doc = serde_json::to_value(event).map_err(|source| StoreError::Encode {
            kind: "event",
            id: event.id,
            source,
        })?;
        let row = sqlx::query(
            r#"
            INSERT INTO events (id, status, event_date, doc, last_updated)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
               SET status = EXCLUDED.status,
                   event_date = EXCLUDED.event_date,
                   doc = EXCLUDED.doc,
                   last_updated = EXCLUDED.last_updated
             WHERE events.status = 'scheduled'
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(event.id)
        .bind(event.status.as_str())
        .bind(event.date)
        .bind(doc)
        .bind(event.last_updated)
        .fetch_optional(&self.pool)
        .await?;
        outcome_from_row(row)
    }

    async fn merge_bout(&self, bout: &Bout) -> Result<MergeOutcome, StoreError> {
        let doc = serde_json::to_value(bout).map_err(|source| StoreError::Encode {
            kind: "bout",
            id: bout.id,
            source,
        })?;
        let result = sqlx::query(
            r#"
            INSERT INTO bouts (id, event_id, is_main_event, has_result, doc, last_updated)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
               SET event_id = EXCLUDED.event_id,
                   is_main_event = EXCLUDED.is_main_event,
                   has_result = EXCLUDED.has_result,
                   doc = EXCLUDED.doc,
                   last_updated = EXCLUDED.last_updated
             WHERE NOT bouts.has_result
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(bout.id)
        .bind(bout.event_id)
        .bind(bout.is_main_event)
        .bind(bout.is_final())
        .bind(doc)
        .bind(bout.last_updated)
        .fetch_optional(&self.pool)
        .await;

        match result {
            Ok(row) => outcome_from_row(row),
            Err(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => {
                Err(StoreError::MissingEvent {
                    bout_id: bout.id,
                    event_id: bout.event_id,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn event(&self, id: EventId) -> Result<Option<Event>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, status, doc, main_event_bout_id, poster_key, fired_windows
              FROM events
             WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(event_from_row).transpose()
    }

    async fn bout(&self, id: BoutId) -> Result<Option<Bout>, StoreError> {
        let row = sqlx::query("SELECT id, doc FROM bouts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(bout_from_row).transpose()
    }

    async fn bouts_for_event(&self, event_id: EventId) -> Result<Vec<Bout>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, doc
              FROM bouts
             WHERE event_id = $1
             ORDER BY id
            "#,
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(bout_from_row).collect()
    }

    async fn bouts_for_fighter(&self, external_id: &str) -> Result<Vec<Bout>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, doc
              FROM bouts
             WHERE doc->'red'->>'external_id' = $1
                OR doc->'blue'->>'external_id' = $1
             ORDER BY id
            "#,
        )
        .bind(external_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(bout_from_row).collect()
    }

    async fn find_main_event_bout(&self, event_id: EventId) -> Result<Option<BoutId>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id
              FROM bouts
             WHERE event_id = $1
               AND is_main_event
             ORDER BY id
             LIMIT 1
            "#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.try_get("id")).transpose()?)
    }

    async fn set_main_event_bout(
        &self,
        event_id: EventId,
        bout_id: BoutId,
    ) -> Result<bool, StoreError> {
        let done = sqlx::query(
            r#"
            UPDATE events
               SET main_event_bout_id = $2,
                   last_updated = NOW()
             WHERE id = $1
               AND status = 'scheduled'
               AND main_event_bout_id IS DISTINCT FROM $2
            "#,
        )
        .bind(event_id)
        .bind(bout_id)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn set_event_poster(
        &self,
        event_id: EventId,
        poster_key: &str,
    ) -> Result<bool, StoreError> {
        let done = sqlx::query(
            r#"
            UPDATE events
               SET poster_key = $2,
                   last_updated = NOW()
             WHERE id = $1
               AND status = 'scheduled'
               AND poster_key IS DISTINCT FROM $2
            "#,
        )
        .bind(event_id)
        .bind(poster_key)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn scheduled_events(&self) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, status, doc, main_event_bout_id, poster_key, fired_windows
              FROM events
             WHERE status = 'scheduled'
             ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(event_from_row).collect()
    }

    async fn mark_window_fired(&self, event_id: EventId, window: u8) -> Result<bool, StoreError> {
        let done = sqlx::query(
            r#"
            UPDATE events
               SET fired_windows = array_append(fired_windows, $2::smallint)
             WHERE id = $1
               AND status = 'scheduled'
               AND NOT ($2::smallint = ANY(fired_windows))
            "#,
        )
        .bind(event_id)
        .bind(i16::from(window))
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn complete_event(&self, event_id: EventId) -> Result<bool, StoreError> {
        let done = sqlx::query(
            r#"
            UPDATE events
               SET status = 'completed',
                   doc = jsonb_set(doc, '{status}', '"completed"'),
                   last_updated = NOW()
             WHERE id = $1
               AND status = 'scheduled'
            "#,
        )
        .bind(event_id)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn put_fighter_image(
        &self,
        external_id: &str,
        image_key: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO fighter_images (external_id, image_key, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (external_id) DO UPDATE
               SET image_key = EXCLUDED.image_key,
                   updated_at = NOW()
            "#,
        )
        .bind(external_id)
        .bind(image_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fighter_image(&self, external_id: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT image_key FROM fighter_images WHERE external_id = $1")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.try_get("image_key")).transpose()?)
    }
}
