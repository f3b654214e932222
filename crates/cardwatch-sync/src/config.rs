use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{Duration, NaiveDate};
use chrono_tz::Tz;
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Store target. Store-backed commands refuse to run without it.
    pub database_url: Option<String>,
    pub workspace_root: PathBuf,
    pub assets_dir: PathBuf,
    pub scheduler_enabled: bool,
    pub tick_cron: String,
    pub extract_program: Option<String>,
    pub extract_discovery_args: Vec<String>,
    pub extract_event_args: Vec<String>,
    pub user_agent: String,
    pub image_referer: Option<String>,
    pub http_timeout_secs: u64,
}

fn split_args(value: &str) -> Vec<String> {
    value.split_whitespace().map(ToString::to_string).collect()
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let workspace_root = std::env::var("CARDWATCH_WORKSPACE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));
        Self {
            database_url: std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
            assets_dir: std::env::var("CARDWATCH_ASSETS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| workspace_root.join("assets")),
            scheduler_enabled: std::env::var("CARDWATCH_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            tick_cron: std::env::var("CARDWATCH_TICK_CRON")
                .unwrap_or_else(|_| "0 */15 * * * *".to_string()),
            extract_program: std::env::var("CARDWATCH_EXTRACT_PROGRAM")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            extract_discovery_args: std::env::var("CARDWATCH_EXTRACT_DISCOVERY_ARGS")
                .map(|v| split_args(&v))
                .unwrap_or_default(),
            extract_event_args: std::env::var("CARDWATCH_EXTRACT_EVENT_ARGS")
                .map(|v| split_args(&v))
                .unwrap_or_default(),
            user_agent: std::env::var("CARDWATCH_USER_AGENT")
                .unwrap_or_else(|_| "cardwatch/0.1".to_string()),
            image_referer: std::env::var("CARDWATCH_IMAGE_REFERER").ok(),
            http_timeout_secs: std::env::var("CARDWATCH_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            workspace_root,
        }
    }

    pub fn reports_root(&self) -> PathBuf {
        self.workspace_root.join("reports")
    }
}

/// Result-window offsets after the resolved start instant, per event category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowTable {
    pub numbered: Vec<Duration>,
    pub fight_night: Vec<Duration>,
}

impl Default for WindowTable {
    fn default() -> Self {
        Self {
            numbered: [150, 300, 495].into_iter().map(Duration::minutes).collect(),
            fight_night: [210, 240].into_iter().map(Duration::minutes).collect(),
        }
    }
}

/// Matching strings, cutoffs and window offsets the ingestion core consumes.
#[derive(Debug, Clone)]
pub struct IngestRules {
    pub promotion: String,
    /// Lowercase; a name starting with this is a numbered event.
    pub numbered_prefix: String,
    /// Lowercase; a name containing this is a fight night.
    pub fight_night_marker: String,
    /// Lowercase; a source URL containing this belongs to the promotion.
    pub url_segment: String,
    pub min_event_date: NaiveDate,
    pub source_timezone: Tz,
    pub image_base_url: String,
    pub windows: WindowTable,
}

impl Default for IngestRules {
    fn default() -> Self {
        Self {
            promotion: "UFC".to_string(),
            numbered_prefix: "ufc ".to_string(),
            fight_night_marker: "ufc fight night".to_string(),
            url_segment: "-ufc-".to_string(),
            min_event_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap_or_default(),
            source_timezone: chrono_tz::America::New_York,
            image_base_url: "https://images.tapology.com".to_string(),
            windows: WindowTable::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct IngestRulesFile {
    version: u32,
    promotion: Option<String>,
    numbered_prefix: Option<String>,
    fight_night_marker: Option<String>,
    url_segment: Option<String>,
    min_event_date: Option<NaiveDate>,
    source_timezone: Option<String>,
    image_base_url: Option<String>,
    windows: Option<WindowTableFile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WindowTableFile {
    numbered_minutes: Vec<i64>,
    fight_night_minutes: Vec<i64>,
}

const RULES_VERSION: u32 = 1;

/// Upper bound for one window offset: a week after the start.
const MAX_OFFSET_MINUTES: i64 = 7 * 24 * 60;

fn offsets(label: &str, minutes: Vec<i64>) -> Result<Vec<Duration>> {
    if minutes.is_empty() {
        bail!("window table `{label}` is empty");
    }
    if minutes.len() > usize::from(u8::MAX) {
        bail!("window table `{label}` has too many windows");
    }
    if minutes.iter().any(|m| *m < 0) {
        bail!("window table `{label}` has a negative offset");
    }
    if minutes.iter().any(|m| *m > MAX_OFFSET_MINUTES) {
        bail!("window table `{label}` has an offset beyond {MAX_OFFSET_MINUTES} minutes");
    }
    let mut minutes = minutes;
    minutes.sort_unstable();
    minutes.dedup();
    Ok(minutes.into_iter().map(Duration::minutes).collect())
}

impl IngestRules {
    /// Loads `rules/ingest.yaml` under `root`, or the built-in defaults when
    /// the file does not exist.
    pub fn from_workspace_root(root: &Path) -> Result<Self> {
        let path = root.join("rules").join("ingest.yaml");
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no ingest rules file, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let file: IngestRulesFile = serde_yaml::from_str(text)?;
        if file.version != RULES_VERSION {
            bail!(
                "unsupported rules version {} (expected {RULES_VERSION})",
                file.version
            );
        }
        let defaults = Self::default();

        let source_timezone = match file.source_timezone {
            Some(name) => name
                .parse::<Tz>()
                .map_err(|err| anyhow::anyhow!("invalid source_timezone {name:?}: {err}"))?,
            None => defaults.source_timezone,
        };
        let windows = match file.windows {
            Some(table) => WindowTable {
                numbered: offsets("numbered_minutes", table.numbered_minutes)?,
                fight_night: offsets("fight_night_minutes", table.fight_night_minutes)?,
            },
            None => defaults.windows,
        };

        Ok(Self {
            promotion: file.promotion.unwrap_or(defaults.promotion),
            numbered_prefix: file
                .numbered_prefix
                .map(|v| v.to_lowercase())
                .unwrap_or(defaults.numbered_prefix),
            fight_night_marker: file
                .fight_night_marker
                .map(|v| v.to_lowercase())
                .unwrap_or(defaults.fight_night_marker),
            url_segment: file
                .url_segment
                .map(|v| v.to_lowercase())
                .unwrap_or(defaults.url_segment),
            min_event_date: file.min_event_date.unwrap_or(defaults.min_event_date),
            source_timezone,
            image_base_url: file.image_base_url.unwrap_or(defaults.image_base_url),
            windows,
        })
    }
}
