//! Extractor boundary: whatever scrapes the source hands cardwatch a stream
//! of JSON lines, decoded here into typed [`RawRecord`]s.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use cardwatch_core::{EventId, RawRecord};
use thiserror::Error;
use tokio::process::Command;
use uuid::Uuid;

pub const CRATE_NAME: &str = "cardwatch-adapters";

/// What an extraction should cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractScope {
    /// Upcoming-events listing plus every listed event's card.
    Discovery,
    /// A single event's page and bout details, used for result refreshes.
    Event(EventId),
}

impl ExtractScope {
    pub fn label(&self) -> String {
        match self {
            Self::Discovery => "discovery".to_string(),
            Self::Event(id) => format!("event:{id}"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub records: Vec<RawRecord>,
    /// Lines that were not valid records (bad JSON, unknown type, bad id).
    pub malformed: usize,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("reading extractor output {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("spawning extractor `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("extractor `{program}` exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
}

#[async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;

    async fn extract(&self, scope: ExtractScope) -> Result<Extraction, ExtractError>;
}

/// Decode JSONL text. Blank lines are ignored; undecodable lines are counted
/// and skipped, never fatal.
pub fn decode_jsonl(text: &str) -> Extraction {
    let mut out = Extraction::default();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match RawRecord::from_json_line(line) {
            Ok(record) => out.records.push(record),
            Err(err) => {
                tracing::debug!(line = index + 1, error = %err, "dropping malformed record");
                out.malformed += 1;
            }
        }
    }
    out
}

fn retain_scope(mut extraction: Extraction, scope: ExtractScope) -> Extraction {
    if let ExtractScope::Event(event_id) = scope {
        extraction
            .records
            .retain(|r| r.event_id().map_or(true, |id| id == event_id));
    }
    extraction
}

/// Reads a pre-captured JSONL file. Event-scoped extractions keep only that
/// event's records (plus records with no owning event, such as images).
#[derive(Debug, Clone)]
pub struct JsonlFileExtractor {
    path: PathBuf,
}

impl JsonlFileExtractor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Extractor for JsonlFileExtractor {
    fn name(&self) -> &str {
        "jsonl-file"
    }

    async fn extract(&self, scope: ExtractScope) -> Result<Extraction, ExtractError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| ExtractError::Io {
                path: self.path.clone(),
                source,
            })?;
        Ok(retain_scope(decode_jsonl(&text), scope))
    }
}

/// Runs an external scraper process per extraction.
///
/// Argument templates may use `{event_id}` and `{output}`. When `{output}`
/// appears the process is expected to write JSONL to that path; otherwise
/// its stdout is decoded.
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    program: String,
    discovery_args: Vec<String>,
    event_args: Vec<String>,
    scratch_dir: PathBuf,
}

impl CommandExtractor {
    pub fn new(
        program: impl Into<String>,
        discovery_args: Vec<String>,
        event_args: Vec<String>,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            discovery_args,
            event_args,
            scratch_dir: scratch_dir.into(),
        }
    }

    fn render_args(&self, scope: ExtractScope, output: &Path) -> Vec<String> {
        let (template, event_id) = match scope {
            ExtractScope::Discovery => (&self.discovery_args, String::new()),
            ExtractScope::Event(id) => (&self.event_args, id.to_string()),
        };
        let output = output.display().to_string();
        template
            .iter()
            .map(|arg| {
                arg.replace("{event_id}", &event_id)
                    .replace("{output}", &output)
            })
            .collect()
    }

    fn writes_output_file(&self, scope: ExtractScope) -> bool {
        let template = match scope {
            ExtractScope::Discovery => &self.discovery_args,
            ExtractScope::Event(_) => &self.event_args,
        };
        template.iter().any(|arg| arg.contains("{output}"))
    }
}

/// Scratch files are disposable; a leftover one is logged, never an error.
async fn remove_scratch(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "scratch file not removed");
        }
    }
}

#[async_trait]
impl Extractor for CommandExtractor {
    fn name(&self) -> &str {
        &self.program
    }

    async fn extract(&self, scope: ExtractScope) -> Result<Extraction, ExtractError> {
        let output_path = self
            .scratch_dir
            .join(format!("extract-{}.jsonl", Uuid::new_v4()));
        let args = self.render_args(scope, &output_path);
        tracing::info!(program = %self.program, scope = %scope.label(), "running extractor");

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ExtractError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            remove_scratch(&output_path).await;
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr.lines().rev().take(5).collect::<Vec<_>>().join(" | ");
            return Err(ExtractError::Failed {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: tail,
            });
        }

        let text = if self.writes_output_file(scope) {
            let text = tokio::fs::read_to_string(&output_path)
                .await
                .map_err(|source| ExtractError::Io {
                    path: output_path.clone(),
                    source,
                })?;
            remove_scratch(&output_path).await;
            text
        } else {
            String::from_utf8_lossy(&output.stdout).into_owned()
        };

        let extraction = retain_scope(decode_jsonl(&text), scope);
        tracing::info!(
            records = extraction.records.len(),
            malformed = extraction.malformed,
            "extractor finished"
        );
        Ok(extraction)
    }
}
