//! The ingestion pipeline and the staleness guard.
//!
//! Files are parsed in parallel on blocking threads; every write goes through
//! the store one file at a time. A file that vanishes or cannot be read is
//! skipped and the pass carries on with the rest.

use std::{
  io::ErrorKind,
  path::PathBuf,
  sync::Arc,
  time::Instant,
};

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tally_core::{
  parse::{FileContext, LineError, ParsedFile, parse_line},
  session::IngestionState,
  store::AnalyticsStore,
};
use tokio::{sync::Mutex, task::JoinSet};
use tracing::{debug, error, info, warn};

use crate::{
  Error, Result,
  discover::{LogFile, discover_logs},
  tracker::FileTracker,
};

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct IngestConfig {
  /// Root of the per-project log directories.
  pub logs_dir:      PathBuf,
  /// Only files modified this many days back are considered. `None` scans
  /// every file.
  pub lookback_days: Option<i64>,
  /// Reads trigger an ingestion pass once the last one is older than this.
  pub stale_after:   TimeDelta,
  /// Files parsed concurrently.
  pub parse_workers: usize,
}

impl Default for IngestConfig {
  fn default() -> Self {
    let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default();
    Self {
      logs_dir:      home.join(".claude").join("projects"),
      lookback_days: Some(7),
      stale_after:   TimeDelta::minutes(5),
      parse_workers: 4,
    }
  }
}

/// Per-call overrides for one pass.
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
  /// Overrides the configured lookback. Zero or less scans every file.
  pub days:    Option<i64>,
  /// Only project directories whose name contains this.
  pub project: Option<String>,
  /// Re-parse files even when the ledger says they are unchanged.
  pub force:   bool,
}

// ─── Report ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
  pub files_found:       usize,
  pub files_processed:   usize,
  /// Unchanged since the last pass.
  pub files_skipped:     usize,
  /// Listed but gone by the time they were read.
  pub files_missing:     usize,
  pub records_added:     usize,
  /// Already stored; absorbed by the uniqueness constraint.
  pub records_duplicate: usize,
  /// Malformed lines.
  pub records_skipped:   usize,
  /// Bookkeeping records that carry no analytic signal.
  pub records_ignored:   usize,
  pub errors:            Vec<String>,
  pub started_at:        Option<DateTime<Utc>>,
  pub duration_ms:       u64,
}

// ─── Parsing ─────────────────────────────────────────────────────────────────

/// Read and decode every line of `file`. Blocking.
pub fn parse_file(file: &LogFile) -> std::io::Result<ParsedFile> {
  let bytes = std::fs::read(&file.path)?;
  let stem = file.stem();
  let ctx = FileContext {
    project:          &file.project,
    fallback_session: &stem,
    mtime:            file.mtime,
  };

  let mut parsed = ParsedFile::default();
  for (index, raw) in bytes.split(|b| *b == b'\n').enumerate() {
    let line = match std::str::from_utf8(raw) {
      Ok(line) => line.trim(),
      Err(e) => {
        debug!(path = %file.path.display(), line = index + 1, "skipping line that is not utf-8");
        parsed.push(Err(LineError::InvalidJson(e.to_string())));
        continue;
      }
    };
    if line.is_empty() {
      continue;
    }
    let outcome = parse_line(line, &ctx);
    if let Err(e) = &outcome {
      debug!(path = %file.path.display(), line = index + 1, error = %e, "skipping malformed line");
    }
    parsed.push(outcome);
  }
  Ok(parsed)
}

// ─── Ingestor ────────────────────────────────────────────────────────────────

/// Runs ingestion passes against a store, one at a time.
pub struct Ingestor<S> {
  store:     Arc<S>,
  config:    IngestConfig,
  /// Start of the last completed pass. Holding the lock is what makes a
  /// pass exclusive.
  last_pass: Mutex<Option<DateTime<Utc>>>,
}

impl<S> Ingestor<S>
where
  S: AnalyticsStore + 'static,
{
  pub fn new(store: Arc<S>, config: IngestConfig) -> Self {
    Self { store, config, last_pass: Mutex::new(None) }
  }

  pub fn config(&self) -> &IngestConfig { &self.config }

  /// Run one pass now.
  pub async fn ingest(&self, options: IngestOptions) -> Result<IngestReport> {
    let mut last_pass = self.last_pass.lock().await;
    let report = self.run(options).await?;
    *last_pass = report.started_at;
    Ok(report)
  }

  /// Whether a read issued now would trigger a pass.
  pub async fn is_stale(&self) -> Result<bool> {
    let last_pass = *self.last_pass.lock().await;
    self.stale_at(last_pass, Utc::now()).await
  }

  /// Run a pass if the data is older than the staleness window, measured
  /// from the moment of the call. Callers that queued behind a running pass
  /// re-check after it finishes and usually find the data fresh.
  pub async fn ensure_fresh(&self) -> Result<Option<IngestReport>> {
    let requested_at = Utc::now();
    let mut last_pass = self.last_pass.lock().await;
    if !self.stale_at(*last_pass, requested_at).await? {
      return Ok(None);
    }
    debug!("data is stale, ingesting before read");
    let report = self.run(IngestOptions::default()).await?;
    *last_pass = report.started_at;
    Ok(Some(report))
  }

  async fn stale_at(&self, last_pass: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Result<bool> {
    let recorded = self.store.last_ingestion().await.map_err(Error::store)?;
    let latest = last_pass.max(recorded);
    Ok(latest.is_none_or(|t| now - t > self.config.stale_after))
  }

  async fn run(&self, options: IngestOptions) -> Result<IngestReport> {
    let started_at = Utc::now();
    let clock = Instant::now();
    let mut report = IngestReport { started_at: Some(started_at), ..IngestReport::default() };

    let lookback = match options.days.or(self.config.lookback_days) {
      Some(days) if days > 0 => Some(TimeDelta::days(days)),
      _ => None,
    };
    let root = self.config.logs_dir.clone();
    let project = options.project.clone();
    let candidates =
      tokio::task::spawn_blocking(move || discover_logs(&root, lookback, project.as_deref())).await?;
    report.files_found = candidates.len();

    let ledger = self.store.ingestion_ledger().await.map_err(Error::store)?;
    let (selected, skipped) = FileTracker::new(ledger).select(candidates, options.force);
    report.files_skipped = skipped;

    let workers = self.config.parse_workers.max(1);
    let mut pending = selected.into_iter();
    let mut parsing = JoinSet::new();
    loop {
      while parsing.len() < workers {
        let Some(file) = pending.next() else { break };
        parsing.spawn_blocking(move || {
          let outcome = parse_file(&file);
          (file, outcome)
        });
      }
      let Some(joined) = parsing.join_next().await else { break };
      match joined {
        Ok((file, outcome)) => self.persist(file, outcome, started_at, &mut report).await,
        Err(e) => {
          error!(error = %e, "parse task failed");
          report.errors.push(e.to_string());
        }
      }
    }

    report.duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);
    info!(
      files_found = report.files_found,
      files_processed = report.files_processed,
      files_skipped = report.files_skipped,
      records_added = report.records_added,
      records_skipped = report.records_skipped,
      errors = report.errors.len(),
      duration_ms = report.duration_ms,
      "ingestion complete"
    );
    Ok(report)
  }

  async fn persist(
    &self,
    file:       LogFile,
    outcome:    std::io::Result<ParsedFile>,
    started_at: DateTime<Utc>,
    report:     &mut IngestReport,
  ) {
    let parsed = match outcome {
      Ok(parsed) => parsed,
      Err(e) if e.kind() == ErrorKind::NotFound => {
        warn!(path = %file.path.display(), "log file vanished before it could be read");
        report.files_missing += 1;
        return;
      }
      Err(e) => {
        warn!(path = %file.path.display(), error = %e, "cannot read log file");
        report.errors.push(format!("{}: {e}", file.path.display()));
        return;
      }
    };
    report.records_skipped += parsed.malformed;
    report.records_ignored += parsed.ignored;

    let ledger = IngestionState {
      path:          file.path_key(),
      size:          file.size,
      mtime:         file.mtime,
      records_added: 0,
      processed_at:  started_at,
    };
    match self.store.ingest_batch(parsed.events, ledger).await {
      Ok(batch) => {
        report.files_processed += 1;
        report.records_added += batch.inserted;
        report.records_duplicate += batch.duplicates;
        debug!(path = %file.path.display(), inserted = batch.inserted, "ingested log file");
      }
      Err(e) => {
        error!(path = %file.path.display(), error = %e, "failed to store log file");
        report.errors.push(format!("{}: {e}", file.path.display()));
      }
    }
  }
}
