//! The [`Analytics`] facade: every query and ingestion operation, over any
//! [`AnalyticsStore`].
//!
//! Reads check staleness first and run an ingestion pass when the data is
//! older than the configured window. `status` is the one read that never
//! ingests.

use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use serde_json::json;
use tally_core::{
  classify::{self, ClassificationReport},
  failures::{
    FailureReport, FailureSummary, REWORK_MIN_EDITS, REWORK_WINDOW_MINUTES, detect_rework,
    group_failures,
  },
  git::{BusEvent, CommitView, GitCommit},
  pattern::{Pattern, PatternKind},
  permissions::{GapReport, find_gaps},
  report::{
    CommandFrequency, CompactionRow, DEFAULT_LARGE_RESULT_BYTES, LargeResult, SearchHit,
    SearchQuery, StatusReport, TokenGrouping, TokenUsageRow, ToolFrequency,
  },
  sequence::{SampleCollector, SequenceCount, SequenceMiner, SequenceSample, parse_pattern},
  session::Session,
  store::AnalyticsStore,
  trends::{Comparison, TrendReport, analyze_trends},
  window::{Scope, TimeWindow},
};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
  Error, Result,
  feeds::{self, BusFeed, BusReport, CorrelationReport, NoBus},
  pipeline::{IngestConfig, IngestOptions, IngestReport, Ingestor},
  settings::load_allow_list,
};

pub const DEFAULT_SEQUENCE_LENGTH: usize = 2;
pub const MAX_SEQUENCE_LENGTH: usize = 8;
pub const DEFAULT_SEQUENCE_MIN_COUNT: u64 = 3;
pub const DEFAULT_GAP_MIN_COUNT: u64 = 5;
pub const DEFAULT_SAMPLE_COUNT: usize = 5;
pub const DEFAULT_SAMPLE_CONTEXT: usize = 2;

const PATTERN_KINDS: [PatternKind; 4] = [
  PatternKind::ToolFrequency,
  PatternKind::CommandFrequency,
  PatternKind::ToolSequence,
  PatternKind::PermissionGap,
];

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
  pub ingest:        IngestConfig,
  /// Agent settings document holding the permission allow-list.
  pub settings_path: PathBuf,
  /// How far back the first bus pull reaches.
  pub bus_lookback:  TimeDelta,
}

impl Default for AnalyticsConfig {
  fn default() -> Self {
    let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default();
    Self {
      ingest:        IngestConfig::default(),
      settings_path: home.join(".claude").join("settings.json"),
      bus_lookback:  TimeDelta::days(7),
    }
  }
}

// ─── Reports ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct Status {
  #[serde(flatten)]
  pub store:    StatusReport,
  /// Whether the next read would ingest first.
  pub stale:    bool,
  pub logs_dir: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SequenceReport {
  pub length:    usize,
  pub min_count: u64,
  /// Distinct sequences at or above `min_count`, before the limit.
  pub total:     usize,
  pub sequences: Vec<SequenceCount>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Insights {
  pub patterns:       BTreeMap<PatternKind, Vec<Pattern>>,
  pub trends:         TrendReport,
  pub failures:       FailureSummary,
  pub classification: BTreeMap<String, usize>,
  pub computed_at:    DateTime<Utc>,
}

// ─── Analytics ───────────────────────────────────────────────────────────────

/// The scope the pattern cache was last rebuilt for.
#[derive(Debug, Clone)]
struct CacheScope {
  window:  TimeWindow,
  project: Option<String>,
  limit:   usize,
}

impl CacheScope {
  fn of(scope: &Scope) -> Self {
    Self { window: scope.window, project: scope.project.clone(), limit: scope.limit }
  }

  /// Same project, limit and window length, with an end no further than
  /// `slack` from the cached one.
  fn covers(&self, scope: &Scope, slack: TimeDelta) -> bool {
    self.project == scope.project
      && self.limit == scope.limit
      && self.window.length() == scope.window.length()
      && (self.window.end() - scope.window.end()).abs() <= slack
  }
}

pub struct Analytics<S, B = NoBus> {
  store:         Arc<S>,
  ingestor:      Ingestor<S>,
  bus:           B,
  settings_path: PathBuf,
  bus_lookback:  TimeDelta,
  cache_scope:   Mutex<Option<CacheScope>>,
}

impl<S> Analytics<S, NoBus>
where
  S: AnalyticsStore + 'static,
{
  pub fn new(store: Arc<S>, config: AnalyticsConfig) -> Self {
    Self {
      ingestor: Ingestor::new(Arc::clone(&store), config.ingest),
      store,
      bus: NoBus,
      settings_path: config.settings_path,
      bus_lookback: config.bus_lookback,
      cache_scope: Mutex::new(None),
    }
  }
}

impl<S, B> Analytics<S, B>
where
  S: AnalyticsStore + 'static,
  B: BusFeed,
{
  /// Pull bus events from `bus` instead.
  pub fn with_bus<F: BusFeed>(self, bus: F) -> Analytics<S, F> {
    Analytics {
      store: self.store,
      ingestor: self.ingestor,
      bus,
      settings_path: self.settings_path,
      bus_lookback: self.bus_lookback,
      cache_scope: self.cache_scope,
    }
  }

  pub fn store(&self) -> &Arc<S> { &self.store }

  pub fn ingestor(&self) -> &Ingestor<S> { &self.ingestor }

  async fn fresh(&self) -> Result<()> {
    self.ingestor.ensure_fresh().await?;
    Ok(())
  }

  // ── Status and ingestion ──────────────────────────────────────────────

  pub async fn status(&self) -> Result<Status> {
    let store = self.store.status().await.map_err(Error::store)?;
    Ok(Status {
      store,
      stale: self.ingestor.is_stale().await?,
      logs_dir: self.ingestor.config().logs_dir.display().to_string(),
    })
  }

  pub async fn ingest(&self, options: IngestOptions) -> Result<IngestReport> {
    self.ingestor.ingest(options).await
  }

  // ── Usage ─────────────────────────────────────────────────────────────

  pub async fn tool_frequency(&self, scope: Scope) -> Result<Vec<ToolFrequency>> {
    self.fresh().await?;
    self.store.tool_frequency(scope).await.map_err(Error::store)
  }

  pub async fn command_breakdown(
    &self,
    scope: Scope,
    prefix: Option<String>,
  ) -> Result<Vec<CommandFrequency>> {
    self.fresh().await?;
    self
      .store
      .command_frequency(scope, prefix.filter(|p| !p.is_empty()))
      .await
      .map_err(Error::store)
  }

  // ── Sequences ─────────────────────────────────────────────────────────

  pub async fn sequences(&self, scope: Scope, length: usize, min_count: u64) -> Result<SequenceReport> {
    if !(2..=MAX_SEQUENCE_LENGTH).contains(&length) {
      return Err(Error::InvalidArgument(format!(
        "sequence length must be between 2 and {MAX_SEQUENCE_LENGTH}, got {length}"
      )));
    }
    self.fresh().await?;
    let report = self.mine_sequences(scope, length, min_count).await?;
    info!(length, total = report.total, "sequences mined");
    Ok(report)
  }

  async fn mine_sequences(&self, scope: Scope, length: usize, min_count: u64) -> Result<SequenceReport> {
    let limit = scope.limit;
    let miner = self
      .store
      .scan_tool_calls(scope, SequenceMiner::new(length))
      .await
      .map_err(Error::store)?;
    let mut sequences = miner.finish(min_count.max(1));
    let total = sequences.len();
    sequences.truncate(limit);
    Ok(SequenceReport { length, min_count, total, sequences })
  }

  /// The `count` most recent occurrences of `pattern` (tool names joined by
  /// `→` or `,`), with `context` calls either side.
  pub async fn sample_sequences(
    &self,
    scope: Scope,
    pattern: &str,
    count: usize,
    context: usize,
  ) -> Result<Vec<SequenceSample>> {
    let target = parse_pattern(pattern);
    if target.len() < 2 {
      return Err(Error::InvalidArgument(format!(
        "pattern {pattern:?} must name at least two tools"
      )));
    }
    self.fresh().await?;
    let collector = self
      .store
      .scan_tool_calls(scope, SampleCollector::new(target, context))
      .await
      .map_err(Error::store)?;
    Ok(collector.finish(count))
  }

  // ── Permissions ───────────────────────────────────────────────────────

  pub async fn permission_gaps(&self, scope: Scope, min_count: u64) -> Result<GapReport> {
    self.fresh().await?;
    self.find_permission_gaps(scope, min_count).await
  }

  async fn find_permission_gaps(&self, scope: Scope, min_count: u64) -> Result<GapReport> {
    let allow = load_allow_list(&self.settings_path).await?;
    let limit = scope.limit;
    let lines = self.store.command_lines(scope).await.map_err(Error::store)?;
    let mut report = find_gaps(&lines, &allow, min_count.max(1));
    report.gaps.truncate(limit);
    Ok(report)
  }

  // ── Failures ──────────────────────────────────────────────────────────

  pub async fn failures(&self, scope: Scope) -> Result<FailureReport> {
    self.fresh().await?;
    self.collect_failures(scope).await
  }

  async fn collect_failures(&self, scope: Scope) -> Result<FailureReport> {
    let limit = scope.limit;
    let failed = self.store.failed_calls(scope.clone()).await.map_err(Error::store)?;
    let edits = self.store.file_edits(scope).await.map_err(Error::store)?;

    let (summary, mut by_tool) = group_failures(&failed);
    let mut rework = detect_rework(
      &edits,
      TimeDelta::minutes(REWORK_WINDOW_MINUTES),
      REWORK_MIN_EDITS,
    );
    by_tool.truncate(limit);
    rework.truncate(limit);
    Ok(FailureReport { summary, by_tool, rework })
  }

  // ── Classification and trends ─────────────────────────────────────────

  /// Classify sessions with at least `min_tool_calls` calls. The
  /// distribution counts every classified session; the list is limited.
  pub async fn classify_sessions(&self, scope: Scope, min_tool_calls: i64) -> Result<ClassificationReport> {
    self.fresh().await?;
    let limit = scope.limit;
    let counts = self.store.session_activity(scope).await.map_err(Error::store)?;
    let mut report = classify::classify_sessions(&counts, min_tool_calls);
    report.sessions.truncate(limit);
    Ok(report)
  }

  pub async fn trends(
    &self,
    window: TimeWindow,
    project: Option<String>,
    comparison: Comparison,
  ) -> Result<TrendReport> {
    self.fresh().await?;
    self.compare_periods(window, project, comparison).await
  }

  async fn compare_periods(
    &self,
    window: TimeWindow,
    project: Option<String>,
    comparison: Comparison,
  ) -> Result<TrendReport> {
    let baseline = comparison.baseline(&window);
    let current = self
      .store
      .period_totals(window, project.clone())
      .await
      .map_err(Error::store)?;
    let previous = self
      .store
      .period_totals(baseline, project)
      .await
      .map_err(Error::store)?;
    Ok(analyze_trends(comparison, window, &current, &previous))
  }

  // ── Sessions and messages ─────────────────────────────────────────────

  pub async fn search_messages(&self, query: SearchQuery) -> Result<Vec<SearchHit>> {
    if query.text.trim().is_empty() {
      return Err(Error::InvalidArgument("search text is empty".into()));
    }
    self.fresh().await?;
    self.store.search_messages(query).await.map_err(Error::store)
  }

  pub async fn sessions(&self, scope: Scope) -> Result<Vec<Session>> {
    self.fresh().await?;
    self.store.sessions(scope).await.map_err(Error::store)
  }

  pub async fn session(&self, id: String) -> Result<Option<Session>> {
    self.fresh().await?;
    self.store.session(id).await.map_err(Error::store)
  }

  pub async fn token_usage(&self, scope: Scope, by: TokenGrouping) -> Result<Vec<TokenUsageRow>> {
    self.fresh().await?;
    self.store.token_usage(scope, by).await.map_err(Error::store)
  }

  pub async fn compactions(&self, scope: Scope, session_id: Option<String>) -> Result<Vec<CompactionRow>> {
    self.fresh().await?;
    self.store.compactions(scope, session_id).await.map_err(Error::store)
  }

  /// Tool results of at least `min_bytes` (10 KiB when `None`).
  pub async fn large_results(&self, scope: Scope, min_bytes: Option<i64>) -> Result<Vec<LargeResult>> {
    self.fresh().await?;
    let min_bytes = min_bytes.unwrap_or(DEFAULT_LARGE_RESULT_BYTES).max(0);
    self.store.large_results(scope, min_bytes).await.map_err(Error::store)
  }

  // ── Pattern cache ─────────────────────────────────────────────────────

  /// Recompute every cached pattern over `scope` and replace the cache.
  pub async fn refresh_patterns(&self, scope: Scope) -> Result<usize> {
    self.fresh().await?;
    self.rebuild_pattern_cache(scope).await
  }

  async fn rebuild_pattern_cache(&self, scope: Scope) -> Result<usize> {
    let key = CacheScope::of(&scope);
    let computed_at = Utc::now();
    let mut patterns = Vec::new();

    for tool in self.store.tool_frequency(scope.clone()).await.map_err(Error::store)? {
      patterns.push(Pattern {
        kind: PatternKind::ToolFrequency,
        key: tool.tool,
        count: tool.count,
        last_seen: None,
        metadata: json!({ "breakdown": tool.breakdown }),
        computed_at,
      });
    }

    let commands = self
      .store
      .command_frequency(scope.clone(), None)
      .await
      .map_err(Error::store)?;
    for command in commands {
      patterns.push(Pattern {
        kind: PatternKind::CommandFrequency,
        key: command.command,
        count: command.count,
        last_seen: command.last_seen,
        metadata: json!({ "top_args": command.top_args }),
        computed_at,
      });
    }

    let sequences = self
      .mine_sequences(scope.clone(), DEFAULT_SEQUENCE_LENGTH, DEFAULT_SEQUENCE_MIN_COUNT)
      .await?;
    for sequence in sequences.sequences {
      patterns.push(Pattern {
        kind: PatternKind::ToolSequence,
        key: sequence.pattern,
        count: i64::try_from(sequence.count).unwrap_or(i64::MAX),
        last_seen: Some(sequence.last_seen),
        metadata: json!({ "sequence": sequence.tools }),
        computed_at,
      });
    }

    let gaps = self.find_permission_gaps(scope, DEFAULT_GAP_MIN_COUNT).await?;
    for gap in gaps.gaps {
      patterns.push(Pattern {
        kind: PatternKind::PermissionGap,
        key: gap.command,
        count: i64::try_from(gap.count).unwrap_or(i64::MAX),
        last_seen: None,
        metadata: json!({
          "suggestion": gap.suggestion,
          "example": gap.example,
          "uncovered_count": gap.uncovered_count,
        }),
        computed_at,
      });
    }

    let stored = self.store.replace_patterns(patterns).await.map_err(Error::store)?;
    *self.cache_scope.lock().await = Some(key);
    info!(patterns = stored, "pattern cache refreshed");
    Ok(stored)
  }

  /// Cached patterns plus trend, failure and classification summaries. The
  /// cache is recomputed when empty or when `refresh` is set.
  pub async fn insights(&self, scope: Scope, refresh: bool) -> Result<Insights> {
    self.fresh().await?;
    let slack = self.ingestor.config().stale_after;
    let reusable = self
      .cache_scope
      .lock()
      .await
      .as_ref()
      .is_some_and(|cached| cached.covers(&scope, slack));
    if refresh || !reusable {
      self.rebuild_pattern_cache(scope.clone()).await?;
    } else {
      debug!("reusing pattern cache");
    }

    let mut patterns = BTreeMap::new();
    for kind in PATTERN_KINDS {
      let rows = self
        .store
        .patterns(Some(kind), scope.limit)
        .await
        .map_err(Error::store)?;
      patterns.insert(kind, rows);
    }

    let trends = self
      .compare_periods(scope.window, scope.project.clone(), Comparison::Previous)
      .await?;
    let failures = self.collect_failures(scope.clone()).await?.summary;
    let counts = self.store.session_activity(scope).await.map_err(Error::store)?;
    let classification =
      classify::classify_sessions(&counts, classify::DEFAULT_MIN_TOOL_CALLS).distribution;

    Ok(Insights { patterns, trends, failures, classification, computed_at: Utc::now() })
  }

  // ── Git ───────────────────────────────────────────────────────────────

  pub async fn ingest_commits(&self, commits: Vec<GitCommit>) -> Result<usize> {
    feeds::ingest_commits(self.store.as_ref(), commits).await
  }

  pub async fn correlate_commits(&self, window: TimeWindow) -> Result<CorrelationReport> {
    self.fresh().await?;
    feeds::correlate_commits(self.store.as_ref(), window).await
  }

  pub async fn session_commits(&self, scope: Scope, session_id: Option<String>) -> Result<Vec<CommitView>> {
    self.fresh().await?;
    self
      .store
      .session_commits(scope, session_id)
      .await
      .map_err(Error::store)
  }

  // ── Bus ───────────────────────────────────────────────────────────────

  pub async fn ingest_bus(&self) -> Result<BusReport> {
    feeds::ingest_bus(self.store.as_ref(), &self.bus, self.bus_lookback).await
  }

  pub async fn bus_events(&self, scope: Scope, event_type: Option<String>) -> Result<Vec<BusEvent>> {
    self.fresh().await?;
    self.store.bus_events(scope, event_type).await.map_err(Error::store)
  }
}
