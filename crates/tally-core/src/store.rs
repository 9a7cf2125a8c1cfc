//! The `AnalyticsStore` trait.
//!
//! Implemented by storage backends (e.g. `tally-store-sqlite`). The ingestion
//! engine and the API depend on this abstraction, never on a concrete
//! backend, and never open a connection of their own.
//!
//! Implementations must funnel every mutation through a single writer so that
//! session rollups and the pattern cache are never updated concurrently. Reads
//! may run in parallel with each other and with the writer.

use std::{future::Future, ops::ControlFlow};

use chrono::{DateTime, Utc};

use crate::{
  classify::SessionCounts,
  event::Event,
  failures::{FailedCall, FileEdit},
  git::{BusEvent, CommitView, GitCommit, SessionCommit, SessionSpan},
  pattern::{Pattern, PatternKind},
  report::{
    BatchOutcome, CommandFrequency, CommandLine, CompactionRow, LargeResult, SearchHit,
    SearchQuery, StatusReport, TokenGrouping, TokenUsageRow, ToolCallRow, ToolFrequency,
  },
  session::{IngestionState, Session},
  trends::PeriodTotals,
  window::{Scope, TimeWindow},
};

/// Errors a backend reports. Lets callers tell bad caller input (such as a
/// malformed full-text query) apart from backend failures.
pub trait StoreError: std::error::Error + Send + Sync + 'static {
  fn is_invalid_input(&self) -> bool { false }
}

/// Receives tool calls from [`AnalyticsStore::scan_tool_calls`], one at a
/// time. Returning `Break` stops the scan.
pub trait ToolCallVisitor {
  fn visit(&mut self, row: &ToolCallRow) -> ControlFlow<()>;
}

impl<F> ToolCallVisitor for F
where
  F: FnMut(&ToolCallRow) -> ControlFlow<()>,
{
  fn visit(&mut self, row: &ToolCallRow) -> ControlFlow<()> { self(row) }
}

pub trait AnalyticsStore: Send + Sync {
  type Error: StoreError;

  // ── Ingestion ─────────────────────────────────────────────────────────

  /// Every file the ledger knows about.
  fn ingestion_ledger(
    &self,
  ) -> impl Future<Output = Result<Vec<IngestionState>, Self::Error>> + Send + '_;

  /// Persist one file's events atomically: insert the events (skipping ones
  /// already stored), fold the inserted ones into their session rollups, and
  /// upsert the ledger row with `records_added` set to the insert count.
  fn ingest_batch(
    &self,
    events: Vec<Event>,
    ledger: IngestionState,
  ) -> impl Future<Output = Result<BatchOutcome, Self::Error>> + Send + '_;

  /// Recompute every session rollup from the stored events.
  fn rebuild_sessions(&self) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  /// When the ledger was last written.
  fn last_ingestion(
    &self,
  ) -> impl Future<Output = Result<Option<DateTime<Utc>>, Self::Error>> + Send + '_;

  fn status(&self) -> impl Future<Output = Result<StatusReport, Self::Error>> + Send + '_;

  // ── Usage ─────────────────────────────────────────────────────────────

  /// Tool-call counts, most used first, with per-tool breakdowns.
  fn tool_frequency(
    &self,
    scope: Scope,
  ) -> impl Future<Output = Result<Vec<ToolFrequency>, Self::Error>> + Send + '_;

  /// Shell command counts. `prefix` restricts to commands starting with it.
  fn command_frequency(
    &self,
    scope: Scope,
    prefix: Option<String>,
  ) -> impl Future<Output = Result<Vec<CommandFrequency>, Self::Error>> + Send + '_;

  /// Every shell invocation in the window (the scope limit does not apply).
  fn command_lines(
    &self,
    scope: Scope,
  ) -> impl Future<Output = Result<Vec<CommandLine>, Self::Error>> + Send + '_;

  /// Feed tool calls, ordered by session, timestamp and record id, to
  /// `visitor` until it breaks or the rows run out. Returns the visitor.
  fn scan_tool_calls<V>(
    &self,
    scope: Scope,
    visitor: V,
  ) -> impl Future<Output = Result<V, Self::Error>> + Send + '_
  where
    V: ToolCallVisitor + Send + 'static;

  /// Error-flagged results joined to their calls.
  fn failed_calls(
    &self,
    scope: Scope,
  ) -> impl Future<Output = Result<Vec<FailedCall>, Self::Error>> + Send + '_;

  /// Calls to editing tools that name a file.
  fn file_edits(
    &self,
    scope: Scope,
  ) -> impl Future<Output = Result<Vec<FileEdit>, Self::Error>> + Send + '_;

  /// Per-session counts for classification.
  fn session_activity(
    &self,
    scope: Scope,
  ) -> impl Future<Output = Result<Vec<SessionCounts>, Self::Error>> + Send + '_;

  fn period_totals(
    &self,
    window: TimeWindow,
    project: Option<String>,
  ) -> impl Future<Output = Result<PeriodTotals, Self::Error>> + Send + '_;

  // ── Sessions and messages ─────────────────────────────────────────────

  /// Sessions active in the window, most recent first.
  fn sessions(
    &self,
    scope: Scope,
  ) -> impl Future<Output = Result<Vec<Session>, Self::Error>> + Send + '_;

  fn session(
    &self,
    id: String,
  ) -> impl Future<Output = Result<Option<Session>, Self::Error>> + Send + '_;

  fn token_usage(
    &self,
    scope: Scope,
    by: TokenGrouping,
  ) -> impl Future<Output = Result<Vec<TokenUsageRow>, Self::Error>> + Send + '_;

  fn search_messages(
    &self,
    query: SearchQuery,
  ) -> impl Future<Output = Result<Vec<SearchHit>, Self::Error>> + Send + '_;

  fn compactions(
    &self,
    scope: Scope,
    session_id: Option<String>,
  ) -> impl Future<Output = Result<Vec<CompactionRow>, Self::Error>> + Send + '_;

  /// Tool results of at least `min_bytes`, largest first.
  fn large_results(
    &self,
    scope: Scope,
    min_bytes: i64,
  ) -> impl Future<Output = Result<Vec<LargeResult>, Self::Error>> + Send + '_;

  // ── Pattern cache ─────────────────────────────────────────────────────

  /// Replace the entire cache in one transaction.
  fn replace_patterns(
    &self,
    patterns: Vec<Pattern>,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  fn patterns(
    &self,
    kind: Option<PatternKind>,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<Pattern>, Self::Error>> + Send + '_;

  // ── Git ───────────────────────────────────────────────────────────────

  /// Insert commits not already stored. Returns the number inserted.
  fn record_commits(
    &self,
    commits: Vec<GitCommit>,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  fn commits(
    &self,
    window: TimeWindow,
  ) -> impl Future<Output = Result<Vec<GitCommit>, Self::Error>> + Send + '_;

  fn session_spans(
    &self,
    window: TimeWindow,
  ) -> impl Future<Output = Result<Vec<SessionSpan>, Self::Error>> + Send + '_;

  fn link_session_commits(
    &self,
    links: Vec<SessionCommit>,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  fn session_commits(
    &self,
    scope: Scope,
    session_id: Option<String>,
  ) -> impl Future<Output = Result<Vec<CommitView>, Self::Error>> + Send + '_;

  // ── Bus ───────────────────────────────────────────────────────────────

  /// Highest bus event id stored.
  fn bus_watermark(&self) -> impl Future<Output = Result<Option<i64>, Self::Error>> + Send + '_;

  fn record_bus_events(
    &self,
    events: Vec<BusEvent>,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  fn bus_events(
    &self,
    scope: Scope,
    event_type: Option<String>,
  ) -> impl Future<Output = Result<Vec<BusEvent>, Self::Error>> + Send + '_;
}
