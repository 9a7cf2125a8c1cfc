//! [`SqliteStore`], the SQLite implementation of [`AnalyticsStore`].

use std::{
  path::Path,
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
  time::Duration,
};

use chrono::{DateTime, Utc};
use rusqlite::{OpenFlags, params};
use tally_core::{
  classify::SessionCounts,
  event::Event,
  failures::{FailedCall, FileEdit},
  git::{BusEvent, CommitView, GitCommit, SessionCommit, SessionSpan},
  pattern::{Pattern, PatternKind},
  report::{
    BatchOutcome, CommandFrequency, CommandLine, CompactionRow, LargeResult, SearchHit,
    SearchQuery, StatusReport, TokenGrouping, TokenUsageRow, ToolFrequency,
  },
  session::{IngestionState, Session, fold_deltas},
  store::{AnalyticsStore, ToolCallVisitor},
  tool::REWORK_TOOLS,
  trends::PeriodTotals,
  window::{Scope, TimeWindow},
};
use tracing::{debug, info};

use crate::{
  Error, Result,
  encode::{ScopeParams, decode_opt_dt, encode_dt},
  migrations, queries,
};

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
  /// Read-only connections opened alongside the writer. Zero sends reads
  /// through the writer.
  pub read_connections: usize,
  pub busy_timeout:     Duration,
}

impl Default for ConnectionConfig {
  fn default() -> Self { Self { read_connections: 4, busy_timeout: Duration::from_secs(5) } }
}

const PRAGMAS: &str = "
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;
";

// ─── Store ───────────────────────────────────────────────────────────────────

/// An analytics store backed by a single SQLite file.
///
/// All writes go through one connection, so ingestion batches, rollup
/// updates and pattern-cache swaps are serialized. Reads round-robin over a
/// pool of read-only connections and run concurrently with the writer under
/// WAL. Cloning is cheap; connections are reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  writer:  tokio_rusqlite::Connection,
  readers: Arc<[tokio_rusqlite::Connection]>,
  next:    Arc<AtomicUsize>,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and bring its schema up to date.
  pub async fn open(path: impl AsRef<Path>, config: ConnectionConfig) -> Result<Self> {
    let path = path.as_ref().to_path_buf();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
      tokio::fs::create_dir_all(parent).await?;
    }

    let writer = tokio_rusqlite::Connection::open(&path).await?;
    let timeout = config.busy_timeout;
    writer
      .call(move |conn| {
        conn.busy_timeout(timeout)?;
        conn.execute_batch(PRAGMAS)?;
        Ok(())
      })
      .await?;
    Self::migrate(&writer).await?;

    // Opened after migrating so every reader sees the final schema.
    let mut readers = Vec::with_capacity(config.read_connections);
    for _ in 0..config.read_connections {
      let reader = tokio_rusqlite::Connection::open_with_flags(
        &path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI,
      )
      .await?;
      reader
        .call(move |conn| {
          conn.busy_timeout(timeout)?;
          Ok(())
        })
        .await?;
      readers.push(reader);
    }

    info!(path = %path.display(), readers = readers.len(), "opened analytics store");
    Ok(Self { writer, readers: readers.into(), next: Arc::new(AtomicUsize::new(0)) })
  }

  /// Open an in-memory store; all reads share the writer. Useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let writer = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::migrate(&writer).await?;
    Ok(Self { writer, readers: Arc::from(Vec::new()), next: Arc::new(AtomicUsize::new(0)) })
  }

  async fn migrate(conn: &tokio_rusqlite::Connection) -> Result<()> {
    let applied = conn.call(|conn| Ok(migrations::run(conn))).await??;
    if applied > 0 {
      info!(applied, "schema migrated");
    }
    Ok(())
  }

  pub async fn schema_version(&self) -> Result<i64> {
    Ok(self.writer.call(|conn| Ok(migrations::current_version(conn)?)).await?)
  }

  fn reader(&self) -> &tokio_rusqlite::Connection {
    if self.readers.is_empty() {
      return &self.writer;
    }
    let i = self.next.fetch_add(1, Ordering::Relaxed) % self.readers.len();
    &self.readers[i]
  }

  /// Run a read query on a pooled connection.
  async fn read<T, F>(&self, f: F) -> Result<T>
  where
    F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
    T: Send + 'static,
  {
    Ok(self.reader().call(move |conn| Ok(f(conn)?)).await?)
  }
}

// ─── Event encoding ──────────────────────────────────────────────────────────

const INSERT_EVENT: &str = "
INSERT OR IGNORE INTO events (
    session_id, record_id, timestamp, entry_type, project, parent_id, correlation_id,
    tool_name, tool_input_json, is_error, command, command_args, file_path, skill_name,
    input_tokens, output_tokens, cache_read_tokens, cache_creation_tokens,
    model, git_branch, cwd, slug, message_text, result_size_bytes
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18,
          ?19, ?20, ?21, ?22, ?23, ?24)";

/// Adds a delta onto an existing rollup. The branch follows the newest
/// observation and the display name the earliest, whatever order files
/// arrive in.
const UPSERT_SESSION: &str = "
INSERT INTO sessions (
    id, project, first_seen, last_seen, entry_count, tool_call_count,
    input_tokens, output_tokens, primary_branch, branch_seen_at, display_name,
    name_seen_at, compaction_count
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
ON CONFLICT (id) DO UPDATE SET
    first_seen       = MIN(first_seen, excluded.first_seen),
    last_seen        = MAX(last_seen, excluded.last_seen),
    entry_count      = entry_count + excluded.entry_count,
    tool_call_count  = tool_call_count + excluded.tool_call_count,
    input_tokens     = input_tokens + excluded.input_tokens,
    output_tokens    = output_tokens + excluded.output_tokens,
    primary_branch   = CASE
                         WHEN excluded.primary_branch IS NOT NULL
                          AND (branch_seen_at IS NULL OR excluded.branch_seen_at >= branch_seen_at)
                         THEN excluded.primary_branch
                         ELSE primary_branch
                       END,
    branch_seen_at   = CASE
                         WHEN excluded.primary_branch IS NOT NULL
                          AND (branch_seen_at IS NULL OR excluded.branch_seen_at >= branch_seen_at)
                         THEN excluded.branch_seen_at
                         ELSE branch_seen_at
                       END,
    display_name     = CASE
                         WHEN excluded.display_name IS NOT NULL
                          AND (name_seen_at IS NULL OR excluded.name_seen_at < name_seen_at)
                         THEN excluded.display_name
                         ELSE display_name
                       END,
    name_seen_at     = CASE
                         WHEN excluded.display_name IS NOT NULL
                          AND (name_seen_at IS NULL OR excluded.name_seen_at < name_seen_at)
                         THEN excluded.name_seen_at
                         ELSE name_seen_at
                       END,
    compaction_count = compaction_count + excluded.compaction_count";

const UPSERT_LEDGER: &str = "
INSERT INTO ingestion_state (path, size, mtime, records_added, processed_at)
VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT (path) DO UPDATE SET
    size          = excluded.size,
    mtime         = excluded.mtime,
    records_added = excluded.records_added,
    processed_at  = excluded.processed_at";

const REBUILD_SESSIONS: &str = "
INSERT INTO sessions (
    id, project, first_seen, last_seen, entry_count, tool_call_count,
    input_tokens, output_tokens, compaction_count
)
SELECT e.session_id, MIN(e.project), MIN(e.timestamp), MAX(e.timestamp), COUNT(*),
       SUM(e.entry_type = 'tool_call'),
       COALESCE(SUM(e.input_tokens), 0), COALESCE(SUM(e.output_tokens), 0),
       SUM(e.entry_type = 'compaction')
  FROM events e
 GROUP BY e.session_id";

/// Branch and display name for every rebuilt row, picked the same way the
/// incremental upsert picks them.
const REBUILD_SESSION_LABELS: &str = "
UPDATE sessions SET
    (primary_branch, branch_seen_at) = (
      SELECT b.git_branch, b.timestamp FROM events b
       WHERE b.session_id = sessions.id AND b.git_branch IS NOT NULL AND b.git_branch != ''
       ORDER BY b.timestamp DESC, b.id DESC LIMIT 1),
    (display_name, name_seen_at) = (
      SELECT d.slug, d.timestamp FROM events d
       WHERE d.session_id = sessions.id AND d.slug IS NOT NULL AND d.slug != ''
       ORDER BY d.timestamp, d.id LIMIT 1)
";

fn insert_event(stmt: &mut rusqlite::CachedStatement<'_>, e: &Event) -> rusqlite::Result<usize> {
  let (command, args) = e.command().map_or((None, None), |(c, a)| (Some(c), a));
  let usage = e.usage.as_ref();
  let kind: &str = e.kind.as_ref();
  stmt.execute(params![
    e.session_id,
    e.record_id,
    encode_dt(e.timestamp),
    kind,
    e.project,
    e.parent_id,
    e.correlation_id,
    e.tool_name(),
    e.tool_input_json,
    e.is_error,
    command,
    args,
    e.file_path(),
    e.skill_name(),
    usage.map(|u| u.input_tokens),
    usage.map(|u| u.output_tokens),
    usage.map(|u| u.cache_read_tokens),
    usage.map(|u| u.cache_creation_tokens),
    e.model,
    e.git_branch,
    e.cwd,
    e.slug,
    e.message_text,
    e.result_size_bytes,
  ])
}

/// FTS5 reports malformed queries as ordinary SQL errors.
fn is_query_syntax_error(e: &rusqlite::Error) -> bool {
  match e {
    rusqlite::Error::SqliteFailure(_, Some(msg)) => {
      msg.starts_with("fts5:") || msg.contains("no such column") || msg.contains("unterminated")
    }
    _ => false,
  }
}

// ─── AnalyticsStore impl ─────────────────────────────────────────────────────

impl AnalyticsStore for SqliteStore {
  type Error = Error;

  // ── Ingestion ─────────────────────────────────────────────────────────────

  async fn ingestion_ledger(&self) -> Result<Vec<IngestionState>> {
    let raw = self.read(queries::ledger).await?;
    raw.into_iter().map(|r| r.into_state()).collect()
  }

  async fn ingest_batch(&self, events: Vec<Event>, ledger: IngestionState) -> Result<BatchOutcome> {
    let path = ledger.path.clone();
    let outcome = self
      .writer
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut inserted: Vec<&Event> = Vec::with_capacity(events.len());
        {
          let mut stmt = tx.prepare_cached(INSERT_EVENT)?;
          for event in &events {
            if insert_event(&mut stmt, event)? > 0 {
              inserted.push(event);
            }
          }
        }

        let mut session_stmt = tx.prepare_cached(UPSERT_SESSION)?;
        for d in fold_deltas(inserted.iter().copied()) {
          session_stmt.execute(params![
            d.session_id,
            d.project,
            encode_dt(d.first_seen),
            encode_dt(d.last_seen),
            d.entries,
            d.tool_calls,
            d.input_tokens,
            d.output_tokens,
            d.branch,
            d.branch_seen_at.map(encode_dt),
            d.display_name,
            d.name_seen_at.map(encode_dt),
            d.compactions,
          ])?;
        }
        drop(session_stmt);

        let outcome = BatchOutcome {
          inserted:   inserted.len(),
          duplicates: events.len() - inserted.len(),
        };
        tx.execute(UPSERT_LEDGER, params![
          ledger.path,
          i64::try_from(ledger.size).unwrap_or(i64::MAX),
          encode_dt(ledger.mtime),
          i64::try_from(outcome.inserted).unwrap_or(i64::MAX),
          encode_dt(ledger.processed_at),
        ])?;
        tx.commit()?;
        Ok(outcome)
      })
      .await?;

    debug!(%path, inserted = outcome.inserted, duplicates = outcome.duplicates, "batch stored");
    Ok(outcome)
  }

  async fn rebuild_sessions(&self) -> Result<usize> {
    let rebuilt = self
      .writer
      .call(|conn| {
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM sessions", [])?;
        let n = tx.execute(REBUILD_SESSIONS, [])?;
        tx.execute(REBUILD_SESSION_LABELS, [])?;
        tx.commit()?;
        Ok(n)
      })
      .await?;
    info!(sessions = rebuilt, "rebuilt session rollups");
    Ok(rebuilt)
  }

  async fn last_ingestion(&self) -> Result<Option<DateTime<Utc>>> {
    let raw = self.read(queries::last_ingestion).await?;
    decode_opt_dt(raw.as_deref())
  }

  async fn status(&self) -> Result<StatusReport> {
    let raw = self.read(queries::status).await?;
    Ok(StatusReport {
      events:         raw.events,
      sessions:       raw.sessions,
      files_tracked:  raw.files_tracked,
      patterns:       raw.patterns,
      last_ingestion: decode_opt_dt(raw.last_ingestion.as_deref())?,
      earliest_event: decode_opt_dt(raw.earliest_event.as_deref())?,
      latest_event:   decode_opt_dt(raw.latest_event.as_deref())?,
      schema_version: raw.schema_version,
    })
  }

  // ── Usage ─────────────────────────────────────────────────────────────────

  async fn tool_frequency(&self, scope: Scope) -> Result<Vec<ToolFrequency>> {
    let p = ScopeParams::of(&scope);
    self.read(move |conn| queries::tool_frequency(conn, &p)).await
  }

  async fn command_frequency(
    &self,
    scope: Scope,
    prefix: Option<String>,
  ) -> Result<Vec<CommandFrequency>> {
    let p = ScopeParams::of(&scope);
    let prefix = prefix.filter(|s| !s.is_empty());
    self
      .read(move |conn| queries::command_frequency(conn, &p, prefix.as_deref()))
      .await
  }

  async fn command_lines(&self, scope: Scope) -> Result<Vec<CommandLine>> {
    let p = ScopeParams::of(&scope);
    self.read(move |conn| queries::command_lines(conn, &p)).await
  }

  async fn scan_tool_calls<V>(&self, scope: Scope, mut visitor: V) -> Result<V>
  where
    V: ToolCallVisitor + Send + 'static,
  {
    let p = ScopeParams::of(&scope);
    self
      .read(move |conn| {
        queries::scan_tool_calls(conn, &p, &mut visitor)?;
        Ok(visitor)
      })
      .await
  }

  async fn failed_calls(&self, scope: Scope) -> Result<Vec<FailedCall>> {
    let p = ScopeParams::of(&scope);
    self.read(move |conn| queries::failed_calls(conn, &p)).await
  }

  async fn file_edits(&self, scope: Scope) -> Result<Vec<FileEdit>> {
    let p = ScopeParams::of(&scope);
    self
      .read(move |conn| queries::file_edits(conn, &p, REWORK_TOOLS))
      .await
  }

  async fn session_activity(&self, scope: Scope) -> Result<Vec<SessionCounts>> {
    let p = ScopeParams::of(&scope);
    self.read(move |conn| queries::session_activity(conn, &p)).await
  }

  async fn period_totals(&self, window: TimeWindow, project: Option<String>) -> Result<PeriodTotals> {
    let p = ScopeParams::window(&window, project);
    self.read(move |conn| queries::period_totals(conn, &p)).await
  }

  // ── Sessions and messages ─────────────────────────────────────────────────

  async fn sessions(&self, scope: Scope) -> Result<Vec<Session>> {
    let p = ScopeParams::of(&scope);
    let raw = self.read(move |conn| queries::sessions(conn, &p)).await?;
    raw.into_iter().map(|r| r.into_session()).collect()
  }

  async fn session(&self, id: String) -> Result<Option<Session>> {
    let raw = self.read(move |conn| queries::session(conn, &id)).await?;
    raw.map(|r| r.into_session()).transpose()
  }

  async fn token_usage(&self, scope: Scope, by: TokenGrouping) -> Result<Vec<TokenUsageRow>> {
    let p = ScopeParams::of(&scope);
    self.read(move |conn| queries::token_usage(conn, &p, by)).await
  }

  async fn search_messages(&self, query: SearchQuery) -> Result<Vec<SearchHit>> {
    let text = query.text.trim().to_owned();
    if text.is_empty() {
      return Err(Error::InvalidSearch("empty query".into()));
    }
    let p = ScopeParams {
      limit: i64::try_from(query.limit).unwrap_or(i64::MAX),
      ..ScopeParams::window(&query.window, query.project)
    };
    let kind = query.kind;

    // Keep the SQL error inside so syntax errors can be told apart.
    let result = self
      .reader()
      .call(move |conn| Ok(queries::search(conn, &text, &p, kind)))
      .await?;
    match result {
      Ok(hits) => Ok(hits),
      Err(e) if is_query_syntax_error(&e) => Err(Error::InvalidSearch(e.to_string())),
      Err(e) => Err(e.into()),
    }
  }

  async fn compactions(&self, scope: Scope, session_id: Option<String>) -> Result<Vec<CompactionRow>> {
    let p = ScopeParams::of(&scope);
    self
      .read(move |conn| queries::compactions(conn, &p, session_id.as_deref()))
      .await
  }

  async fn large_results(&self, scope: Scope, min_bytes: i64) -> Result<Vec<LargeResult>> {
    let p = ScopeParams::of(&scope);
    self
      .read(move |conn| queries::large_results(conn, &p, min_bytes))
      .await
  }

  // ── Pattern cache ─────────────────────────────────────────────────────────

  async fn replace_patterns(&self, patterns: Vec<Pattern>) -> Result<usize> {
    let rows = patterns
      .into_iter()
      .map(|p| -> Result<_> {
        Ok((
          p.kind.to_string(),
          p.key,
          p.count,
          p.last_seen.map(encode_dt),
          serde_json::to_string(&p.metadata)?,
          encode_dt(p.computed_at),
        ))
      })
      .collect::<Result<Vec<_>>>()?;

    Ok(
      self
        .writer
        .call(move |conn| {
          let tx = conn.transaction()?;
          tx.execute("DELETE FROM patterns", [])?;
          let mut written = 0;
          {
            let mut stmt = tx.prepare_cached(
              "INSERT OR REPLACE INTO patterns (kind, key, count, last_seen, metadata, computed_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (kind, key, count, last_seen, metadata, computed_at) in &rows {
              written += stmt.execute(params![kind, key, count, last_seen, metadata, computed_at])?;
            }
          }
          tx.commit()?;
          Ok(written)
        })
        .await?,
    )
  }

  async fn patterns(&self, kind: Option<PatternKind>, limit: usize) -> Result<Vec<Pattern>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let raw = self.read(move |conn| queries::patterns(conn, kind, limit)).await?;
    raw.into_iter().map(|r| r.into_pattern()).collect()
  }

  // ── Git ───────────────────────────────────────────────────────────────────

  async fn record_commits(&self, commits: Vec<GitCommit>) -> Result<usize> {
    Ok(
      self
        .writer
        .call(move |conn| {
          let tx = conn.transaction()?;
          let mut inserted = 0;
          {
            let mut stmt = tx.prepare_cached(
              "INSERT OR IGNORE INTO git_commits (sha, timestamp, message, project)
               VALUES (?1, ?2, ?3, ?4)",
            )?;
            for c in &commits {
              inserted += stmt.execute(params![c.sha, encode_dt(c.timestamp), c.message, c.project])?;
            }
          }
          tx.commit()?;
          Ok(inserted)
        })
        .await?,
    )
  }

  async fn commits(&self, window: TimeWindow) -> Result<Vec<GitCommit>> {
    let p = ScopeParams::window(&window, None);
    self.read(move |conn| queries::commits(conn, &p)).await
  }

  async fn session_spans(&self, window: TimeWindow) -> Result<Vec<SessionSpan>> {
    let p = ScopeParams::window(&window, None);
    self.read(move |conn| queries::session_spans(conn, &p)).await
  }

  async fn link_session_commits(&self, links: Vec<SessionCommit>) -> Result<usize> {
    Ok(
      self
        .writer
        .call(move |conn| {
          let tx = conn.transaction()?;
          let mut inserted = 0;
          {
            let mut stmt = tx.prepare_cached(
              "INSERT OR IGNORE INTO session_commits (session_id, sha, time_to_commit_secs)
               VALUES (?1, ?2, ?3)",
            )?;
            for l in &links {
              inserted += stmt.execute(params![l.session_id, l.sha, l.time_to_commit_secs])?;
            }
          }
          tx.commit()?;
          Ok(inserted)
        })
        .await?,
    )
  }

  async fn session_commits(&self, scope: Scope, session_id: Option<String>) -> Result<Vec<CommitView>> {
    let p = ScopeParams::of(&scope);
    self
      .read(move |conn| queries::session_commits(conn, &p, session_id.as_deref()))
      .await
  }

  // ── Bus ───────────────────────────────────────────────────────────────────

  async fn bus_watermark(&self) -> Result<Option<i64>> {
    self.read(queries::bus_watermark).await
  }

  async fn record_bus_events(&self, events: Vec<BusEvent>) -> Result<usize> {
    Ok(
      self
        .writer
        .call(move |conn| {
          let tx = conn.transaction()?;
          let mut inserted = 0;
          {
            let mut stmt = tx.prepare_cached(
              "INSERT OR IGNORE INTO bus_events
                 (event_id, timestamp, event_type, channel, session_id, repo, payload)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for e in &events {
              inserted += stmt.execute(params![
                e.id,
                encode_dt(e.timestamp),
                e.event_type,
                e.channel,
                e.session_id,
                e.repo,
                e.payload,
              ])?;
            }
          }
          tx.commit()?;
          Ok(inserted)
        })
        .await?,
    )
  }

  async fn bus_events(&self, scope: Scope, event_type: Option<String>) -> Result<Vec<BusEvent>> {
    let p = ScopeParams::of(&scope);
    self
      .read(move |conn| queries::bus_events(conn, &p, event_type.as_deref()))
      .await
  }
}
