//! Read queries, as plain functions over a connection.
//!
//! [`SqliteStore`](crate::SqliteStore) runs these on whichever pooled
//! connection it picks. Scoped queries bind the scope as `?1`..`?3` (see
//! [`IN_SCOPE`]) and their own parameters after it.

use std::collections::BTreeMap;

use rusqlite::{Connection, OptionalExtension as _, Row, params};
use tally_core::{
  classify::SessionCounts,
  event::EntryKind,
  failures::{FailedCall, FileEdit},
  git::{BusEvent, CommitView, GitCommit, SessionSpan},
  pattern::PatternKind,
  report::{
    CommandFrequency, CommandLine, CompactionRow, LargeResult, NamedCount, SearchHit,
    TokenGrouping, TokenUsageRow, ToolCallRow, ToolFrequency,
  },
  store::ToolCallVisitor,
  tool::{BUILD_COMMANDS, EDIT_TOOLS, GIT_COMMANDS, SEARCH_TOOLS},
  trends::PeriodTotals,
};

use crate::encode::{
  IN_SCOPE, RawLedger, RawPattern, RawSession, SESSION_COLUMNS, ScopeParams, column_dt,
  column_kind, column_opt_dt, sql_list,
};

/// Breakdown entries listed per tool.
const BREAKDOWN_LIMIT: i64 = 10;

/// Argument variants listed per command.
const TOP_ARGS: i64 = 5;

/// Characters of compaction text kept as a preview.
const PREVIEW_CHARS: i64 = 200;

// ─── Status ──────────────────────────────────────────────────────────────────

pub struct RawStatus {
  pub events:         i64,
  pub sessions:       i64,
  pub files_tracked:  i64,
  pub patterns:       i64,
  pub last_ingestion: Option<String>,
  pub earliest_event: Option<String>,
  pub latest_event:   Option<String>,
  pub schema_version: i64,
}

pub fn status(conn: &Connection) -> rusqlite::Result<RawStatus> {
  conn.query_row(
    "SELECT (SELECT COUNT(*) FROM events),
            (SELECT COUNT(*) FROM sessions),
            (SELECT COUNT(*) FROM ingestion_state),
            (SELECT COUNT(*) FROM patterns),
            (SELECT MAX(processed_at) FROM ingestion_state),
            (SELECT MIN(timestamp) FROM events),
            (SELECT MAX(timestamp) FROM events),
            (SELECT COALESCE(MAX(version), 0) FROM schema_version)",
    [],
    |r| {
      Ok(RawStatus {
        events:         r.get(0)?,
        sessions:       r.get(1)?,
        files_tracked:  r.get(2)?,
        patterns:       r.get(3)?,
        last_ingestion: r.get(4)?,
        earliest_event: r.get(5)?,
        latest_event:   r.get(6)?,
        schema_version: r.get(7)?,
      })
    },
  )
}

pub fn ledger(conn: &Connection) -> rusqlite::Result<Vec<RawLedger>> {
  let mut stmt = conn.prepare(
    "SELECT path, size, mtime, records_added, processed_at FROM ingestion_state ORDER BY path",
  )?;
  stmt
    .query_map([], |r| {
      Ok(RawLedger {
        path:          r.get(0)?,
        size:          r.get(1)?,
        mtime:         r.get(2)?,
        records_added: r.get(3)?,
        processed_at:  r.get(4)?,
      })
    })?
    .collect()
}

pub fn last_ingestion(conn: &Connection) -> rusqlite::Result<Option<String>> {
  conn.query_row("SELECT MAX(processed_at) FROM ingestion_state", [], |r| r.get(0))
}

// ─── Usage ───────────────────────────────────────────────────────────────────

fn named_counts(
  conn: &Connection,
  sql: &str,
  p: &ScopeParams,
  key: &str,
  limit: i64,
) -> rusqlite::Result<Vec<NamedCount>> {
  let mut stmt = conn.prepare_cached(sql)?;
  stmt
    .query_map(params![p.start, p.end, p.project, key, limit], |r| {
      Ok(NamedCount { name: r.get(0)?, count: r.get(1)? })
    })?
    .collect()
}

/// The column a tool's calls are broken down by, if any.
fn breakdown_expr(tool: &str) -> Option<&'static str> {
  match tool {
    "Skill" => Some("e.skill_name"),
    "Task" => Some("json_extract(e.tool_input_json, '$.subagent_type')"),
    "Bash" => Some("e.command"),
    _ => None,
  }
}

pub fn tool_frequency(conn: &Connection, p: &ScopeParams) -> rusqlite::Result<Vec<ToolFrequency>> {
  let sql = format!(
    "SELECT e.tool_name, COUNT(*) AS n FROM events e
      WHERE e.entry_type = 'tool_call' AND e.tool_name IS NOT NULL AND {IN_SCOPE}
      GROUP BY e.tool_name
      ORDER BY n DESC, e.tool_name
      LIMIT ?4"
  );
  let mut stmt = conn.prepare(&sql)?;
  let mut tools: Vec<ToolFrequency> = stmt
    .query_map(params![p.start, p.end, p.project, p.limit], |r| {
      Ok(ToolFrequency { tool: r.get(0)?, count: r.get(1)?, breakdown: Vec::new() })
    })?
    .collect::<rusqlite::Result<_>>()?;

  for tool in &mut tools {
    let Some(expr) = breakdown_expr(&tool.tool) else { continue };
    let sql = format!(
      "SELECT {expr} AS k, COUNT(*) AS n FROM events e
        WHERE e.entry_type = 'tool_call' AND e.tool_name = ?4 AND {expr} IS NOT NULL
          AND {IN_SCOPE}
        GROUP BY k
        ORDER BY n DESC, k
        LIMIT ?5"
    );
    tool.breakdown = named_counts(conn, &sql, p, &tool.tool, BREAKDOWN_LIMIT)?;
  }
  Ok(tools)
}

pub fn command_frequency(
  conn: &Connection,
  p: &ScopeParams,
  prefix: Option<&str>,
) -> rusqlite::Result<Vec<CommandFrequency>> {
  let sql = format!(
    "SELECT e.command, COUNT(*) AS n, MAX(e.timestamp) FROM events e
      WHERE e.entry_type = 'tool_call' AND e.tool_name = 'Bash' AND e.command IS NOT NULL
        AND {IN_SCOPE}
        AND (?4 IS NULL OR substr(e.command, 1, length(?4)) = ?4)
      GROUP BY e.command
      ORDER BY n DESC, e.command
      LIMIT ?5"
  );
  let mut stmt = conn.prepare(&sql)?;
  let mut commands: Vec<CommandFrequency> = stmt
    .query_map(params![p.start, p.end, p.project, prefix, p.limit], |r| {
      Ok(CommandFrequency {
        command:   r.get(0)?,
        count:     r.get(1)?,
        last_seen: column_opt_dt(r, 2)?,
        top_args:  Vec::new(),
      })
    })?
    .collect::<rusqlite::Result<_>>()?;

  let sql = format!(
    "SELECT e.command_args AS k, COUNT(*) AS n FROM events e
      WHERE e.entry_type = 'tool_call' AND e.tool_name = 'Bash' AND e.command = ?4
        AND e.command_args IS NOT NULL AND {IN_SCOPE}
      GROUP BY k
      ORDER BY n DESC, k
      LIMIT ?5"
  );
  for command in &mut commands {
    command.top_args = named_counts(conn, &sql, p, &command.command, TOP_ARGS)?;
  }
  Ok(commands)
}

pub fn command_lines(conn: &Connection, p: &ScopeParams) -> rusqlite::Result<Vec<CommandLine>> {
  let sql = format!(
    "SELECT e.command, e.command_args FROM events e
      WHERE e.entry_type = 'tool_call' AND e.tool_name = 'Bash' AND e.command IS NOT NULL
        AND {IN_SCOPE}"
  );
  let mut stmt = conn.prepare(&sql)?;
  stmt
    .query_map(params![p.start, p.end, p.project], |r| {
      Ok(CommandLine { command: r.get(0)?, args: r.get(1)? })
    })?
    .collect()
}

fn tool_call_row(r: &Row<'_>) -> rusqlite::Result<ToolCallRow> {
  Ok(ToolCallRow {
    session_id: r.get(0)?,
    record_id:  r.get(1)?,
    timestamp:  column_dt(r, 2)?,
    tool_name:  r.get(3)?,
    command:    r.get(4)?,
    args:       r.get(5)?,
    file_path:  r.get(6)?,
  })
}

/// Stream tool calls through `visit` without collecting them.
pub fn scan_tool_calls<V>(conn: &Connection, p: &ScopeParams, visit: &mut V) -> rusqlite::Result<()>
where
  V: ToolCallVisitor,
{
  let sql = format!(
    "SELECT e.session_id, e.record_id, e.timestamp, e.tool_name, e.command, e.command_args,
            e.file_path
       FROM events e
      WHERE e.entry_type = 'tool_call' AND e.tool_name IS NOT NULL AND {IN_SCOPE}
      ORDER BY e.session_id, e.timestamp, e.id"
  );
  let mut stmt = conn.prepare(&sql)?;
  let mut rows = stmt.query(params![p.start, p.end, p.project])?;
  while let Some(row) = rows.next()? {
    if visit.visit(&tool_call_row(row)?).is_break() {
      break;
    }
  }
  Ok(())
}

pub fn failed_calls(conn: &Connection, p: &ScopeParams) -> rusqlite::Result<Vec<FailedCall>> {
  let sql = format!(
    "SELECT e.session_id, e.timestamp, COALESCE(c.tool_name, 'unknown'), c.command,
            c.file_path, json_extract(c.tool_input_json, '$.pattern')
       FROM events e
       LEFT JOIN events c
         ON c.session_id = e.session_id
        AND c.correlation_id = e.correlation_id
        AND c.entry_type = 'tool_call'
      WHERE e.entry_type = 'tool_result' AND e.is_error = 1 AND {IN_SCOPE}
      ORDER BY e.timestamp"
  );
  let mut stmt = conn.prepare(&sql)?;
  stmt
    .query_map(params![p.start, p.end, p.project], |r| {
      Ok(FailedCall {
        session_id: r.get(0)?,
        timestamp:  column_dt(r, 1)?,
        tool_name:  r.get(2)?,
        command:    r.get(3)?,
        file_path:  r.get(4)?,
        pattern:    r.get(5)?,
      })
    })?
    .collect()
}

pub fn file_edits(conn: &Connection, p: &ScopeParams, tools: &[&str]) -> rusqlite::Result<Vec<FileEdit>> {
  let sql = format!(
    "SELECT e.session_id, e.file_path, e.timestamp FROM events e
      WHERE e.entry_type = 'tool_call' AND e.tool_name IN ({})
        AND e.file_path IS NOT NULL AND {IN_SCOPE}
      ORDER BY e.session_id, e.file_path, e.timestamp",
    sql_list(tools)
  );
  let mut stmt = conn.prepare(&sql)?;
  stmt
    .query_map(params![p.start, p.end, p.project], |r| {
      Ok(FileEdit { session_id: r.get(0)?, file_path: r.get(1)?, timestamp: column_dt(r, 2)? })
    })?
    .collect()
}

pub fn session_activity(conn: &Connection, p: &ScopeParams) -> rusqlite::Result<Vec<SessionCounts>> {
  let edits = sql_list(EDIT_TOOLS);
  let searches = sql_list(SEARCH_TOOLS);
  let git = sql_list(GIT_COMMANDS);
  let build = sql_list(BUILD_COMMANDS);
  let sql = format!(
    "SELECT e.session_id, MIN(e.project),
            SUM(e.entry_type = 'tool_call'),
            SUM(e.entry_type = 'tool_result' AND e.is_error = 1),
            SUM(e.entry_type = 'tool_call' AND e.tool_name IN ({edits})),
            SUM(e.entry_type = 'tool_call' AND e.tool_name = 'Write'),
            SUM(e.entry_type = 'tool_call' AND e.tool_name = 'Bash' AND e.command IN ({git})),
            SUM(e.entry_type = 'tool_call' AND e.tool_name = 'Bash' AND e.command IN ({build})),
            SUM(e.entry_type = 'tool_call' AND e.tool_name = 'Read'),
            SUM(e.entry_type = 'tool_call' AND e.tool_name IN ({searches})),
            SUM(e.entry_type = 'compaction'),
            COALESCE(SUM(e.result_size_bytes), 0),
            MIN(e.timestamp), MAX(e.timestamp)
       FROM events e
      WHERE {IN_SCOPE}
      GROUP BY e.session_id
      ORDER BY MAX(e.timestamp) DESC"
  );
  let mut stmt = conn.prepare(&sql)?;
  let mut sessions: Vec<SessionCounts> = stmt
    .query_map(params![p.start, p.end, p.project], |r| {
      Ok(SessionCounts {
        session_id:                r.get(0)?,
        project:                   r.get(1)?,
        tool_calls:                r.get(2)?,
        errors:                    r.get(3)?,
        edits:                     r.get(4)?,
        writes:                    r.get(5)?,
        git:                       r.get(6)?,
        build:                     r.get(7)?,
        reads:                     r.get(8)?,
        searches:                  r.get(9)?,
        compactions:               r.get(10)?,
        result_bytes:              r.get(11)?,
        files_read_multiple_times: 0,
        first_seen:                column_opt_dt(r, 12)?,
        last_seen:                 column_opt_dt(r, 13)?,
      })
    })?
    .collect::<rusqlite::Result<_>>()?;

  let sql = format!(
    "SELECT session_id, COUNT(*) FROM (
        SELECT e.session_id FROM events e
         WHERE e.entry_type = 'tool_call' AND e.tool_name = 'Read' AND e.file_path IS NOT NULL
           AND {IN_SCOPE}
         GROUP BY e.session_id, e.file_path
        HAVING COUNT(*) > 1
     )
     GROUP BY session_id"
  );
  let mut stmt = conn.prepare(&sql)?;
  let rereads: BTreeMap<String, i64> = stmt
    .query_map(params![p.start, p.end, p.project], |r| Ok((r.get(0)?, r.get(1)?)))?
    .collect::<rusqlite::Result<_>>()?;
  for s in &mut sessions {
    s.files_read_multiple_times = rereads.get(&s.session_id).copied().unwrap_or(0);
  }
  Ok(sessions)
}

pub fn period_totals(conn: &Connection, p: &ScopeParams) -> rusqlite::Result<PeriodTotals> {
  let sql = format!(
    "SELECT COUNT(*), COUNT(DISTINCT e.session_id),
            COALESCE(SUM(e.entry_type = 'tool_call'), 0),
            COALESCE(SUM(e.entry_type = 'tool_result' AND e.is_error = 1), 0),
            COALESCE(SUM(e.input_tokens), 0), COALESCE(SUM(e.output_tokens), 0)
       FROM events e
      WHERE {IN_SCOPE}"
  );
  let mut totals = conn.query_row(&sql, params![p.start, p.end, p.project], |r| {
    Ok(PeriodTotals {
      events:        r.get(0)?,
      sessions:      r.get(1)?,
      tool_calls:    r.get(2)?,
      errors:        r.get(3)?,
      input_tokens:  r.get(4)?,
      output_tokens: r.get(5)?,
      tools:         BTreeMap::new(),
    })
  })?;

  let sql = format!(
    "SELECT e.tool_name, COUNT(*) FROM events e
      WHERE e.entry_type = 'tool_call' AND e.tool_name IS NOT NULL AND {IN_SCOPE}
      GROUP BY e.tool_name"
  );
  let mut stmt = conn.prepare(&sql)?;
  totals.tools = stmt
    .query_map(params![p.start, p.end, p.project], |r| Ok((r.get(0)?, r.get(1)?)))?
    .collect::<rusqlite::Result<_>>()?;
  Ok(totals)
}

// ─── Sessions and messages ───────────────────────────────────────────────────

pub fn sessions(conn: &Connection, p: &ScopeParams) -> rusqlite::Result<Vec<RawSession>> {
  let sql = format!(
    "SELECT {SESSION_COLUMNS} FROM sessions
      WHERE first_seen < ?2 AND last_seen >= ?1
        AND (?3 IS NULL OR instr(project, ?3) > 0)
      ORDER BY last_seen DESC, id
      LIMIT ?4"
  );
  let mut stmt = conn.prepare(&sql)?;
  stmt
    .query_map(params![p.start, p.end, p.project, p.limit], RawSession::from_row)?
    .collect()
}

pub fn session(conn: &Connection, id: &str) -> rusqlite::Result<Option<RawSession>> {
  conn
    .query_row(
      &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
      [id],
      RawSession::from_row,
    )
    .optional()
}

pub fn token_usage(
  conn: &Connection,
  p: &ScopeParams,
  by: TokenGrouping,
) -> rusqlite::Result<Vec<TokenUsageRow>> {
  let (key, order) = match by {
    TokenGrouping::Day => ("substr(e.timestamp, 1, 10)", "k DESC"),
    TokenGrouping::Session => ("e.session_id", "SUM(e.input_tokens) + SUM(e.output_tokens) DESC, k"),
    TokenGrouping::Model => {
      ("COALESCE(e.model, 'unknown')", "SUM(e.input_tokens) + SUM(e.output_tokens) DESC, k")
    }
  };
  let sql = format!(
    "SELECT {key} AS k, COUNT(*),
            COALESCE(SUM(e.input_tokens), 0), COALESCE(SUM(e.output_tokens), 0),
            COALESCE(SUM(e.cache_read_tokens), 0), COALESCE(SUM(e.cache_creation_tokens), 0)
       FROM events e
      WHERE e.entry_type = 'assistant' AND {IN_SCOPE}
      GROUP BY k
      ORDER BY {order}
      LIMIT ?4"
  );
  let mut stmt = conn.prepare(&sql)?;
  stmt
    .query_map(params![p.start, p.end, p.project, p.limit], |r| {
      Ok(TokenUsageRow {
        key:                   r.get(0)?,
        messages:              r.get(1)?,
        input_tokens:          r.get(2)?,
        output_tokens:         r.get(3)?,
        cache_read_tokens:     r.get(4)?,
        cache_creation_tokens: r.get(5)?,
      })
    })?
    .collect()
}

pub fn search(
  conn: &Connection,
  text: &str,
  p: &ScopeParams,
  kind: Option<EntryKind>,
) -> rusqlite::Result<Vec<SearchHit>> {
  let sql = format!(
    "SELECT e.session_id, e.record_id, e.timestamp, e.entry_type, e.project, e.tool_name,
            snippet(events_fts, -1, '[', ']', '…', 16)
       FROM events_fts
       JOIN events e ON e.id = events_fts.rowid
      WHERE events_fts MATCH ?4 AND {IN_SCOPE}
        AND (?5 IS NULL OR e.entry_type = ?5)
      ORDER BY e.timestamp DESC
      LIMIT ?6"
  );
  let kind = kind.map(|k| k.to_string());
  let mut stmt = conn.prepare(&sql)?;
  stmt
    .query_map(params![p.start, p.end, p.project, text, kind, p.limit], |r| {
      Ok(SearchHit {
        session_id: r.get(0)?,
        record_id:  r.get(1)?,
        timestamp:  column_dt(r, 2)?,
        kind:       column_kind(r, 3)?,
        project:    r.get(4)?,
        tool_name:  r.get(5)?,
        snippet:    r.get::<_, Option<String>>(6)?.unwrap_or_default(),
      })
    })?
    .collect()
}

pub fn compactions(
  conn: &Connection,
  p: &ScopeParams,
  session_id: Option<&str>,
) -> rusqlite::Result<Vec<CompactionRow>> {
  let sql = format!(
    "SELECT e.session_id, e.record_id, e.timestamp, e.project, substr(e.message_text, 1, ?6)
       FROM events e
      WHERE e.entry_type = 'compaction' AND {IN_SCOPE}
        AND (?4 IS NULL OR e.session_id = ?4)
      ORDER BY e.timestamp DESC
      LIMIT ?5"
  );
  let mut stmt = conn.prepare(&sql)?;
  stmt
    .query_map(params![p.start, p.end, p.project, session_id, p.limit, PREVIEW_CHARS], |r| {
      Ok(CompactionRow {
        session_id: r.get(0)?,
        record_id:  r.get(1)?,
        timestamp:  column_dt(r, 2)?,
        project:    r.get(3)?,
        preview:    r.get(4)?,
      })
    })?
    .collect()
}

pub fn large_results(
  conn: &Connection,
  p: &ScopeParams,
  min_bytes: i64,
) -> rusqlite::Result<Vec<LargeResult>> {
  let sql = format!(
    "SELECT e.session_id, e.record_id, e.timestamp, e.result_size_bytes, c.tool_name,
            COALESCE(c.command || COALESCE(' ' || c.command_args, ''), c.file_path)
       FROM events e
       LEFT JOIN events c
         ON c.session_id = e.session_id
        AND c.correlation_id = e.correlation_id
        AND c.entry_type = 'tool_call'
      WHERE e.entry_type = 'tool_result' AND e.result_size_bytes >= ?4 AND {IN_SCOPE}
      ORDER BY e.result_size_bytes DESC, e.timestamp DESC
      LIMIT ?5"
  );
  let mut stmt = conn.prepare(&sql)?;
  stmt
    .query_map(params![p.start, p.end, p.project, min_bytes, p.limit], |r| {
      Ok(LargeResult {
        session_id: r.get(0)?,
        record_id:  r.get(1)?,
        timestamp:  column_dt(r, 2)?,
        size_bytes: r.get(3)?,
        tool_name:  r.get(4)?,
        detail:     r.get(5)?,
      })
    })?
    .collect()
}

// ─── Pattern cache ───────────────────────────────────────────────────────────

pub fn patterns(
  conn: &Connection,
  kind: Option<PatternKind>,
  limit: i64,
) -> rusqlite::Result<Vec<RawPattern>> {
  let kind = kind.map(|k| k.to_string());
  let mut stmt = conn.prepare(
    "SELECT kind, key, count, last_seen, metadata, computed_at FROM patterns
      WHERE (?1 IS NULL OR kind = ?1)
      ORDER BY count DESC, kind, key
      LIMIT ?2",
  )?;
  stmt
    .query_map(params![kind, limit], |r| {
      Ok(RawPattern {
        kind:        r.get(0)?,
        key:         r.get(1)?,
        count:       r.get(2)?,
        last_seen:   r.get(3)?,
        metadata:    r.get(4)?,
        computed_at: r.get(5)?,
      })
    })?
    .collect()
}

// ─── Git ─────────────────────────────────────────────────────────────────────

pub fn commits(conn: &Connection, p: &ScopeParams) -> rusqlite::Result<Vec<GitCommit>> {
  let mut stmt = conn.prepare(
    "SELECT sha, timestamp, message, project FROM git_commits
      WHERE timestamp >= ?1 AND timestamp < ?2
      ORDER BY timestamp, sha",
  )?;
  stmt
    .query_map(params![p.start, p.end], |r| {
      Ok(GitCommit {
        sha:       r.get(0)?,
        timestamp: column_dt(r, 1)?,
        message:   r.get(2)?,
        project:   r.get(3)?,
      })
    })?
    .collect()
}

pub fn session_spans(conn: &Connection, p: &ScopeParams) -> rusqlite::Result<Vec<SessionSpan>> {
  let mut stmt = conn.prepare(
    "SELECT id, project, first_seen, last_seen FROM sessions
      WHERE first_seen < ?2 AND last_seen >= ?1
      ORDER BY id",
  )?;
  stmt
    .query_map(params![p.start, p.end], |r| {
      Ok(SessionSpan {
        session_id: r.get(0)?,
        project:    r.get(1)?,
        first_seen: column_dt(r, 2)?,
        last_seen:  column_dt(r, 3)?,
      })
    })?
    .collect()
}

pub fn session_commits(
  conn: &Connection,
  p: &ScopeParams,
  session_id: Option<&str>,
) -> rusqlite::Result<Vec<CommitView>> {
  let mut stmt = conn.prepare(
    "SELECT sc.session_id, g.sha, g.timestamp, g.message, sc.time_to_commit_secs,
            g.timestamp = (
              SELECT MIN(g2.timestamp) FROM session_commits sc2
                JOIN git_commits g2 ON g2.sha = sc2.sha
               WHERE sc2.session_id = sc.session_id
            )
       FROM session_commits sc
       JOIN git_commits g ON g.sha = sc.sha
       LEFT JOIN sessions s ON s.id = sc.session_id
      WHERE g.timestamp >= ?1 AND g.timestamp < ?2
        AND (?3 IS NULL OR instr(COALESCE(s.project, g.project), ?3) > 0)
        AND (?4 IS NULL OR sc.session_id = ?4)
      ORDER BY g.timestamp DESC, sc.session_id
      LIMIT ?5",
  )?;
  stmt
    .query_map(params![p.start, p.end, p.project, session_id, p.limit], |r| {
      Ok(CommitView {
        session_id:          r.get(0)?,
        sha:                 r.get(1)?,
        timestamp:           column_dt(r, 2)?,
        message:             r.get(3)?,
        time_to_commit_secs: r.get(4)?,
        is_first_commit:     r.get(5)?,
      })
    })?
    .collect()
}

// ─── Bus ─────────────────────────────────────────────────────────────────────

pub fn bus_watermark(conn: &Connection) -> rusqlite::Result<Option<i64>> {
  conn.query_row("SELECT MAX(event_id) FROM bus_events", [], |r| r.get(0))
}

pub fn bus_events(
  conn: &Connection,
  p: &ScopeParams,
  event_type: Option<&str>,
) -> rusqlite::Result<Vec<BusEvent>> {
  let mut stmt = conn.prepare(
    "SELECT event_id, timestamp, event_type, channel, session_id, repo, payload
       FROM bus_events
      WHERE timestamp >= ?1 AND timestamp < ?2
        AND (?3 IS NULL OR instr(COALESCE(repo, ''), ?3) > 0)
        AND (?4 IS NULL OR event_type = ?4)
      ORDER BY event_id DESC
      LIMIT ?5",
  )?;
  stmt
    .query_map(params![p.start, p.end, p.project, event_type, p.limit], |r| {
      Ok(BusEvent {
        id:         r.get(0)?,
        timestamp:  column_dt(r, 1)?,
        event_type: r.get(2)?,
        channel:    r.get(3)?,
        session_id: r.get(4)?,
        repo:       r.get(5)?,
        payload:    r.get(6)?,
      })
    })?
    .collect()
}
