//! Versioned schema migrations.
//!
//! Each migration runs in its own transaction and is recorded in
//! `schema_version`. Applied versions are skipped, and every step checks
//! for what it creates, so a database that was partly migrated by hand (or
//! by an older build that added columns without recording them) converges
//! on the same schema.

use rusqlite::{Connection, Transaction, params};
use tracing::{debug, info};

use crate::{Error, Result};

struct Migration {
  version:     i64,
  description: &'static str,
  apply:       fn(&Transaction<'_>) -> rusqlite::Result<()>,
}

const MIGRATIONS: &[Migration] = &[
  Migration { version: 1, description: "core tables", apply: v1_core_tables },
  Migration { version: 2, description: "context columns", apply: v2_context_columns },
  Migration { version: 3, description: "full-text search", apply: v3_full_text },
  Migration { version: 4, description: "git commits", apply: v4_git },
  Migration { version: 5, description: "bus events", apply: v5_bus },
  Migration { version: 6, description: "session label times", apply: v6_label_times },
];

/// The schema version a fully migrated database reports.
pub fn latest_version() -> i64 { MIGRATIONS.last().map_or(0, |m| m.version) }

/// Apply every pending migration. Returns the number applied.
pub fn run(conn: &mut Connection) -> Result<usize> { run_steps(conn, MIGRATIONS) }

/// A failed step rolls back alone; earlier steps stay committed.
fn run_steps(conn: &mut Connection, steps: &[Migration]) -> Result<usize> {
  ensure_version_table(conn)?;
  let current = current_version(conn)?;
  let mut applied = 0;

  for migration in steps {
    if migration.version <= current {
      debug!(version = migration.version, "migration already applied");
      continue;
    }
    info!(version = migration.version, description = migration.description, "applying migration");
    apply(conn, migration).map_err(|e| Error::Migration {
      version: migration.version,
      message: e.to_string(),
    })?;
    applied += 1;
  }
  Ok(applied)
}

pub fn current_version(conn: &Connection) -> rusqlite::Result<i64> {
  conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))
}

fn ensure_version_table(conn: &Connection) -> rusqlite::Result<()> {
  conn.execute_batch(
    "CREATE TABLE IF NOT EXISTS schema_version (
        version     INTEGER PRIMARY KEY,
        applied_at  TEXT NOT NULL,
        description TEXT
    );",
  )
}

fn apply(conn: &mut Connection, migration: &Migration) -> rusqlite::Result<()> {
  let tx = conn.transaction()?;
  (migration.apply)(&tx)?;
  tx.execute(
    "INSERT OR REPLACE INTO schema_version (version, applied_at, description)
     VALUES (?1, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'), ?2)",
    params![migration.version, migration.description],
  )?;
  tx.commit()
}

fn has_column(tx: &Transaction<'_>, table: &str, column: &str) -> rusqlite::Result<bool> {
  let n: i64 = tx.query_row(
    "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
    params![table, column],
    |r| r.get(0),
  )?;
  Ok(n > 0)
}

fn add_column(tx: &Transaction<'_>, table: &str, column: &str, decl: &str) -> rusqlite::Result<()> {
  if has_column(tx, table, column)? {
    debug!(table, column, "column already present");
    return Ok(());
  }
  tx.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl};"))
}

// ─── Steps ───────────────────────────────────────────────────────────────────

fn v1_core_tables(tx: &Transaction<'_>) -> rusqlite::Result<()> {
  tx.execute_batch(
    "
-- One row per source record; tool calls and results are split out of the
-- message that carried them. Never updated after insert.
CREATE TABLE IF NOT EXISTS events (
    id                    INTEGER PRIMARY KEY,
    session_id            TEXT NOT NULL,
    record_id             TEXT NOT NULL,
    timestamp             TEXT NOT NULL,
    entry_type            TEXT NOT NULL,
    project               TEXT NOT NULL,
    correlation_id        TEXT,
    tool_name             TEXT,
    tool_input_json       TEXT,
    is_error              INTEGER NOT NULL DEFAULT 0,
    command               TEXT,
    command_args          TEXT,
    file_path             TEXT,
    skill_name            TEXT,
    input_tokens          INTEGER,
    output_tokens         INTEGER,
    cache_read_tokens     INTEGER,
    cache_creation_tokens INTEGER,
    model                 TEXT,
    git_branch            TEXT,
    cwd                   TEXT,
    slug                  TEXT,
    UNIQUE (session_id, record_id)
);

CREATE INDEX IF NOT EXISTS events_timestamp_idx   ON events(timestamp);
CREATE INDEX IF NOT EXISTS events_session_idx     ON events(session_id, timestamp);
CREATE INDEX IF NOT EXISTS events_tool_idx        ON events(entry_type, tool_name);
CREATE INDEX IF NOT EXISTS events_command_idx     ON events(command);
CREATE INDEX IF NOT EXISTS events_correlation_idx ON events(session_id, correlation_id);

CREATE TABLE IF NOT EXISTS sessions (
    id              TEXT PRIMARY KEY,
    project         TEXT NOT NULL,
    first_seen      TEXT NOT NULL,
    last_seen       TEXT NOT NULL,
    entry_count     INTEGER NOT NULL DEFAULT 0,
    tool_call_count INTEGER NOT NULL DEFAULT 0,
    input_tokens    INTEGER NOT NULL DEFAULT 0,
    output_tokens   INTEGER NOT NULL DEFAULT 0,
    primary_branch  TEXT,
    display_name    TEXT
);

CREATE INDEX IF NOT EXISTS sessions_last_seen_idx ON sessions(last_seen);

CREATE TABLE IF NOT EXISTS ingestion_state (
    path          TEXT PRIMARY KEY,
    size          INTEGER NOT NULL,
    mtime         TEXT NOT NULL,
    records_added INTEGER NOT NULL DEFAULT 0,
    processed_at  TEXT NOT NULL
);

-- Derived; replaced wholesale by each mining run.
CREATE TABLE IF NOT EXISTS patterns (
    kind        TEXT NOT NULL,
    key         TEXT NOT NULL,
    count       INTEGER NOT NULL,
    last_seen   TEXT,
    metadata    TEXT,
    computed_at TEXT NOT NULL,
    PRIMARY KEY (kind, key)
);
",
  )
}

fn v2_context_columns(tx: &Transaction<'_>) -> rusqlite::Result<()> {
  add_column(tx, "events", "parent_id", "TEXT")?;
  add_column(tx, "events", "result_size_bytes", "INTEGER")?;
  add_column(tx, "events", "message_text", "TEXT")?;
  add_column(tx, "sessions", "compaction_count", "INTEGER NOT NULL DEFAULT 0")?;
  tx.execute_batch(
    "CREATE INDEX IF NOT EXISTS events_result_size_idx ON events(result_size_bytes)
       WHERE result_size_bytes IS NOT NULL;",
  )
}

fn v3_full_text(tx: &Transaction<'_>) -> rusqlite::Result<()> {
  tx.execute_batch(
    "
CREATE VIRTUAL TABLE IF NOT EXISTS events_fts USING fts5(
    message_text, tool_name, command, command_args, file_path, skill_name,
    content = 'events',
    content_rowid = 'id'
);

CREATE TRIGGER IF NOT EXISTS events_fts_ai AFTER INSERT ON events BEGIN
    INSERT INTO events_fts (rowid, message_text, tool_name, command, command_args, file_path, skill_name)
    VALUES (new.id, new.message_text, new.tool_name, new.command, new.command_args, new.file_path, new.skill_name);
END;

CREATE TRIGGER IF NOT EXISTS events_fts_ad AFTER DELETE ON events BEGIN
    INSERT INTO events_fts (events_fts, rowid, message_text, tool_name, command, command_args, file_path, skill_name)
    VALUES ('delete', old.id, old.message_text, old.tool_name, old.command, old.command_args, old.file_path, old.skill_name);
END;

CREATE TRIGGER IF NOT EXISTS events_fts_au AFTER UPDATE ON events BEGIN
    INSERT INTO events_fts (events_fts, rowid, message_text, tool_name, command, command_args, file_path, skill_name)
    VALUES ('delete', old.id, old.message_text, old.tool_name, old.command, old.command_args, old.file_path, old.skill_name);
    INSERT INTO events_fts (rowid, message_text, tool_name, command, command_args, file_path, skill_name)
    VALUES (new.id, new.message_text, new.tool_name, new.command, new.command_args, new.file_path, new.skill_name);
END;

-- Index whatever was stored before this migration.
INSERT INTO events_fts (events_fts) VALUES ('rebuild');
",
  )
}

fn v4_git(tx: &Transaction<'_>) -> rusqlite::Result<()> {
  tx.execute_batch(
    "
CREATE TABLE IF NOT EXISTS git_commits (
    sha       TEXT PRIMARY KEY,
    timestamp TEXT NOT NULL,
    message   TEXT NOT NULL,
    project   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS git_commits_timestamp_idx ON git_commits(timestamp);

CREATE TABLE IF NOT EXISTS session_commits (
    session_id          TEXT NOT NULL,
    sha                 TEXT NOT NULL,
    time_to_commit_secs INTEGER NOT NULL,
    PRIMARY KEY (session_id, sha)
);

CREATE INDEX IF NOT EXISTS session_commits_sha_idx ON session_commits(sha);
",
  )
}

fn v5_bus(tx: &Transaction<'_>) -> rusqlite::Result<()> {
  tx.execute_batch(
    "
CREATE TABLE IF NOT EXISTS bus_events (
    event_id   INTEGER PRIMARY KEY,
    timestamp  TEXT NOT NULL,
    event_type TEXT NOT NULL,
    channel    TEXT,
    session_id TEXT,
    repo       TEXT,
    payload    TEXT
);

CREATE INDEX IF NOT EXISTS bus_events_timestamp_idx ON bus_events(timestamp);
CREATE INDEX IF NOT EXISTS bus_events_type_idx      ON bus_events(event_type);
",
  )
}

/// When the stored branch and display name were observed, so later batches
/// can be compared against them.
fn v6_label_times(tx: &Transaction<'_>) -> rusqlite::Result<()> {
  add_column(tx, "sessions", "branch_seen_at", "TEXT")?;
  add_column(tx, "sessions", "name_seen_at", "TEXT")?;
  tx.execute_batch(
    "
UPDATE sessions SET
    (primary_branch, branch_seen_at) = (
      SELECT b.git_branch, b.timestamp FROM events b
       WHERE b.session_id = sessions.id AND b.git_branch IS NOT NULL AND b.git_branch != ''
       ORDER BY b.timestamp DESC, b.id DESC LIMIT 1),
    (display_name, name_seen_at) = (
      SELECT d.slug, d.timestamp FROM events d
       WHERE d.session_id = sessions.id AND d.slug IS NOT NULL AND d.slug != ''
       ORDER BY d.timestamp, d.id LIMIT 1);
",
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  fn columns(conn: &Connection, table: &str) -> Vec<String> {
    let mut stmt = conn
      .prepare("SELECT name FROM pragma_table_info(?1)")
      .unwrap();
    stmt
      .query_map([table], |r| r.get(0))
      .unwrap()
      .collect::<rusqlite::Result<_>>()
      .unwrap()
  }

  #[test]
  fn fresh_database_reaches_latest() {
    let mut conn = Connection::open_in_memory().unwrap();
    assert_eq!(run(&mut conn).unwrap(), MIGRATIONS.len());
    assert_eq!(current_version(&conn).unwrap(), latest_version());
    assert!(columns(&conn, "events").contains(&"message_text".to_string()));
    assert!(columns(&conn, "sessions").contains(&"compaction_count".to_string()));
  }

  #[test]
  fn rerun_is_a_no_op() {
    let mut conn = Connection::open_in_memory().unwrap();
    run(&mut conn).unwrap();
    assert_eq!(run(&mut conn).unwrap(), 0);
  }

  #[test]
  fn unrecorded_columns_are_not_added_twice() {
    let mut conn = Connection::open_in_memory().unwrap();
    ensure_version_table(&conn).unwrap();
    apply(&mut conn, &MIGRATIONS[0]).unwrap();
    // Columns added out of band, without a version row.
    conn
      .execute_batch(
        "ALTER TABLE events ADD COLUMN message_text TEXT;
         ALTER TABLE sessions ADD COLUMN compaction_count INTEGER NOT NULL DEFAULT 0;",
      )
      .unwrap();

    assert_eq!(run(&mut conn).unwrap(), MIGRATIONS.len() - 1);
    let events = columns(&conn, "events");
    assert_eq!(events.iter().filter(|c| *c == "message_text").count(), 1);
    assert!(events.contains(&"parent_id".to_string()));
  }

  fn broken_step(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch("CREATE TABLE half_done (id INTEGER PRIMARY KEY);")?;
    add_column(tx, "events", "half_done_col", "TEXT")?;
    tx.execute_batch("INSERT INTO no_such_table VALUES (1);")
  }

  #[test]
  fn failed_step_leaves_earlier_schema_and_version() {
    let mut conn = Connection::open_in_memory().unwrap();
    let steps = [
      Migration { version: 1, description: "core tables", apply: v1_core_tables },
      Migration { version: 2, description: "context columns", apply: v2_context_columns },
      Migration { version: 3, description: "broken", apply: broken_step },
    ];

    let err = run_steps(&mut conn, &steps).unwrap_err();
    assert!(matches!(err, Error::Migration { version: 3, .. }), "{err:?}");
    assert_eq!(current_version(&conn).unwrap(), 2);

    let tables: i64 = conn
      .query_row("SELECT COUNT(*) FROM sqlite_master WHERE name = 'half_done'", [], |r| r.get(0))
      .unwrap();
    assert_eq!(tables, 0);
    let events = columns(&conn, "events");
    assert!(!events.contains(&"half_done_col".to_string()));
    assert!(events.contains(&"parent_id".to_string()));

    // The real list still applies on top.
    assert_eq!(run(&mut conn).unwrap(), MIGRATIONS.len() - 2);
    assert_eq!(current_version(&conn).unwrap(), latest_version());
  }

  #[test]
  fn fts_rebuild_indexes_existing_rows() {
    let mut conn = Connection::open_in_memory().unwrap();
    ensure_version_table(&conn).unwrap();
    apply(&mut conn, &MIGRATIONS[0]).unwrap();
    apply(&mut conn, &MIGRATIONS[1]).unwrap();
    conn
      .execute(
        "INSERT INTO events (session_id, record_id, timestamp, entry_type, project, message_text)
         VALUES ('s', 'r', '2025-01-01T00:00:00.000000Z', 'user', 'p', 'flaky websocket test')",
        [],
      )
      .unwrap();

    run(&mut conn).unwrap();
    let hits: i64 = conn
      .query_row("SELECT COUNT(*) FROM events_fts WHERE events_fts MATCH 'websocket'", [], |r| {
        r.get(0)
      })
      .unwrap();
    assert_eq!(hits, 1);
  }
}
