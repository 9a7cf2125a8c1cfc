//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings in UTC with
//! microsecond precision (`2025-01-01T10:00:00.000000Z`), so string order
//! is time order and window bounds compare lexically. Pattern metadata is
//! compact JSON.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Row, types::Type};
use tally_core::{
  event::EntryKind,
  pattern::{Pattern, PatternKind},
  session::{IngestionState, Session},
  window::{Scope, TimeWindow},
};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339_opts(SecondsFormat::Micros, true) }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

pub fn decode_opt_dt(s: Option<&str>) -> Result<Option<DateTime<Utc>>> {
  s.map(decode_dt).transpose()
}

/// Read a timestamp column inside a row-mapping closure.
pub fn column_dt(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
  let s: String = row.get(idx)?;
  DateTime::parse_from_rfc3339(&s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub fn column_opt_dt(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
  let s: Option<String> = row.get(idx)?;
  s.map(|s| {
    DateTime::parse_from_rfc3339(&s)
      .map(|dt| dt.with_timezone(&Utc))
      .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
  })
  .transpose()
}

pub fn column_kind(row: &Row<'_>, idx: usize) -> rusqlite::Result<EntryKind> {
  let s: String = row.get(idx)?;
  s.parse()
    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

// ─── Scope ───────────────────────────────────────────────────────────────────

/// Scope filter over `events e`, bound as `?1`..`?3`. Query-specific
/// parameters start at `?4`.
pub const IN_SCOPE: &str = "e.timestamp >= ?1 AND e.timestamp < ?2 \
                            AND (?3 IS NULL OR instr(e.project, ?3) > 0)";

/// A [`Scope`] flattened into bindable values.
#[derive(Debug, Clone)]
pub struct ScopeParams {
  pub start:   String,
  pub end:     String,
  pub project: Option<String>,
  pub limit:   i64,
}

impl ScopeParams {
  pub fn of(scope: &Scope) -> Self {
    Self {
      start:   encode_dt(scope.window.start()),
      end:     encode_dt(scope.window.end()),
      project: scope.project.clone().filter(|p| !p.is_empty()),
      limit:   i64::try_from(scope.limit).unwrap_or(i64::MAX),
    }
  }

  pub fn window(window: &TimeWindow, project: Option<String>) -> Self {
    Self {
      start: encode_dt(window.start()),
      end: encode_dt(window.end()),
      project: project.filter(|p| !p.is_empty()),
      limit: i64::MAX,
    }
  }
}

/// A comma-separated SQL list of quoted string literals.
pub fn sql_list(items: &[&str]) -> String {
  items
    .iter()
    .map(|s| format!("'{}'", s.replace('\'', "''")))
    .collect::<Vec<_>>()
    .join(", ")
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read from a `sessions` row.
pub struct RawSession {
  pub id:               String,
  pub project:          String,
  pub first_seen:       String,
  pub last_seen:        String,
  pub entry_count:      i64,
  pub tool_call_count:  i64,
  pub input_tokens:     i64,
  pub output_tokens:    i64,
  pub primary_branch:   Option<String>,
  pub display_name:     Option<String>,
  pub compaction_count: i64,
}

pub const SESSION_COLUMNS: &str = "id, project, first_seen, last_seen, entry_count, \
                                   tool_call_count, input_tokens, output_tokens, \
                                   primary_branch, display_name, compaction_count";

impl RawSession {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:               row.get(0)?,
      project:          row.get(1)?,
      first_seen:       row.get(2)?,
      last_seen:        row.get(3)?,
      entry_count:      row.get(4)?,
      tool_call_count:  row.get(5)?,
      input_tokens:     row.get(6)?,
      output_tokens:    row.get(7)?,
      primary_branch:   row.get(8)?,
      display_name:     row.get(9)?,
      compaction_count: row.get(10)?,
    })
  }

  pub fn into_session(self) -> Result<Session> {
    Ok(Session {
      first_seen:       decode_dt(&self.first_seen)?,
      last_seen:        decode_dt(&self.last_seen)?,
      id:               self.id,
      project:          self.project,
      entry_count:      self.entry_count,
      tool_call_count:  self.tool_call_count,
      input_tokens:     self.input_tokens,
      output_tokens:    self.output_tokens,
      primary_branch:   self.primary_branch,
      display_name:     self.display_name,
      compaction_count: self.compaction_count,
    })
  }
}

/// Raw values read from a `patterns` row.
pub struct RawPattern {
  pub kind:        String,
  pub key:         String,
  pub count:       i64,
  pub last_seen:   Option<String>,
  pub metadata:    Option<String>,
  pub computed_at: String,
}

impl RawPattern {
  pub fn into_pattern(self) -> Result<Pattern> {
    let kind: PatternKind = self
      .kind
      .parse()
      .map_err(|_| Error::Core(tally_core::Error::UnknownPatternKind(self.kind.clone())))?;
    let metadata = match self.metadata.as_deref() {
      Some(json) => serde_json::from_str(json)?,
      None => serde_json::Value::Null,
    };
    Ok(Pattern {
      kind,
      key: self.key,
      count: self.count,
      last_seen: decode_opt_dt(self.last_seen.as_deref())?,
      metadata,
      computed_at: decode_dt(&self.computed_at)?,
    })
  }
}

/// Raw values read from an `ingestion_state` row.
pub struct RawLedger {
  pub path:          String,
  pub size:          i64,
  pub mtime:         String,
  pub records_added: i64,
  pub processed_at:  String,
}

impl RawLedger {
  pub fn into_state(self) -> Result<IngestionState> {
    Ok(IngestionState {
      size:          u64::try_from(self.size)
        .map_err(|_| Error::Decode(format!("negative size for {}", self.path)))?,
      mtime:         decode_dt(&self.mtime)?,
      records_added: self.records_added,
      processed_at:  decode_dt(&self.processed_at)?,
      path:          self.path,
    })
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn timestamps_are_fixed_width() {
    let a = Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap();
    let b = a + chrono::TimeDelta::microseconds(1);
    assert_eq!(encode_dt(a), "2025-01-01T09:00:00.000000Z");
    assert!(encode_dt(a) < encode_dt(b));
    assert_eq!(decode_dt(&encode_dt(b)).unwrap(), b);
  }

  #[test]
  fn sql_list_quotes() {
    assert_eq!(sql_list(&["Edit", "it's"]), "'Edit', 'it''s'");
  }
}
