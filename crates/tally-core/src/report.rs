//! Read-side row types returned by [`AnalyticsStore`](crate::store::AnalyticsStore).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::{event::EntryKind, window::TimeWindow};

// ─── Status ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusReport {
  pub events:         i64,
  pub sessions:       i64,
  pub files_tracked:  i64,
  pub patterns:       i64,
  pub last_ingestion: Option<DateTime<Utc>>,
  pub earliest_event: Option<DateTime<Utc>>,
  pub latest_event:   Option<DateTime<Utc>>,
  pub schema_version: i64,
}

/// Outcome of writing one file's events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
  pub inserted:   usize,
  /// Records already present; absorbed by the uniqueness constraint.
  pub duplicates: usize,
}

// ─── Usage ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedCount {
  pub name:  String,
  pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolFrequency {
  pub tool:      String,
  pub count:     i64,
  /// Skill names, sub-agent types or shell commands, depending on the tool.
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub breakdown: Vec<NamedCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandFrequency {
  pub command:   String,
  pub count:     i64,
  pub last_seen: Option<DateTime<Utc>>,
  pub top_args:  Vec<NamedCount>,
}

/// One shell invocation, split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandLine {
  pub command: String,
  pub args:    Option<String>,
}

impl CommandLine {
  pub fn full(&self) -> String {
    match &self.args {
      Some(args) => format!("{} {args}", self.command),
      None => self.command.clone(),
    }
  }
}

/// One tool call as seen by the sequence miners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCallRow {
  pub session_id: String,
  pub record_id:  String,
  pub timestamp:  DateTime<Utc>,
  pub tool_name:  String,
  pub command:    Option<String>,
  pub args:       Option<String>,
  pub file_path:  Option<String>,
}

impl ToolCallRow {
  /// Command line or target path, whichever the call has.
  pub fn detail(&self) -> Option<String> {
    match (&self.command, &self.args) {
      (Some(c), Some(a)) => Some(format!("{c} {a}")),
      (Some(c), None) => Some(c.clone()),
      _ => self.file_path.clone(),
    }
  }
}

// ─── Tokens ──────────────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TokenGrouping {
  #[default]
  Day,
  Session,
  Model,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenUsageRow {
  pub key:                   String,
  pub messages:              i64,
  pub input_tokens:          i64,
  pub output_tokens:         i64,
  pub cache_read_tokens:     i64,
  pub cache_creation_tokens: i64,
}

// ─── Search ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
  /// Full-text query: terms, "phrases", AND/OR/NOT, prefix*.
  pub text:    String,
  pub window:  TimeWindow,
  pub kind:    Option<EntryKind>,
  pub project: Option<String>,
  pub limit:   usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
  pub session_id: String,
  pub record_id:  String,
  pub timestamp:  DateTime<Utc>,
  pub kind:       EntryKind,
  pub project:    String,
  pub tool_name:  Option<String>,
  /// Matched text with hits wrapped in `[` `]`.
  pub snippet:    String,
}

// ─── Context consumption ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompactionRow {
  pub session_id: String,
  pub record_id:  String,
  pub timestamp:  DateTime<Utc>,
  pub project:    String,
  pub preview:    Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LargeResult {
  pub session_id: String,
  pub record_id:  String,
  pub timestamp:  DateTime<Utc>,
  pub size_bytes: i64,
  /// Tool of the originating call, when it could be found.
  pub tool_name:  Option<String>,
  pub detail:     Option<String>,
}

/// Only results at least this large are reported by default.
pub const DEFAULT_LARGE_RESULT_BYTES: i64 = 10 * 1024;
