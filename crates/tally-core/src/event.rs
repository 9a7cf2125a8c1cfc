//! One normalized record derived from a log line.
//!
//! A single line may produce several events: an assistant message yields the
//! message itself plus one child per embedded tool call, and a user line
//! carrying tool results yields one event per result.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::tool::{ToolInput, split_command};

// ─── EntryKind ───────────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntryKind {
  User,
  Assistant,
  Summary,
  ToolCall,
  ToolResult,
  /// A context-reset boundary: the first user message after a compaction.
  Compaction,
}

// ─── Token usage ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
  pub input_tokens:          i64,
  pub output_tokens:         i64,
  pub cache_read_tokens:     i64,
  pub cache_creation_tokens: i64,
}

// ─── Event ───────────────────────────────────────────────────────────────────

/// A parsed record. `(session_id, record_id)` is globally unique.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
  pub session_id:        String,
  pub record_id:         String,
  pub timestamp:         DateTime<Utc>,
  pub kind:              EntryKind,
  pub project:           String,
  /// For tool calls and results: the record id of the enclosing message.
  pub parent_id:         Option<String>,
  /// Links a tool call to its result, independent of line order.
  pub correlation_id:    Option<String>,
  pub tool:              Option<ToolInput>,
  /// The tool payload exactly as logged.
  pub tool_input_json:   Option<String>,
  pub is_error:          bool,
  /// Only ever set on assistant records.
  pub usage:             Option<TokenUsage>,
  pub model:             Option<String>,
  pub git_branch:        Option<String>,
  pub cwd:               Option<String>,
  pub slug:              Option<String>,
  pub message_text:      Option<String>,
  pub result_size_bytes: Option<i64>,
}

impl Event {
  /// An event with identity only; every optional field empty.
  pub fn new(
    session_id: impl Into<String>,
    record_id:  impl Into<String>,
    timestamp:  DateTime<Utc>,
    kind:       EntryKind,
    project:    impl Into<String>,
  ) -> Self {
    Self {
      session_id: session_id.into(),
      record_id: record_id.into(),
      timestamp,
      kind,
      project: project.into(),
      parent_id: None,
      correlation_id: None,
      tool: None,
      tool_input_json: None,
      is_error: false,
      usage: None,
      model: None,
      git_branch: None,
      cwd: None,
      slug: None,
      message_text: None,
      result_size_bytes: None,
    }
  }

  pub fn tool_name(&self) -> Option<&str> { self.tool.as_ref().map(ToolInput::name) }

  /// Leading command token and arguments of a shell call.
  pub fn command(&self) -> Option<(&str, Option<&str>)> {
    self
      .tool
      .as_ref()
      .and_then(ToolInput::command_line)
      .and_then(split_command)
  }

  pub fn file_path(&self) -> Option<&str> {
    self.tool.as_ref().and_then(ToolInput::target_path)
  }

  pub fn skill_name(&self) -> Option<&str> {
    self.tool.as_ref().and_then(ToolInput::skill_name)
  }
}

// ─── Timestamps ──────────────────────────────────────────────────────────────

/// Parse a log timestamp.
///
/// Accepts RFC 3339 and, for feeds that drop the offset, naive ISO 8601
/// date-times which are taken to be UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Some(dt.with_timezone(&Utc));
  }
  ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
    .iter()
    .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
    .map(|naive| naive.and_utc())
}
