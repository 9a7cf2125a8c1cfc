//! Decoding agent log lines into [`Event`]s.
//!
//! Every line is decoded on its own, so a malformed line costs exactly that
//! line. Records that carry no analytic signal (file snapshots, queue
//! bookkeeping, progress ticks) are recognised and dropped without being
//! counted as malformed.
//!
//! Tool results are never paired with their call by position. Each result
//! carries the id the call was given, and the pairing happens at query time
//! through [`Event::correlation_id`].

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::{
  event::{EntryKind, Event, TokenUsage, parse_timestamp},
  tool::ToolInput,
};

/// Opening of the first user message written after a context compaction.
pub const CONTINUATION_MARKER: &str =
  "This session is being continued from a previous conversation";

/// Stored tool-result text is cut to this many characters.
pub const RESULT_TEXT_LIMIT: usize = 2_000;

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Why a line was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LineError {
  #[error("invalid json: {0}")]
  InvalidJson(String),

  #[error("record is not a json object")]
  NotAnObject,

  #[error("missing required field {0:?}")]
  MissingField(&'static str),

  #[error("unparseable timestamp {0:?}")]
  BadTimestamp(String),
}

// ─── File context ────────────────────────────────────────────────────────────

/// Facts about the containing file that individual lines may fall back on.
#[derive(Debug, Clone)]
pub struct FileContext<'a> {
  /// First directory under the logs root.
  pub project:          &'a str,
  /// File stem; used when a record omits its session id.
  pub fallback_session: &'a str,
  pub mtime:            DateTime<Utc>,
}

/// Running totals over the lines of one file.
#[derive(Debug, Default)]
pub struct ParsedFile {
  pub events:    Vec<Event>,
  pub lines:     usize,
  pub malformed: usize,
  pub ignored:   usize,
}

impl ParsedFile {
  /// Record the outcome of one line.
  pub fn push(&mut self, outcome: Result<Vec<Event>, LineError>) {
    self.lines += 1;
    match outcome {
      Ok(events) if events.is_empty() => self.ignored += 1,
      Ok(events) => self.events.extend(events),
      Err(_) => self.malformed += 1,
    }
  }
}

// ─── Raw records ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRecord {
  #[serde(rename = "type")]
  kind:               Option<String>,
  uuid:               Option<String>,
  session_id:         Option<String>,
  timestamp:          Option<String>,
  cwd:                Option<String>,
  git_branch:         Option<String>,
  slug:               Option<String>,
  #[serde(default)]
  is_compact_summary: Option<bool>,
  message:            Option<RawMessage>,
  summary:            Option<String>,
  leaf_uuid:          Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawMessage {
  model:   Option<String>,
  usage:   Option<RawUsage>,
  #[serde(default)]
  content: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawUsage {
  #[serde(default)]
  input_tokens:                i64,
  #[serde(default)]
  output_tokens:               i64,
  #[serde(default)]
  cache_read_input_tokens:     i64,
  #[serde(default)]
  cache_creation_input_tokens: i64,
}

impl From<RawUsage> for TokenUsage {
  fn from(u: RawUsage) -> Self {
    TokenUsage {
      input_tokens:          u.input_tokens,
      output_tokens:         u.output_tokens,
      cache_read_tokens:     u.cache_read_input_tokens,
      cache_creation_tokens: u.cache_creation_input_tokens,
    }
  }
}

/// One element of a message's `content` array. Decoded individually so an
/// odd block is skipped rather than failing the record.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Block {
  Text {
    text: String,
  },
  ToolUse {
    id:    String,
    name:  String,
    #[serde(default)]
    input: Value,
  },
  ToolResult {
    tool_use_id: String,
    #[serde(default)]
    content:     Value,
    #[serde(default)]
    is_error:    Option<bool>,
  },
  #[serde(other)]
  Other,
}

fn blocks(content: &Option<Value>) -> Vec<Block> {
  match content {
    Some(Value::Array(items)) => items
      .iter()
      .filter_map(|item| Block::deserialize(item).ok())
      .collect(),
    _ => Vec::new(),
  }
}

// ─── Line parsing ────────────────────────────────────────────────────────────

/// Decode one line into zero or more events.
///
/// `Ok(vec![])` means the line was recognised and intentionally ignored.
pub fn parse_line(line: &str, ctx: &FileContext<'_>) -> Result<Vec<Event>, LineError> {
  let value: Value =
    serde_json::from_str(line).map_err(|e| LineError::InvalidJson(e.to_string()))?;
  let Some(object) = value.as_object() else {
    return Err(LineError::NotAnObject);
  };
  // Bookkeeping records are skipped whatever else they carry.
  let kind = object.get("type").and_then(Value::as_str);
  if !matches!(kind, Some("assistant" | "user" | "summary")) {
    return Ok(Vec::new());
  }
  let record =
    RawRecord::deserialize(&value).map_err(|e| LineError::InvalidJson(e.to_string()))?;

  match record.kind.as_deref() {
    Some("assistant") => assistant_events(record, ctx),
    Some("user") => user_events(record, ctx),
    Some("summary") => summary_event(record, ctx).map(|e| vec![e]),
    _ => Ok(Vec::new()),
  }
}

/// Identity shared by every event derived from one record.
struct Header {
  uuid:       String,
  session_id: String,
  timestamp:  DateTime<Utc>,
}

fn header(record: &RawRecord, ctx: &FileContext<'_>) -> Result<Header, LineError> {
  let uuid = record.uuid.clone().ok_or(LineError::MissingField("uuid"))?;
  let raw_ts = record
    .timestamp
    .as_deref()
    .ok_or(LineError::MissingField("timestamp"))?;
  let timestamp =
    parse_timestamp(raw_ts).ok_or_else(|| LineError::BadTimestamp(raw_ts.to_owned()))?;
  let session_id = record
    .session_id
    .clone()
    .unwrap_or_else(|| ctx.fallback_session.to_owned());
  Ok(Header { uuid, session_id, timestamp })
}

fn base_event(
  record:    &RawRecord,
  header:    &Header,
  ctx:       &FileContext<'_>,
  record_id: String,
  kind:      EntryKind,
) -> Event {
  let mut event = Event::new(
    header.session_id.clone(),
    record_id,
    header.timestamp,
    kind,
    ctx.project,
  );
  event.cwd = record.cwd.clone();
  event.git_branch = record.git_branch.clone();
  event.slug = record.slug.clone();
  event
}

fn assistant_events(
  mut record: RawRecord,
  ctx:        &FileContext<'_>,
) -> Result<Vec<Event>, LineError> {
  let header = header(&record, ctx)?;
  let message = record.message.take().unwrap_or_default();
  let content = blocks(&message.content);

  let mut assistant =
    base_event(&record, &header, ctx, header.uuid.clone(), EntryKind::Assistant);
  assistant.model = message.model.clone();
  assistant.usage = Some(message.usage.map(TokenUsage::from).unwrap_or_default());
  assistant.message_text = joined_text(&content);

  let mut events = vec![assistant];
  for block in content {
    let Block::ToolUse { id, name, input } = block else {
      continue;
    };
    let mut call = base_event(
      &record,
      &header,
      ctx,
      format!("{}:{id}", header.uuid),
      EntryKind::ToolCall,
    );
    call.parent_id = Some(header.uuid.clone());
    call.correlation_id = Some(id);
    call.model = message.model.clone();
    call.tool_input_json = Some(input.to_string());
    call.tool = Some(ToolInput::from_parts(&name, input));
    events.push(call);
  }
  Ok(events)
}

fn user_events(mut record: RawRecord, ctx: &FileContext<'_>) -> Result<Vec<Event>, LineError> {
  let header = header(&record, ctx)?;
  let message = record.message.take().unwrap_or_default();
  let content = blocks(&message.content);

  let results: Vec<Event> = content
    .iter()
    .filter_map(|block| match block {
      Block::ToolResult { tool_use_id, content, is_error } => {
        let text = result_text(content);
        let mut result = base_event(
          &record,
          &header,
          ctx,
          format!("{}:{tool_use_id}", header.uuid),
          EntryKind::ToolResult,
        );
        result.parent_id = Some(header.uuid.clone());
        result.correlation_id = Some(tool_use_id.clone());
        result.is_error = is_error.unwrap_or(false);
        result.result_size_bytes = Some(text.len() as i64);
        result.message_text = Some(truncate_chars(&text, RESULT_TEXT_LIMIT));
        Some(result)
      }
      _ => None,
    })
    .collect();
  if !results.is_empty() {
    return Ok(results);
  }

  let text = match &message.content {
    Some(Value::String(s)) => Some(s.clone()),
    _ => joined_text(&content),
  };
  let is_compaction = record.is_compact_summary.unwrap_or(false)
    || text
      .as_deref()
      .is_some_and(|t| t.trim_start().starts_with(CONTINUATION_MARKER));
  let kind = if is_compaction { EntryKind::Compaction } else { EntryKind::User };

  let mut event = base_event(&record, &header, ctx, header.uuid.clone(), kind);
  event.message_text = text;
  Ok(vec![event])
}

fn summary_event(record: RawRecord, ctx: &FileContext<'_>) -> Result<Event, LineError> {
  let record_id = match (&record.uuid, &record.leaf_uuid) {
    (Some(uuid), _) => uuid.clone(),
    (None, Some(leaf)) => format!("summary:{leaf}"),
    (None, None) => return Err(LineError::MissingField("leafUuid")),
  };
  let timestamp = match record.timestamp.as_deref() {
    Some(raw) => parse_timestamp(raw).ok_or_else(|| LineError::BadTimestamp(raw.to_owned()))?,
    None => ctx.mtime,
  };
  let header = Header {
    uuid: record_id.clone(),
    session_id: record
      .session_id
      .clone()
      .unwrap_or_else(|| ctx.fallback_session.to_owned()),
    timestamp,
  };
  let mut event = base_event(&record, &header, ctx, record_id, EntryKind::Summary);
  event.message_text = record.summary.clone();
  Ok(event)
}

// ─── Text helpers ────────────────────────────────────────────────────────────

fn joined_text(content: &[Block]) -> Option<String> {
  let parts: Vec<&str> = content
    .iter()
    .filter_map(|b| match b {
      Block::Text { text } if !text.is_empty() => Some(text.as_str()),
      _ => None,
    })
    .collect();
  (!parts.is_empty()).then(|| parts.join("\n"))
}

/// Tool-result content is either a plain string or a list of text blocks.
fn result_text(content: &Value) -> String {
  match content {
    Value::Null => String::new(),
    Value::String(s) => s.clone(),
    Value::Array(items) => items
      .iter()
      .filter_map(|item| item.get("text").and_then(Value::as_str))
      .collect::<Vec<_>>()
      .join("\n"),
    other => other.to_string(),
  }
}

fn truncate_chars(s: &str, max: usize) -> String {
  match s.char_indices().nth(max) {
    Some((idx, _)) => s[..idx].to_owned(),
    None => s.to_owned(),
  }
}
