//! The derived-pattern cache.
//!
//! Patterns are a disposable materialization of the miners' output. They can
//! be deleted and recomputed at any time and are never a source of truth.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PatternKind {
  ToolFrequency,
  CommandFrequency,
  ToolSequence,
  PermissionGap,
}

/// One cached row, keyed by `(kind, key)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
  pub kind:        PatternKind,
  pub key:         String,
  pub count:       i64,
  pub last_seen:   Option<DateTime<Utc>>,
  pub metadata:    serde_json::Value,
  pub computed_at: DateTime<Utc>,
}
