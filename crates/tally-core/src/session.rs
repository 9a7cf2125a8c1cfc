//! Session rollups and the per-file ingestion ledger.
//!
//! Rollups are maintained incrementally: each ingestion batch folds the events
//! it actually inserted into one [`SessionDelta`] per session, and the store
//! adds those deltas onto the existing rows in the same transaction.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{EntryKind, Event};

// ─── Session ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
  pub id:               String,
  pub project:          String,
  pub first_seen:       DateTime<Utc>,
  pub last_seen:        DateTime<Utc>,
  pub entry_count:      i64,
  pub tool_call_count:  i64,
  pub input_tokens:     i64,
  pub output_tokens:    i64,
  /// Branch of the most recent event that recorded one.
  pub primary_branch:   Option<String>,
  pub display_name:     Option<String>,
  pub compaction_count: i64,
}

impl Session {
  pub fn duration_minutes(&self) -> f64 {
    (self.last_seen - self.first_seen).num_seconds() as f64 / 60.0
  }
}

// ─── SessionDelta ────────────────────────────────────────────────────────────

/// Additive change to one session's rollup.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionDelta {
  pub session_id:     String,
  pub project:        String,
  pub first_seen:     DateTime<Utc>,
  pub last_seen:      DateTime<Utc>,
  pub entries:        i64,
  pub tool_calls:     i64,
  pub input_tokens:   i64,
  pub output_tokens:  i64,
  pub compactions:    i64,
  /// Branch of the newest event in the delta that carried one.
  pub branch:         Option<String>,
  pub branch_seen_at: Option<DateTime<Utc>>,
  /// Slug of the earliest event in the delta that carried one.
  pub display_name:   Option<String>,
  pub name_seen_at:   Option<DateTime<Utc>>,
}

impl SessionDelta {
  fn start(event: &Event) -> Self {
    Self {
      session_id:     event.session_id.clone(),
      project:        event.project.clone(),
      first_seen:     event.timestamp,
      last_seen:      event.timestamp,
      entries:        0,
      tool_calls:     0,
      input_tokens:   0,
      output_tokens:  0,
      compactions:    0,
      branch:         None,
      branch_seen_at: None,
      display_name:   None,
      name_seen_at:   None,
    }
  }

  fn absorb(&mut self, event: &Event) {
    self.first_seen = self.first_seen.min(event.timestamp);
    self.last_seen = self.last_seen.max(event.timestamp);
    self.entries += 1;

    match event.kind {
      EntryKind::ToolCall => self.tool_calls += 1,
      EntryKind::Compaction => self.compactions += 1,
      _ => {}
    }

    if let Some(usage) = event.usage {
      self.input_tokens += usage.input_tokens;
      self.output_tokens += usage.output_tokens;
    }

    if let Some(branch) = &event.git_branch
      && !branch.is_empty()
      && self.branch_seen_at.is_none_or(|at| event.timestamp >= at)
    {
      self.branch = Some(branch.clone());
      self.branch_seen_at = Some(event.timestamp);
    }

    if let Some(slug) = &event.slug
      && !slug.is_empty()
      && self.name_seen_at.is_none_or(|at| event.timestamp < at)
    {
      self.display_name = Some(slug.clone());
      self.name_seen_at = Some(event.timestamp);
    }
  }
}

/// Fold events into one delta per session, ordered by session id.
pub fn fold_deltas<'a>(events: impl IntoIterator<Item = &'a Event>) -> Vec<SessionDelta> {
  let mut deltas: BTreeMap<&str, SessionDelta> = BTreeMap::new();
  for event in events {
    deltas
      .entry(event.session_id.as_str())
      .or_insert_with(|| SessionDelta::start(event))
      .absorb(event);
  }
  deltas.into_values().collect()
}

// ─── Ingestion ledger ────────────────────────────────────────────────────────

/// What was last seen of one source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionState {
  pub path:          String,
  pub size:          u64,
  pub mtime:         DateTime<Utc>,
  pub records_added: i64,
  pub processed_at:  DateTime<Utc>,
}

#[cfg(test)]
mod tests {
  use chrono::{Duration, TimeZone};

  use super::*;
  use crate::event::TokenUsage;

  fn at(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap() + Duration::minutes(minute)
  }

  fn event(session: &str, id: &str, minute: i64, kind: EntryKind) -> Event {
    Event::new(session, id, at(minute), kind, "proj")
  }

  #[test]
  fn fold_counts_per_session() {
    let mut assistant = event("a", "1", 0, EntryKind::Assistant);
    assistant.usage = Some(TokenUsage {
      input_tokens: 10,
      output_tokens: 5,
      ..TokenUsage::default()
    });
    let events = vec![
      assistant,
      event("a", "1:t", 0, EntryKind::ToolCall),
      event("b", "2", 3, EntryKind::User),
      event("a", "3", 7, EntryKind::Compaction),
    ];

    let deltas = fold_deltas(&events);
    assert_eq!(deltas.len(), 2);

    let a = &deltas[0];
    assert_eq!(a.session_id, "a");
    assert_eq!(a.entries, 3);
    assert_eq!(a.tool_calls, 1);
    assert_eq!(a.compactions, 1);
    assert_eq!(a.input_tokens, 10);
    assert_eq!(a.output_tokens, 5);
    assert_eq!(a.first_seen, at(0));
    assert_eq!(a.last_seen, at(7));

    assert_eq!(deltas[1].entries, 1);
  }

  #[test]
  fn newest_branch_and_earliest_slug_win() {
    let mut late = event("a", "2", 10, EntryKind::User);
    late.git_branch = Some("feature".into());
    late.slug = Some("second-slug".into());
    let mut early = event("a", "1", 1, EntryKind::User);
    early.git_branch = Some("main".into());
    early.slug = Some("first-slug".into());

    for order in [[&late, &early], [&early, &late]] {
      let deltas = fold_deltas(order);
      assert_eq!(deltas[0].branch.as_deref(), Some("feature"));
      assert_eq!(deltas[0].branch_seen_at, Some(at(10)));
      assert_eq!(deltas[0].display_name.as_deref(), Some("first-slug"));
      assert_eq!(deltas[0].name_seen_at, Some(at(1)));
    }
  }

  #[test]
  fn empty_slug_and_branch_are_ignored() {
    let mut named = event("a", "1", 5, EntryKind::User);
    named.slug = Some("real".into());
    named.git_branch = Some("main".into());
    let mut blank = event("a", "2", 0, EntryKind::User);
    blank.slug = Some(String::new());
    blank.git_branch = Some(String::new());

    let deltas = fold_deltas([&named, &blank]);
    assert_eq!(deltas[0].display_name.as_deref(), Some("real"));
    assert_eq!(deltas[0].branch.as_deref(), Some("main"));
  }
}
