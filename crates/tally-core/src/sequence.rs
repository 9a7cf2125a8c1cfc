//! Tool-sequence mining.
//!
//! Input is the stream of tool calls ordered by session, then timestamp, then
//! log order. Windows never straddle two sessions.

use std::{
  collections::{HashMap, VecDeque},
  ops::ControlFlow,
};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{report::ToolCallRow, store::ToolCallVisitor};

/// Separator used when rendering a sequence as one string.
pub const ARROW: &str = " → ";

pub fn render(tools: &[String]) -> String { tools.join(ARROW) }

// ─── Counting ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequenceCount {
  pub tools:     Vec<String>,
  pub pattern:   String,
  pub count:     u64,
  pub last_seen: DateTime<Utc>,
}

/// Streaming n-gram counter over tool names.
#[derive(Debug)]
pub struct SequenceMiner {
  length:  usize,
  session: Option<String>,
  window:  VecDeque<String>,
  counts:  HashMap<Vec<String>, (u64, DateTime<Utc>)>,
}

impl SequenceMiner {
  /// Lengths below 2 are raised to 2.
  pub fn new(length: usize) -> Self {
    let length = length.max(2);
    Self {
      length,
      session: None,
      window: VecDeque::with_capacity(length),
      counts: HashMap::new(),
    }
  }

  pub fn push(&mut self, session_id: &str, tool: &str, timestamp: DateTime<Utc>) {
    if self.session.as_deref() != Some(session_id) {
      self.session = Some(session_id.to_owned());
      self.window.clear();
    }
    if self.window.len() == self.length {
      self.window.pop_front();
    }
    self.window.push_back(tool.to_owned());
    if self.window.len() < self.length {
      return;
    }

    let key: Vec<String> = self.window.iter().cloned().collect();
    let entry = self.counts.entry(key).or_insert((0, timestamp));
    entry.0 += 1;
    entry.1 = entry.1.max(timestamp);
  }

  pub fn push_row(&mut self, row: &ToolCallRow) {
    self.push(&row.session_id, &row.tool_name, row.timestamp);
  }

  /// Sequences seen at least `min_count` times, most frequent first; ties by
  /// rendered pattern.
  pub fn finish(self, min_count: u64) -> Vec<SequenceCount> {
    let mut out: Vec<SequenceCount> = self
      .counts
      .into_iter()
      .filter(|(_, (count, _))| *count >= min_count)
      .map(|(tools, (count, last_seen))| SequenceCount {
        pattern: render(&tools),
        tools,
        count,
        last_seen,
      })
      .collect();
    out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.pattern.cmp(&b.pattern)));
    out
  }
}

impl ToolCallVisitor for SequenceMiner {
  fn visit(&mut self, row: &ToolCallRow) -> ControlFlow<()> {
    self.push_row(row);
    ControlFlow::Continue(())
  }
}

// ─── Samples ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleCall {
  pub tool_name: String,
  /// Command line or target path, when the call has one.
  pub detail:    Option<String>,
  pub timestamp: DateTime<Utc>,
  pub in_match:  bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequenceSample {
  pub session_id: String,
  pub started_at: DateTime<Utc>,
  pub calls:      Vec<SampleCall>,
}

/// Collects occurrences of one sequence with surrounding context.
#[derive(Debug)]
pub struct SampleCollector {
  target:  Vec<String>,
  context: usize,
  buffer:  Vec<ToolCallRow>,
  samples: Vec<SequenceSample>,
}

impl SampleCollector {
  pub fn new(target: Vec<String>, context: usize) -> Self {
    Self { target, context, buffer: Vec::new(), samples: Vec::new() }
  }

  pub fn push(&mut self, row: &ToolCallRow) {
    if self
      .buffer
      .last()
      .is_some_and(|last| last.session_id != row.session_id)
    {
      self.flush();
    }
    self.buffer.push(row.clone());
  }

  fn flush(&mut self) {
    let len = self.target.len();
    if len > 0 && self.buffer.len() >= len {
      for start in 0..=self.buffer.len() - len {
        let hit = self.buffer[start..start + len]
          .iter()
          .zip(&self.target)
          .all(|(row, tool)| &row.tool_name == tool);
        if !hit {
          continue;
        }
        let from = start.saturating_sub(self.context);
        let to = (start + len + self.context).min(self.buffer.len());
        let calls = (from..to)
          .map(|i| {
            let row = &self.buffer[i];
            SampleCall {
              tool_name: row.tool_name.clone(),
              detail:    row.detail(),
              timestamp: row.timestamp,
              in_match:  (start..start + len).contains(&i),
            }
          })
          .collect();
        self.samples.push(SequenceSample {
          session_id: self.buffer[start].session_id.clone(),
          started_at: self.buffer[start].timestamp,
          calls,
        });
      }
    }
    self.buffer.clear();
  }

  /// The `count` most recent occurrences, newest first.
  pub fn finish(mut self, count: usize) -> Vec<SequenceSample> {
    self.flush();
    self.samples.sort_by(|a, b| {
      b.started_at
        .cmp(&a.started_at)
        .then_with(|| a.session_id.cmp(&b.session_id))
    });
    self.samples.truncate(count);
    self.samples
  }
}

impl ToolCallVisitor for SampleCollector {
  fn visit(&mut self, row: &ToolCallRow) -> ControlFlow<()> {
    self.push(row);
    ControlFlow::Continue(())
  }
}

/// Split a rendered pattern back into tool names. Accepts `→` or `,`.
pub fn parse_pattern(pattern: &str) -> Vec<String> {
  pattern
    .split(['→', ','])
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(str::to_owned)
    .collect()
}
