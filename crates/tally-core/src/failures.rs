//! Failure grouping and rework detection.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

pub const REWORK_WINDOW_MINUTES: i64 = 10;
pub const REWORK_MIN_EDITS: usize = 3;

/// Parameter values kept per tool in a failure report.
const TOP_PARAMETERS: usize = 10;

// ─── Inputs ──────────────────────────────────────────────────────────────────

/// An error-flagged tool result joined to the call that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedCall {
  pub session_id: String,
  pub timestamp:  DateTime<Utc>,
  pub tool_name:  String,
  pub command:    Option<String>,
  pub file_path:  Option<String>,
  /// Search pattern of a Glob or Grep call.
  pub pattern:    Option<String>,
}

impl FailedCall {
  /// What the failure is grouped by within its tool.
  pub fn parameter(&self) -> Option<&str> {
    match self.tool_name.as_str() {
      "Bash" => self.command.as_deref(),
      "Glob" | "Grep" => self.pattern.as_deref(),
      _ => self.file_path.as_deref(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEdit {
  pub session_id: String,
  pub file_path:  String,
  pub timestamp:  DateTime<Utc>,
}

// ─── Outputs ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterFailures {
  pub value: String,
  pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolFailures {
  pub tool:         String,
  pub count:        u64,
  pub by_parameter: Vec<ParameterFailures>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FailureSummary {
  pub total_errors:           u64,
  pub sessions_with_errors:   u64,
  pub avg_errors_per_session: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReworkInstance {
  pub session_id:       String,
  pub file_path:        String,
  pub edit_count:       usize,
  pub first_edit:       DateTime<Utc>,
  pub last_edit:        DateTime<Utc>,
  pub duration_minutes: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FailureReport {
  pub summary: FailureSummary,
  pub by_tool: Vec<ToolFailures>,
  pub rework:  Vec<ReworkInstance>,
}

// ─── Grouping ────────────────────────────────────────────────────────────────

/// Group failures by tool, then by the parameter that identifies what failed.
pub fn group_failures(calls: &[FailedCall]) -> (FailureSummary, Vec<ToolFailures>) {
  let mut tools: BTreeMap<&str, (u64, HashMap<&str, u64>)> = BTreeMap::new();
  let mut sessions: HashSet<&str> = HashSet::new();

  for call in calls {
    sessions.insert(call.session_id.as_str());
    let (count, params) = tools.entry(call.tool_name.as_str()).or_default();
    *count += 1;
    if let Some(p) = call.parameter() {
      *params.entry(p).or_default() += 1;
    }
  }

  let mut by_tool: Vec<ToolFailures> = tools
    .into_iter()
    .map(|(tool, (count, params))| {
      let mut by_parameter: Vec<ParameterFailures> = params
        .into_iter()
        .map(|(value, count)| ParameterFailures { value: value.to_owned(), count })
        .collect();
      by_parameter.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
      by_parameter.truncate(TOP_PARAMETERS);
      ToolFailures { tool: tool.to_owned(), count, by_parameter }
    })
    .collect();
  by_tool.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.tool.cmp(&b.tool)));

  let total = calls.len() as u64;
  let with_errors = sessions.len() as u64;
  let summary = FailureSummary {
    total_errors:           total,
    sessions_with_errors:   with_errors,
    avg_errors_per_session: if with_errors == 0 {
      0.0
    } else {
      round_to(total as f64 / with_errors as f64, 2)
    },
  };
  (summary, by_tool)
}

// ─── Rework ──────────────────────────────────────────────────────────────────

/// Flag runs where one file is edited `min_edits` or more times within
/// `window`, per session. Overlapping qualifying windows merge into one
/// instance. Instances are ordered by edit count, then first edit.
pub fn detect_rework(edits: &[FileEdit], window: TimeDelta, min_edits: usize) -> Vec<ReworkInstance> {
  let mut by_file: BTreeMap<(&str, &str), Vec<DateTime<Utc>>> = BTreeMap::new();
  for edit in edits {
    by_file
      .entry((edit.session_id.as_str(), edit.file_path.as_str()))
      .or_default()
      .push(edit.timestamp);
  }

  let min_edits = min_edits.max(1);
  let mut out = Vec::new();
  for ((session_id, file_path), mut times) in by_file {
    times.sort();

    // Index span [start, end] of the instance being grown.
    let mut current: Option<(usize, usize)> = None;
    let mut lo = 0;
    for hi in 0..times.len() {
      while times[hi] - times[lo] > window {
        lo += 1;
      }
      if hi + 1 - lo < min_edits {
        continue;
      }
      current = match current {
        Some((start, end)) if lo <= end => Some((start, hi)),
        Some(done) => {
          out.push(instance(session_id, file_path, &times, done));
          Some((lo, hi))
        }
        None => Some((lo, hi)),
      };
    }
    if let Some(done) = current {
      out.push(instance(session_id, file_path, &times, done));
    }
  }

  out.sort_by(|a, b| {
    b.edit_count
      .cmp(&a.edit_count)
      .then_with(|| a.first_edit.cmp(&b.first_edit))
      .then_with(|| a.file_path.cmp(&b.file_path))
  });
  out
}

fn instance(
  session_id: &str,
  file_path:  &str,
  times:      &[DateTime<Utc>],
  (start, end): (usize, usize),
) -> ReworkInstance {
  let first_edit = times[start];
  let last_edit = times[end];
  ReworkInstance {
    session_id: session_id.to_owned(),
    file_path: file_path.to_owned(),
    edit_count: end - start + 1,
    first_edit,
    last_edit,
    duration_minutes: round_to((last_edit - first_edit).num_seconds() as f64 / 60.0, 1),
  }
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
  let factor = 10f64.powi(decimals);
  (value * factor).round() / factor
}
