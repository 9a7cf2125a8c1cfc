//! Rule-based session classification.
//!
//! A session's counts are turned into ratios and checked against an ordered
//! list of rules. The first rule that holds decides the category, and its
//! trigger string is reported with the metrics so any classification can be
//! reproduced from the same counts.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::failures::round_to;

/// Sessions with fewer tool calls than this are not classified by default.
pub const DEFAULT_MIN_TOOL_CALLS: i64 = 5;

// ─── Inputs ──────────────────────────────────────────────────────────────────

/// Raw per-session counts over a time window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionCounts {
  pub session_id:                String,
  pub project:                   String,
  pub tool_calls:                i64,
  pub errors:                    i64,
  /// Edit, MultiEdit and NotebookEdit calls.
  pub edits:                     i64,
  pub writes:                    i64,
  /// Bash calls running `git` or `gh`.
  pub git:                       i64,
  /// Bash calls running a build or test driver.
  pub build:                     i64,
  pub reads:                     i64,
  /// Grep, Glob and WebSearch calls.
  pub searches:                  i64,
  pub compactions:               i64,
  pub result_bytes:              i64,
  pub files_read_multiple_times: i64,
  pub first_seen:                Option<DateTime<Utc>>,
  pub last_seen:                 Option<DateTime<Utc>>,
}

/// Ratios of a session's tool calls, each in `0.0..=1.0` (errors may exceed
/// 1.0 when a session has more failed results than calls in the window).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Ratios {
  pub error_rate:       f64,
  pub edit_rate:        f64,
  pub git_build_rate:   f64,
  pub read_search_rate: f64,
}

impl Ratios {
  pub fn of(c: &SessionCounts) -> Self {
    if c.tool_calls <= 0 {
      return Self::default();
    }
    let total = c.tool_calls as f64;
    Self {
      error_rate:       c.errors as f64 / total,
      edit_rate:        (c.edits + c.writes) as f64 / total,
      git_build_rate:   (c.git + c.build) as f64 / total,
      read_search_rate: (c.reads + c.searches) as f64 / total,
    }
  }
}

// ─── Rules ───────────────────────────────────────────────────────────────────

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
pub enum Category {
  Debugging,
  Development,
  Maintenance,
  Research,
  Mixed,
}

pub struct Rule {
  pub category: Category,
  pub trigger:  &'static str,
  pub holds:    fn(&Ratios, &SessionCounts) -> bool,
}

/// Checked top to bottom; the first match wins.
pub const RULES: &[Rule] = &[
  Rule {
    category: Category::Debugging,
    trigger:  "error_rate > 15%",
    holds:    |r, _| r.error_rate > 0.15,
  },
  Rule {
    category: Category::Debugging,
    trigger:  "error_count > 5",
    holds:    |_, c| c.errors > 5,
  },
  Rule {
    category: Category::Development,
    trigger:  "edit_rate > 30%",
    holds:    |r, _| r.edit_rate > 0.30,
  },
  Rule {
    category: Category::Development,
    trigger:  "write_count > 3",
    holds:    |_, c| c.writes > 3,
  },
  Rule {
    category: Category::Maintenance,
    trigger:  "git_build_rate > 30%",
    holds:    |r, _| r.git_build_rate > 0.30,
  },
  Rule {
    category: Category::Research,
    trigger:  "read_search_rate > 50%",
    holds:    |r, _| r.read_search_rate > 0.50,
  },
];

pub const FALLBACK_TRIGGER: &str = "no_dominant_pattern";

// ─── Outputs ─────────────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BurnRate {
  Low,
  Medium,
  High,
}

impl BurnRate {
  pub fn from_compactions_per_hour(rate: f64) -> Self {
    if rate > 2.0 {
      Self::High
    } else if rate > 0.5 {
      Self::Medium
    } else {
      Self::Low
    }
  }
}

/// Rates as percentages rounded to one decimal, with the counts behind them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
  pub tool_calls:       i64,
  pub error_count:      i64,
  pub error_rate:       f64,
  pub edit_rate:        f64,
  pub git_build_rate:   f64,
  pub read_search_rate: f64,
  pub edit_count:       i64,
  pub write_count:      i64,
  pub git_count:        i64,
  pub build_count:      i64,
  pub read_count:       i64,
  pub search_count:     i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Efficiency {
  pub compaction_count:          i64,
  pub total_result_mb:           f64,
  pub files_read_multiple_times: i64,
  pub burn_rate:                 BurnRate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
  pub session_id: String,
  pub project:    String,
  pub category:   Category,
  pub trigger:    String,
  pub metrics:    Metrics,
  pub efficiency: Efficiency,
  pub first_seen: Option<DateTime<Utc>>,
  pub last_seen:  Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ClassificationReport {
  pub sessions:     Vec<Classification>,
  pub distribution: BTreeMap<String, usize>,
}

// ─── Classification ──────────────────────────────────────────────────────────

/// The first rule that holds, or `(Mixed, FALLBACK_TRIGGER)`.
pub fn categorize(counts: &SessionCounts) -> (Category, &'static str) {
  let ratios = Ratios::of(counts);
  RULES
    .iter()
    .find(|rule| (rule.holds)(&ratios, counts))
    .map(|rule| (rule.category, rule.trigger))
    .unwrap_or((Category::Mixed, FALLBACK_TRIGGER))
}

pub fn classify(counts: &SessionCounts) -> Classification {
  let (category, trigger) = categorize(counts);
  let ratios = Ratios::of(counts);
  let pct = |r: f64| round_to(r * 100.0, 1);

  let hours = match (counts.first_seen, counts.last_seen) {
    (Some(first), Some(last)) => (last - first).num_seconds() as f64 / 3600.0,
    _ => 0.0,
  };
  let per_hour = if hours > 0.0 { counts.compactions as f64 / hours } else { 0.0 };

  Classification {
    session_id: counts.session_id.clone(),
    project:    counts.project.clone(),
    category,
    trigger:    trigger.to_owned(),
    metrics:    Metrics {
      tool_calls:       counts.tool_calls,
      error_count:      counts.errors,
      error_rate:       pct(ratios.error_rate),
      edit_rate:        pct(ratios.edit_rate),
      git_build_rate:   pct(ratios.git_build_rate),
      read_search_rate: pct(ratios.read_search_rate),
      edit_count:       counts.edits,
      write_count:      counts.writes,
      git_count:        counts.git,
      build_count:      counts.build,
      read_count:       counts.reads,
      search_count:     counts.searches,
    },
    efficiency: Efficiency {
      compaction_count:          counts.compactions,
      total_result_mb:           round_to(counts.result_bytes as f64 / 1024.0 / 1024.0, 2),
      files_read_multiple_times: counts.files_read_multiple_times,
      burn_rate:                 BurnRate::from_compactions_per_hour(per_hour),
    },
    first_seen: counts.first_seen,
    last_seen:  counts.last_seen,
  }
}

/// Classify every session with at least `min_tool_calls` tool calls.
pub fn classify_sessions(counts: &[SessionCounts], min_tool_calls: i64) -> ClassificationReport {
  let mut report = ClassificationReport::default();
  for c in counts.iter().filter(|c| c.tool_calls >= min_tool_calls) {
    let classification = classify(c);
    *report
      .distribution
      .entry(classification.category.to_string())
      .or_default() += 1;
    report.sessions.push(classification);
  }
  report
}

#[cfg(test)]
mod tests {
  use chrono::{TimeDelta, TimeZone};

  use super::*;

  fn counts(tool_calls: i64) -> SessionCounts {
    SessionCounts { session_id: "s".into(), tool_calls, ..SessionCounts::default() }
  }

  #[test]
  fn high_error_rate_is_debugging() {
    let c = SessionCounts { errors: 2, ..counts(10) };
    let got = classify(&c);
    assert_eq!(Ratios::of(&c).error_rate, 0.20);
    assert_eq!(got.category, Category::Debugging);
    assert_eq!(got.trigger, "error_rate > 15%");
    assert_eq!(got.metrics.error_rate, 20.0);
  }

  #[test]
  fn error_count_rule_catches_long_sessions() {
    let c = SessionCounts { errors: 6, ..counts(100) };
    assert_eq!(categorize(&c), (Category::Debugging, "error_count > 5"));
  }

  #[test]
  fn rules_apply_in_priority_order() {
    // Both editing and errors: errors win.
    let c = SessionCounts { errors: 3, edits: 8, ..counts(10) };
    assert_eq!(categorize(&c).0, Category::Debugging);

    let c = SessionCounts { edits: 2, writes: 2, ..counts(10) };
    assert_eq!(categorize(&c), (Category::Development, "edit_rate > 30%"));

    let c = SessionCounts { writes: 4, ..counts(40) };
    assert_eq!(categorize(&c), (Category::Development, "write_count > 3"));

    let c = SessionCounts { git: 2, build: 2, reads: 6, ..counts(10) };
    assert_eq!(categorize(&c), (Category::Maintenance, "git_build_rate > 30%"));

    let c = SessionCounts { reads: 4, searches: 2, ..counts(10) };
    assert_eq!(categorize(&c), (Category::Research, "read_search_rate > 50%"));

    let c = SessionCounts { reads: 5, ..counts(10) };
    assert_eq!(categorize(&c), (Category::Mixed, FALLBACK_TRIGGER));
  }

  #[test]
  fn zero_tool_calls_is_mixed() {
    assert_eq!(categorize(&counts(0)).0, Category::Mixed);
  }

  #[test]
  fn burn_rate_from_compactions() {
    let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    let c = SessionCounts {
      compactions: 3,
      first_seen: Some(start),
      last_seen: Some(start + TimeDelta::hours(1)),
      result_bytes: 3 * 1024 * 1024,
      ..counts(10)
    };
    let got = classify(&c);
    assert_eq!(got.efficiency.burn_rate, BurnRate::High);
    assert_eq!(got.efficiency.total_result_mb, 3.0);

    assert_eq!(BurnRate::from_compactions_per_hour(1.0), BurnRate::Medium);
    assert_eq!(BurnRate::from_compactions_per_hour(0.5), BurnRate::Low);
  }

  #[test]
  fn small_sessions_are_skipped() {
    let report = classify_sessions(&[counts(4), SessionCounts { reads: 9, ..counts(10) }], 5);
    assert_eq!(report.sessions.len(), 1);
    assert_eq!(report.distribution.get("research"), Some(&1));
  }
}
