//! Period-over-period comparison of aggregate counts.

use std::collections::{BTreeMap, BTreeSet};

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::{failures::round_to, window::TimeWindow};

/// Changes within this many percent either way count as unchanged.
pub const CHANGE_THRESHOLD_PCT: f64 = 5.0;

/// Tools listed in the per-tool section of a trend report.
pub const TOP_TOOL_CHANGES: usize = 10;

// ─── Comparison ──────────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Comparison {
  /// The equal-length window immediately before.
  #[default]
  Previous,
  /// The same window thirty days earlier.
  SameLastMonth,
}

impl Comparison {
  pub fn baseline(self, current: &TimeWindow) -> TimeWindow {
    match self {
      Self::Previous => current.previous(),
      Self::SameLastMonth => current.shifted_back(TimeDelta::days(30)),
    }
  }
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Direction {
  Up,
  Down,
  Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricChange {
  pub current:    f64,
  pub previous:   f64,
  /// `None` when the previous value is zero.
  pub change_pct: Option<f64>,
  pub direction:  Direction,
}

pub fn compare(current: f64, previous: f64) -> MetricChange {
  if previous == 0.0 {
    return MetricChange {
      current,
      previous,
      change_pct: None,
      direction: if current > 0.0 { Direction::Up } else { Direction::Unchanged },
    };
  }
  let pct = round_to((current - previous) / previous * 100.0, 1);
  let direction = if pct > CHANGE_THRESHOLD_PCT {
    Direction::Up
  } else if pct < -CHANGE_THRESHOLD_PCT {
    Direction::Down
  } else {
    Direction::Unchanged
  };
  MetricChange { current, previous, change_pct: Some(pct), direction }
}

// ─── Totals ──────────────────────────────────────────────────────────────────

/// Aggregate counts over one window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PeriodTotals {
  pub events:        i64,
  pub sessions:      i64,
  pub tool_calls:    i64,
  pub errors:        i64,
  pub input_tokens:  i64,
  pub output_tokens: i64,
  pub tools:         BTreeMap<String, i64>,
}

impl PeriodTotals {
  /// Errors per hundred tool calls.
  pub fn error_rate(&self) -> f64 {
    if self.tool_calls == 0 {
      0.0
    } else {
      round_to(self.errors as f64 / self.tool_calls as f64 * 100.0, 1)
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolTrend {
  pub tool:   String,
  #[serde(flatten)]
  pub change: MetricChange,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendReport {
  pub comparison: Comparison,
  pub current:    TimeWindow,
  pub baseline:   TimeWindow,
  pub metrics:    BTreeMap<&'static str, MetricChange>,
  pub tools:      Vec<ToolTrend>,
}

pub fn analyze_trends(
  comparison: Comparison,
  current_window: TimeWindow,
  current: &PeriodTotals,
  previous: &PeriodTotals,
) -> TrendReport {
  let pairs: [(&'static str, f64, f64); 7] = [
    ("events", current.events as f64, previous.events as f64),
    ("sessions", current.sessions as f64, previous.sessions as f64),
    ("tool_calls", current.tool_calls as f64, previous.tool_calls as f64),
    ("errors", current.errors as f64, previous.errors as f64),
    ("error_rate", current.error_rate(), previous.error_rate()),
    ("input_tokens", current.input_tokens as f64, previous.input_tokens as f64),
    ("output_tokens", current.output_tokens as f64, previous.output_tokens as f64),
  ];
  let metrics = pairs
    .into_iter()
    .map(|(name, cur, prev)| (name, compare(cur, prev)))
    .collect();

  let names: BTreeSet<&String> = current.tools.keys().chain(previous.tools.keys()).collect();
  let mut tools: Vec<ToolTrend> = names
    .into_iter()
    .map(|tool| {
      let cur = current.tools.get(tool).copied().unwrap_or(0);
      let prev = previous.tools.get(tool).copied().unwrap_or(0);
      ToolTrend { tool: tool.clone(), change: compare(cur as f64, prev as f64) }
    })
    .collect();
  tools.sort_by(|a, b| {
    let delta = |t: &ToolTrend| (t.change.current - t.change.previous).abs();
    delta(b)
      .total_cmp(&delta(a))
      .then_with(|| a.tool.cmp(&b.tool))
  });
  tools.truncate(TOP_TOOL_CHANGES);

  TrendReport {
    comparison,
    current: current_window,
    baseline: comparison.baseline(&current_window),
    metrics,
    tools,
  }
}

#[cfg(test)]
mod tests {
  use chrono::{TimeZone, Utc};

  use super::*;

  #[test]
  fn zero_baseline_is_undefined_not_infinite() {
    let c = compare(12.0, 0.0);
    assert_eq!(c.change_pct, None);
    assert_eq!(c.direction, Direction::Up);

    let c = compare(0.0, 0.0);
    assert_eq!(c.change_pct, None);
    assert_eq!(c.direction, Direction::Unchanged);
  }

  #[test]
  fn direction_threshold() {
    assert_eq!(compare(110.0, 100.0).direction, Direction::Up);
    assert_eq!(compare(104.0, 100.0).direction, Direction::Unchanged);
    assert_eq!(compare(90.0, 100.0).direction, Direction::Down);
    assert_eq!(compare(1.0, 3.0).change_pct, Some(-66.7));
  }

  #[test]
  fn report_covers_metrics_and_tools() {
    let window = TimeWindow::new(
      Utc.with_ymd_and_hms(2025, 1, 8, 0, 0, 0).unwrap(),
      Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).unwrap(),
    )
    .unwrap();
    let current = PeriodTotals {
      events: 20,
      tool_calls: 10,
      errors: 1,
      tools: BTreeMap::from([("Bash".to_string(), 6), ("Read".to_string(), 4)]),
      ..PeriodTotals::default()
    };
    let previous = PeriodTotals {
      events: 0,
      tools: BTreeMap::from([("Read".to_string(), 3), ("Grep".to_string(), 2)]),
      ..PeriodTotals::default()
    };

    let report = analyze_trends(Comparison::Previous, window, &current, &previous);
    assert_eq!(report.metrics["events"].change_pct, None);
    assert_eq!(report.metrics["error_rate"].current, 10.0);
    assert_eq!(report.baseline.end(), window.start());

    let order: Vec<_> = report.tools.iter().map(|t| t.tool.as_str()).collect();
    assert_eq!(order, ["Bash", "Grep", "Read"]);
  }

  #[test]
  fn same_last_month_shifts_thirty_days() {
    let window = TimeWindow::new(
      Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap(),
      Utc.with_ymd_and_hms(2025, 3, 8, 0, 0, 0).unwrap(),
    )
    .unwrap();
    let baseline = Comparison::SameLastMonth.baseline(&window);
    assert_eq!(baseline.start(), Utc.with_ymd_and_hms(2025, 1, 30, 0, 0, 0).unwrap());
  }
}
