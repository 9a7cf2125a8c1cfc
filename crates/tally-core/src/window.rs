//! Time windows and query scopes.
//!
//! Every analytic read is bounded by a [`TimeWindow`]; there is no way to ask
//! for "all history" without naming the bounds.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::{Error, Result};

// ─── TimeWindow ──────────────────────────────────────────────────────────────

/// A half-open interval `[start, end)` with `start < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
  start: DateTime<Utc>,
  end:   DateTime<Utc>,
}

impl TimeWindow {
  pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
    if start >= end {
      return Err(Error::InvalidWindow { start, end });
    }
    Ok(Self { start, end })
  }

  /// The window of `length` ending at `end`.
  pub fn ending_at(end: DateTime<Utc>, length: TimeDelta) -> Result<Self> {
    Self::new(end - length, end)
  }

  /// The last `days` days, ending now.
  pub fn last_days(days: i64) -> Result<Self> {
    Self::ending_at(Utc::now(), TimeDelta::days(days))
  }

  /// The last `hours` hours, ending now.
  pub fn last_hours(hours: i64) -> Result<Self> {
    Self::ending_at(Utc::now(), TimeDelta::hours(hours))
  }

  pub fn start(&self) -> DateTime<Utc> { self.start }

  pub fn end(&self) -> DateTime<Utc> { self.end }

  pub fn length(&self) -> TimeDelta { self.end - self.start }

  pub fn contains(&self, t: DateTime<Utc>) -> bool { self.start <= t && t < self.end }

  /// The equal-length window immediately before this one.
  pub fn previous(&self) -> Self {
    Self { start: self.start - self.length(), end: self.start }
  }

  /// This window moved back in time by `by`.
  pub fn shifted_back(&self, by: TimeDelta) -> Self {
    Self { start: self.start - by, end: self.end - by }
  }
}

// ─── Scope ───────────────────────────────────────────────────────────────────

/// Window, project filter and row limit shared by every analytic read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Scope {
  pub window:  TimeWindow,
  /// Substring match on the project column.
  pub project: Option<String>,
  pub limit:   usize,
}

impl Scope {
  pub const DEFAULT_LIMIT: usize = 50;

  pub fn new(window: TimeWindow) -> Self {
    Self { window, project: None, limit: Self::DEFAULT_LIMIT }
  }

  pub fn with_project(mut self, project: impl Into<String>) -> Self {
    self.project = Some(project.into());
    self
  }

  pub fn with_limit(mut self, limit: usize) -> Self {
    self.limit = limit;
    self
  }

  /// The same filters over a different window.
  pub fn over(&self, window: TimeWindow) -> Self {
    Self { window, ..self.clone() }
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  fn t(day: u32) -> DateTime<Utc> { Utc.with_ymd_and_hms(2025, 5, day, 0, 0, 0).unwrap() }

  #[test]
  fn rejects_empty_and_inverted_windows() {
    assert!(TimeWindow::new(t(2), t(2)).is_err());
    assert!(TimeWindow::new(t(3), t(2)).is_err());
    assert!(TimeWindow::new(t(2), t(3)).is_ok());
  }

  #[test]
  fn previous_window_abuts() {
    let w = TimeWindow::new(t(8), t(15)).unwrap();
    let prev = w.previous();
    assert_eq!(prev.start(), t(1));
    assert_eq!(prev.end(), t(8));
    assert!(!prev.contains(t(8)));
    assert!(w.contains(t(8)));
  }

  #[test]
  fn shifted_back_keeps_length() {
    let w = TimeWindow::new(t(10), t(12)).unwrap();
    let s = w.shifted_back(TimeDelta::days(5));
    assert_eq!(s.start(), t(5));
    assert_eq!(s.length(), w.length());
  }
}
