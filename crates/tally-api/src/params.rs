//! Query parameters shared by every scoped endpoint.
//!
//! `days`, `hours`, `since`/`until`, `project` and `limit` build the
//! [`Scope`]. Endpoint-specific parameters are read by a second `Query`
//! extractor from the same query string.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use tally_core::window::{Scope, TimeWindow};

use crate::error::ApiError;

pub const DEFAULT_DAYS: i64 = 7;
pub const MAX_DAYS: i64 = 3_650;
pub const MAX_LIMIT: usize = 1_000;

#[derive(Debug, Default, Deserialize)]
pub struct ScopeParams {
  pub days:    Option<i64>,
  /// Takes precedence over `days`.
  pub hours:   Option<i64>,
  /// Explicit window start. Takes precedence over `days` and `hours`.
  pub since:   Option<DateTime<Utc>>,
  /// Explicit window end; defaults to now.
  pub until:   Option<DateTime<Utc>>,
  /// Substring of the project directory name.
  pub project: Option<String>,
  pub limit:   Option<usize>,
}

impl ScopeParams {
  pub fn window(&self) -> Result<TimeWindow, ApiError> {
    let end = self.until.unwrap_or_else(Utc::now);
    let start = match (self.since, self.hours, self.days) {
      (Some(since), _, _) => since,
      (None, Some(hours), _) => end - checked_length(hours, 24 * MAX_DAYS, "hours", TimeDelta::hours)?,
      (None, None, days) => {
        end - checked_length(days.unwrap_or(DEFAULT_DAYS), MAX_DAYS, "days", TimeDelta::days)?
      }
    };
    Ok(TimeWindow::new(start, end)?)
  }

  pub fn project(&self) -> Option<String> {
    self.project.clone().filter(|p| !p.trim().is_empty())
  }

  pub fn scope(&self) -> Result<Scope, ApiError> {
    let limit = self.limit.unwrap_or(Scope::DEFAULT_LIMIT);
    if limit == 0 || limit > MAX_LIMIT {
      return Err(ApiError::BadRequest(format!("limit must be between 1 and {MAX_LIMIT}")));
    }
    let mut scope = Scope::new(self.window()?).with_limit(limit);
    if let Some(project) = self.project() {
      scope = scope.with_project(project);
    }
    Ok(scope)
  }
}

fn checked_length(
  value: i64,
  max:   i64,
  name:  &str,
  unit:  fn(i64) -> TimeDelta,
) -> Result<TimeDelta, ApiError> {
  if !(1..=max).contains(&value) {
    return Err(ApiError::BadRequest(format!("{name} must be between 1 and {max}")));
  }
  Ok(unit(value))
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn defaults_to_a_week() {
    let window = ScopeParams::default().window().unwrap();
    assert_eq!(window.length(), TimeDelta::days(DEFAULT_DAYS));
  }

  #[test]
  fn hours_beat_days_and_since_beats_both() {
    let params = ScopeParams { days: Some(3), hours: Some(6), ..ScopeParams::default() };
    assert_eq!(params.window().unwrap().length(), TimeDelta::hours(6));

    let since = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    let until = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
    let params = ScopeParams {
      days: Some(3),
      since: Some(since),
      until: Some(until),
      ..ScopeParams::default()
    };
    let window = params.window().unwrap();
    assert_eq!((window.start(), window.end()), (since, until));
  }

  #[test]
  fn rejects_bad_values() {
    for params in [
      ScopeParams { days: Some(0), ..ScopeParams::default() },
      ScopeParams { hours: Some(-1), ..ScopeParams::default() },
      ScopeParams { days: Some(i64::MAX), ..ScopeParams::default() },
      ScopeParams { limit: Some(0), ..ScopeParams::default() },
    ] {
      assert!(matches!(params.scope(), Err(ApiError::BadRequest(_))), "{params:?}");
    }
  }

  #[test]
  fn blank_project_is_no_filter() {
    let params = ScopeParams { project: Some("  ".into()), ..ScopeParams::default() };
    assert_eq!(params.scope().unwrap().project, None);
  }
}
