//! External record feeds: git commits and cross-session bus events.
//!
//! Neither feed is read by this crate. They arrive as typed records and are
//! correlated with sessions by time and project.

use std::{collections::HashMap, future::Future};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Slack added on both sides of a session when matching commits to it.
pub const CORRELATION_SLACK_MINUTES: i64 = 5;

// ─── Commits ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitCommit {
  pub sha:       String,
  pub timestamp: DateTime<Utc>,
  pub message:   String,
  /// Repository path, either raw (`/home/me/tally`) or encoded the way the
  /// agent names its log directories (`-home-me-tally`).
  pub project:   String,
}

/// The span a session was active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSpan {
  pub session_id: String,
  pub project:    String,
  pub first_seen: DateTime<Utc>,
  pub last_seen:  DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCommit {
  pub session_id:          String,
  pub sha:                 String,
  /// Seconds from the session's first event to the commit.
  pub time_to_commit_secs: i64,
}

/// A commit linked to a session, as read back.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommitView {
  pub session_id:          String,
  pub sha:                 String,
  pub timestamp:           DateTime<Utc>,
  pub message:             String,
  pub time_to_commit_secs: i64,
  /// Earliest commit linked to this session.
  pub is_first_commit:     bool,
}

/// Encode a filesystem path the way agent log directories are named.
pub fn encode_project_path(path: &str) -> String { path.replace(['/', '.'], "-") }

pub fn project_matches(session_project: &str, commit_project: &str) -> bool {
  session_project == commit_project
    || encode_project_path(session_project) == encode_project_path(commit_project)
}

/// Link each commit to every session of the same project whose padded span
/// contains it. Output is ordered by session, then commit time.
pub fn correlate(spans: &[SessionSpan], commits: &[GitCommit]) -> Vec<SessionCommit> {
  let slack = TimeDelta::minutes(CORRELATION_SLACK_MINUTES);
  let mut encoded: HashMap<&str, String> = HashMap::new();
  let mut links: Vec<(String, DateTime<Utc>, SessionCommit)> = Vec::new();

  for span in spans {
    let session_key = encoded
      .entry(span.project.as_str())
      .or_insert_with(|| encode_project_path(&span.project))
      .clone();
    for commit in commits {
      if commit.timestamp < span.first_seen - slack || commit.timestamp > span.last_seen + slack {
        continue;
      }
      if span.project != commit.project && session_key != encode_project_path(&commit.project) {
        continue;
      }
      links.push((span.session_id.clone(), commit.timestamp, SessionCommit {
        session_id:          span.session_id.clone(),
        sha:                 commit.sha.clone(),
        time_to_commit_secs: (commit.timestamp - span.first_seen).num_seconds(),
      }));
    }
  }

  links.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)).then_with(|| a.2.sha.cmp(&b.2.sha)));
  links.into_iter().map(|(_, _, link)| link).collect()
}

// ─── Bus events ──────────────────────────────────────────────────────────────

/// One event from the cross-session notification bus. Ids increase
/// monotonically, so the highest stored id is the pull watermark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusEvent {
  pub id:         i64,
  pub timestamp:  DateTime<Utc>,
  pub event_type: String,
  pub channel:    Option<String>,
  pub session_id: Option<String>,
  pub repo:       Option<String>,
  pub payload:    Option<String>,
}

/// A source of bus events, pulled incrementally.
pub trait BusFeed: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Events with an id above `watermark`, or, when there is no watermark yet,
  /// events stamped at or after `since`. Ordered by id.
  fn events_after(
    &self,
    watermark: Option<i64>,
    since: DateTime<Utc>,
  ) -> impl Future<Output = Result<Vec<BusEvent>, Self::Error>> + Send + '_;
}

/// `repo:dotfiles` → `dotfiles`.
pub fn repo_from_channel(channel: Option<&str>) -> Option<&str> {
  channel
    .and_then(|c| c.strip_prefix("repo:"))
    .filter(|r| !r.is_empty())
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  fn at(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 4, 1, 12, 0, 0).unwrap() + TimeDelta::minutes(minute)
  }

  fn span(id: &str, project: &str, from: i64, to: i64) -> SessionSpan {
    SessionSpan {
      session_id: id.into(),
      project:    project.into(),
      first_seen: at(from),
      last_seen:  at(to),
    }
  }

  fn commit(sha: &str, project: &str, minute: i64) -> GitCommit {
    GitCommit { sha: sha.into(), timestamp: at(minute), message: "msg".into(), project: project.into() }
  }

  #[test]
  fn encodes_like_log_directories() {
    assert_eq!(encode_project_path("/home/me/my.app"), "-home-me-my-app");
    assert!(project_matches("-home-me-tally", "/home/me/tally"));
    assert!(!project_matches("-home-me-tally", "/home/me/other"));
  }

  #[test]
  fn commits_inside_padded_span_are_linked() {
    let spans = vec![span("s1", "-repo", 0, 30)];
    let commits = vec![
      commit("early", "/repo", -5),
      commit("inside", "/repo", 10),
      commit("late", "/repo", 36),
      commit("other", "/elsewhere", 10),
    ];
    let links = correlate(&spans, &commits);
    let shas: Vec<_> = links.iter().map(|l| l.sha.as_str()).collect();
    assert_eq!(shas, ["early", "inside"]);
    assert_eq!(links[0].time_to_commit_secs, -300);
    assert_eq!(links[1].time_to_commit_secs, 600);
  }

  #[test]
  fn overlapping_sessions_share_a_commit() {
    let spans = vec![span("a", "/repo", 0, 20), span("b", "/repo", 15, 40)];
    let links = correlate(&spans, &[commit("c", "/repo", 18)]);
    assert_eq!(links.len(), 2);
  }

  #[test]
  fn channel_repo() {
    assert_eq!(repo_from_channel(Some("repo:dotfiles")), Some("dotfiles"));
    assert_eq!(repo_from_channel(Some("global")), None);
    assert_eq!(repo_from_channel(None), None);
  }
}
