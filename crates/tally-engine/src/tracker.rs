//! Deciding which candidate files need parsing.

use std::collections::HashMap;

use tally_core::session::IngestionState;

use crate::discover::LogFile;

/// The ingestion ledger keyed by path.
#[derive(Debug, Default)]
pub struct FileTracker {
  known: HashMap<String, IngestionState>,
}

impl FileTracker {
  pub fn new(ledger: Vec<IngestionState>) -> Self {
    Self {
      known: ledger.into_iter().map(|s| (s.path.clone(), s)).collect(),
    }
  }

  /// A file is unchanged only when both its size and mtime match the
  /// recorded values exactly.
  pub fn is_unchanged(&self, file: &LogFile) -> bool {
    self
      .known
      .get(&file.path_key())
      .is_some_and(|s| s.size == file.size && s.mtime == file.mtime)
  }

  /// Split `candidates` into the files to parse and the number skipped as
  /// unchanged. `force` selects every file.
  pub fn select(&self, candidates: Vec<LogFile>, force: bool) -> (Vec<LogFile>, usize) {
    if force {
      return (candidates, 0);
    }
    let total = candidates.len();
    let selected: Vec<LogFile> = candidates
      .into_iter()
      .filter(|f| !self.is_unchanged(f))
      .collect();
    let skipped = total - selected.len();
    (selected, skipped)
  }
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use chrono::{DateTime, TimeZone, Utc};

  use super::*;

  fn t(second: u32) -> DateTime<Utc> { Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, second).unwrap() }

  fn file(path: &str, size: u64, mtime: DateTime<Utc>) -> LogFile {
    LogFile { path: PathBuf::from(path), project: "p".into(), size, mtime }
  }

  fn state(path: &str, size: u64, mtime: DateTime<Utc>) -> IngestionState {
    IngestionState {
      path: path.into(),
      size,
      mtime,
      records_added: 3,
      processed_at: t(59),
    }
  }

  #[test]
  fn selects_new_and_changed_files() {
    let tracker = FileTracker::new(vec![
      state("/logs/p/same.jsonl", 100, t(1)),
      state("/logs/p/grown.jsonl", 100, t(1)),
      state("/logs/p/touched.jsonl", 100, t(1)),
    ]);
    let (selected, skipped) = tracker.select(
      vec![
        file("/logs/p/same.jsonl", 100, t(1)),
        file("/logs/p/grown.jsonl", 180, t(2)),
        file("/logs/p/touched.jsonl", 100, t(5)),
        file("/logs/p/new.jsonl", 10, t(1)),
      ],
      false,
    );
    let paths: Vec<_> = selected.iter().map(LogFile::path_key).collect();
    assert_eq!(paths, ["/logs/p/grown.jsonl", "/logs/p/touched.jsonl", "/logs/p/new.jsonl"]);
    assert_eq!(skipped, 1);
  }

  #[test]
  fn same_mtime_different_size_is_changed() {
    let tracker = FileTracker::new(vec![state("/a.jsonl", 100, t(1))]);
    assert!(!tracker.is_unchanged(&file("/a.jsonl", 40, t(1))));
    assert!(tracker.is_unchanged(&file("/a.jsonl", 100, t(1))));
  }

  #[test]
  fn force_selects_everything() {
    let tracker = FileTracker::new(vec![state("/a.jsonl", 100, t(1))]);
    let (selected, skipped) = tracker.select(vec![file("/a.jsonl", 100, t(1))], true);
    assert_eq!(selected.len(), 1);
    assert_eq!(skipped, 0);
  }
}
