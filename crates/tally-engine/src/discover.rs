//! Finding candidate log files under the logs root.
//!
//! The tree is one directory per project, holding one `.jsonl` file per
//! session. Sub-agent transcripts may sit deeper inside a project directory;
//! they belong to the same project.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use tracing::{debug, warn};
use walkdir::WalkDir;

const LOG_EXTENSION: &str = "jsonl";

/// A candidate file with the metadata the tracker compares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFile {
  pub path:    PathBuf,
  /// Name of the first directory under the logs root.
  pub project: String,
  pub size:    u64,
  /// Truncated to microseconds, the precision the ledger stores.
  pub mtime:   DateTime<Utc>,
}

impl LogFile {
  pub fn path_key(&self) -> String { self.path.to_string_lossy().into_owned() }

  /// The file stem, used as the session id for records that omit one.
  pub fn stem(&self) -> String {
    self
      .path
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_default()
  }
}

/// List log files modified within `lookback` (all of them when `None`),
/// optionally restricted to projects whose directory name contains
/// `project`. Newest first.
///
/// A missing root yields an empty list. Unreadable entries are logged and
/// skipped.
pub fn discover_logs(root: &Path, lookback: Option<TimeDelta>, project: Option<&str>) -> Vec<LogFile> {
  if !root.is_dir() {
    warn!(root = %root.display(), "logs directory does not exist");
    return Vec::new();
  }
  let cutoff = lookback.map(|d| Utc::now() - d);
  let project = project.filter(|p| !p.is_empty());

  let mut files = Vec::new();
  for entry in WalkDir::new(root).min_depth(2).follow_links(false) {
    let entry = match entry {
      Ok(entry) => entry,
      Err(err) => {
        warn!(error = %err, "skipping unreadable log entry");
        continue;
      }
    };
    let path = entry.path();
    if !entry.file_type().is_file() || path.extension().is_none_or(|ext| ext != LOG_EXTENSION) {
      continue;
    }
    let Some(project_dir) = project_of(root, path) else {
      continue;
    };
    if project.is_some_and(|p| !project_dir.contains(p)) {
      continue;
    }
    let metadata = match entry.metadata() {
      Ok(metadata) => metadata,
      Err(err) => {
        warn!(path = %path.display(), error = %err, "cannot stat log file");
        continue;
      }
    };
    let mtime = match metadata.modified() {
      Ok(t) => DateTime::<Utc>::from(t).trunc_subsecs(6),
      Err(err) => {
        warn!(path = %path.display(), error = %err, "log file has no modification time");
        continue;
      }
    };
    if cutoff.is_some_and(|c| mtime < c) {
      continue;
    }
    files.push(LogFile {
      path: path.to_path_buf(),
      project: project_dir,
      size: metadata.len(),
      mtime,
    });
  }

  files.sort_by(|a, b| b.mtime.cmp(&a.mtime).then_with(|| a.path.cmp(&b.path)));
  debug!(root = %root.display(), count = files.len(), "discovered log files");
  files
}

fn project_of(root: &Path, path: &Path) -> Option<String> {
  let relative = path.strip_prefix(root).ok()?;
  let first = relative.components().next()?;
  Some(first.as_os_str().to_string_lossy().into_owned())
}
