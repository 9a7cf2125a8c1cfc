//! Loading the permission allow-list from the agent's settings file.

use std::{io::ErrorKind, path::Path};

use tally_core::permissions::AllowList;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Read and compile the `Bash` allow patterns in `path`.
///
/// A missing file is an empty allow-list. Patterns that fail to compile are
/// logged here and reported by the gap analysis; they never fail the load.
pub async fn load_allow_list(path: &Path) -> Result<AllowList> {
  let text = match tokio::fs::read_to_string(path).await {
    Ok(text) => text,
    Err(e) if e.kind() == ErrorKind::NotFound => {
      debug!(path = %path.display(), "no settings file, allow-list is empty");
      return Ok(AllowList::default());
    }
    Err(e) => return Err(Error::io(path, e)),
  };
  let allow = AllowList::from_settings_str(&text)
    .map_err(|e| Error::Settings(format!("{}: {e}", path.display())))?;
  for invalid in allow.invalid() {
    warn!(pattern = %invalid.pattern, reason = %invalid.reason, "ignoring unparseable allow pattern");
  }
  Ok(allow)
}

#[cfg(test)]
mod tests {
  use tempfile::TempDir;

  use super::*;

  #[tokio::test]
  async fn missing_file_is_empty() {
    let dir = TempDir::new().unwrap();
    let allow = load_allow_list(&dir.path().join("settings.json")).await.unwrap();
    assert!(allow.is_empty());
  }

  #[tokio::test]
  async fn reads_bash_patterns() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(
      &path,
      r#"{"permissions":{"allow":["Bash(make:*)","Bash(git status)","Read(**)","Bash(x [)"]}}"#,
    )
    .unwrap();

    let allow = load_allow_list(&path).await.unwrap();
    assert_eq!(allow.patterns().collect::<Vec<_>>(), ["make*", "git status"]);
    assert_eq!(allow.invalid().len(), 1);
    assert!(allow.covers("make test"));
  }

  #[tokio::test]
  async fn malformed_document_is_a_settings_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert!(matches!(load_allow_list(&path).await, Err(Error::Settings(_))));
  }
}
