//! Typed tool-call payloads.
//!
//! Agents record each tool invocation with a free-form JSON `input`. Its shape
//! is checked once, when the log line is parsed: known tools decode into their
//! own variant, anything else (including a known tool whose payload does not
//! have the expected shape) lands in [`ToolInput::Other`]. The raw JSON is kept
//! alongside the event for drill-down, so nothing is lost by the narrowing.

use serde::Deserialize;
use serde_json::Value;

// ─── Tool names ──────────────────────────────────────────────────────────────

/// Tools that modify a file in place.
pub const EDIT_TOOLS: &[&str] = &["Edit", "MultiEdit", "NotebookEdit"];

/// Tools whose calls count as edits for rework detection.
pub const REWORK_TOOLS: &[&str] = &["Edit", "MultiEdit", "Write", "NotebookEdit"];

/// Tools that only locate content.
pub const SEARCH_TOOLS: &[&str] = &["Grep", "Glob", "WebSearch"];

/// Shell commands that count as version-control work.
pub const GIT_COMMANDS: &[&str] = &["git", "gh"];

/// Shell commands that count as build or test work.
pub const BUILD_COMMANDS: &[&str] = &["make", "cargo", "npm", "pytest"];

// ─── ToolInput ───────────────────────────────────────────────────────────────

/// The decoded `input` of a tool call, keyed by tool name.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "name", content = "input")]
pub enum ToolInput {
  Bash {
    command: String,
  },
  Read {
    file_path: String,
  },
  Write {
    file_path: String,
  },
  Edit {
    file_path: String,
  },
  MultiEdit {
    file_path: String,
  },
  NotebookEdit {
    notebook_path: String,
  },
  Glob {
    pattern: String,
    path:    Option<String>,
  },
  Grep {
    pattern: String,
    path:    Option<String>,
  },
  Skill {
    skill: String,
  },
  Task {
    subagent_type: Option<String>,
    description:   Option<String>,
  },
  WebFetch {
    url: String,
  },
  WebSearch {
    query: String,
  },
  /// Unknown tools (MCP servers, newer agent tools) and payloads that did not
  /// match the shape of their named variant.
  #[serde(skip)]
  Other {
    name:  String,
    input: Value,
  },
}

impl ToolInput {
  /// Decode the payload of a call to tool `name`.
  ///
  /// Never fails: a payload that does not fit the named tool is kept verbatim
  /// as [`ToolInput::Other`].
  pub fn from_parts(name: &str, input: Value) -> Self {
    let mut wrapped = serde_json::json!({ "name": name, "input": input });
    let decoded = Self::deserialize(&wrapped);
    match decoded {
      Ok(tool) => tool,
      Err(_) => Self::Other {
        name:  name.to_owned(),
        input: wrapped["input"].take(),
      },
    }
  }

  /// The tool name as it appears in the log.
  pub fn name(&self) -> &str {
    match self {
      Self::Bash { .. } => "Bash",
      Self::Read { .. } => "Read",
      Self::Write { .. } => "Write",
      Self::Edit { .. } => "Edit",
      Self::MultiEdit { .. } => "MultiEdit",
      Self::NotebookEdit { .. } => "NotebookEdit",
      Self::Glob { .. } => "Glob",
      Self::Grep { .. } => "Grep",
      Self::Skill { .. } => "Skill",
      Self::Task { .. } => "Task",
      Self::WebFetch { .. } => "WebFetch",
      Self::WebSearch { .. } => "WebSearch",
      Self::Other { name, .. } => name,
    }
  }

  /// The full shell command line of a `Bash` call.
  pub fn command_line(&self) -> Option<&str> {
    match self {
      Self::Bash { command } => Some(command),
      _ => None,
    }
  }

  /// The file or directory a file tool operates on.
  pub fn target_path(&self) -> Option<&str> {
    match self {
      Self::Read { file_path }
      | Self::Write { file_path }
      | Self::Edit { file_path }
      | Self::MultiEdit { file_path } => Some(file_path),
      Self::NotebookEdit { notebook_path } => Some(notebook_path),
      Self::Glob { path, .. } | Self::Grep { path, .. } => path.as_deref(),
      _ => None,
    }
  }

  pub fn skill_name(&self) -> Option<&str> {
    match self {
      Self::Skill { skill } => Some(skill),
      _ => None,
    }
  }
}

// ─── Shell command splitting ─────────────────────────────────────────────────

/// Split a shell command line into its leading command token and the
/// remaining arguments, skipping leading `NAME=value` assignments.
///
/// Returns `None` for a blank line.
pub fn split_command(line: &str) -> Option<(&str, Option<&str>)> {
  let mut rest = line.trim();
  loop {
    let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    let token = &rest[..end];
    if token.is_empty() {
      return None;
    }
    let remainder = rest[end..].trim();
    if is_env_assignment(token) && !remainder.is_empty() {
      rest = remainder;
      continue;
    }
    return Some((token, (!remainder.is_empty()).then_some(remainder)));
  }
}

fn is_env_assignment(token: &str) -> bool {
  let Some((name, _)) = token.split_once('=') else {
    return false;
  };
  let mut chars = name.chars();
  match chars.next() {
    Some(c) if c.is_ascii_alphabetic() || c == '_' => {
      chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    }
    _ => false,
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn known_tool_decodes_into_its_variant() {
    let tool = ToolInput::from_parts(
      "Bash",
      json!({ "command": "cargo test", "description": "run tests" }),
    );
    assert_eq!(tool, ToolInput::Bash { command: "cargo test".into() });
    assert_eq!(tool.name(), "Bash");
    assert_eq!(tool.command_line(), Some("cargo test"));
  }

  #[test]
  fn unknown_tool_is_kept_verbatim() {
    let input = json!({ "channel": "repo:tally" });
    let tool = ToolInput::from_parts("mcp__bus__publish", input.clone());
    assert_eq!(tool, ToolInput::Other {
      name: "mcp__bus__publish".into(),
      input,
    });
    assert_eq!(tool.name(), "mcp__bus__publish");
  }

  #[test]
  fn mismatched_shape_falls_back_to_other() {
    let tool = ToolInput::from_parts("Read", json!({ "path": "/tmp/x" }));
    assert!(matches!(tool, ToolInput::Other { ref name, .. } if name == "Read"));
    assert_eq!(tool.target_path(), None);
  }

  #[test]
  fn target_path_covers_file_tools() {
    let nb = ToolInput::from_parts("NotebookEdit", json!({ "notebook_path": "a.ipynb" }));
    assert_eq!(nb.target_path(), Some("a.ipynb"));

    let grep = ToolInput::from_parts("Grep", json!({ "pattern": "fn main", "path": "src" }));
    assert_eq!(grep.target_path(), Some("src"));

    let skill = ToolInput::from_parts("Skill", json!({ "skill": "pdf" }));
    assert_eq!(skill.skill_name(), Some("pdf"));
  }

  #[test]
  fn split_command_basic() {
    assert_eq!(split_command("make test"), Some(("make", Some("test"))));
    assert_eq!(split_command("  ls  "), Some(("ls", None)));
    assert_eq!(split_command("   "), None);
  }

  #[test]
  fn split_command_skips_env_assignments() {
    assert_eq!(
      split_command("RUST_LOG=debug FOO_1=x cargo run --release"),
      Some(("cargo", Some("run --release"))),
    );
    // A lone assignment is its own command.
    assert_eq!(split_command("FOO=bar"), Some(("FOO=bar", None)));
    // Not an identifier, so not an assignment.
    assert_eq!(split_command("1x=2 echo"), Some(("1x=2", Some("echo"))));
  }
}
