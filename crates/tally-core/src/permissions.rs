//! Permission-gap detection.
//!
//! Frequently run shell commands are compared against the `Bash(...)` entries
//! of the agent's allow-list. A command line is covered only when some allow
//! pattern matches the whole line under glob semantics: `make*` covers
//! `make test`, `make` covers only `make` itself.

use std::collections::{BTreeMap, HashMap};

use globset::{GlobBuilder, GlobMatcher};
use serde::Serialize;
use serde_json::Value;

use crate::{Error, Result, report::CommandLine};

/// Commands that gain nothing from auto-approval: shell builtins, identity
/// and directory introspection, control-flow keywords.
pub const EXCLUDED_COMMANDS: &[&str] = &[
  "cd", "pwd", "pushd", "popd", "dirs", "echo", "printf", "export", "source", ".",
  "set", "unset", "alias", "unalias", "type", "which", "command", "hash", "whoami",
  "id", "hostname", "true", "false", "exit", "return", "test", "[", "[[", "if",
  "then", "else", "elif", "fi", "for", "while", "until", "do", "done", "case",
  "esac", "function", "time", "eval", "exec", "read", "sleep", "wait",
];

pub fn is_excluded(command: &str) -> bool { EXCLUDED_COMMANDS.contains(&command) }

// ─── Allow-list ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidPattern {
  pub pattern: String,
  pub reason:  String,
}

/// Compiled `Bash` allow patterns.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
  matchers: Vec<(String, GlobMatcher)>,
  invalid:  Vec<InvalidPattern>,
}

impl AllowList {
  /// Compile raw glob patterns. Uncompilable ones are set aside, not fatal.
  pub fn from_patterns<I, S>(patterns: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let mut list = Self::default();
    for pattern in patterns {
      let pattern = pattern.into();
      match GlobBuilder::new(&pattern).literal_separator(false).build() {
        Ok(glob) => list.matchers.push((pattern, glob.compile_matcher())),
        Err(e) => list.invalid.push(InvalidPattern { pattern, reason: e.kind().to_string() }),
      }
    }
    list
  }

  /// Read `permissions.allow` from an agent settings document.
  pub fn from_settings(settings: &Value) -> Result<Self> {
    let Some(allow) = settings.pointer("/permissions/allow") else {
      return Ok(Self::default());
    };
    let entries = allow
      .as_array()
      .ok_or_else(|| Error::Settings("permissions.allow is not an array".into()))?;
    Ok(Self::from_patterns(
      entries.iter().filter_map(Value::as_str).filter_map(bash_pattern),
    ))
  }

  pub fn from_settings_str(text: &str) -> Result<Self> {
    let settings: Value = serde_json::from_str(text)?;
    Self::from_settings(&settings)
  }

  pub fn covers(&self, command_line: &str) -> bool {
    self.matchers.iter().any(|(_, m)| m.is_match(command_line))
  }

  pub fn patterns(&self) -> impl Iterator<Item = &str> {
    self.matchers.iter().map(|(p, _)| p.as_str())
  }

  pub fn len(&self) -> usize { self.matchers.len() }

  pub fn is_empty(&self) -> bool { self.matchers.is_empty() }

  pub fn invalid(&self) -> &[InvalidPattern] { &self.invalid }
}

/// The glob inside a `Bash(...)` allow entry.
///
/// The legacy prefix form `Bash(git diff:*)` becomes `git diff*`, and a bare
/// `Bash` entry allows everything. Entries for other tools yield `None`.
pub fn bash_pattern(entry: &str) -> Option<String> {
  let entry = entry.trim();
  if entry == "Bash" {
    return Some("*".to_owned());
  }
  let inner = entry.strip_prefix("Bash(")?.strip_suffix(')')?;
  Some(match inner.strip_suffix(":*") {
    Some(prefix) => format!("{prefix}*"),
    None => inner.to_owned(),
  })
}

// ─── Gap detection ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PermissionGap {
  pub command:         String,
  pub count:           u64,
  pub uncovered_count: u64,
  /// Most frequent uncovered command line.
  pub example:         String,
  pub suggestion:      String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GapReport {
  pub gaps:             Vec<PermissionGap>,
  pub invalid_patterns: Vec<InvalidPattern>,
  pub allow_patterns:   usize,
  pub commands_checked: usize,
}

#[derive(Default)]
struct Tally<'a> {
  count: u64,
  lines: HashMap<&'a str, u64>,
}

/// Find frequent commands with at least one invocation no allow pattern
/// covers. Gaps are ordered by count, then command.
pub fn find_gaps(lines: &[CommandLine], allow: &AllowList, min_count: u64) -> GapReport {
  let full: Vec<String> = lines.iter().map(CommandLine::full).collect();

  let mut by_command: BTreeMap<&str, Tally<'_>> = BTreeMap::new();
  for (line, text) in lines.iter().zip(&full) {
    if is_excluded(&line.command) {
      continue;
    }
    let tally = by_command.entry(line.command.as_str()).or_default();
    tally.count += 1;
    *tally.lines.entry(text.as_str()).or_default() += 1;
  }

  let frequent: Vec<(&str, Tally<'_>)> = by_command
    .into_iter()
    .filter(|(_, t)| t.count >= min_count)
    .collect();
  let commands_checked = frequent.len();

  let mut gaps: Vec<PermissionGap> = frequent
    .into_iter()
    .filter_map(|(command, tally)| {
      let mut uncovered: Vec<(&str, u64)> = tally
        .lines
        .iter()
        .filter(|(line, _)| !allow.covers(line))
        .map(|(line, n)| (*line, *n))
        .collect();
      if uncovered.is_empty() {
        return None;
      }
      uncovered.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
      Some(PermissionGap {
        command:         command.to_owned(),
        count:           tally.count,
        uncovered_count: uncovered.iter().map(|(_, n)| n).sum(),
        example:         uncovered[0].0.to_owned(),
        suggestion:      format!("Bash({command}:*)"),
      })
    })
    .collect();
  gaps.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.command.cmp(&b.command)));

  GapReport {
    gaps,
    invalid_patterns: allow.invalid().to_vec(),
    allow_patterns: allow.len(),
    commands_checked,
  }
}
