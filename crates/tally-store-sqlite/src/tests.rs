//! Integration tests for `SqliteStore` against in-memory and on-disk
//! databases.

use std::ops::ControlFlow;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use serde_json::json;
use tally_core::{
  event::{EntryKind, Event, TokenUsage},
  git::{BusEvent, GitCommit, SessionCommit},
  pattern::{Pattern, PatternKind},
  report::{SearchQuery, TokenGrouping, ToolCallRow},
  sequence::SequenceMiner,
  session::IngestionState,
  store::{AnalyticsStore, ToolCallVisitor},
  tool::ToolInput,
  window::{Scope, TimeWindow},
};

use crate::{ConnectionConfig, Error, SqliteStore, latest_version};

async fn store() -> SqliteStore { SqliteStore::open_in_memory().await.expect("in-memory store") }

fn at(minute: i64) -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap() + TimeDelta::minutes(minute)
}

fn scope() -> Scope {
  Scope::new(TimeWindow::new(at(-60 * 24), at(60 * 24)).unwrap())
}

fn ledger(path: &str) -> IngestionState {
  IngestionState {
    path:          path.into(),
    size:          100,
    mtime:         at(0),
    records_added: 0,
    processed_at:  at(1),
  }
}

fn tool_call(session: &str, id: &str, minute: i64, name: &str, input: serde_json::Value) -> Event {
  let mut e = Event::new(session, id, at(minute), EntryKind::ToolCall, "-home-me-tally");
  e.correlation_id = Some(format!("toolu_{id}"));
  e.tool_input_json = Some(input.to_string());
  e.tool = Some(ToolInput::from_parts(name, input));
  e
}

fn bash(session: &str, id: &str, minute: i64, command: &str) -> Event {
  tool_call(session, id, minute, "Bash", json!({ "command": command }))
}

fn result(session: &str, id: &str, minute: i64, for_call: &str, error: bool, bytes: i64) -> Event {
  let mut e = Event::new(session, id, at(minute), EntryKind::ToolResult, "-home-me-tally");
  e.correlation_id = Some(format!("toolu_{for_call}"));
  e.is_error = error;
  e.result_size_bytes = Some(bytes);
  e
}

fn assistant(session: &str, id: &str, minute: i64, text: &str) -> Event {
  let mut e = Event::new(session, id, at(minute), EntryKind::Assistant, "-home-me-tally");
  e.usage = Some(TokenUsage { input_tokens: 100, output_tokens: 20, ..TokenUsage::default() });
  e.model = Some("model-a".into());
  e.message_text = Some(text.into());
  e
}

// ─── Schema ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn fresh_store_is_fully_migrated() {
  let s = store().await;
  assert_eq!(s.schema_version().await.unwrap(), latest_version());
  let status = s.status().await.unwrap();
  assert_eq!(status.events, 0);
  assert_eq!(status.schema_version, latest_version());
  assert!(status.last_ingestion.is_none());
}

#[tokio::test]
async fn reopening_an_on_disk_store_keeps_data() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("nested").join("data.db");

  let s = SqliteStore::open(&path, ConnectionConfig::default()).await.unwrap();
  s.ingest_batch(vec![bash("s1", "a", 0, "ls")], ledger("f.jsonl"))
    .await
    .unwrap();
  drop(s);

  let s = SqliteStore::open(&path, ConnectionConfig { read_connections: 2, ..Default::default() })
    .await
    .unwrap();
  assert_eq!(s.schema_version().await.unwrap(), latest_version());
  assert_eq!(s.status().await.unwrap().events, 1);
  // Reads spread over the pool see the writer's commits.
  for _ in 0..3 {
    assert_eq!(s.tool_frequency(scope()).await.unwrap().len(), 1);
  }
}

// ─── Ingestion ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn reingesting_the_same_records_is_a_no_op() {
  let s = store().await;
  let events = vec![assistant("s1", "m1", 0, "hello"), bash("s1", "c1", 1, "cargo test")];

  let first = s.ingest_batch(events.clone(), ledger("a.jsonl")).await.unwrap();
  assert_eq!(first.inserted, 2);
  assert_eq!(first.duplicates, 0);

  let before = s.session("s1".into()).await.unwrap().unwrap();
  let second = s.ingest_batch(events, ledger("a.jsonl")).await.unwrap();
  assert_eq!(second.inserted, 0);
  assert_eq!(second.duplicates, 2);

  let after = s.session("s1".into()).await.unwrap().unwrap();
  assert_eq!(before, after);
  assert_eq!(s.status().await.unwrap().events, 2);

  let ledger = s.ingestion_ledger().await.unwrap();
  assert_eq!(ledger.len(), 1);
  assert_eq!(ledger[0].records_added, 0);
}

#[tokio::test]
async fn appended_records_extend_the_session() {
  let s = store().await;
  let mut first = assistant("s1", "m1", 0, "start");
  first.git_branch = Some("main".into());
  first.slug = Some("brave-otter".into());
  s.ingest_batch(vec![first], ledger("a.jsonl")).await.unwrap();

  let mut later = bash("s1", "c1", 30, "git status");
  later.git_branch = Some("feature".into());
  let mut compaction = Event::new("s1", "k1", at(31), EntryKind::Compaction, "-home-me-tally");
  compaction.slug = Some("other-slug".into());
  s.ingest_batch(vec![later, compaction], ledger("a.jsonl")).await.unwrap();

  let session = s.session("s1".into()).await.unwrap().unwrap();
  assert_eq!(session.first_seen, at(0));
  assert_eq!(session.last_seen, at(31));
  assert_eq!(session.entry_count, 3);
  assert_eq!(session.tool_call_count, 1);
  assert_eq!(session.input_tokens, 100);
  assert_eq!(session.compaction_count, 1);
  assert_eq!(session.primary_branch.as_deref(), Some("feature"));
  assert_eq!(session.display_name.as_deref(), Some("brave-otter"));
}

#[tokio::test]
async fn older_branch_does_not_replace_newer() {
  let s = store().await;
  let mut newer = assistant("s1", "m2", 20, "b");
  newer.git_branch = Some("feature".into());
  s.ingest_batch(vec![newer], ledger("a.jsonl")).await.unwrap();

  let mut older = assistant("s1", "m1", 0, "a");
  older.git_branch = Some("main".into());
  s.ingest_batch(vec![older], ledger("b.jsonl")).await.unwrap();

  let session = s.session("s1".into()).await.unwrap().unwrap();
  assert_eq!(session.primary_branch.as_deref(), Some("feature"));
  assert_eq!(session.first_seen, at(0));
}

#[tokio::test]
async fn rebuild_matches_incremental_rollups() {
  let s = store().await;
  let mut m = assistant("s1", "m1", 0, "x");
  m.git_branch = Some("main".into());
  s.ingest_batch(vec![m, bash("s1", "c1", 2, "ls")], ledger("a.jsonl")).await.unwrap();
  s.ingest_batch(vec![bash("s2", "c2", 5, "pwd")], ledger("b.jsonl")).await.unwrap();

  let before = s.sessions(scope()).await.unwrap();
  assert_eq!(s.rebuild_sessions().await.unwrap(), 2);
  let after = s.sessions(scope()).await.unwrap();
  assert_eq!(before, after);
}

#[tokio::test]
async fn labels_agree_when_files_arrive_out_of_order() {
  let s = store().await;
  // The later half of the session is ingested first.
  let mut late = assistant("s1", "m2", 20, "late");
  late.git_branch = Some("feature".into());
  late.slug = Some("late-name".into());
  let mut unlabelled = bash("s1", "c2", 25, "ls");
  unlabelled.git_branch = Some(String::new());
  s.ingest_batch(vec![late, unlabelled], ledger("b.jsonl")).await.unwrap();

  let mut early = assistant("s1", "m1", 0, "early");
  early.git_branch = Some("main".into());
  early.slug = Some("early-name".into());
  s.ingest_batch(vec![early], ledger("a.jsonl")).await.unwrap();

  let incremental = s.session("s1".into()).await.unwrap().unwrap();
  assert_eq!(incremental.primary_branch.as_deref(), Some("feature"));
  assert_eq!(incremental.display_name.as_deref(), Some("early-name"));

  s.rebuild_sessions().await.unwrap();
  let rebuilt = s.session("s1".into()).await.unwrap().unwrap();
  assert_eq!(incremental, rebuilt);

  // A newer branch in a third file still moves it.
  let mut newest = bash("s1", "c3", 40, "git push");
  newest.git_branch = Some("release".into());
  newest.slug = Some("newest-name".into());
  s.ingest_batch(vec![newest], ledger("c.jsonl")).await.unwrap();
  let session = s.session("s1".into()).await.unwrap().unwrap();
  assert_eq!(session.primary_branch.as_deref(), Some("release"));
  assert_eq!(session.display_name.as_deref(), Some("early-name"));
}

// ─── Usage ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn tool_and_command_frequency() {
  let s = store().await;
  let events = vec![
    bash("s1", "c1", 0, "git status"),
    bash("s1", "c2", 1, "git diff --stat"),
    bash("s1", "c3", 2, "cargo test"),
    tool_call("s1", "c4", 3, "Read", json!({ "file_path": "/a.rs" })),
    tool_call("s1", "c5", 4, "Skill", json!({ "skill": "review" })),
    tool_call("s1", "c6", 5, "Task", json!({ "subagent_type": "explorer", "description": "x" })),
  ];
  s.ingest_batch(events, ledger("a.jsonl")).await.unwrap();

  let tools = s.tool_frequency(scope()).await.unwrap();
  assert_eq!(tools[0].tool, "Bash");
  assert_eq!(tools[0].count, 3);
  assert_eq!(tools[0].breakdown[0].name, "git");
  let skill = tools.iter().find(|t| t.tool == "Skill").unwrap();
  assert_eq!(skill.breakdown[0].name, "review");
  let task = tools.iter().find(|t| t.tool == "Task").unwrap();
  assert_eq!(task.breakdown[0].name, "explorer");
  let read = tools.iter().find(|t| t.tool == "Read").unwrap();
  assert!(read.breakdown.is_empty());

  let commands = s.command_frequency(scope(), None).await.unwrap();
  assert_eq!(commands[0].command, "git");
  assert_eq!(commands[0].count, 2);
  assert_eq!(commands[0].last_seen, Some(at(1)));
  assert_eq!(commands[0].top_args.len(), 2);

  let cargo = s.command_frequency(scope(), Some("car".into())).await.unwrap();
  assert_eq!(cargo.len(), 1);
  assert_eq!(cargo[0].command, "cargo");
}

#[tokio::test]
async fn scope_filters_window_and_project() {
  let s = store().await;
  let mut elsewhere = bash("s2", "c2", 0, "ls");
  elsewhere.project = "-home-me-other".into();
  s.ingest_batch(vec![bash("s1", "c1", 0, "ls"), elsewhere], ledger("a.jsonl"))
    .await
    .unwrap();

  let tally = scope().with_project("tally");
  assert_eq!(s.command_lines(tally).await.unwrap().len(), 1);
  assert_eq!(s.command_lines(scope()).await.unwrap().len(), 2);

  let before = Scope::new(TimeWindow::new(at(-120), at(-60)).unwrap());
  assert!(s.command_lines(before).await.unwrap().is_empty());
}

/// Records `session:tool` for each call, stopping after `limit` if set.
#[derive(Default)]
struct Recorder {
  seen:  Vec<String>,
  limit: Option<usize>,
}

impl ToolCallVisitor for Recorder {
  fn visit(&mut self, row: &ToolCallRow) -> ControlFlow<()> {
    self.seen.push(format!("{}:{}", row.session_id, row.tool_name));
    match self.limit {
      Some(limit) if self.seen.len() >= limit => ControlFlow::Break(()),
      _ => ControlFlow::Continue(()),
    }
  }
}

#[tokio::test]
async fn scan_visits_in_session_order_and_can_stop() {
  let s = store().await;
  s.ingest_batch(
    vec![
      bash("b", "c3", 0, "ls"),
      tool_call("a", "c2", 5, "Read", json!({ "file_path": "/x" })),
      tool_call("a", "c1", 1, "Grep", json!({ "pattern": "fn" })),
    ],
    ledger("a.jsonl"),
  )
  .await
  .unwrap();

  let all = s.scan_tool_calls(scope(), Recorder::default()).await.unwrap();
  assert_eq!(all.seen, ["a:Grep", "a:Read", "b:Bash"]);

  let first = s
    .scan_tool_calls(scope(), Recorder { limit: Some(1), ..Recorder::default() })
    .await
    .unwrap();
  assert_eq!(first.seen, ["a:Grep"]);
}

#[tokio::test]
async fn calls_sharing_a_timestamp_keep_log_order() {
  let s = store().await;
  // Two tool_use blocks of one message: ids sort opposite to log order.
  s.ingest_batch(
    vec![
      assistant("s1", "m1", 0, "two calls"),
      tool_call("s1", "m1:toolu_Z", 0, "Read", json!({ "file_path": "/x" })),
      tool_call("s1", "m1:toolu_A", 0, "Edit", json!({ "file_path": "/x" })),
    ],
    ledger("a.jsonl"),
  )
  .await
  .unwrap();

  let seen = s.scan_tool_calls(scope(), Recorder::default()).await.unwrap();
  assert_eq!(seen.seen, ["s1:Read", "s1:Edit"]);

  let miner = s.scan_tool_calls(scope(), SequenceMiner::new(2)).await.unwrap();
  let sequences = miner.finish(1);
  assert_eq!(sequences.len(), 1);
  assert_eq!(sequences[0].pattern, "Read → Edit");
}

#[tokio::test]
async fn failures_join_results_to_their_calls() {
  let s = store().await;
  s.ingest_batch(
    vec![
      bash("s1", "c1", 0, "npm test"),
      result("s1", "r1", 1, "c1", true, 10),
      tool_call("s1", "c2", 2, "Grep", json!({ "pattern": "TODO" })),
      result("s1", "r2", 3, "c2", true, 10),
      result("s1", "r3", 4, "missing", true, 10),
      result("s1", "r4", 5, "c1", false, 10),
    ],
    ledger("a.jsonl"),
  )
  .await
  .unwrap();

  let failed = s.failed_calls(scope()).await.unwrap();
  assert_eq!(failed.len(), 3);
  assert_eq!(failed[0].tool_name, "Bash");
  assert_eq!(failed[0].command.as_deref(), Some("npm"));
  assert_eq!(failed[1].pattern.as_deref(), Some("TODO"));
  assert_eq!(failed[2].tool_name, "unknown");
}

#[tokio::test]
async fn session_activity_counts_categories() {
  let s = store().await;
  s.ingest_batch(
    vec![
      tool_call("s1", "c1", 0, "Edit", json!({ "file_path": "/a.rs" })),
      tool_call("s1", "c2", 1, "Write", json!({ "file_path": "/b.rs" })),
      bash("s1", "c3", 2, "git commit -m x"),
      bash("s1", "c4", 3, "cargo build"),
      tool_call("s1", "c5", 4, "Read", json!({ "file_path": "/a.rs" })),
      tool_call("s1", "c6", 5, "Read", json!({ "file_path": "/a.rs" })),
      tool_call("s1", "c7", 6, "Glob", json!({ "pattern": "*.rs" })),
      result("s1", "r1", 7, "c4", true, 2048),
      Event::new("s1", "k1", at(8), EntryKind::Compaction, "-home-me-tally"),
    ],
    ledger("a.jsonl"),
  )
  .await
  .unwrap();

  let activity = s.session_activity(scope()).await.unwrap();
  assert_eq!(activity.len(), 1);
  let c = &activity[0];
  assert_eq!(c.tool_calls, 7);
  assert_eq!(c.errors, 1);
  assert_eq!(c.edits, 1);
  assert_eq!(c.writes, 1);
  assert_eq!(c.git, 1);
  assert_eq!(c.build, 1);
  assert_eq!(c.reads, 2);
  assert_eq!(c.searches, 1);
  assert_eq!(c.compactions, 1);
  assert_eq!(c.result_bytes, 2048);
  assert_eq!(c.files_read_multiple_times, 1);
  assert_eq!(c.first_seen, Some(at(0)));

  let edits = s.file_edits(scope()).await.unwrap();
  assert_eq!(edits.len(), 2);
}

#[tokio::test]
async fn period_totals_sum_the_window() {
  let s = store().await;
  s.ingest_batch(
    vec![
      assistant("s1", "m1", 0, "a"),
      bash("s1", "c1", 1, "ls"),
      result("s1", "r1", 2, "c1", true, 1),
      bash("s2", "c2", 3, "ls"),
    ],
    ledger("a.jsonl"),
  )
  .await
  .unwrap();

  let totals = s.period_totals(scope().window, None).await.unwrap();
  assert_eq!(totals.events, 4);
  assert_eq!(totals.sessions, 2);
  assert_eq!(totals.tool_calls, 2);
  assert_eq!(totals.errors, 1);
  assert_eq!(totals.input_tokens, 100);
  assert_eq!(totals.tools.get("Bash"), Some(&2));

  let empty = TimeWindow::new(at(-600), at(-500)).unwrap();
  let totals = s.period_totals(empty, None).await.unwrap();
  assert_eq!(totals.events, 0);
  assert_eq!(totals.errors, 0);
}

// ─── Sessions and messages ───────────────────────────────────────────────────

#[tokio::test]
async fn token_usage_groupings() {
  let s = store().await;
  let mut other = assistant("s2", "m3", 10, "c");
  other.model = None;
  s.ingest_batch(
    vec![assistant("s1", "m1", 0, "a"), assistant("s1", "m2", 5, "b"), other],
    ledger("a.jsonl"),
  )
  .await
  .unwrap();

  let by_day = s.token_usage(scope(), TokenGrouping::Day).await.unwrap();
  assert_eq!(by_day.len(), 1);
  assert_eq!(by_day[0].key, "2025-03-10");
  assert_eq!(by_day[0].messages, 3);
  assert_eq!(by_day[0].input_tokens, 300);

  let by_session = s.token_usage(scope(), TokenGrouping::Session).await.unwrap();
  assert_eq!(by_session[0].key, "s1");
  assert_eq!(by_session[0].output_tokens, 40);

  let by_model = s.token_usage(scope(), TokenGrouping::Model).await.unwrap();
  let keys: Vec<_> = by_model.iter().map(|r| r.key.as_str()).collect();
  assert_eq!(keys, ["model-a", "unknown"]);
}

fn search(text: &str) -> SearchQuery {
  SearchQuery { text: text.into(), window: scope().window, kind: None, project: None, limit: 20 }
}

#[tokio::test]
async fn full_text_search_finds_messages_and_commands() {
  let s = store().await;
  s.ingest_batch(
    vec![
      assistant("s1", "m1", 0, "the websocket reconnect logic is flaky"),
      assistant("s1", "m2", 1, "all green now"),
      bash("s1", "c1", 2, "cargo nextest run websocket"),
    ],
    ledger("a.jsonl"),
  )
  .await
  .unwrap();

  let hits = s.search_messages(search("websocket")).await.unwrap();
  assert_eq!(hits.len(), 2);
  assert!(hits.iter().any(|h| h.snippet.contains("[websocket]")));

  let only_assistant = SearchQuery { kind: Some(EntryKind::Assistant), ..search("websocket") };
  let hits = s.search_messages(only_assistant).await.unwrap();
  assert_eq!(hits.len(), 1);
  assert_eq!(hits[0].record_id, "m1");

  let hits = s.search_messages(search("\"reconnect logic\"")).await.unwrap();
  assert_eq!(hits.len(), 1);
  let hits = s.search_messages(search("recon*")).await.unwrap();
  assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn malformed_search_is_rejected() {
  let s = store().await;
  let err = s.search_messages(search("\"unbalanced")).await.unwrap_err();
  assert!(matches!(err, Error::InvalidSearch(_)), "{err:?}");
  let err = s.search_messages(search("   ")).await.unwrap_err();
  assert!(matches!(err, Error::InvalidSearch(_)));
}

#[tokio::test]
async fn compactions_and_large_results() {
  let s = store().await;
  let mut compaction = Event::new("s1", "k1", at(3), EntryKind::Compaction, "-home-me-tally");
  compaction.message_text = Some("x".repeat(500));
  s.ingest_batch(
    vec![
      tool_call("s1", "c1", 0, "Read", json!({ "file_path": "/big.log" })),
      result("s1", "r1", 1, "c1", false, 50_000),
      result("s1", "r2", 2, "c1", false, 20),
      compaction,
    ],
    ledger("a.jsonl"),
  )
  .await
  .unwrap();

  let rows = s.compactions(scope(), None).await.unwrap();
  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0].preview.as_ref().map(String::len), Some(200));
  assert!(s.compactions(scope(), Some("nope".into())).await.unwrap().is_empty());

  let large = s.large_results(scope(), 10 * 1024).await.unwrap();
  assert_eq!(large.len(), 1);
  assert_eq!(large[0].tool_name.as_deref(), Some("Read"));
  assert_eq!(large[0].detail.as_deref(), Some("/big.log"));
}

// ─── Pattern cache ───────────────────────────────────────────────────────────

fn pattern(kind: PatternKind, key: &str, count: i64) -> Pattern {
  Pattern {
    kind,
    key: key.into(),
    count,
    last_seen: Some(at(0)),
    metadata: json!({ "example": key }),
    computed_at: at(1),
  }
}

#[tokio::test]
async fn pattern_cache_is_replaced_wholesale() {
  let s = store().await;
  s.replace_patterns(vec![
    pattern(PatternKind::ToolSequence, "Read → Edit", 9),
    pattern(PatternKind::PermissionGap, "make", 4),
  ])
  .await
  .unwrap();
  let written = s
    .replace_patterns(vec![pattern(PatternKind::ToolSequence, "Grep → Read", 3)])
    .await
    .unwrap();
  assert_eq!(written, 1);

  let all = s.patterns(None, 10).await.unwrap();
  assert_eq!(all.len(), 1);
  assert_eq!(all[0].key, "Grep → Read");
  assert_eq!(all[0].metadata["example"], "Grep → Read");
  assert!(s.patterns(Some(PatternKind::PermissionGap), 10).await.unwrap().is_empty());
}

// ─── Git and bus ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn commits_link_to_sessions() {
  let s = store().await;
  s.ingest_batch(
    vec![assistant("s1", "m1", 0, "a"), assistant("s1", "m2", 30, "b")],
    ledger("a.jsonl"),
  )
  .await
  .unwrap();

  let commits = vec![
    GitCommit { sha: "aaa".into(), timestamp: at(10), message: "first".into(), project: "/home/me/tally".into() },
    GitCommit { sha: "bbb".into(), timestamp: at(20), message: "second".into(), project: "/home/me/tally".into() },
  ];
  assert_eq!(s.record_commits(commits.clone()).await.unwrap(), 2);
  assert_eq!(s.record_commits(commits).await.unwrap(), 0);
  assert_eq!(s.commits(scope().window).await.unwrap().len(), 2);

  let spans = s.session_spans(scope().window).await.unwrap();
  assert_eq!(spans.len(), 1);

  let links = vec![
    SessionCommit { session_id: "s1".into(), sha: "aaa".into(), time_to_commit_secs: 600 },
    SessionCommit { session_id: "s1".into(), sha: "bbb".into(), time_to_commit_secs: 1200 },
  ];
  assert_eq!(s.link_session_commits(links.clone()).await.unwrap(), 2);
  assert_eq!(s.link_session_commits(links).await.unwrap(), 0);

  let views = s.session_commits(scope(), Some("s1".into())).await.unwrap();
  assert_eq!(views.len(), 2);
  assert_eq!(views[0].sha, "bbb");
  assert!(!views[0].is_first_commit);
  assert!(views[1].is_first_commit);
}

fn bus_event(id: i64, minute: i64, event_type: &str) -> BusEvent {
  BusEvent {
    id,
    timestamp: at(minute),
    event_type: event_type.into(),
    channel: Some("repo:tally".into()),
    session_id: None,
    repo: Some("tally".into()),
    payload: None,
  }
}

#[tokio::test]
async fn bus_events_track_a_watermark() {
  let s = store().await;
  assert_eq!(s.bus_watermark().await.unwrap(), None);
  s.record_bus_events(vec![bus_event(1, 0, "session_start"), bus_event(7, 1, "task_done")])
    .await
    .unwrap();
  assert_eq!(s.record_bus_events(vec![bus_event(7, 1, "task_done")]).await.unwrap(), 0);
  assert_eq!(s.bus_watermark().await.unwrap(), Some(7));

  let done = s.bus_events(scope(), Some("task_done".into())).await.unwrap();
  assert_eq!(done.len(), 1);
  let all = s.bus_events(scope().with_project("tally"), None).await.unwrap();
  assert_eq!(all[0].id, 7);
}

#[tokio::test]
async fn bus_database_is_read_incrementally() {
  use tally_core::git::BusFeed;

  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("bus.db");
  {
    let conn = rusqlite::Connection::open(&path).unwrap();
    conn
      .execute_batch(
        "CREATE TABLE events (
           id INTEGER PRIMARY KEY, event_type TEXT NOT NULL, channel TEXT,
           session_id TEXT, timestamp TEXT NOT NULL, payload TEXT
         );
         INSERT INTO events VALUES (1, 'session_start', 'repo:tally', 's1', '2025-03-10T08:00:00', NULL);
         INSERT INTO events VALUES (2, 'task_done', 'global', 's1', '2025-03-10T09:30:00', '{}');
         INSERT INTO events VALUES (3, 'task_done', NULL, NULL, 'not a time', NULL);",
      )
      .unwrap();
  }

  let bus = crate::BusDatabase::open(&path).await.unwrap();
  let first = bus.events_after(None, at(0)).await.unwrap();
  assert_eq!(first.len(), 1);
  assert_eq!(first[0].id, 2);
  assert_eq!(first[0].repo, None);

  let all = bus.events_after(Some(0), at(0)).await.unwrap();
  assert_eq!(all.len(), 2);
  assert_eq!(all[0].repo.as_deref(), Some("tally"));
}
