//! Read-only access to the cross-session notification bus database.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{OpenFlags, params};
use tally_core::{
  event::parse_timestamp,
  git::{BusEvent, BusFeed, repo_from_channel},
};
use tracing::{debug, warn};

use crate::{Error, Result};

/// Events pulled per request.
const PULL_LIMIT: i64 = 10_000;

struct RawBusEvent {
  id:         i64,
  event_type: String,
  channel:    Option<String>,
  session_id: Option<String>,
  timestamp:  String,
  payload:    Option<String>,
}

impl RawBusEvent {
  fn into_event(self) -> Option<BusEvent> {
    let Some(timestamp) = parse_timestamp(&self.timestamp) else {
      warn!(id = self.id, timestamp = %self.timestamp, "skipping bus event with bad timestamp");
      return None;
    };
    let repo = repo_from_channel(self.channel.as_deref()).map(str::to_owned);
    Some(BusEvent {
      id: self.id,
      timestamp,
      event_type: self.event_type,
      channel: self.channel,
      session_id: self.session_id,
      repo,
      payload: self.payload,
    })
  }
}

/// The bus database, opened read-only. Its `events` table is written by
/// other processes.
#[derive(Clone)]
pub struct BusDatabase {
  conn: tokio_rusqlite::Connection,
}

impl BusDatabase {
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_with_flags(
      path,
      OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI,
    )
    .await?;
    Ok(Self { conn })
  }

  /// Events with an id above `after`.
  pub async fn events_after_id(&self, after: i64) -> Result<Vec<BusEvent>> {
    let raw = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT id, event_type, channel, session_id, timestamp, payload FROM events
            WHERE id > ?1 ORDER BY id LIMIT ?2",
        )?;
        let rows = stmt
          .query_map(params![after, PULL_LIMIT], raw_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(decode(raw))
  }

  /// Events stamped at or after `since`. Bus timestamps are naive ISO 8601
  /// strings, compared as text.
  pub async fn events_since(&self, since: DateTime<Utc>) -> Result<Vec<BusEvent>> {
    let cutoff = since.format("%Y-%m-%dT%H:%M:%S").to_string();
    let raw = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT id, event_type, channel, session_id, timestamp, payload FROM events
            WHERE timestamp >= ?1 ORDER BY id LIMIT ?2",
        )?;
        let rows = stmt
          .query_map(params![cutoff, PULL_LIMIT], raw_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(decode(raw))
  }
}

fn raw_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<RawBusEvent> {
  Ok(RawBusEvent {
    id:         r.get(0)?,
    event_type: r.get(1)?,
    channel:    r.get(2)?,
    session_id: r.get(3)?,
    timestamp:  r.get(4)?,
    payload:    r.get(5)?,
  })
}

fn decode(raw: Vec<RawBusEvent>) -> Vec<BusEvent> {
  let events: Vec<BusEvent> = raw.into_iter().filter_map(RawBusEvent::into_event).collect();
  debug!(count = events.len(), "read bus events");
  events
}

impl BusFeed for BusDatabase {
  type Error = Error;

  async fn events_after(&self, watermark: Option<i64>, since: DateTime<Utc>) -> Result<Vec<BusEvent>> {
    match watermark {
      Some(id) => self.events_after_id(id).await,
      None => self.events_since(since).await,
    }
  }
}
