//! SQLite backend for the tally analytics store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on dedicated threads
//! without blocking the async runtime. Writes go through one connection;
//! reads are spread over a small pool of read-only connections.

mod encode;
mod migrations;
mod queries;
mod store;

pub mod bus;
pub mod error;

pub use bus::BusDatabase;
pub use error::{Error, Result};
pub use migrations::latest_version;
pub use store::{ConnectionConfig, SqliteStore};

#[cfg(test)]
mod tests;
