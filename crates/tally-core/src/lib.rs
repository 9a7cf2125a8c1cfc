//! Core types, the log-line parser and the analytic engines for tally.
//!
//! This crate is deliberately free of database and HTTP dependencies. The
//! storage backend implements [`store::AnalyticsStore`]; everything above it
//! (the ingestion engine, the API) is written against that trait.

// We intentionally use native `async fn` in traits.
#![allow(async_fn_in_trait)]

pub mod classify;
pub mod error;
pub mod event;
pub mod failures;
pub mod git;
pub mod parse;
pub mod pattern;
pub mod permissions;
pub mod report;
pub mod sequence;
pub mod session;
pub mod store;
pub mod tool;
pub mod trends;
pub mod window;

pub use error::{Error, Result};
