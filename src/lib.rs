//! ModVerse counter service.
//!
//! Like, favorite and download counters are written to a shared counter store
//! as deltas and folded into Postgres by a periodic reconciliation job.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
