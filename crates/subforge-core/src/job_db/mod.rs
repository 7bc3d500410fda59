//! Durable job database (SQLite via sqlx).
//!
//! Stores one row per job (status, timestamps, options, error, output) plus
//! its append-only log lines. Rows are written as whole-job snapshots inside
//! a transaction so a restart never observes a torn job.

pub mod types;
pub mod db;
mod jobs;

pub use types::*;
pub use db::*;
pub use jobs::{JobSnapshot, StatusSwap};
