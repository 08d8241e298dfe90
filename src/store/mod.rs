//! Durable state: jobs, subtasks, and artifacts in a single SQLite file.
//!
//! The store is the only component that touches the database. Stages write
//! through it, the dashboard reads through it, and write failures never
//! propagate: the engine's forward progress does not depend on storage.

pub mod db;
pub mod state;

pub use db::Db;
pub use state::{DashboardData, JobSeed, JobView, StateStore};
