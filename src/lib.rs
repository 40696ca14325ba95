//! focuslog: a personal productivity tracker.
//!
//! Projects own tasks, tasks carry tags and focus sessions, and everything
//! a user owns is scoped to that user. The managers in this crate wrap a
//! SQLite pool and expose the full lifecycle: CRUD for each entity plus
//! aggregated statistics.

pub mod cli;
pub mod db;
pub mod error;
pub mod logging;
pub mod pagination;
pub mod projects;
pub mod sessions;
pub mod stats;
pub mod store;
pub mod tags;
pub mod tasks;
pub mod time_utils;
pub mod users;

#[cfg(test)]
pub mod test_utils;
