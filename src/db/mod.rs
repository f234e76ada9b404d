//! Database module: view models and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: write payloads and view models returned by repositories.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! Every create path is conflict tolerant: inserts lean on the unique keys
//! `(class_id, start_date)`, `(batch_id, scheduled_date, slot)` and
//! `(session_id, tier)` rather than on a prior existence check.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{
    ActiveBatch, InsertOutcome, NewBatch, NewSession, NotificationOutcome, SessionSetWrite,
    UpcomingSession,
};
