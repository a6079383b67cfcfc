//! Shared data model for the forkline conversation store.
//!
//! `models` holds the records the engine owns (sessions, messages, branches,
//! edit history) and the projections it returns. `api` holds request bodies
//! and the response envelope used at the HTTP boundary.

pub mod api;
pub mod diff;
pub mod models;
