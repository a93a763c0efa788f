//! Field photo triage
//!
//! Scores and categorizes batches of field-technician photos, reflects on the
//! batch against job-specific completeness rules, retakes weak images within
//! a bounded attempt budget and renders feedback. Progress of a run streams
//! as ordered events.

pub mod app_state;
pub mod config;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
