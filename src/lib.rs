//! Capture timeline: ingest network capture files into an event log and
//! serve per-address timelines over it.

pub mod api;
pub mod capture;
pub mod pipeline;
pub mod sqlite_pragma;
