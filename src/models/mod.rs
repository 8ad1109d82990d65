//! Core data models for the video upload service.
//!
//! Records map to SQLite tables via `sqlx::FromRow` and serialize as JSON
//! via `serde`.

pub mod upload;
pub mod video;
