//! Core data models for the library service.
//!
//! These entities map to database tables via `sqlx::FromRow` and serialize
//! as JSON via `serde`.

pub mod book;
pub mod bucket;
pub mod object;
pub mod user;
