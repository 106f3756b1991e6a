//! API data models
//!
//! `claude` holds the client-facing dialect, `openai` the backend dialect.

pub mod claude;
pub mod openai;
