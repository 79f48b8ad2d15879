//! Data models for the content manager.
//!
//! Field names serialize in camelCase to match the document layout the web client reads.

mod asset;
mod project;
mod user;

pub use asset::*;
pub use project::*;
pub use user::*;
