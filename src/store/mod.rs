//! In-memory state store for serverwatch.
//!
//! Holds the target registry, the bounded per-target histories and the
//! in-flight flags behind a single lock.

mod models;
mod registry;

pub use models::*;
pub use registry::*;
