//! Identifier types shared across the saga orchestration workspace.

mod types;

pub use types::{EventId, GlobalId};
