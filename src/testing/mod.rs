//! Test support: mock collaborators and fixtures.
//!
//! Public so downstream crates can test their own planners, executors,
//! and sinks against the engine.

mod fixtures;
mod mocks;

pub use fixtures::{queued_pipeline, seeded_store};
pub use mocks::ScriptedTaskExecutor;
