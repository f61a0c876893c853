//! Shared fixtures for reconciler tests.

use crate::core::{Pipeline, TaskSpec};
use crate::store::InMemoryStore;
use std::sync::Arc;

/// Builds a queued pipeline from task `(name, deps)` pairs.
#[must_use]
pub fn queued_pipeline(id: u64, tasks: &[(&str, &[&str])]) -> Pipeline {
    let specs = tasks
        .iter()
        .map(|(name, deps)| {
            let mut spec = TaskSpec::new(*name);
            for dep in *deps {
                spec = spec.with_dep(*dep);
            }
            spec
        })
        .collect();
    Pipeline::new(id, format!("pipeline-{id}"), specs)
}

/// Creates an in-memory store seeded with the pipeline.
#[must_use]
pub fn seeded_store(pipeline: &Pipeline) -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    store.insert_pipeline(pipeline.clone());
    store
}
