//! Process-wide (but injected, not global) mapping from job id to `Job`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::core::job::Job;

/// Concurrent `id -> Job` map. Jobs are inserted once and never
/// evicted; the store owns them for the remaining lifetime of the
/// process.
#[derive(Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<String, Arc<Job>>>,
}

impl JobStore {
    pub fn new() -> Self {
        JobStore {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new job under its id. Panics if the id already
    /// exists — ids are globally unique, so a collision indicates a
    /// generator bug, not a recoverable condition.
    pub fn add(&self, job: Arc<Job>) {
        let mut jobs = self.jobs.write().expect("job store lock poisoned");
        let id = job.id().to_string();
        if jobs.insert(id.clone(), job).is_some() {
            panic!("job id collision: {id}");
        }
    }

    /// Look up a job by id.
    pub fn get(&self, id: &str) -> Option<Arc<Job>> {
        let jobs = self.jobs.read().expect("job store lock poisoned");
        jobs.get(id).cloned()
    }

    /// All currently stored jobs, for shutdown draining.
    pub fn all(&self) -> Vec<Arc<Job>> {
        let jobs = self.jobs.read().expect("job store lock poisoned");
        jobs.values().cloned().collect()
    }
}
