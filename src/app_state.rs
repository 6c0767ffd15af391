use std::sync::Arc;

use crate::services::job_store::JobStore;
use crate::services::storage::StorageBackend;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<JobStore>,
    pub storage: Arc<StorageBackend>,
}

impl AppState {
    pub fn new(jobs: Arc<JobStore>, storage: Arc<StorageBackend>) -> Self {
        Self { jobs, storage }
    }
}
