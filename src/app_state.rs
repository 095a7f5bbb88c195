use std::sync::Arc;

use crate::services::{queue::TaskQueue, resources::StaticResources};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<TaskQueue>,
    pub resources: Arc<StaticResources>,
}

impl AppState {
    pub fn new(queue: TaskQueue, resources: StaticResources) -> Self {
        Self {
            queue: Arc::new(queue),
            resources: Arc::new(resources),
        }
    }
}
