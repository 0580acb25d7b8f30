use std::sync::Arc;

use moodgraph_ai::LifecycleManager;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppContext {
    pub manager: Arc<LifecycleManager>,
}

impl AppContext {
    pub fn new(manager: LifecycleManager) -> Self {
        Self {
            manager: Arc::new(manager),
        }
    }
}
