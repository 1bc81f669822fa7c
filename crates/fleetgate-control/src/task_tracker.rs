//! Tracking of the scheduler's background loops
//!
//! Each loop is registered under a name so that shutdown can wait for every
//! one of them to finish its current cycle.

use std::collections::HashMap;
use std::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::warn;

/// Named background tasks
pub struct TaskTracker {
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Register a task; an older task under the same name is aborted
    pub fn register(&self, name: impl Into<String>, handle: JoinHandle<()>) {
        if let Ok(mut tasks) = self.tasks.lock() {
            if let Some(old_handle) = tasks.insert(name.into(), handle) {
                old_handle.abort();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().map(|tasks| tasks.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for every registered task to return
    ///
    /// Tasks are expected to have been told to stop already.
    pub async fn drain(&self) {
        let handles: Vec<(String, JoinHandle<()>)> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain().collect(),
            Err(_) => return,
        };

        for (name, handle) in handles {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!("Background task {} ended abnormally: {}", name, e);
                }
            }
        }
    }
}

impl Default for TaskTracker {
    fn default() -> Self {
        Self::new()
    }
}
