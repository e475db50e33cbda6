//! Task lifecycle: one cancellation token shared by every task, and a
//! join-all barrier on shutdown.

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Named tasks sharing one cancellation token
#[derive(Debug, Default)]
pub struct TaskGroup {
    cancel: CancellationToken,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl TaskGroup {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            tasks: Vec::new(),
        }
    }

    /// Token handed to every task of the group
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn a task whose future is built from the group's token
    pub fn spawn<F, Fut>(&mut self, name: impl Into<String>, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        debug!(task = %name, "Spawning task");
        let handle = tokio::spawn(task(self.cancel.clone()));
        self.tasks.push((name, handle));
    }

    /// Track a task spawned elsewhere
    pub fn adopt(&mut self, name: impl Into<String>, handle: JoinHandle<()>) {
        self.tasks.push((name.into(), handle));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Cancel every task, then wait for all of them in spawn order.
    ///
    /// Returns the names of tasks that panicked.
    pub async fn shutdown(self) -> Vec<String> {
        self.cancel.cancel();
        info!(tasks = self.tasks.len(), "Waiting for tasks to stop");

        let mut panicked = Vec::new();
        for (name, handle) in self.tasks {
            match handle.await {
                Ok(()) => debug!(task = %name, "Task stopped"),
                Err(e) => {
                    error!(task = %name, error = ?e, "Task panicked");
                    panicked.push(name);
                }
            }
        }
        panicked
    }
}
