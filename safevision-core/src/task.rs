//! Ownership of spawned background tasks.
//!
//! A [`TaskGroup`] holds the `JoinHandle` of every task it spawns and aborts
//! all of them when it is dropped, so a stopped service never leaves reader,
//! writer or request tasks running behind it.

use std::future::Future;

use tokio::task::JoinHandle;
use tracing::trace;

#[derive(Debug, Default)]
pub struct TaskGroup {
    name: &'static str,
    tasks: Vec<JoinHandle<()>>,
}

impl TaskGroup {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            tasks: Vec::new(),
        }
    }

    /// Spawn `fut` on the runtime and track it.
    pub fn spawn<F>(&mut self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.reap();
        self.tasks.push(tokio::spawn(fut));
    }

    /// Forget handles of tasks that already finished.
    pub fn reap(&mut self) {
        self.tasks.retain(|handle| !handle.is_finished());
    }

    /// Number of tracked tasks that have not finished yet.
    pub fn len(&mut self) -> usize {
        self.reap();
        self.tasks.len()
    }

    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }

    pub fn abort_all(&mut self) {
        if !self.tasks.is_empty() {
            trace!(group = self.name, count = self.tasks.len(), "aborting tasks");
        }
        for handle in self.tasks.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for TaskGroup {
    fn drop(&mut self) {
        self.abort_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn finished_tasks_are_reaped() {
        let mut group = TaskGroup::new("test");
        group.spawn(async {});
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(group.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn drop_aborts_running_tasks() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();

        let mut group = TaskGroup::new("test");
        group.spawn(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            flag.store(true, Ordering::SeqCst);
        });
        assert_eq!(group.len(), 1);
        drop(group);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }
}
