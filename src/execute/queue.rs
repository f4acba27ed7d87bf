use std::collections::VecDeque;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::Notify;

/// FIFO queue of task ids. Pulling suspends while the queue is empty.
#[derive(Debug, Default)]
pub struct TaskQueue {
    items: RwLock<VecDeque<String>>,
    notify: Notify,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, VecDeque<String>> {
        self.items.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, VecDeque<String>> {
        self.items.write().unwrap_or_else(|p| p.into_inner())
    }

    pub fn push(&self, id: impl Into<String>) {
        self.write().push_back(id.into());
        self.notify.notify_one();
    }

    pub fn try_pull(&self) -> Option<String> {
        self.write().pop_front()
    }

    /// Waits for the next id. Cancel safe: an id is only taken when the
    /// future completes.
    pub async fn pull(&self) -> String {
        loop {
            let notified = self.notify.notified();
            if let Some(id) = self.try_pull() {
                return id;
            }
            notified.await;
        }
    }

    /// Takes every queued id, oldest first.
    pub fn drain(&self) -> Vec<String> {
        self.write().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
