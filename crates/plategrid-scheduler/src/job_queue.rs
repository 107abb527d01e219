//! FIFO job queue shared by producers and one async consumer.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

pub struct JobQueue<T> {
    items: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> Default for JobQueue<T> {
    fn default() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }
}

impl<T> JobQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: T) {
        self.lock().push_back(item);
        self.notify.notify_one();
    }

    pub fn try_pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Wait for the next item. Cancel-safe: dropping the future loses nothing.
    pub async fn pop(&self) -> T {
        loop {
            if let Some(item) = self.try_pop() {
                return item;
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Map every queued item, front to back, without removing any.
    pub fn snapshot<R>(&self, f: impl FnMut(&T) -> R) -> Vec<R> {
        self.lock().iter().map(f).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<T>> {
        self.items.lock().expect("job queue poisoned")
    }
}
