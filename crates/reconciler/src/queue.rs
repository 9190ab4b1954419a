//! Deduplicating work queue.
//!
//! A key is handed to at most one worker at a time. Adding a key that is
//! already queued is a no-op; adding a key that is being processed marks it
//! dirty, and it is queued again once the worker calls [`WorkQueue::done`].
//!
//! Delayed adds keep one deadline per key, the earliest requested. A single
//! timer task moves keys into the queue as their deadlines pass.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

struct QueueState<K> {
    queue: VecDeque<K>,
    queued: HashSet<K>,
    active: HashSet<K>,
    dirty: HashSet<K>,
    waiting: HashMap<K, Instant>,
    timer_running: bool,
    shutdown: bool,
}

impl<K> Default for QueueState<K> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            queued: HashSet::new(),
            active: HashSet::new(),
            dirty: HashSet::new(),
            waiting: HashMap::new(),
            timer_running: false,
            shutdown: false,
        }
    }
}

impl<K: Clone + Eq + Hash> QueueState<K> {
    /// Returns true if the key became ready for a worker.
    fn push(&mut self, key: K) -> bool {
        if self.active.contains(&key) {
            self.dirty.insert(key);
            return false;
        }
        if self.queued.insert(key.clone()) {
            self.queue.push_back(key);
            return true;
        }
        false
    }
}

/// Work queue with per-key deduplication.
pub struct WorkQueue<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
    timer: Notify,
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            timer: Notify::new(),
        }
    }

    /// Queue a key.
    pub fn add(&self, key: K) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if state.shutdown {
            return;
        }
        if state.push(key) {
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Queue a key after a delay.
    ///
    /// A key already waiting keeps whichever deadline comes first.
    pub fn add_after(self: &Arc<Self>, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let Some(deadline) = Instant::now().checked_add(delay) else {
            return;
        };
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if state.shutdown {
            return;
        }
        match state.waiting.entry(key) {
            Entry::Occupied(mut pending) => {
                if deadline >= *pending.get() {
                    return;
                }
                pending.insert(deadline);
            }
            Entry::Vacant(slot) => {
                slot.insert(deadline);
            }
        }
        let start_timer = !std::mem::replace(&mut state.timer_running, true);
        drop(state);

        if start_timer {
            tokio::spawn(Arc::clone(self).drive_delays());
        }
        self.timer.notify_one();
    }

    async fn drive_delays(self: Arc<Self>) {
        loop {
            let woken = self.timer.notified();
            tokio::pin!(woken);
            woken.as_mut().enable();

            let (ready, next_deadline) = {
                let Ok(mut state) = self.state.lock() else {
                    return;
                };
                if state.shutdown {
                    return;
                }
                let now = Instant::now();
                let due: Vec<K> = state
                    .waiting
                    .iter()
                    .filter(|(_, deadline)| **deadline <= now)
                    .map(|(key, _)| key.clone())
                    .collect();
                let mut ready = 0usize;
                for key in due {
                    state.waiting.remove(&key);
                    if state.push(key) {
                        ready = ready.saturating_add(1);
                    }
                }
                (ready, state.waiting.values().min().copied())
            };

            for _ in 0..ready {
                self.notify.notify_one();
            }

            match next_deadline {
                Some(deadline) => {
                    tokio::select! {
                        () = tokio::time::sleep_until(deadline) => {}
                        () = woken.as_mut() => {}
                    }
                }
                None => woken.await,
            }
        }
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn next(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent add cannot be missed.
            notified.as_mut().enable();

            {
                let Ok(mut state) = self.state.lock() else {
                    return None;
                };
                if state.shutdown {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.queued.remove(&key);
                    state.active.insert(key.clone());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Mark a key as finished. A key re-added while active is queued again.
    pub fn done(&self, key: &K) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.active.remove(key);
        if state.dirty.remove(key) && !state.shutdown && state.push(key.clone()) {
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stop handing out keys and wake every waiter.
    pub fn shutdown(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.shutdown = true;
            state.waiting.clear();
        }
        self.notify.notify_waiters();
        self.timer.notify_one();
    }

    /// Whether `shutdown` was called.
    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().map(|state| state.shutdown).unwrap_or(true)
    }

    /// Number of keys waiting.
    pub fn len(&self) -> usize {
        self.state.lock().map(|state| state.queue.len()).unwrap_or(0)
    }

    /// Number of keys with a pending delayed add.
    pub fn delayed_len(&self) -> usize {
        self.state.lock().map(|state| state.waiting.len()).unwrap_or(0)
    }

    /// Whether no keys are waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a key is being processed.
    pub fn is_active(&self, key: &K) -> bool {
        self.state
            .lock()
            .map(|state| state.active.contains(key))
            .unwrap_or(false)
    }
}

impl<K> Default for WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dedupes_queued_keys() {
        let queue = WorkQueue::new();
        queue.add("a");
        queue.add("a");
        queue.add("b");
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.next().await, Some("a"));
        assert_eq!(queue.next().await, Some("b"));
    }

    #[tokio::test]
    async fn test_active_key_is_not_handed_out_twice() {
        let queue = WorkQueue::new();
        queue.add("a");
        assert_eq!(queue.next().await, Some("a"));

        queue.add("a");
        assert!(queue.is_empty());
        assert!(queue.is_active(&"a"));

        queue.done(&"a");
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next().await, Some("a"));
    }

    #[tokio::test]
    async fn test_done_without_readd_does_not_requeue() {
        let queue = WorkQueue::new();
        queue.add(1);
        assert_eq!(queue.next().await, Some(1));
        queue.done(&1);
        assert!(queue.is_empty());
        assert!(!queue.is_active(&1));
    }

    #[tokio::test]
    async fn test_shutdown_wakes_waiters() {
        let queue: Arc<WorkQueue<u32>> = Arc::new(WorkQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next().await })
        };
        tokio::task::yield_now().await;
        queue.shutdown();
        assert!(matches!(waiter.await, Ok(None)));

        queue.add(1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_waiter_receives_later_add() {
        let queue: Arc<WorkQueue<u32>> = Arc::new(WorkQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next().await })
        };
        tokio::task::yield_now().await;
        queue.add(7);
        assert!(matches!(waiter.await, Ok(Some(7))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_after_delays() {
        let queue: Arc<WorkQueue<u32>> = Arc::new(WorkQueue::new());
        queue.add_after(3, Duration::from_secs(10));
        tokio::task::yield_now().await;
        assert!(queue.is_empty());

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_add_after_keeps_earliest_deadline() {
        let queue: Arc<WorkQueue<u32>> = Arc::new(WorkQueue::new());
        for _ in 0..5 {
            queue.add_after(3, Duration::from_secs(10));
        }
        queue.add_after(3, Duration::from_secs(5));
        queue.add_after(3, Duration::from_secs(20));
        assert_eq!(queue.delayed_len(), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.delayed_len(), 0);
        assert_eq!(queue.next().await, Some(3));
        queue.done(&3);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_keys_fire_in_deadline_order() {
        let queue: Arc<WorkQueue<u32>> = Arc::new(WorkQueue::new());
        queue.add_after(1, Duration::from_secs(30));
        queue.add_after(2, Duration::from_secs(10));
        queue.add_after(3, Duration::from_secs(20));

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.delayed_len(), 2);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.next().await, Some(2));
        assert_eq!(queue.next().await, Some(3));
        assert_eq!(queue.next().await, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drops_pending_delays() {
        let queue: Arc<WorkQueue<u32>> = Arc::new(WorkQueue::new());
        queue.add_after(1, Duration::from_secs(10));
        queue.shutdown();
        assert_eq!(queue.delayed_len(), 0);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(queue.is_empty());
        queue.add_after(2, Duration::from_secs(1));
        assert_eq!(queue.delayed_len(), 0);
    }
}
