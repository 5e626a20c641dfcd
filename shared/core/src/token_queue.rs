use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// A blocking FIFO queue of opaque tokens used for the soft-barrier rendezvous: a push makes
/// exactly one pending (or future) pop unblock. The payload carries no information, so `()` is
/// the element type everywhere this is used.
pub struct TokenQueue {
    inner: Mutex<VecDeque<()>>,
    condvar: Condvar,
}

impl Default for TokenQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
        }
    }

    pub fn push(&self) {
        let mut queue = self.inner.lock().unwrap();
        queue.push_back(());
        self.condvar.notify_one();
    }

    /// Block until a token is available, then consume it.
    pub fn pop(&self) {
        let mut queue = self.inner.lock().unwrap();
        while queue.is_empty() {
            queue = self.condvar.wait(queue).unwrap();
        }
        queue.pop_front();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
