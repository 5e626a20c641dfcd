use std::sync::{Arc, Condvar, Mutex};

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BarrierError {
    #[error("barrier was cancelled while a worker was waiting")]
    Cancelled,
}

/// A rendezvous point for exactly `arity` participants, reusable across rounds: every rank calls
/// [`Barrier::wait`] once per round and the call only returns once all `arity` ranks have
/// arrived. Unlike `std::sync::Barrier`, this one can be [`Barrier::cancel`]led from any thread
/// to unblock every other waiter with an error instead of hanging forever — needed because a
/// worker thread here can legitimately fail mid-collective and we have no process-abort escape
/// hatch to fall back on.
pub trait Barrier: Send + Sync {
    /// Block until `arity` calls to `wait` have been made for the current generation. Returns
    /// `true` for exactly one caller per generation — the one whose arrival completed it — so
    /// that caller can run once-per-round leader work before the others proceed.
    fn wait(&self) -> Result<bool, BarrierError>;

    /// Reset the barrier to its initial generation. Only meaningful between rounds, after every
    /// participant has returned from `wait`.
    fn reset(&self);

    /// Unblock every current and future waiter with [`BarrierError::Cancelled`].
    fn cancel(&self);
}

struct State {
    arity: usize,
    waiting: usize,
    generation: u64,
    cancelled: bool,
}

pub struct CyclicBarrier {
    state: Mutex<State>,
    condvar: Condvar,
}

impl CyclicBarrier {
    pub fn new(arity: usize) -> Arc<Self> {
        assert!(arity > 0, "barrier arity must be at least 1");
        Arc::new(Self {
            state: Mutex::new(State {
                arity,
                waiting: 0,
                generation: 0,
                cancelled: false,
            }),
            condvar: Condvar::new(),
        })
    }
}

impl Barrier for CyclicBarrier {
    fn wait(&self) -> Result<bool, BarrierError> {
        let mut state = self.state.lock().unwrap();
        if state.cancelled {
            return Err(BarrierError::Cancelled);
        }
        let generation = state.generation;
        state.waiting += 1;

        if state.waiting == state.arity {
            state.generation = state.generation.wrapping_add(1);
            state.waiting = 0;
            self.condvar.notify_all();
            return Ok(true);
        }

        while !state.cancelled && state.generation == generation {
            state = self.condvar.wait(state).unwrap();
        }

        if state.cancelled {
            return Err(BarrierError::Cancelled);
        }
        Ok(false)
    }

    fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.waiting = 0;
        state.cancelled = false;
        self.condvar.notify_all();
    }

    fn cancel(&self) {
        let mut state = self.state.lock().unwrap();
        state.cancelled = true;
        self.condvar.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn releases_all_waiters_once_arity_reached() {
        let barrier = CyclicBarrier::new(3);
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let barrier = barrier.clone();
                thread::spawn(move || barrier.wait())
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap().is_ok());
        }
    }

    #[test]
    fn single_participant_never_blocks() {
        let barrier = CyclicBarrier::new(1);
        assert!(barrier.wait().is_ok());
        assert!(barrier.wait().is_ok());
    }

    #[test]
    fn exactly_one_waiter_is_leader_per_round() {
        let barrier = CyclicBarrier::new(4);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let barrier = barrier.clone();
                thread::spawn(move || barrier.wait().unwrap())
            })
            .collect();
        let leaders: usize = handles.into_iter().map(|h| h.join().unwrap() as usize).sum();
        assert_eq!(leaders, 1);
    }

    #[test]
    fn cancel_unblocks_waiters_with_error() {
        let barrier = CyclicBarrier::new(2);
        let waiter = {
            let barrier = barrier.clone();
            thread::spawn(move || barrier.wait())
        };
        // give the waiter a moment to actually be parked
        thread::yield_now();
        barrier.cancel();
        assert_eq!(waiter.join().unwrap(), Err(BarrierError::Cancelled));
        assert_eq!(barrier.wait(), Err(BarrierError::Cancelled));
    }

    #[test]
    fn reset_allows_reuse_after_cancel() {
        let barrier = CyclicBarrier::new(1);
        barrier.cancel();
        assert_eq!(barrier.wait(), Err(BarrierError::Cancelled));
        barrier.reset();
        assert!(barrier.wait().is_ok());
    }
}
