//! Closable FIFO used to hand items from one thread to another.
//!
//! A producer pushes without ever blocking; the consumer blocks in `pop`
//! until an item arrives or the queue is closed. Closing is how the
//! producer signals end-of-stream: remaining items are still drained,
//! after which `pop` reports that no more data will come.

use std::collections::VecDeque;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Returned by [`HandoffQueue::push`] when the queue is already closed.
///
/// Carries the rejected item back to the caller.
#[derive(Debug, PartialEq, Eq)]
pub struct Closed<T>(pub T);

impl<T> std::fmt::Display for Closed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "queue is closed")
    }
}

impl<T: std::fmt::Debug> std::error::Error for Closed<T> {}

/// Result of a timed pop.
#[derive(Debug, PartialEq, Eq)]
pub enum Popped<T> {
    Item(T),
    TimedOut,
    Closed,
}

#[derive(Debug)]
struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Single-producer/single-consumer handoff queue. Unbounded unless fed
/// through [`push_bounded`](Self::push_bounded).
#[derive(Debug)]
pub struct HandoffQueue<T> {
    state: Mutex<State<T>>,
    ready: Condvar,
}

impl<T> Default for HandoffQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandoffQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock()
    }

    /// Appends an item. Never blocks.
    pub fn push(&self, item: T) -> Result<(), Closed<T>> {
        let mut state = self.lock();
        if state.closed {
            return Err(Closed(item));
        }
        state.items.push_back(item);
        drop(state);
        self.ready.notify_one();
        Ok(())
    }

    /// Appends an item, evicting the oldest one when `capacity` items are
    /// already waiting. Never blocks. Returns the evicted item, if any.
    pub fn push_bounded(&self, item: T, capacity: usize) -> Result<Option<T>, Closed<T>> {
        let mut state = self.lock();
        if state.closed {
            return Err(Closed(item));
        }
        let evicted = if state.items.len() >= capacity.max(1) {
            state.items.pop_front()
        } else {
            None
        };
        state.items.push_back(item);
        drop(state);
        self.ready.notify_one();
        Ok(evicted)
    }

    /// Blocks until an item is available. Returns `None` once the queue is
    /// closed and fully drained.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            self.ready.wait(&mut state);
        }
    }

    /// Like [`pop`](Self::pop), but gives up after `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Popped<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Popped::Item(item);
            }
            if state.closed {
                return Popped::Closed;
            }
            if Instant::now() >= deadline {
                return Popped::TimedOut;
            }
            self.ready.wait_until(&mut state, deadline);
        }
    }

    /// Rejects further pushes and wakes every blocked consumer. Idempotent.
    pub fn close(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        drop(state);
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
