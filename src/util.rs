//! Small shared utilities: a blocking circular string buffer, a string list
//! with end operations, and random string generation.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};
use rand::Rng;

/// Maximum priority, used by `visit` to put seeds ahead of followed links.
pub const MAX_PRIORITY: i32 = i32::MAX;

struct RingState {
    data: VecDeque<String>,
    max_size: usize,
}

/// A blocking FIFO string buffer backed by a ring that doubles its capacity
/// on demand, up to a maximum size. `dequeue` blocks until a value arrives.
pub struct CircularBuffer {
    state: Mutex<RingState>,
    available: Condvar,
}

impl CircularBuffer {
    pub fn new(capacity: usize, max_size: usize) -> CircularBuffer {
        CircularBuffer {
            state: Mutex::new(RingState {
                data: VecDeque::with_capacity(capacity.max(1)),
                max_size,
            }),
            available: Condvar::new(),
        }
    }

    /// Appends a value. Fails when the buffer holds `max_size` values.
    pub fn enqueue(&self, value: impl Into<String>) -> Result<(), BufferFull> {
        let mut state = self.state.lock();
        if state.data.len() >= state.max_size {
            return Err(BufferFull {
                max_size: state.max_size,
            });
        }
        if state.data.len() == state.data.capacity() {
            let grown = (state.data.capacity() * 2).min(state.max_size);
            let len = state.data.len();
            state.data.reserve_exact(grown - len);
        }
        state.data.push_back(value.into());
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    /// Removes and returns the oldest value, blocking until one is present.
    pub fn dequeue(&self) -> String {
        let mut state = self.state.lock();
        loop {
            if let Some(value) = state.data.pop_front() {
                return value;
            }
            self.available.wait(&mut state);
        }
    }

    /// Removes the oldest value if one is present, without blocking.
    pub fn try_dequeue(&self) -> Option<String> {
        self.state.lock().data.pop_front()
    }

    pub fn count(&self) -> usize {
        self.state.lock().data.len()
    }
}

/// The buffer reached its maximum size.
#[derive(Debug, thiserror::Error)]
#[error("circular buffer has reached maximum size of {max_size}")]
pub struct BufferFull {
    pub max_size: usize,
}

/// A lock-protected string list with push/pop at the tail.
#[derive(Default)]
pub struct StringList {
    items: Mutex<VecDeque<String>>,
}

impl StringList {
    pub fn new() -> StringList {
        StringList::default()
    }

    /// Appends a value at the end.
    pub fn add(&self, value: impl Into<String>) {
        self.items.lock().push_back(value.into());
    }

    /// Removes and returns the last value.
    pub fn pop(&self) -> Option<String> {
        self.items.lock().pop_back()
    }

    pub fn count(&self) -> usize {
        self.items.lock().len()
    }
}

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// A random ASCII-letter string of the given length.
pub fn random_string(n: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..n)
        .map(|_| LETTERS[rng.gen_range(0..LETTERS.len())] as char)
        .collect()
}
