//! Bounded single-producer / multi-consumer dispatch queue.
//!
//! The producer never blocks: when the queue is full the oldest item is
//! evicted.  Closing (explicitly, or by dropping the writer) lets readers
//! drain what is left and then observe end-of-stream.  Readers only get
//! FIFO-with-eviction, not delivery guarantees.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::errors::{ClipReplayError, Result};

struct State<T> {
    items: VecDeque<T>,
    capacity: usize,
    closed: bool,
    evicted: u64,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    ready: Condvar,
}

/// Write side.  Not `Clone`: there is exactly one producer.
pub struct QueueWriter<T> {
    shared: Arc<Shared<T>>,
}

/// Read side.  Clone it to add consumers; each item goes to one reader.
pub struct QueueReader<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for QueueReader<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Outcome of a timed receive.
#[derive(Debug, PartialEq, Eq)]
pub enum Recv<T> {
    Item(T),
    Timeout,
    Closed,
}

/// Create a queue holding at most `capacity` items (minimum 1).
pub fn bounded<T>(capacity: usize) -> (QueueWriter<T>, QueueReader<T>) {
    let capacity = capacity.max(1);
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            items: VecDeque::with_capacity(capacity),
            capacity,
            closed: false,
            evicted: 0,
        }),
        ready: Condvar::new(),
    });
    (
        QueueWriter {
            shared: Arc::clone(&shared),
        },
        QueueReader { shared },
    )
}

impl<T> QueueWriter<T> {
    /// Append an item, evicting the oldest one when full.
    ///
    /// Returns the evicted item, if any.  Fails fast once closed.
    pub fn push(&self, item: T) -> Result<Option<T>> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(ClipReplayError::QueueClosed);
        }
        let evicted = if state.items.len() >= state.capacity {
            state.evicted += 1;
            state.items.pop_front()
        } else {
            None
        };
        state.items.push_back(item);
        drop(state);
        self.shared.ready.notify_one();
        Ok(evicted)
    }

    /// Mark end-of-stream.  Readers drain remaining items first.
    pub fn close(&self) {
        self.shared.state.lock().closed = true;
        self.shared.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }
}

impl<T> Drop for QueueWriter<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T> QueueReader<T> {
    /// Block until an item arrives; `None` once closed and drained.
    pub fn recv(&self) -> Option<T> {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            self.shared.ready.wait(&mut state);
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Recv<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Recv::Item(item);
            }
            if state.closed {
                return Recv::Closed;
            }
            if self
                .shared
                .ready
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return match state.items.pop_front() {
                    Some(item) => Recv::Item(item),
                    None if state.closed => Recv::Closed,
                    None => Recv::Timeout,
                };
            }
        }
    }

    pub fn try_recv(&self) -> Option<T> {
        self.shared.state.lock().items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Items dropped to make room since the queue was created.
    pub fn evicted_count(&self) -> u64 {
        self.shared.state.lock().evicted
    }

    /// Feed every item into `sink` until end-of-stream.
    ///
    /// Sink failures are logged and the item is dropped.  Returns the
    /// number of items the sink accepted.
    pub fn pump(&self, sink: &mut dyn PersistenceSink<T>) -> usize {
        let mut accepted = 0;
        while let Some(item) = self.recv() {
            match sink.accept(item) {
                Ok(()) => accepted += 1,
                Err(e) => log::warn!("queue: sink rejected item: {e}"),
            }
        }
        accepted
    }
}

impl<T> Iterator for QueueReader<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.recv()
    }
}

/// Downstream store for dispatched items (history database, etc.).
pub trait PersistenceSink<T> {
    fn accept(&mut self, item: T) -> Result<()>;
}

impl<T> PersistenceSink<T> for Vec<T> {
    fn accept(&mut self, item: T) -> Result<()> {
        self.push(item);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
