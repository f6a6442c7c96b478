//! Bounded ring buffer of raw acquisition payloads, handed from the USB
//! producer to the decoding consumer.
//!
//! Each pushed buffer is tagged with a monotonic host timestamp captured
//! before the lock is acquired, so the timestamp reflects arrival order even
//! under contention.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// What [`Fifo::pop`] reports about the slot it returned, mirroring the
/// original `pop_result`'s used/capacity/ok triple.
#[derive(Debug, Clone, Copy)]
pub struct PopResult {
    pub used: usize,
    pub capacity: usize,
    pub ok: bool,
}

struct State {
    buffers: VecDeque<Vec<u8>>,
    dropped: u64,
    closed: bool,
}

/// A fixed-capacity FIFO of `(system timestamp nanos, payload)` buffers.
///
/// `drop_threshold == 0` means unbounded: [`Fifo::push`] never refuses a
/// buffer regardless of how many are already queued.
pub struct Fifo {
    capacity: usize,
    drop_threshold: AtomicU64,
    state: Mutex<State>,
    not_empty: Condvar,
    on_drop: Option<Box<dyn Fn(u64) + Send + Sync>>,
}

impl Fifo {
    pub fn new(capacity: usize, drop_threshold: u64) -> Self {
        Fifo::with_drop_handler(capacity, drop_threshold, None)
    }

    pub fn with_drop_handler(
        capacity: usize,
        drop_threshold: u64,
        on_drop: Option<Box<dyn Fn(u64) + Send + Sync>>,
    ) -> Self {
        Fifo {
            capacity,
            drop_threshold: AtomicU64::new(drop_threshold),
            state: Mutex::new(State { buffers: VecDeque::with_capacity(capacity), dropped: 0, closed: false }),
            not_empty: Condvar::new(),
            on_drop,
        }
    }

    /// Changes the drop threshold from any thread; takes effect on the next
    /// push. `0` disables dropping.
    pub fn set_drop_threshold(&self, threshold: u64) {
        self.drop_threshold.store(threshold, Ordering::SeqCst);
    }

    pub fn drop_threshold(&self) -> u64 {
        self.drop_threshold.load(Ordering::SeqCst)
    }

    fn system_timestamp_now() -> u64 {
        // The original appends the 8-byte host timestamp before acquiring the
        // lock; we mirror that by reading the clock here, in the caller's
        // thread, and letting `push` do no further clock work.
        use std::time::SystemTime;
        SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    }

    /// Appends the current host timestamp to `payload` and pushes it. Drops
    /// the buffer instead of enqueuing it once the queue holds
    /// `drop_threshold` or more entries (never, if `drop_threshold == 0`).
    pub fn push_with_timestamp(&self, mut payload: Vec<u8>) {
        let timestamp = Self::system_timestamp_now();
        payload.extend_from_slice(&timestamp.to_ne_bytes());
        self.push(payload);
    }

    pub fn push(&self, payload: Vec<u8>) {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return;
        }
        let drop_threshold = self.drop_threshold();
        let bounded = drop_threshold != 0;
        if bounded && state.buffers.len() as u64 >= drop_threshold {
            state.dropped += 1;
            let dropped = state.dropped;
            drop(state);
            if let Some(on_drop) = &self.on_drop {
                on_drop(dropped);
            }
            return;
        }
        state.buffers.push_back(payload);
        drop(state);
        self.not_empty.notify_one();
    }

    /// Pops the oldest buffer, waiting up to `timeout`. Returns `(None, result)`
    /// on timeout or after [`Self::close`], with `result.ok == false`.
    pub fn pop(&self, timeout: Duration) -> (Option<Vec<u8>>, PopResult) {
        let mut state = self.state.lock().unwrap();
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(buffer) = state.buffers.pop_front() {
                let used = state.buffers.len();
                return (Some(buffer), PopResult { used, capacity: self.capacity, ok: true });
            }
            if state.closed {
                return (None, PopResult { used: 0, capacity: self.capacity, ok: false });
            }
            let now = Instant::now();
            if now >= deadline {
                return (None, PopResult { used: 0, capacity: self.capacity, ok: false });
            }
            let (guard, result) = self.not_empty.wait_timeout(state, deadline - now).unwrap();
            state = guard;
            if result.timed_out() && state.buffers.is_empty() {
                return (None, PopResult { used: 0, capacity: self.capacity, ok: false });
            }
        }
    }

    /// Wakes any blocked `pop` and makes future pops return immediately with
    /// `ok == false` once the queue drains.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        drop(state);
        self.not_empty.notify_all();
    }

    pub fn dropped_count(&self) -> u64 {
        self.state.lock().unwrap().dropped
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_pop_round_trips() {
        let fifo = Fifo::new(4, 0);
        fifo.push(vec![1, 2, 3]);
        let (buffer, result) = fifo.pop(Duration::from_millis(100));
        assert_eq!(buffer, Some(vec![1, 2, 3]));
        assert!(result.ok);
        assert_eq!(result.used, 0);
    }

    #[test]
    fn pop_times_out_on_empty_queue() {
        let fifo = Fifo::new(4, 0);
        let (buffer, result) = fifo.pop(Duration::from_millis(10));
        assert_eq!(buffer, None);
        assert!(!result.ok);
    }

    #[test]
    fn unbounded_when_drop_threshold_is_zero() {
        let fifo = Fifo::new(2, 0);
        for i in 0..10u8 {
            fifo.push(vec![i]);
        }
        assert_eq!(fifo.len(), 10);
        assert_eq!(fifo.dropped_count(), 0);
    }

    #[test]
    fn drops_new_buffers_past_threshold() {
        let fifo = Fifo::new(8, 2);
        fifo.push(vec![0]);
        fifo.push(vec![1]);
        fifo.push(vec![2]); // dropped: queue already holds drop_threshold entries
        assert_eq!(fifo.len(), 2);
        assert_eq!(fifo.dropped_count(), 1);
    }

    #[test]
    fn close_unblocks_waiting_pop() {
        let fifo = std::sync::Arc::new(Fifo::new(4, 0));
        let fifo2 = fifo.clone();
        let handle = std::thread::spawn(move || fifo2.pop(Duration::from_secs(5)));
        std::thread::sleep(Duration::from_millis(20));
        fifo.close();
        let (buffer, result) = handle.join().unwrap();
        assert_eq!(buffer, None);
        assert!(!result.ok);
    }
}
