//! Admission control for read-only partial object fetches.
//!
//! A fair, bounded semaphore: callers queue in FIFO order and time out with a
//! structured error naming the queue-depth metric, so operators can tell an
//! overloaded gate from a stuck one.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use metrics::{counter, gauge};
use parking_lot::{Condvar, Mutex};

use crate::error::CatalogError;

/// Gauge tracking how many partial fetches are queued on the gate.
pub const PARTIAL_FETCH_QUEUE_LEN_METRIC: &str = "catalog.partial-fetch.queue-len";

/// Counter of partial fetches that timed out waiting for a permit.
pub const PARTIAL_FETCH_TIMEOUTS_METRIC: &str = "catalog.partial-fetch.timeouts";

#[derive(Debug)]
struct GateState {
    available: usize,
    /// Tickets of waiting callers, FIFO. Only the front ticket may take a
    /// permit.
    queue: VecDeque<u64>,
    next_ticket: u64,
}

/// Fair bounded semaphore guarding the partial object fetch path.
#[derive(Debug)]
pub struct FetchGate {
    state: Mutex<GateState>,
    available: Condvar,
    permits: usize,
}

impl FetchGate {
    pub fn new(permits: usize) -> Self {
        Self {
            state: Mutex::new(GateState {
                available: permits,
                queue: VecDeque::new(),
                next_ticket: 0,
            }),
            available: Condvar::new(),
            permits,
        }
    }

    /// Acquire a permit, waiting at most `timeout` behind earlier callers.
    pub fn try_acquire(&self, timeout: Duration) -> Result<FetchPermit<'_>, CatalogError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.queue.push_back(ticket);
        gauge!(PARTIAL_FETCH_QUEUE_LEN_METRIC).set(state.queue.len() as f64);
        loop {
            if state.queue.front() == Some(&ticket) && state.available > 0 {
                state.available -= 1;
                state.queue.pop_front();
                gauge!(PARTIAL_FETCH_QUEUE_LEN_METRIC).set(state.queue.len() as f64);
                // Permits may remain for the next ticket in line.
                self.available.notify_all();
                return Ok(FetchPermit { gate: self });
            }
            if Instant::now() >= deadline {
                state.queue.retain(|t| *t != ticket);
                gauge!(PARTIAL_FETCH_QUEUE_LEN_METRIC).set(state.queue.len() as f64);
                self.available.notify_all();
                counter!(PARTIAL_FETCH_TIMEOUTS_METRIC).increment(1);
                return Err(CatalogError::PartialFetchQueueTimeout);
            }
            let _ = self.available.wait_until(&mut state, deadline);
        }
    }

    /// Number of callers waiting on the gate.
    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn available_permits(&self) -> usize {
        self.state.lock().available
    }

    pub fn total_permits(&self) -> usize {
        self.permits
    }
}

/// RAII permit; releasing wakes the next queued caller.
#[derive(Debug)]
pub struct FetchPermit<'a> {
    gate: &'a FetchGate,
}

impl Drop for FetchPermit<'_> {
    fn drop(&mut self) {
        let mut state = self.gate.state.lock();
        state.available += 1;
        self.gate.available.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn permits_are_released_on_drop() {
        let gate = FetchGate::new(2);
        assert_eq!(gate.available_permits(), 2);
        {
            let _a = gate.try_acquire(Duration::from_secs(1)).unwrap();
            let _b = gate.try_acquire(Duration::from_secs(1)).unwrap();
            assert_eq!(gate.available_permits(), 0);
        }
        assert_eq!(gate.available_permits(), 2);
    }

    #[test]
    fn exhausted_gate_times_out_with_a_structured_error() {
        let gate = FetchGate::new(1);
        let _held = gate.try_acquire(Duration::from_secs(1)).unwrap();
        let err = gate.try_acquire(Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, CatalogError::PartialFetchQueueTimeout));
        assert!(err.to_string().contains(PARTIAL_FETCH_QUEUE_LEN_METRIC));
        // The timed-out waiter left the queue.
        assert_eq!(gate.queue_len(), 0);
    }

    #[test]
    fn waiters_are_served_in_arrival_order() {
        let gate = Arc::new(FetchGate::new(1));
        let order = Arc::new(Mutex::new(Vec::new()));

        let held = gate.try_acquire(Duration::from_secs(5)).unwrap();
        let mut handles = Vec::new();
        for id in 0..3 {
            let gate = Arc::clone(&gate);
            let order = Arc::clone(&order);
            handles.push(std::thread::spawn(move || {
                // Stagger arrivals so ticket order matches thread id.
                std::thread::sleep(Duration::from_millis(50 * (id as u64 + 1)));
                let permit = gate.try_acquire(Duration::from_secs(10)).unwrap();
                order.lock().push(id);
                std::thread::sleep(Duration::from_millis(20));
                drop(permit);
            }));
        }

        std::thread::sleep(Duration::from_millis(250));
        assert_eq!(gate.queue_len(), 3);
        drop(held);
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }
}
