//! # Session Notification Queue
//!
//! Out-of-band notifications (suspend/resume class events) delivered to a
//! single consumer, decoupled from the data path. Records are pooled: a
//! fixed set is allocated when the queue is created, recycled after each
//! delivery, and a fresh record is minted only if a burst empties the free
//! pool.

use crate::error::{DecodeError, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::debug;

/// Number of pre-allocated notification records.
pub const EVENT_POOL_SIZE: usize = 10;

/// Out-of-band session notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The platform is suspending; the consumer should quiesce.
    Suspend,
    /// The platform resumed.
    Resume,
}

/// One pooled notification record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRecord {
    pub event: SessionEvent,
}

struct Queues {
    free: Vec<EventRecord>,
    pending: VecDeque<EventRecord>,
    abort: bool,
}

/// Bounded-pool notification queue with a single-waiter dequeue gate.
pub struct EventQueue {
    queues: Mutex<Queues>,
    cv: Condvar,
    // Only one caller may sit in wait() at a time; a second fails fast.
    gate: Mutex<()>,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(Queues {
                free: (0..EVENT_POOL_SIZE)
                    .map(|_| EventRecord {
                        event: SessionEvent::Resume,
                    })
                    .collect(),
                pending: VecDeque::new(),
                abort: false,
            }),
            cv: Condvar::new(),
            gate: Mutex::new(()),
        }
    }

    /// Queue a notification and wake the waiter. Never blocks beyond the
    /// queue lock; safe to call from the dispatcher thread.
    pub fn post(&self, event: SessionEvent) {
        let mut q = self.queues.lock();
        let mut record = q.free.pop().unwrap_or_else(|| {
            debug!("event pool exhausted, minting extra record");
            EventRecord {
                event: SessionEvent::Resume,
            }
        });
        record.event = event;
        q.pending.push_back(record);
        drop(q);
        self.cv.notify_all();
    }

    /// Block until a notification is pending, an abort fires, or the
    /// timeout elapses. `None` waits indefinitely; `Some(0)` polls.
    ///
    /// # Errors
    ///
    /// - [`DecodeError::Busy`] when another waiter is already dequeuing.
    /// - [`DecodeError::Timeout`] when the bounded wait elapsed.
    /// - [`DecodeError::DeviceUnavailable`] when an abort was consumed;
    ///   the abort is single-shot and subsequent waits behave normally.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<EventRecord> {
        let Some(_gate) = self.gate.try_lock() else {
            return Err(DecodeError::Busy);
        };

        let mut q = self.queues.lock();
        match timeout {
            Some(limit) => {
                let deadline = Instant::now() + limit;
                while q.pending.is_empty() && !q.abort {
                    if self.cv.wait_until(&mut q, deadline).timed_out() {
                        if q.pending.is_empty() && !q.abort {
                            return Err(DecodeError::Timeout);
                        }
                        break;
                    }
                }
            }
            None => {
                while q.pending.is_empty() && !q.abort {
                    self.cv.wait(&mut q);
                }
            }
        }

        if q.abort {
            q.abort = false;
            return Err(DecodeError::DeviceUnavailable(
                "event wait aborted".to_string(),
            ));
        }

        match q.pending.pop_front() {
            Some(record) => {
                // Recycle after delivery; the caller gets a copy.
                if q.free.len() < EVENT_POOL_SIZE {
                    q.free.push(record);
                }
                Ok(record)
            }
            None => Err(DecodeError::Timeout),
        }
    }

    /// Abort the current (or next) wait. Consumed by exactly one waiter.
    pub fn abort(&self) {
        self.queues.lock().abort = true;
        self.cv.notify_all();
    }

    /// Drop everything, pool included. Used on session close.
    pub fn reset(&self) {
        let mut q = self.queues.lock();
        q.free.clear();
        q.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn post_then_wait_delivers_in_order() {
        let queue = EventQueue::new();
        queue.post(SessionEvent::Suspend);
        queue.post(SessionEvent::Resume);

        assert_eq!(
            queue.wait(Some(Duration::ZERO)).unwrap().event,
            SessionEvent::Suspend
        );
        assert_eq!(
            queue.wait(Some(Duration::ZERO)).unwrap().event,
            SessionEvent::Resume
        );
    }

    #[test]
    fn zero_timeout_polls_empty_queue() {
        let queue = EventQueue::new();
        assert!(matches!(
            queue.wait(Some(Duration::ZERO)),
            Err(DecodeError::Timeout)
        ));
    }

    #[test]
    fn bounded_wait_times_out() {
        let queue = EventQueue::new();
        let start = Instant::now();
        assert!(matches!(
            queue.wait(Some(Duration::from_millis(30))),
            Err(DecodeError::Timeout)
        ));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn abort_is_single_shot() {
        let queue = EventQueue::new();
        queue.abort();
        assert!(matches!(
            queue.wait(Some(Duration::ZERO)),
            Err(DecodeError::DeviceUnavailable(_))
        ));
        // Consumed: the next wait behaves normally again.
        assert!(matches!(
            queue.wait(Some(Duration::ZERO)),
            Err(DecodeError::Timeout)
        ));
    }

    #[test]
    fn abort_takes_priority_over_pending_events() {
        let queue = EventQueue::new();
        queue.post(SessionEvent::Suspend);
        queue.abort();
        assert!(matches!(
            queue.wait(Some(Duration::ZERO)),
            Err(DecodeError::DeviceUnavailable(_))
        ));
        // The queued event is still there afterwards.
        assert_eq!(
            queue.wait(Some(Duration::ZERO)).unwrap().event,
            SessionEvent::Suspend
        );
    }

    #[test]
    fn abort_wakes_a_blocked_waiter() {
        let queue = Arc::new(EventQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.wait(None))
        };
        thread::sleep(Duration::from_millis(20));
        queue.abort();
        assert!(matches!(
            waiter.join().unwrap(),
            Err(DecodeError::DeviceUnavailable(_))
        ));
    }

    #[test]
    fn second_concurrent_waiter_fails_fast() {
        let queue = Arc::new(EventQueue::new());
        let blocked = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.wait(Some(Duration::from_millis(200))))
        };
        thread::sleep(Duration::from_millis(40));
        assert!(matches!(
            queue.wait(Some(Duration::ZERO)),
            Err(DecodeError::Busy)
        ));
        queue.post(SessionEvent::Resume);
        assert_eq!(blocked.join().unwrap().unwrap().event, SessionEvent::Resume);
    }

    #[test]
    fn records_are_recycled_not_leaked() {
        let queue = EventQueue::new();
        for _ in 0..3 * EVENT_POOL_SIZE {
            queue.post(SessionEvent::Suspend);
            queue.wait(Some(Duration::ZERO)).unwrap();
        }
        let q = queue.queues.lock();
        assert_eq!(q.free.len(), EVENT_POOL_SIZE);
        assert!(q.pending.is_empty());
    }

    #[test]
    fn burst_beyond_pool_mints_extra_records() {
        let queue = EventQueue::new();
        for _ in 0..EVENT_POOL_SIZE + 3 {
            queue.post(SessionEvent::Suspend);
        }
        for _ in 0..EVENT_POOL_SIZE + 3 {
            queue.wait(Some(Duration::ZERO)).unwrap();
        }
        assert!(matches!(
            queue.wait(Some(Duration::ZERO)),
            Err(DecodeError::Timeout)
        ));
    }
}
