//! Admission queue (component F): bounds how many streams can be open
//! concurrently against `SETTINGS_MAX_CONCURRENT_STREAMS`, queuing the
//! rest FIFO rather than refusing them outright.

use std::collections::VecDeque;

/// Applied when the peer advertises no `SETTINGS_MAX_CONCURRENT_STREAMS`
/// limit at all: an unbounded credit grant would let an unbounded number
/// of local requests race ahead of what the peer's SETTINGS actually
/// allows once it does send a limit, so local admission is capped at this
/// ceiling instead of `u32::MAX`.
pub const DEFAULT_UNBOUNDED_CEILING: u32 = 4_096;

/// One request waiting for a stream slot.
pub struct Pending<T> {
    pub payload: T,
}

/// FIFO admission queue plus available-credit counter.
///
/// `submit` either admits immediately (decrementing credit) or queues;
/// `grant` is called whenever a stream closes (or SETTINGS raises the
/// limit) and releases queued entries up to the new credit.
pub struct AdmissionQueue<T> {
    credits: u32,
    limit: Option<u32>,
    in_flight: u32,
    queue: VecDeque<Pending<T>>,
}

impl<T> AdmissionQueue<T> {
    #[must_use]
    pub fn new(limit: Option<u32>) -> Self {
        let credits = limit.unwrap_or(DEFAULT_UNBOUNDED_CEILING);
        Self {
            credits,
            limit,
            in_flight: 0,
            queue: VecDeque::new(),
        }
    }

    /// Submits a new request. Returns `Some(payload)` immediately if a
    /// slot was free, or `None` if it was queued (it will be handed back
    /// later through [`AdmissionQueue::release`]).
    pub fn submit(&mut self, payload: T) -> Option<T> {
        if self.credits > 0 {
            self.credits -= 1;
            self.in_flight += 1;
            Some(payload)
        } else {
            self.queue.push_back(Pending { payload });
            None
        }
    }

    /// Called when a stream completes, freeing one slot. Returns the next
    /// queued payload, if any, already accounted as newly in flight.
    pub fn release(&mut self) -> Option<T> {
        self.in_flight = self.in_flight.saturating_sub(1);
        match self.queue.pop_front() {
            Some(pending) => {
                self.in_flight += 1;
                Some(pending.payload)
            }
            None => {
                self.credits += 1;
                None
            }
        }
    }

    /// Called when `SETTINGS_MAX_CONCURRENT_STREAMS` changes. Returns any
    /// queued payloads newly admitted by a raised limit; if lowered below
    /// the number in flight, no in-flight stream is forcibly reset — the
    /// new limit simply throttles future admission until enough close.
    pub fn on_limit_change(&mut self, limit: Option<u32>) -> Vec<T> {
        self.limit = limit;
        let ceiling = limit.unwrap_or(DEFAULT_UNBOUNDED_CEILING);
        if self.in_flight >= ceiling {
            // Lowered at or below what's already in flight: no further
            // admission until enough streams close, and no stale credit
            // from before the change survives the drop.
            self.credits = 0;
            return Vec::new();
        }
        let mut released = Vec::new();
        while self.in_flight < ceiling {
            match self.queue.pop_front() {
                Some(pending) => {
                    self.in_flight += 1;
                    released.push(pending.payload);
                }
                None => {
                    self.credits = ceiling - self.in_flight;
                    break;
                }
            }
        }
        released
    }

    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Discards every still-queued entry, returning their payloads for the
    /// caller to fail however it sees fit (e.g. the connection is going
    /// away and they will never be admitted). Leaves `credits`/`in_flight`
    /// untouched — those are reconciled separately as in-flight streams
    /// close.
    pub fn drain_queued(&mut self) -> Vec<T> {
        self.queue.drain(..).map(|pending| pending.payload).collect()
    }

    #[must_use]
    pub fn in_flight(&self) -> u32 {
        self.in_flight
    }
}
