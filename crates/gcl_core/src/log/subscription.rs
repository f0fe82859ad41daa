//! Blocking subscriptions over a log.

use super::store::{LogStore, WaitOutcome};
use crate::error::GclResult;
use crate::record::LogRecord;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One step of a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent {
    /// The next record.
    Record(LogRecord),
    /// The subscription is over: the log closed or the limit was reached.
    End,
}

/// A lazy, restartable sequence of records.
///
/// Existing records from the start position are yielded first, then the
/// subscription blocks until new records are appended. When the log is
/// closed, remaining records are drained and [`SubscriptionEvent::End`] is
/// produced. To restart, subscribe again at [`Subscription::position`].
#[derive(Debug)]
pub struct Subscription {
    store: Arc<LogStore>,
    next: u64,
    remaining: Option<u64>,
    finished: bool,
}

impl Subscription {
    pub(crate) fn new(store: Arc<LogStore>, from: u64) -> Self {
        Self {
            store,
            next: from,
            remaining: None,
            finished: false,
        }
    }

    /// Ends the subscription after `count` records. 0 means unbounded.
    #[must_use]
    pub fn with_limit(mut self, count: u64) -> Self {
        self.remaining = (count > 0).then_some(count);
        self
    }

    /// Record number the next [`SubscriptionEvent::Record`] will carry.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.next
    }

    /// Returns true once the end marker has been produced.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// The log being followed.
    #[must_use]
    pub fn store(&self) -> &Arc<LogStore> {
        &self.store
    }

    /// Blocks until the next event.
    ///
    /// # Errors
    ///
    /// Returns an error if a record cannot be read.
    pub fn next_event(&mut self) -> GclResult<SubscriptionEvent> {
        self.step(None).map(|event| event.unwrap_or(SubscriptionEvent::End))
    }

    /// Waits at most `timeout` for the next event. `Ok(None)` means the
    /// wait timed out and the subscription is still live.
    ///
    /// # Errors
    ///
    /// Returns an error if a record cannot be read.
    pub fn next_timeout(&mut self, timeout: Duration) -> GclResult<Option<SubscriptionEvent>> {
        self.step(Some(Instant::now() + timeout))
    }

    fn step(&mut self, deadline: Option<Instant>) -> GclResult<Option<SubscriptionEvent>> {
        if self.finished || self.remaining == Some(0) {
            self.finished = true;
            return Ok(Some(SubscriptionEvent::End));
        }
        match self.store.wait_for(self.next, deadline) {
            WaitOutcome::Available => {
                let record = self.store.read(self.next)?;
                self.next += 1;
                if let Some(remaining) = self.remaining.as_mut() {
                    *remaining -= 1;
                }
                Ok(Some(SubscriptionEvent::Record(record)))
            }
            WaitOutcome::Closed => {
                self.finished = true;
                Ok(Some(SubscriptionEvent::End))
            }
            WaitOutcome::TimedOut => Ok(None),
        }
    }
}

impl Iterator for Subscription {
    type Item = GclResult<SubscriptionEvent>;

    /// Yields records, then one [`SubscriptionEvent::End`], then `None`.
    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let event = self.next_event();
        if event.is_err() {
            self.finished = true;
        }
        Some(event)
    }
}
