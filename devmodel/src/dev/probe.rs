//! In-flight probe accounting.
use crate::error::{Error, Result};
use std::{
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

#[derive(Debug, Default)]
pub struct ProbeTracker {
    in_flight: Mutex<usize>,
    settled: Condvar,
}

/// Marks one probe as running until dropped.
pub struct ProbeGuard<'a> {
    tracker: &'a ProbeTracker,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        let mut count = self.tracker.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.tracker.settled.notify_all();
        }
    }
}

impl ProbeTracker {
    pub fn new() -> ProbeTracker {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn begin(&self) -> ProbeGuard<'_> {
        *self.lock() += 1;
        ProbeGuard { tracker: self }
    }

    pub fn in_flight(&self) -> usize {
        *self.lock()
    }

    /// [Error::Busy] while any probe is running.
    pub fn probe_done(&self) -> Result<()> {
        if self.in_flight() > 0 {
            return Err(Error::Busy);
        }
        Ok(())
    }

    /// Block until no probe is running.
    pub fn wait(&self) {
        let guard = self.lock();
        let _settled = self
            .settled
            .wait_while(guard, |count| *count > 0)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Like [wait](Self::wait), giving up after `timeout`. Returns whether probes settled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (_settled, result) = self
            .settled
            .wait_timeout_while(guard, timeout, |count| *count > 0)
            .unwrap_or_else(PoisonError::into_inner);
        !result.timed_out()
    }
}
