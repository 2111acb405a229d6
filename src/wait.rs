//! Multi-signal wait used by acquirers
//!
//! Three conditions are folded into one blocking wait: a counted
//! "free object" signal, a manual-reset error signal and a single creation
//! permit. When several are signaled at once the outcome is decided by fixed
//! priority, free object first, so existing supply is always preferred over
//! creating a new object.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Result of [`WaitCoordinator::wait`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// One unit of the free-object signal was claimed
    FreeObjectAvailable,

    /// The error signal is set
    ErrorSignaled,

    /// The creation permit was taken; hand it back with `release_create_permit`
    CreatePermissionGranted,

    TimedOut,
}

#[derive(Debug)]
struct Signals {
    free_units: usize,
    error: bool,
    create_permit: bool,
}

#[derive(Debug)]
pub struct WaitCoordinator {
    signals: Mutex<Signals>,
    changed: Condvar,
}

impl WaitCoordinator {
    pub fn new() -> Self {
        Self {
            signals: Mutex::new(Signals {
                free_units: 0,
                error: false,
                create_permit: true,
            }),
            changed: Condvar::new(),
        }
    }

    /// Block until a condition is signaled or `timeout` elapses.
    ///
    /// With `allow_create == false` the creation permit is not waited on.
    pub fn wait(&self, timeout: Duration, allow_create: bool) -> WaitOutcome {
        let deadline = Instant::now().checked_add(timeout);
        let mut signals = self.signals.lock();
        loop {
            if signals.free_units > 0 {
                signals.free_units -= 1;
                return WaitOutcome::FreeObjectAvailable;
            }
            if signals.error {
                return WaitOutcome::ErrorSignaled;
            }
            if allow_create && signals.create_permit {
                signals.create_permit = false;
                return WaitOutcome::CreatePermissionGranted;
            }
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut signals, deadline).timed_out() {
                        // one last look; a signal may have raced the deadline
                        if signals.free_units > 0
                            || signals.error
                            || (allow_create && signals.create_permit)
                        {
                            continue;
                        }
                        return WaitOutcome::TimedOut;
                    }
                }
                None => self.changed.wait(&mut signals),
            }
        }
    }

    /// Claim one free-object unit without blocking
    pub fn try_claim_free(&self) -> bool {
        let mut signals = self.signals.lock();
        if signals.free_units > 0 {
            signals.free_units -= 1;
            true
        } else {
            false
        }
    }

    /// Add `units` free-object units
    pub fn signal_free(&self, units: usize) {
        if units == 0 {
            return;
        }
        self.signals.lock().free_units += units;
        self.changed.notify_all();
    }

    #[cfg(test)]
    pub fn free_units(&self) -> usize {
        self.signals.lock().free_units
    }

    /// Wait only on the creation permit
    pub fn acquire_create_permit(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut signals = self.signals.lock();
        while !signals.create_permit {
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut signals, deadline).timed_out()
                        && !signals.create_permit
                    {
                        return false;
                    }
                }
                None => self.changed.wait(&mut signals),
            }
        }
        signals.create_permit = false;
        true
    }

    pub fn release_create_permit(&self) {
        {
            let mut signals = self.signals.lock();
            debug_assert!(!signals.create_permit, "creation permit released twice");
            signals.create_permit = true;
        }
        self.changed.notify_all();
    }

    pub fn set_error(&self) {
        self.signals.lock().error = true;
        self.changed.notify_all();
    }

    pub fn clear_error(&self) {
        self.signals.lock().error = false;
    }
}

impl Default for WaitCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds the creation permit and gives it back on drop
pub(crate) struct CreatePermit<'a> {
    coordinator: &'a WaitCoordinator,
}

impl<'a> CreatePermit<'a> {
    /// Wrap a permit that was already taken from `coordinator`
    pub fn assume_held(coordinator: &'a WaitCoordinator) -> Self {
        Self { coordinator }
    }
}

impl Drop for CreatePermit<'_> {
    fn drop(&mut self) {
        self.coordinator.release_create_permit();
    }
}
