//! Process-wide pause/resume/stop control shared by every pipeline.
//!
//! One [`LifecycleController`] is created at startup and handed to each
//! pipeline as an `Arc`. It starts paused so nothing samples before the
//! daemon has finished wiring signal handlers; `stop` is final.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{info, trace};

/// External request mapped onto exactly one lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Pause,
    Resume,
    Terminate,
}

#[derive(Debug)]
struct Flags {
    paused: bool,
    stopped: bool,
}

#[derive(Debug)]
pub struct LifecycleController {
    flags: Mutex<Flags>,
    changed: Condvar,
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleController {
    /// Creates a controller in the paused state.
    pub fn new() -> Self {
        Self {
            flags: Mutex::new(Flags {
                paused: true,
                stopped: false,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Flags> {
        self.flags.lock()
    }

    pub fn pause(&self) {
        let mut flags = self.lock();
        if flags.stopped || flags.paused {
            return;
        }
        flags.paused = true;
        info!("sampling paused");
    }

    pub fn resume(&self) {
        let mut flags = self.lock();
        if flags.stopped || !flags.paused {
            return;
        }
        flags.paused = false;
        drop(flags);
        self.changed.notify_all();
        info!("sampling resumed");
    }

    /// Moves to the terminal state and wakes every waiter, paused or sleeping.
    pub fn stop(&self) {
        let mut flags = self.lock();
        if flags.stopped {
            return;
        }
        flags.stopped = true;
        drop(flags);
        self.changed.notify_all();
        info!("stop requested");
    }

    pub fn apply(&self, trigger: Trigger) {
        trace!(?trigger, "lifecycle trigger");
        match trigger {
            Trigger::Pause => self.pause(),
            Trigger::Resume => self.resume(),
            Trigger::Terminate => self.stop(),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Blocks while paused. Returns as soon as the controller is resumed or
    /// stopped; returns immediately when not paused.
    pub fn wait_if_paused(&self) {
        let mut flags = self.lock();
        while flags.paused && !flags.stopped {
            self.changed.wait(&mut flags);
        }
    }

    /// Sleeps for `duration` unless stopped first.
    ///
    /// Returns `false` if the sleep was cut short by [`stop`](Self::stop).
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut flags = self.lock();
        loop {
            if flags.stopped {
                return false;
            }
            if self.changed.wait_until(&mut flags, deadline).timed_out() {
                return !flags.stopped;
            }
        }
    }
}
