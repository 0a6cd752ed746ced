//! The timer tick counter.

use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use crate::sync::{Interrupted, WaitChannel};

/// Counts timer interrupts since boot.
pub struct Clock {
    ticks: Mutex<u64>,
    channel: WaitChannel,
}

impl Clock {
    pub const fn new() -> Self {
        Self {
            ticks: Mutex::new(0),
            channel: WaitChannel::new(),
        }
    }

    /// Records one timer interrupt and wakes every sleeper.
    pub fn tick(&self) {
        let mut ticks = self.ticks.lock();
        *ticks += 1;
        self.channel.wakeup();
    }

    /// Returns the number of ticks since boot.
    pub fn now(&self) -> u64 {
        *self.ticks.lock()
    }

    /// Blocks until `duration` ticks have passed.
    ///
    /// Fails with [`Interrupted`] once `killed` is set, checked before every wait.
    pub fn sleep(&self, duration: u64, killed: &AtomicBool) -> Result<(), Interrupted> {
        let mut ticks = self.ticks.lock();
        let start = *ticks;

        while *ticks - start < duration {
            if killed.load(Ordering::Acquire) {
                return Err(Interrupted);
            }
            ticks = self.channel.sleep(&self.ticks, ticks, killed);
        }
        Ok(())
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
