//! Blocking primitives.

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use spin::{Mutex, MutexGuard};

/// Returned when a sleeper was woken by a kill rather than by its condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

impl fmt::Display for Interrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "interrupted by kill")
    }
}

impl core::error::Error for Interrupted {}

/// A channel sleepers wait on until some condition guarded by a lock may have changed.
///
/// Wakeups carry no information: a woken sleeper must re-check its condition, and may
/// find it still false. Callers therefore always sleep in a loop:
///
/// ```ignore
/// let mut guard = lock.lock();
/// while !condition(&guard) {
///     guard = channel.sleep(&lock, guard, killed);
/// }
/// ```
pub struct WaitChannel {
    generation: AtomicUsize,
}

impl WaitChannel {
    pub const fn new() -> Self {
        Self {
            generation: AtomicUsize::new(0),
        }
    }

    /// Releases `guard`, waits for a [`WaitChannel::wakeup`] or for `killed` to be set,
    /// and re-acquires `lock`.
    ///
    /// The generation is sampled while `guard` is still held, so a wakeup issued by
    /// anyone who changes the condition under `lock` cannot be missed.
    ///
    /// The wait itself is a busy spin and is not the kernel's blocking mechanism. On
    /// hardware, a scheduler must yield the processor here until the next wakeup or kill.
    pub fn sleep<'a, T>(
        &self,
        lock: &'a Mutex<T>,
        guard: MutexGuard<'a, T>,
        killed: &AtomicBool,
    ) -> MutexGuard<'a, T> {
        let seen = self.generation.load(Ordering::Acquire);
        drop(guard);

        while self.generation.load(Ordering::Acquire) == seen && !killed.load(Ordering::Acquire)
        {
            core::hint::spin_loop();
        }

        lock.lock()
    }

    /// Wakes every sleeper on this channel.
    pub fn wakeup(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

impl Default for WaitChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn wakeup_releases_sleeper() {
        let ready = Mutex::new(false);
        let channel = WaitChannel::new();
        let killed = AtomicBool::new(false);

        thread::scope(|s| {
            s.spawn(|| {
                *ready.lock() = true;
                channel.wakeup();
            });

            let mut guard = ready.lock();
            while !*guard {
                guard = channel.sleep(&ready, guard, &killed);
            }
            assert!(*guard);
        });
    }

    #[test]
    fn kill_releases_sleeper() {
        let lock = Mutex::new(());
        let channel = WaitChannel::new();
        let killed = AtomicBool::new(false);

        thread::scope(|s| {
            s.spawn(|| killed.store(true, Ordering::Release));

            let guard = lock.lock();
            let _guard = channel.sleep(&lock, guard, &killed);
            assert!(killed.load(Ordering::Acquire));
        });
    }

    #[test]
    fn interrupted_message() {
        assert_eq!(Interrupted.to_string(), "interrupted by kill");
    }
}
