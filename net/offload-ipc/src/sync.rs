//! Wake-up primitives for worker tasks
//!
//! Interrupt handlers signal, worker tasks wait. A signal posted while no one
//! is waiting is remembered, so a wake-up between a worker's last empty poll
//! and its `wait` is never lost.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

/// Binary semaphore shared between interrupt and task context
pub trait WakeSignal: Send + Sync {
    /// Post the signal; must not block (called from interrupt context)
    fn notify(&self);

    /// Block until the signal is posted, then consume it
    fn wait(&self);
}

/// Busy-waiting signal for targets without a scheduler
#[derive(Debug, Default)]
pub struct SpinSignal {
    posted: AtomicBool,
}

impl SpinSignal {
    /// Create an unposted signal
    pub const fn new() -> Self {
        Self {
            posted: AtomicBool::new(false),
        }
    }
}

impl WakeSignal for SpinSignal {
    fn notify(&self) {
        self.posted.store(true, Ordering::Release);
    }

    fn wait(&self) {
        while !self.posted.swap(false, Ordering::Acquire) {
            core::hint::spin_loop();
        }
    }
}

/// Blocking binary semaphore for hosted builds
#[cfg(feature = "std")]
#[derive(Debug, Default)]
pub struct Semaphore {
    posted: parking_lot::Mutex<bool>,
    cond: parking_lot::Condvar,
}

#[cfg(feature = "std")]
impl Semaphore {
    /// Create an unposted semaphore
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(feature = "std")]
impl WakeSignal for Semaphore {
    fn notify(&self) {
        let mut posted = self.posted.lock();
        *posted = true;
        self.cond.notify_one();
    }

    fn wait(&self) {
        let mut posted = self.posted.lock();
        while !*posted {
            self.cond.wait(&mut posted);
        }
        *posted = false;
    }
}

/// Default signal for the build: blocking under `std`, spinning otherwise
pub fn new_signal() -> Arc<dyn WakeSignal> {
    #[cfg(feature = "std")]
    {
        Arc::new(Semaphore::new())
    }

    #[cfg(not(feature = "std"))]
    {
        Arc::new(SpinSignal::new())
    }
}
