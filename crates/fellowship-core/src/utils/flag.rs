use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Marks an operation as running so overlapping triggers can be coalesced.
#[derive(Debug, Default)]
pub struct InFlightFlag {
    running: AtomicBool,
}

impl InFlightFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the flag, or `None` if the operation is already running.
    pub fn try_acquire(&self) -> Option<InFlightGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard { flag: self })
    }

    /// Like `try_acquire`, for guards that must move into a spawned task.
    pub fn try_acquire_owned(self: &Arc<Self>) -> Option<OwnedInFlightGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| OwnedInFlightGuard { flag: Arc::clone(self) })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Releases the flag when dropped, including on panic or cancellation.
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    flag: &'a InFlightFlag,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.running.store(false, Ordering::Release);
    }
}

#[derive(Debug)]
pub struct OwnedInFlightGuard {
    flag: Arc<InFlightFlag>,
}

impl Drop for OwnedInFlightGuard {
    fn drop(&mut self) {
        self.flag.running.store(false, Ordering::Release);
    }
}
