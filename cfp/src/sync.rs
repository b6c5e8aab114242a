//! Execution contexts and the synchronization seam of the OS abstraction.
//!
//! CAN controllers report received and transmitted frames from their interrupt handler while
//! applications send packets from ordinary tasks. Both paths touch the same tables, but only the
//! task path is allowed to wait. Every operation that may run in either place therefore takes a
//! [`Context`] that tells it which one it is in.
//!
//! [`Context`]: enum.Context.html
use mutex::{BlockingMutex, ScopedRawMutex};

use crate::time::Duration;

/// The execution context of a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Context {
    /// Ordinary thread or task execution, which may block for bounded amounts of time.
    Task,
    /// A driver callback servicing an interrupt. Must never block.
    Interrupt,
}

/// A binary semaphore.
///
/// The semaphore starts out available. Giving an already available semaphore has no effect, so
/// the count never exceeds one.
pub trait Semaphore {
    /// Take the semaphore, waiting for at most `timeout`.
    ///
    /// A zero timeout only polls. Returns `true` if the semaphore was taken.
    fn take(&self, timeout: Duration) -> bool;

    /// Make the semaphore available from task context.
    fn give(&self);

    /// Make the semaphore available from interrupt context.
    fn give_from_isr(&self) {
        self.give()
    }

    /// Make the semaphore available with the variant appropriate for the context.
    fn signal(&self, context: Context) {
        match context {
            Context::Task => self.give(),
            Context::Interrupt => self.give_from_isr(),
        }
    }
}

/// A semaphore based on a standard mutex and condition variable.
#[cfg(feature = "std")]
#[derive(Debug)]
pub struct StdSemaphore {
    available: std::sync::Mutex<bool>,
    changed: std::sync::Condvar,
}

/// Run `f` with exclusive access to the contents of `mutex`.
///
/// In task context this waits for the lock. In interrupt context the lock is only tried: on a
/// single core where task code holds the lock within a critical section the attempt can not fail,
/// on any other platform a failure is returned instead of waiting.
pub(crate) fn with_context<R, T, U>(
    mutex: &BlockingMutex<R, T>,
    context: Context,
    f: impl FnOnce(&mut T) -> U,
) -> Option<U>
where
    R: ScopedRawMutex,
{
    match context {
        Context::Task => Some(mutex.with_lock(f)),
        Context::Interrupt => mutex.try_with_lock(f),
    }
}

#[cfg(feature = "std")]
impl StdSemaphore {
    /// Create an available semaphore.
    pub fn new() -> Self {
        StdSemaphore {
            available: std::sync::Mutex::new(true),
            changed: std::sync::Condvar::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, bool> {
        self.available
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(feature = "std")]
impl Default for StdSemaphore {
    fn default() -> Self {
        StdSemaphore::new()
    }
}

#[cfg(feature = "std")]
impl Semaphore for StdSemaphore {
    fn take(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (mut available, _) = self.changed
            .wait_timeout_while(guard, timeout, |available| !*available)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if *available {
            *available = false;
            true
        } else {
            false
        }
    }

    fn give(&self) {
        *self.lock() = true;
        self.changed.notify_one();
    }
}

impl<S: Semaphore + ?Sized> Semaphore for &'_ S {
    fn take(&self, timeout: Duration) -> bool {
        (**self).take(timeout)
    }

    fn give(&self) {
        (**self).give()
    }

    fn give_from_isr(&self) {
        (**self).give_from_isr()
    }
}
