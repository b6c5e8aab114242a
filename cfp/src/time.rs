/*! Time structures and clock sources.

The `time` module contains structures used to represent both
absolute and relative time, and the clock seam of the OS abstraction.

 - [Instant] is used to represent absolute time.
 - [Duration] is used to represet relative time.
 - [Clock] reads the current instant, from task or from interrupt context.

[Instant]: struct.Instant.html
[Duration]: struct.Duration.html
[Clock]: trait.Clock.html
*/
use core::{fmt, ops};
pub use core::time::Duration;

use crate::sync::Context;

/// A representation of an absolute time value.
///
/// The `Instant` type is a wrapper around a `i64` value that
/// represents a number of milliseconds, monotonically increasing
/// since an arbitrary moment in time, such as system startup.
///
/// * A value of `0` is inherently arbitrary.
/// * A value less than `0` indicates a time before the starting
///   point.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Instant {
    /// Milliseconds since the start of the clock.
    pub millis: i64,
}

/// A monotonic source of time.
///
/// Platforms usually offer a separate accessor that is safe to call while servicing an
/// interrupt. The default implementation assumes both are the same.
pub trait Clock {
    /// The current time, read from task context.
    fn now(&self) -> Instant;

    /// The current time, read from interrupt context.
    fn now_from_isr(&self) -> Instant {
        self.now()
    }

    /// Read the clock source appropriate for the context.
    fn at(&self, context: Context) -> Instant {
        match context {
            Context::Task => self.now(),
            Context::Interrupt => self.now_from_isr(),
        }
    }
}

/// A clock counting from its construction, based on `std::time::Instant`.
#[cfg(feature = "std")]
#[derive(Clone, Copy, Debug)]
pub struct StdClock {
    start: std::time::Instant,
}

/// A clock which only advances when told to.
///
/// Used for simulations and tests where elapsed time must be deterministic.
#[cfg(feature = "std")]
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: std::sync::atomic::AtomicI64,
}

impl Instant {
    /// Create a new `Instant` from a number of milliseconds.
    pub fn from_millis<T: Into<i64>>(millis: T) -> Instant {
        Instant { millis: millis.into() }
    }

    /// Create a new `Instant` from a number of seconds.
    pub fn from_secs<T: Into<i64>>(secs: T) -> Instant {
        Instant { millis: secs.into() * 1000 }
    }

    /// The fractional number of milliseconds that have passed
    /// since the beginning of time.
    pub fn millis(&self) -> i64 {
        self.millis % 1000
    }

    /// The number of whole seconds that have passed since the
    /// beginning of time.
    pub fn secs(&self) -> i64 {
        self.millis / 1000
    }

    /// The total number of milliseconds that have passed since
    /// the biginning of time.
    pub fn total_millis(&self) -> i64 {
        self.millis
    }
}

#[cfg(feature = "std")]
impl StdClock {
    /// A clock whose zero is now.
    pub fn new() -> Self {
        StdClock { start: std::time::Instant::now() }
    }
}

#[cfg(feature = "std")]
impl Default for StdClock {
    fn default() -> Self {
        StdClock::new()
    }
}

#[cfg(feature = "std")]
impl Clock for StdClock {
    fn now(&self) -> Instant {
        let elapsed = self.start.elapsed();
        Instant::from_millis(elapsed.as_millis() as i64)
    }
}

#[cfg(feature = "std")]
impl ManualClock {
    /// A clock standing at `start`.
    pub fn new(start: Instant) -> Self {
        ManualClock { millis: start.millis.into() }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        use std::sync::atomic::Ordering;
        self.millis.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    /// Set the clock to an arbitrary instant.
    pub fn set(&self, instant: Instant) {
        use std::sync::atomic::Ordering;
        self.millis.store(instant.millis, Ordering::SeqCst);
    }
}

#[cfg(feature = "std")]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        use std::sync::atomic::Ordering;
        Instant::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

impl<C: Clock + ?Sized> Clock for &'_ C {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn now_from_isr(&self) -> Instant {
        (**self).now_from_isr()
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{:03}s", self.secs(), self.millis())
    }
}

impl ops::Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Instant {
        Instant::from_millis(self.millis + rhs.as_millis() as i64)
    }
}

impl ops::AddAssign<Duration> for Instant {
    fn add_assign(&mut self, rhs: Duration) {
        self.millis += rhs.as_millis() as i64;
    }
}

impl ops::Sub<Duration> for Instant {
    type Output = Instant;

    fn sub(self, rhs: Duration) -> Instant {
        Instant::from_millis(self.millis - rhs.as_millis() as i64)
    }
}

impl ops::Sub<Instant> for Instant {
    type Output = Duration;

    fn sub(self, rhs: Instant) -> Duration {
        Duration::from_millis((self.millis - rhs.millis).abs() as u64)
    }
}
