//! Session identifiers for outgoing packets.
use core::sync::atomic::{AtomicU16, Ordering};

use crate::layer::{Error, Result};
use crate::nic::Xoroshiro256;
use crate::sync::Semaphore;
use crate::time::{Clock, Duration};
use crate::wire::Identifier;

/// A wrapping counter of 10-bit session identifiers.
///
/// Consecutive packets between the same pair of nodes get distinct identifiers for the next 1024
/// packets, which is what separates their frames on the bus. Access is serialized by a semaphore
/// with a bounded wait.
pub struct Identifiers<S> {
    next: AtomicU16,
    lock: S,
    wait: Duration,
}

impl<S: Semaphore> Identifiers<S> {
    /// Start counting from `seed`, reduced to the identifier range.
    pub fn new(lock: S, seed: u16, wait: Duration) -> Self {
        Identifiers {
            next: AtomicU16::new(seed % Identifier::SESSIONS),
            lock,
            wait,
        }
    }

    /// Start counting from a value derived from the current time.
    ///
    /// Makes it unlikely that a rebooted node reuses the identifiers of its previous run while
    /// frames of those are still around. Purely advisory.
    pub fn seeded(lock: S, clock: &impl Clock, wait: Duration) -> Self {
        let mut prng = Xoroshiro256::new(clock.now().total_millis() as u64);
        // The first output does not depend on the seed.
        prng.next();
        let seed = (prng.next() % u64::from(Identifier::SESSIONS)) as u16;
        Identifiers::new(lock, seed, wait)
    }

    /// Get the next identifier.
    ///
    /// Waits for exclusive access for the configured time, failing with
    /// `Error::IdentifierTimeout` if it can not be had.
    pub fn next_id(&self) -> Result<u16> {
        if !self.lock.take(self.wait) {
            net_warn!("can: no session identifier within {:?}", self.wait);
            return Err(Error::IdentifierTimeout);
        }

        let id = self.next.load(Ordering::Relaxed);
        self.next.store((id + 1) % Identifier::SESSIONS, Ordering::Relaxed);
        self.lock.give();
        Ok(id)
    }
}
