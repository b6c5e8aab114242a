//! Simulates frame loss.
//!
//! The loss wrapper sits between a controller and the callbacks of a node and simulates a lossy
//! bus by dropping received frames. Transmission reports pass unchanged.
use mutex::{BlockingMutex, ConstInit, ScopedRawMutex};

use crate::layer::Result;
use crate::sync::{self, Context};

use super::{Callbacks, Frame};

/// Simple pseudo-random loss.
///
/// Can simulate burst-losses and uniform losses by dropping frames based on a pulse design.
#[derive(Copy, Clone, Debug, Hash)]
pub struct PrngLoss {
    /// Threshold for dropping the frame.
    pub threshold: u32,
    /// The frame is never dropped while `count` at least as large as `threshold`.
    pub count: u32,
    /// Reset value for `count` when it reaches `0`.
    pub reset: u32,
    /// Loss rate as a (0, 32)-bit fixed point number.
    ///
    /// Or `None` for no loss at all, which can be used to temporarily turn loss off.
    pub lossrate: Option<u32>,
    /// The current prng state (or seed at the start).
    pub prng: Xoroshiro256,
}

/// Callbacks that lose some of the received frames.
pub struct Lossy<R, C> {
    inner: C,
    loss: BlockingMutex<R, PrngLoss>,
}

/// The xoshiro256** generator.
///
/// Small and fast, but of course not suitable for anything cryptographic.
#[derive(Copy, Clone, Debug, Hash)]
pub struct Xoroshiro256 {
    state: [u64; 4],
}

impl PrngLoss {
    /// A uniform loss simulator.
    pub fn uniform(rate: Option<u32>, seed: u64) -> Self {
        PrngLoss {
            // Threshold always greater than count
            threshold: 1,
            count: 0,
            reset: 0,
            lossrate: rate,
            prng: Xoroshiro256::new(seed),
        }
    }

    /// Simulate burst losses as pulses.
    ///
    /// Drops all frames while in a high state, lets frames pass while in low state. Out of every
    /// `length` frames the last `high` ones are dropped.
    ///
    /// # Panics
    /// If `length` is zero or shorter than `high`.
    pub fn pulsed(high: u32, length: u32) -> Self {
        assert!(length > 0, "Pulse length must not be zero");
        assert!(high <= length, "Length of high signals must be shorter than total length");
        PrngLoss {
            threshold: high,
            count: length - 1,
            reset: length - 1,
            // Frame always lost when pulse condition is true.
            lossrate: Some(u32::MAX),
            prng: Xoroshiro256::new(0),
        }
    }

    /// Determine the fate for the next frame, `true` meaning it is lost.
    pub fn next(&mut self) -> bool {
        let in_window = self.count < self.threshold;
        let fate = Some(self.roll()) <= self.lossrate;

        self.count = self.count.checked_sub(1)
            .unwrap_or(self.reset);

        fate & in_window
    }

    /// Generate the next value of the prng.
    fn roll(&mut self) -> u32 {
        (self.prng.next() & u64::from(!0u32)) as u32
    }
}

impl Xoroshiro256 {
    /// Seed the generator.
    ///
    /// The first output after seeding is always zero.
    pub fn new(seed: u64) -> Self {
        Xoroshiro256 {
            state: [seed, 0, 0, 0],
        }
    }

    /// Advance the generator.
    pub fn next(&mut self) -> u64 {
        let s = &mut self.state;
        let result_starstar = s[1]
            .wrapping_mul(5)
            .rotate_left(7)
            .wrapping_mul(9);

        let t = s[1] << 17;

        s[2] ^= s[0];
        s[3] ^= s[1];
        s[1] ^= s[2];
        s[0] ^= s[3];

        s[2] ^= t;

        s[3] = s[3].rotate_left(45);

        result_starstar
    }
}

impl<R: ScopedRawMutex + ConstInit, C> Lossy<R, C> {
    /// Wrap the callbacks of a node.
    pub fn new(inner: C, loss: PrngLoss) -> Self {
        Lossy {
            inner,
            loss: BlockingMutex::new(loss),
        }
    }
}

impl<R: ScopedRawMutex, C> Lossy<R, C> {
    /// Get a reference to the wrapped callbacks.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Change the loss pattern.
    pub fn set_loss(&self, loss: PrngLoss) {
        self.loss.with_lock(|current| *current = loss)
    }
}

impl<R: ScopedRawMutex, C: Callbacks> Callbacks for Lossy<R, C> {
    fn on_frame_received(&self, frame: &Frame, context: Context) {
        let lost = sync::with_context(&self.loss, context, PrngLoss::next)
            .unwrap_or(false);
        if lost {
            net_trace!("lossy: dropped frame {}", frame);
            return;
        }

        self.inner.on_frame_received(frame, context)
    }

    fn on_frame_sent(&self, id: u32, status: Result<()>, context: Context) {
        self.inner.on_frame_sent(id, status, context)
    }
}
