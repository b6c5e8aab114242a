//! The fixed table of in-flight packets.
//!
//! Every packet on its way through the interface occupies one slot, both while it is reassembled
//! from received frames and while it is cut into frames for sending. The table has a fixed size
//! and is the only state shared between task and interrupt context. Slots are found by their
//! fragmentation key under a mask, so that frames of one packet match its slot regardless of
//! their position in the sequence.
//!
//! A sender blocking on its packet marks the slot as awaited. Such a slot is not freed when the
//! packet completes or fails but kept with the outcome until the sender collects it, so that a
//! result always belongs to the send that waits for it.
//!
//! A slot that saw no frame for longer than the staleness threshold is presumed abandoned, for
//! example because its last frames were lost. It is reclaimed in place when an allocation finds no
//! free slot.
use mutex::{BlockingMutex, ConstInit, ScopedRawMutex};

use crate::layer::{Error, Result};
use crate::storage::Allocator;
use crate::sync::{self, Context, Semaphore};
use crate::time::{Clock, Duration, Instant};

/// Whether a slot is bound to a packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum State {
    /// Available for allocation.
    Free,
    /// Bound to a fragmentation key.
    Used,
    /// Sent completely, held for the waiting sender.
    Done,
    /// Failed, held for the waiting sender.
    Failed,
}

/// The per-packet state.
#[derive(Debug)]
pub struct Slot<P> {
    /// Data bytes received so far.
    pub rx_count: u16,
    /// Data bytes handed to the driver so far.
    pub tx_count: u16,
    /// Frames still expected, including the next one.
    pub remain: u16,
    /// The fragmentation key of the first frame.
    pub key: u32,
    /// The packet being assembled or sent.
    pub packet: Option<P>,
    /// Whether the slot is in use.
    pub state: State,
    /// A sender blocks on the outcome.
    pub waiter: bool,
    /// The last time the slot was allocated or matched.
    pub last_used: Instant,
}

/// An index into the table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotRef(usize);

/// The slot table together with the resources needed to manage it.
pub struct Pool<R, A: Allocator, C, S, const N: usize> {
    slots: BlockingMutex<R, [Slot<A::Packet>; N]>,
    signals: [S; N],
    allocator: A,
    clock: C,
    stale: Duration,
}

/// Exclusive access to the slot table.
///
/// Only exists while the table is locked. All operations use the context that the lock was taken
/// in for reading the clock and for releasing packets.
pub struct Table<'a, A: Allocator, C> {
    slots: &'a mut [Slot<A::Packet>],
    allocator: &'a A,
    clock: &'a C,
    stale: Duration,
    context: Context,
}

impl<P> Slot<P> {
    fn empty() -> Self {
        Slot {
            rx_count: 0,
            tx_count: 0,
            remain: 0,
            key: 0,
            packet: None,
            state: State::Free,
            waiter: false,
            last_used: Instant::from_millis(0),
        }
    }

    fn bind(&mut self, key: u32, now: Instant) {
        self.rx_count = 0;
        self.tx_count = 0;
        self.remain = 0;
        self.key = key;
        self.state = State::Used;
        self.waiter = false;
        self.last_used = now;
    }
}

impl SlotRef {
    /// The position of the slot in the table.
    pub fn index(self) -> usize {
        self.0
    }
}

impl<R, A, C, S, const N: usize> Pool<R, A, C, S, N>
where
    R: ScopedRawMutex + ConstInit,
    A: Allocator,
    S: Default,
{
    /// Create a table with all slots free.
    pub fn new(allocator: A, clock: C, stale: Duration) -> Self {
        Pool {
            slots: BlockingMutex::new(core::array::from_fn(|_| Slot::empty())),
            signals: core::array::from_fn(|_| S::default()),
            allocator,
            clock,
            stale,
        }
    }
}

impl<R, A, C, S, const N: usize> Pool<R, A, C, S, N>
where
    R: ScopedRawMutex,
    A: Allocator,
    C: Clock,
    S: Semaphore,
{
    /// Lock the table in the given context.
    ///
    /// Fails with `Error::Contended` only in interrupt context, if the lock is held elsewhere.
    pub fn access<U>(&self, context: Context, f: impl FnOnce(&mut Table<A, C>) -> U) -> Result<U> {
        let allocator = &self.allocator;
        let clock = &self.clock;
        let stale = self.stale;
        sync::with_context(&self.slots, context, |slots| {
            let mut table = Table {
                slots: &mut slots[..],
                allocator,
                clock,
                stale,
                context,
            };
            f(&mut table)
        }).ok_or_else(|| {
            net_debug!("can: slot table contended");
            Error::Contended
        })
    }

    /// Bind a slot to `key`.
    ///
    /// Fails with `Error::PoolExhausted` if no slot is free or stale.
    pub fn allocate(&self, key: u32, context: Context) -> Result<SlotRef> {
        self.access(context, |table| table.allocate(key))?
            .ok_or(Error::PoolExhausted)
    }

    /// Find the slot whose key matches `key` on all bits of `mask`.
    pub fn find(&self, key: u32, mask: u32, context: Context) -> Result<Option<SlotRef>> {
        self.access(context, |table| table.find(key, mask))
    }

    /// Free a slot, returning its packet to the allocator.
    pub fn release(&self, slot: SlotRef, context: Context) -> Result<()> {
        self.access(context, |table| table.release(slot))
    }

    /// The completion signal of a slot.
    pub fn signal(&self, slot: SlotRef) -> &S {
        &self.signals[slot.0]
    }

    /// The number of slots not free.
    pub fn in_use(&self) -> usize {
        self.slots.with_lock(|slots| {
            slots.iter().filter(|slot| slot.state != State::Free).count()
        })
    }

    /// The allocator packets are returned to.
    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    /// The clock used to judge staleness.
    pub fn clock(&self) -> &C {
        &self.clock
    }
}

impl<'a, A: Allocator, C: Clock> Table<'a, A, C> {
    fn now(&self) -> Instant {
        self.clock.at(self.context)
    }

    /// Bind a free slot, or else reclaim a stale one.
    ///
    /// Slots with a waiting sender are never reclaimed, the sender frees them itself.
    pub fn allocate(&mut self, key: u32) -> Option<SlotRef> {
        let now = self.now();

        if let Some(index) = self.slots.iter().position(|slot| slot.state == State::Free) {
            self.slots[index].bind(key, now);
            return Some(SlotRef(index));
        }

        let stale = self.stale;
        let index = self.slots.iter()
            .position(|slot| !slot.waiter && now > slot.last_used + stale)?;
        net_warn!("can: slot {} for {:08x} timed out, reusing it", index, self.slots[index].key);
        self.release(SlotRef(index));
        self.slots[index].bind(key, now);
        Some(SlotRef(index))
    }

    /// Find the first used slot matching `key` under `mask` and refresh its timestamp.
    pub fn find(&mut self, key: u32, mask: u32) -> Option<SlotRef> {
        let now = self.now();
        let index = self.slots.iter().position(|slot| {
            slot.state == State::Used && (slot.key ^ key) & mask == 0
        })?;
        self.slots[index].last_used = now;
        Some(SlotRef(index))
    }

    /// Free a slot, returning any packet it holds to the allocator.
    pub fn release(&mut self, slot: SlotRef) {
        let slot = &mut self.slots[slot.0];
        if let Some(packet) = slot.packet.take() {
            self.allocator.release(packet, self.context);
        }
        *slot = Slot::empty();
    }

    /// Retire a slot with the outcome of its packet.
    ///
    /// The packet goes back to the allocator. Without a waiting sender the slot is freed,
    /// otherwise it is kept in `outcome` and `true` is returned.
    pub fn finish(&mut self, slot: SlotRef, outcome: State) -> bool {
        if !self.slots[slot.0].waiter {
            self.release(slot);
            return false;
        }

        let entry = &mut self.slots[slot.0];
        if let Some(packet) = entry.packet.take() {
            self.allocator.release(packet, self.context);
        }
        entry.state = outcome;
        true
    }

    /// Access the state of a slot.
    pub fn slot_mut(&mut self, slot: SlotRef) -> &mut Slot<A::Packet> {
        &mut self.slots[slot.0]
    }

    /// The allocator of the pool.
    pub fn allocator(&self) -> &'a A {
        self.allocator
    }

    /// The context the table was locked in.
    pub fn context(&self) -> Context {
        self.context
    }
}
