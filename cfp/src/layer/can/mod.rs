//! The CAN fragmentation layer.
//!
//! Carries network packets of up to [`MTU`] bytes over a CAN bus. Each packet is split into a
//! first frame, holding the packet header and up to two bytes of data, followed by frames of up to
//! eight data bytes. All frames of a packet carry the same source, destination and session bits in
//! their extended identifier, while the `remain` field counts down to zero at the last frame.
//!
//! ## Receiving
//!
//! Frames arrive through the [`Callbacks`] of the [`Interface`], usually from interrupt context.
//! A first frame binds a slot of the [`Pool`] and a packet buffer from the allocator, every
//! further frame is matched to its slot by the connection bits and must continue the countdown of
//! `remain`. When all declared bytes are present the packet is passed to the [`Receiver`], exactly
//! once. Any irregularity releases the slot and its buffer and counts an error. Nothing partial is
//! ever delivered and no error reaches the sender.
//!
//! ## Sending
//!
//! [`Interface::send`] takes a packet, binds it to a slot and hands the first frame to the
//! driver. Each completion reported by the driver triggers the next frame until the packet is
//! done, at which point the slot is released and its completion signal raised. A sender can
//! choose to wait for that signal for a bounded time.
//!
//! [`MTU`]: constant.MTU.html
//! [`Callbacks`]: ../../nic/trait.Callbacks.html
//! [`Interface`]: struct.Interface.html
//! [`Interface::send`]: struct.Interface.html#method.send
//! [`Pool`]: pool/struct.Pool.html
//! [`Receiver`]: ../trait.Receiver.html
use core::sync::atomic::{AtomicU32, Ordering};

use mutex::{ConstInit, ScopedRawMutex};

use crate::layer::{Error, Receiver, Result};
use crate::nic::{Callbacks, Driver, Filter, Frame, Station};
use crate::storage::Allocator;
use crate::sync::{Context, Semaphore};
use crate::time::{Clock, Duration};
use crate::wire::Identifier;

pub mod ident;
pub mod pool;
mod rx;
mod tx;

#[cfg(test)]
mod tests;

pub use self::ident::Identifiers;
pub use self::pool::{Pool, SlotRef};

/// The largest packet carried by the interface.
pub const MTU: usize = 256;

/// The packet identifier and length at the start of the first frame.
pub const HEADER_LEN: usize = 6;

/// The default time after which an idle slot may be reclaimed.
pub const STALE_TIMEOUT: Duration = Duration::from_secs(10);

/// The default wait for a session identifier.
pub const ID_TIMEOUT: Duration = Duration::from_secs(1);

/// Which frames the driver passes to the interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Only frames addressed to this node.
    Masked,
    /// All frames on the bus.
    Promiscuous,
}

/// Configuration of an interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Config {
    /// The node address, at most 31.
    pub address: u8,
    /// The acceptance filter mode.
    pub mode: Mode,
    /// Idle time after which a slot may be reclaimed.
    pub stale: Duration,
    /// The longest wait for a session identifier.
    pub id_timeout: Duration,
}

/// How the interface presents itself to the layer above.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Identity {
    /// The interface name.
    pub name: &'static str,
    /// The node address on the bus.
    pub address: u8,
    /// The largest packet the interface carries.
    pub mtu: usize,
}

/// Interface statistics.
#[derive(Debug, Default)]
pub struct Stats {
    tx: AtomicU32,
    rx: AtomicU32,
    tx_error: AtomicU32,
    rx_error: AtomicU32,
    frame: AtomicU32,
    tx_bytes: AtomicU32,
    rx_bytes: AtomicU32,
}

/// A copy of the statistics at one point in time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Counters {
    /// Packets sent completely.
    pub tx: u32,
    /// Packets received and delivered.
    pub rx: u32,
    /// Packets that failed to send.
    ///
    /// A blocking send that times out is not counted. Its packet is counted once, under `tx` or
    /// here, when its transmission ends.
    pub tx_error: u32,
    /// Frames dropped for lack of resources.
    pub rx_error: u32,
    /// Frames dropped for protocol errors.
    pub frame: u32,
    /// Data bytes of packets sent.
    pub tx_bytes: u32,
    /// Data bytes of packets received.
    pub rx_bytes: u32,
}

/// A CAN interface: packet fragmentation and reassembly on top of a driver.
///
/// The interface is shared between the tasks sending packets and the driver reporting frames,
/// all through `&self`. It holds `N` slots for packets in flight in either direction.
pub struct Interface<R, A: Allocator, C, S, D, U, const N: usize> {
    identity: Identity,
    filter: Filter,
    driver: D,
    receiver: U,
    pool: Pool<R, A, C, S, N>,
    ids: Identifiers<S>,
    stats: Stats,
}

impl Config {
    /// The default configuration for a node address.
    pub fn new(address: u8) -> Self {
        Config {
            address,
            ..Config::default()
        }
    }

    /// The acceptance filter for the configured mode.
    pub fn filter(&self) -> Filter {
        match self.mode {
            Mode::Masked => Filter::masked(self.address),
            Mode::Promiscuous => Filter::promiscuous(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            address: 0,
            mode: Mode::Masked,
            stale: STALE_TIMEOUT,
            id_timeout: ID_TIMEOUT,
        }
    }
}

impl Stats {
    fn count(counter: &AtomicU32, by: usize) {
        counter.fetch_add(by as u32, Ordering::Relaxed);
    }

    pub(crate) fn sent(&self, bytes: usize) {
        Self::count(&self.tx, 1);
        Self::count(&self.tx_bytes, bytes);
    }

    pub(crate) fn received(&self, bytes: usize) {
        Self::count(&self.rx, 1);
        Self::count(&self.rx_bytes, bytes);
    }

    pub(crate) fn tx_error(&self) {
        Self::count(&self.tx_error, 1);
    }

    /// Count a dropped frame under the counter matching the error.
    pub(crate) fn rx_error(&self, err: Error) {
        match err {
            Error::PoolExhausted | Error::Contended => Self::count(&self.rx_error, 1),
            _ => Self::count(&self.frame, 1),
        }
    }

    /// Read all counters.
    pub fn snapshot(&self) -> Counters {
        Counters {
            tx: self.tx.load(Ordering::Relaxed),
            rx: self.rx.load(Ordering::Relaxed),
            tx_error: self.tx_error.load(Ordering::Relaxed),
            rx_error: self.rx_error.load(Ordering::Relaxed),
            frame: self.frame.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
        }
    }
}

impl<R, A, C, S, D, U, const N: usize> Interface<R, A, C, S, D, U, N>
where
    R: ScopedRawMutex + ConstInit,
    A: Allocator,
    C: Clock,
    S: Semaphore + Default,
    D: Driver,
    U: Receiver<A::Packet>,
{
    /// Bring up an interface.
    ///
    /// Registers the acceptance filter with the driver. Fails with `Error::Illegal` if the
    /// address does not fit five bits, or with the error of the driver.
    pub fn new(config: Config, mut driver: D, receiver: U, allocator: A, clock: C) -> Result<Self> {
        if config.address > Identifier::MAX_ADDRESS {
            net_error!("can: address {} out of range", config.address);
            return Err(Error::Illegal);
        }

        let filter = config.filter();
        driver.init(filter)?;

        let ids = Identifiers::seeded(S::default(), &clock, config.id_timeout);
        net_debug!("can: interface up at {}, filter {:08x}/{:08x}",
            config.address, filter.id, filter.mask);

        Ok(Interface {
            identity: Identity {
                name: "CAN",
                address: config.address,
                mtu: MTU,
            },
            filter,
            driver,
            receiver,
            pool: Pool::new(allocator, clock, config.stale),
            ids,
            stats: Stats::default(),
        })
    }
}

impl<R, A, C, S, D, U, const N: usize> Interface<R, A, C, S, D, U, N>
where
    R: ScopedRawMutex,
    A: Allocator,
    C: Clock,
    S: Semaphore,
    D: Driver,
    U: Receiver<A::Packet>,
{
    /// The identity passed along with delivered packets.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The acceptance filter registered with the driver.
    pub fn filter(&self) -> Filter {
        self.filter
    }

    /// Attach the interface to a software bus.
    pub fn station(&self) -> Station<'_> {
        Station {
            address: self.identity.address,
            filter: self.filter,
            callbacks: self,
        }
    }

    /// The statistics of the interface.
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// The table of packets in flight.
    pub fn pool(&self) -> &Pool<R, A, C, S, N> {
        &self.pool
    }

    /// The driver below the interface.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// The receiver of completed packets.
    pub fn receiver(&self) -> &U {
        &self.receiver
    }
}

impl<R, A, C, S, D, U, const N: usize> Callbacks for Interface<R, A, C, S, D, U, N>
where
    R: ScopedRawMutex,
    A: Allocator,
    C: Clock,
    S: Semaphore,
    D: Driver,
    U: Receiver<A::Packet>,
{
    fn on_frame_received(&self, frame: &Frame, context: Context) {
        self.receive(frame, context)
    }

    fn on_frame_sent(&self, id: u32, status: Result<()>, context: Context) {
        self.sent(id, status, context)
    }
}
