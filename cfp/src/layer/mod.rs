//! The process logic of protocol layers.
//!
//! ## Layering
//!
//! Each protocol layer is split into two parts; the frame logic contained in `wire` and the
//! processing part in this module. An interface represents the local state of a protocol. This
//! state is used to process frames of that layer while the configuration is fixed at creation,
//! similar to bringing up a link on the OS level with utilities such as `ip link`.
//!
//! ## Receiving
//!
//! Layer implementations process frames by routing the packets they complete to the layer above.
//! This functionality is provided via the abstract [`Receiver`] trait which is handed the finished
//! packet together with the identity of the interface it arrived on. A closure can be used
//! through [`FnHandler`].
//!
//! ## Sending
//!
//! Packets are handed to the interface by the layer above. The interface splits them into frames
//! and passes these to the driver, one at a time, continuing from the driver's completion
//! callback.
//!
//! [`Receiver`]: trait.Receiver.html
//! [`FnHandler`]: struct.FnHandler.html

pub mod can;

use core::fmt;

use crate::sync::Context;

/// The result type of interface operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Reasons for dropping a frame or failing a packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Error {
    /// No free slot was available and none was stale enough to be reclaimed.
    PoolExhausted,

    /// The `remain` field of a frame did not continue the sequence of its session.
    SequenceMismatch,

    /// A frame carried more data than the packet declared.
    Overflow,

    /// A first frame was too short to hold the packet header.
    ShortFrame,

    /// The frame type field held an unknown value.
    UnknownFrameType,

    /// The packet allocator had no buffer.
    AllocatorFailure,

    /// The driver refused a frame.
    DriverSendFailure,

    /// The identifier counter could not be locked in time.
    IdentifierTimeout,

    /// A continuation frame arrived without a matching session.
    OutOfOrderFragment,

    /// A blocking send did not complete in time.
    Timeout,

    /// The packet does not fit the interface.
    ///
    /// Returned for packets longer than the MTU or than the buffer that should hold them.
    BadSize,

    /// A completion was reported for a frame of no known session.
    Unmatched,

    /// An interrupt handler found shared state locked.
    ///
    /// Can only happen when task and interrupt code run truly in parallel. The operation is
    /// abandoned instead of waiting.
    ///
    /// A received frame is then dropped and counted. A transmit completion is lost instead, so
    /// the packet stays bound to its slot, and an awaiting sender times out, until the slot is
    /// reclaimed as stale.
    Contended,

    /// The operation was not permitted.
    ///
    /// Returned when the configuration is invalid or the device does not allow an operation.
    Illegal,
}

/// A standard wrapper for a function implementing the receive trait.
///
/// Keeps the type alias overhead low by providing a single wrapper type that implements the
/// receive trait for all closures of the right shape.
pub struct FnHandler<F>(pub F);

/// Accepts completely reassembled packets.
pub trait Receiver<P> {
    /// Take ownership of a packet.
    ///
    /// Called exactly once per reassembled packet, usually from interrupt context. Must not block.
    fn deliver(&self, packet: P, iface: &can::Identity, context: Context);
}

impl<P, F> Receiver<P> for FnHandler<F>
    where F: Fn(P, &can::Identity, Context)
{
    fn deliver(&self, packet: P, iface: &can::Identity, context: Context) {
        (self.0)(packet, iface, context)
    }
}

impl<P, U: Receiver<P> + ?Sized> Receiver<P> for &'_ U {
    fn deliver(&self, packet: P, iface: &can::Identity, context: Context) {
        (**self).deliver(packet, iface, context)
    }
}

/// Can convert from a wire error.
///
/// This indicates the layer tried to operate on a frame but failed.
impl From<crate::wire::Error> for Error {
    fn from(err: crate::wire::Error) -> Self {
        match err {
            crate::wire::Error::Truncated => Error::ShortFrame,
            crate::wire::Error::Malformed => Error::Illegal,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            Error::PoolExhausted => "no free reassembly slot",
            Error::SequenceMismatch => "frame out of sequence",
            Error::Overflow => "frame data exceeds packet length",
            Error::ShortFrame => "first frame shorter than the packet header",
            Error::UnknownFrameType => "unknown frame type",
            Error::AllocatorFailure => "no packet buffer available",
            Error::DriverSendFailure => "driver refused frame",
            Error::IdentifierTimeout => "timed out waiting for an identifier",
            Error::OutOfOrderFragment => "continuation frame without session",
            Error::Timeout => "timed out waiting for transmission",
            Error::BadSize => "packet too large",
            Error::Unmatched => "completion for unknown session",
            Error::Contended => "state locked in interrupt context",
            Error::Illegal => "operation not permitted",
        };
        f.write_str(msg)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
