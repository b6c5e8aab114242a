//! Packet buffers and the allocator interface.
//!
//! The interface never owns memory for packet data itself. Buffers are acquired from an
//! [`Allocator`] when a first frame arrives or are handed over by the sender, and go back to the
//! allocator once the packet is delivered, sent, or abandoned. Whoever holds the buffer value
//! owns it, so a buffer can not be released twice.
//!
//! [`Allocator`]: trait.Allocator.html
use crate::layer::Result;
use crate::sync::Context;
use crate::wire::PacketId;

mod packet;

pub use self::packet::{Packet, PacketPool};

/// A buffer holding a single network packet.
pub trait PacketBuffer {
    /// The packet identifier.
    fn id(&self) -> PacketId;

    /// Change the packet identifier.
    fn set_id(&mut self, id: PacketId);

    /// The number of valid data bytes.
    fn len(&self) -> usize;

    /// Change the number of valid data bytes.
    ///
    /// Fails with `Error::BadSize` if the length exceeds the capacity.
    fn set_len(&mut self, len: usize) -> Result<()>;

    /// The maximum number of data bytes.
    fn capacity(&self) -> usize;

    /// The whole data area, including bytes beyond the current length.
    fn buffer(&self) -> &[u8];

    /// The whole mutable data area, including bytes beyond the current length.
    fn buffer_mut(&mut self) -> &mut [u8];

    /// Check if the packet holds no data.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The valid data bytes.
    fn payload(&self) -> &[u8] {
        &self.buffer()[..self.len()]
    }
}

/// A source of packet buffers.
///
/// Both operations may be called from interrupt context and must not block there.
pub trait Allocator {
    /// The buffer type handed out.
    type Packet: PacketBuffer;

    /// Get a buffer with room for at least `size` data bytes.
    fn acquire(&self, size: usize, context: Context) -> Option<Self::Packet>;

    /// Return a buffer.
    fn release(&self, packet: Self::Packet, context: Context);
}

impl<A: Allocator + ?Sized> Allocator for &'_ A {
    type Packet = A::Packet;

    fn acquire(&self, size: usize, context: Context) -> Option<Self::Packet> {
        (**self).acquire(size, context)
    }

    fn release(&self, packet: Self::Packet, context: Context) {
        (**self).release(packet, context)
    }
}
