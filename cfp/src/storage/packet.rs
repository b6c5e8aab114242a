use mutex::{BlockingMutex, ConstInit, ScopedRawMutex};

use super::{Allocator, PacketBuffer};
use crate::layer::{Error, Result, can::MTU};
use crate::sync::{self, Context};
use crate::wire::PacketId;

/// A packet with inline storage for a full MTU.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    id: PacketId,
    length: u16,
    data: [u8; MTU],
}

/// A fixed number of preallocated packets.
///
/// Acquiring takes any stored packet, releasing puts it back into a free place. Usable from both
/// contexts: in interrupt context the lock is only tried and a contended pool appears empty.
pub struct PacketPool<R, const N: usize> {
    packets: BlockingMutex<R, [Option<Packet>; N]>,
}

impl Packet {
    /// An empty packet.
    pub fn new() -> Self {
        Packet {
            id: PacketId::default(),
            length: 0,
            data: [0; MTU],
        }
    }

    /// A packet holding a copy of `payload`.
    ///
    /// Fails with `Error::BadSize` if the payload exceeds the MTU.
    pub fn from_payload(id: PacketId, payload: &[u8]) -> Result<Self> {
        let mut packet = Packet::new();
        packet.set_id(id);
        packet.set_len(payload.len())?;
        packet.data[..payload.len()].copy_from_slice(payload);
        Ok(packet)
    }
}

impl Default for Packet {
    fn default() -> Self {
        Packet::new()
    }
}

impl PacketBuffer for Packet {
    fn id(&self) -> PacketId {
        self.id
    }

    fn set_id(&mut self, id: PacketId) {
        self.id = id;
    }

    fn len(&self) -> usize {
        self.length.into()
    }

    fn set_len(&mut self, len: usize) -> Result<()> {
        if len > MTU {
            return Err(Error::BadSize);
        }

        self.length = len as u16;
        Ok(())
    }

    fn capacity(&self) -> usize {
        MTU
    }

    fn buffer(&self) -> &[u8] {
        &self.data
    }

    fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl<R: ScopedRawMutex + ConstInit, const N: usize> PacketPool<R, N> {
    /// A pool filled with `N` empty packets.
    pub fn new() -> Self {
        PacketPool {
            packets: BlockingMutex::new(core::array::from_fn(|_| Some(Packet::new()))),
        }
    }
}

impl<R: ScopedRawMutex + ConstInit, const N: usize> Default for PacketPool<R, N> {
    fn default() -> Self {
        PacketPool::new()
    }
}

impl<R: ScopedRawMutex, const N: usize> PacketPool<R, N> {
    /// The number of packets currently stored.
    pub fn available(&self) -> usize {
        self.packets.with_lock(|packets| packets.iter().filter(|p| p.is_some()).count())
    }
}

impl<R: ScopedRawMutex, const N: usize> Allocator for PacketPool<R, N> {
    type Packet = Packet;

    fn acquire(&self, size: usize, context: Context) -> Option<Packet> {
        if size > MTU {
            return None;
        }

        sync::with_context(&self.packets, context, |packets| {
            packets.iter_mut().find_map(Option::take)
        }).flatten()
        .map(|mut packet| {
            packet.set_id(PacketId::default());
            packet.length = 0;
            packet
        })
    }

    fn release(&self, packet: Packet, context: Context) {
        let stored = sync::with_context(&self.packets, context, move |packets| {
            match packets.iter_mut().find(|place| place.is_none()) {
                Some(place) => {
                    *place = Some(packet);
                    true
                },
                None => false,
            }
        });

        match stored {
            Some(true) => (),
            Some(false) => net_warn!("packet pool: released a packet it never handed out"),
            None => net_warn!("packet pool: lock contended, packet lost"),
        }
    }
}
