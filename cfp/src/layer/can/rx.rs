use mutex::ScopedRawMutex;

use super::{Interface, MTU};
use super::pool::{SlotRef, Table};
use crate::layer::{Error, Receiver, Result};
use crate::nic::{Driver, Frame};
use crate::storage::{Allocator, PacketBuffer};
use crate::sync::{Context, Semaphore};
use crate::time::Clock;
use crate::wire::{begin, BeginRepr, FrameType, Identifier};

impl<R, A, C, S, D, U, const N: usize> Interface<R, A, C, S, D, U, N>
where
    R: ScopedRawMutex,
    A: Allocator,
    C: Clock,
    S: Semaphore,
    D: Driver,
    U: Receiver<A::Packet>,
{
    /// Process a received frame.
    pub(crate) fn receive(&self, frame: &Frame, context: Context) {
        match Identifier::decode(frame.id) {
            Ok(ident) => self.handle(frame.id, ident, frame.payload(), context),
            Err(_) => {
                net_debug!("can: dropped frame with invalid identifier {:08x}", frame.id);
                self.stats.rx_error(Error::Illegal);
            },
        }
    }

    /// Process the fragment of a packet carried by a frame with identifier `key`.
    pub(crate) fn handle(&self, key: u32, ident: Identifier, data: &[u8], context: Context) {
        let result = self.pool.access(context, |table| self.reassemble(table, key, ident, data))
            .and_then(|result| result);

        match result {
            Ok(None) => (),
            Ok(Some(packet)) => {
                let len = packet.len();
                net_trace!("can: received {} bytes from {}", len, ident.src);
                self.receiver.deliver(packet, &self.identity, context);
                self.stats.received(len);
            },
            Err(err) => {
                net_debug!("can: dropped frame ({}): {}", ident, err);
                self.stats.rx_error(err);
            },
        }
    }

    /// Apply one fragment to its slot, returning the packet once it is complete.
    ///
    /// Any error frees the slot that was matched or allocated.
    fn reassemble(
        &self,
        table: &mut Table<A, C>,
        key: u32,
        ident: Identifier,
        data: &[u8],
    ) -> Result<Option<A::Packet>> {
        let slot = match table.find(key, Identifier::CONNECTION_MASK) {
            Some(slot) => slot,
            None => match ident.frame_type {
                FrameType::Begin => table.allocate(key).ok_or(Error::PoolExhausted)?,
                FrameType::More => return Err(Error::OutOfOrderFragment),
                FrameType::Unknown(_) => return Err(Error::UnknownFrameType),
            },
        };

        let result = match ident.frame_type {
            FrameType::Begin => self.begin_session(table, slot, ident, data)
                .and_then(|rest| Self::accumulate(table, slot, ident, rest)),
            FrameType::More => Self::accumulate(table, slot, ident, data),
            FrameType::Unknown(_) => Err(Error::UnknownFrameType),
        };

        match result {
            Ok(Some(packet)) => {
                table.release(slot);
                Ok(Some(packet))
            },
            Ok(None) => Ok(None),
            Err(err) => {
                table.release(slot);
                Err(err)
            },
        }
    }

    /// Start a packet from its first frame, returning the data after the header.
    ///
    /// A session that was still in progress on the slot is abandoned and its buffer reused.
    fn begin_session<'d>(
        &self,
        table: &mut Table<A, C>,
        slot: SlotRef,
        ident: Identifier,
        data: &'d [u8],
    ) -> Result<&'d [u8]> {
        let header = begin::new_checked(data)?;
        let repr = BeginRepr::parse(header)?;
        let allocator = table.allocator();
        let context = table.context();
        let entry = table.slot_mut(slot);

        let packet = match &mut entry.packet {
            Some(packet) => {
                net_warn!("can: incomplete packet from {}, restarting", ident.src);
                self.stats.rx_error(Error::SequenceMismatch);
                packet
            },
            empty => empty.insert(allocator.acquire(MTU, context)
                .ok_or(Error::AllocatorFailure)?),
        };

        let length = usize::from(repr.length);
        if length > packet.capacity() {
            return Err(Error::Overflow);
        }

        packet.set_id(repr.id);
        packet.set_len(length).map_err(|_| Error::Overflow)?;
        entry.rx_count = 0;
        entry.remain = u16::from(ident.remain) + 1;
        Ok(header.payload_slice())
    }

    /// Append the data of a frame to the packet of a slot.
    fn accumulate(
        table: &mut Table<A, C>,
        slot: SlotRef,
        ident: Identifier,
        data: &[u8],
    ) -> Result<Option<A::Packet>> {
        let entry = table.slot_mut(slot);

        if entry.remain == 0 || entry.remain - 1 != u16::from(ident.remain) {
            return Err(Error::SequenceMismatch);
        }
        entry.remain -= 1;

        let packet = entry.packet.as_mut()
            .ok_or(Error::OutOfOrderFragment)?;
        let start = usize::from(entry.rx_count);
        let end = start + data.len();
        if end > packet.len() {
            return Err(Error::Overflow);
        }

        packet.buffer_mut()[start..end].copy_from_slice(data);
        entry.rx_count = end as u16;

        if end == packet.len() {
            Ok(entry.packet.take())
        } else {
            Ok(None)
        }
    }
}
