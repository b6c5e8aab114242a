use mutex::ScopedRawMutex;

use super::{Interface, HEADER_LEN, MTU};
use super::pool::{SlotRef, State, Table};
use crate::layer::{Error, Receiver, Result};
use crate::nic::{Driver, Frame};
use crate::storage::{Allocator, PacketBuffer};
use crate::sync::{Context, Semaphore};
use crate::time::{Clock, Duration};
use crate::wire::{begin, BeginRepr, FrameType, Identifier, FRAME_LEN};

/// What to do after a transmission completed.
enum Step {
    /// Hand the next frame of the packet to the driver.
    Next(Frame),
    /// The packet is out, with this many data bytes.
    Done(usize, Option<SlotRef>),
    /// The packet failed.
    Failed(Error, Option<SlotRef>),
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
    /// Send a packet.
    ///
    /// The packet travels to the destination address in its identifier. The interface takes
    /// ownership and returns the buffer to the allocator when the packet is out or has failed.
    ///
    /// With a zero `timeout` the call returns as soon as the first frame was handed to the driver.
    /// Otherwise it waits up to `timeout` for the outcome of this packet. It fails with
    /// `Error::DriverSendFailure` if a later frame failed, or with `Error::Timeout` if the packet
    /// did not complete in time. The transmission itself continues in that case.
    ///
    /// Other failures are `Error::BadSize` for packets longer than the MTU,
    /// `Error::IdentifierTimeout`, `Error::PoolExhausted` and `Error::DriverSendFailure`.
    pub fn send(&self, packet: A::Packet, timeout: Duration) -> Result<()> {
        let wait = timeout != Duration::ZERO;
        let slot = match self.start(packet, wait) {
            Ok(slot) => slot,
            Err(err) => {
                net_debug!("can: send failed: {}", err);
                self.stats.tx_error();
                return Err(err);
            },
        };

        if !wait {
            return Ok(());
        }

        let clock = self.pool.clock();
        let deadline = clock.now() + timeout;
        loop {
            let now = clock.now();
            let left = if deadline > now { deadline - now } else { Duration::ZERO };
            let woken = self.pool.signal(slot).take(left);

            if let Some(result) = self.collect(slot, !woken) {
                return result;
            }
        }
    }

    /// Pick up the outcome of an awaited packet, freeing its slot.
    ///
    /// Returns `None` while the packet is in flight, unless `give_up` is set. Then the slot is left
    /// to the completion callback.
    fn collect(&self, slot: SlotRef, give_up: bool) -> Option<Result<()>> {
        let outcome = self.pool.access(Context::Task, |table| {
            let state = table.slot_mut(slot).state;
            match state {
                State::Done => {
                    table.release(slot);
                    Some(Ok(()))
                },
                State::Failed => {
                    table.release(slot);
                    Some(Err(Error::DriverSendFailure))
                },
                _ if give_up => {
                    table.slot_mut(slot).waiter = false;
                    Some(Err(Error::Timeout))
                },
                _ => None,
            }
        });

        match outcome {
            Ok(Some(Err(Error::Timeout))) => {
                net_debug!("can: send timed out, slot {}", slot.index());
                self.pool.signal(slot).give();
                Some(Err(Error::Timeout))
            },
            Ok(outcome) => outcome,
            Err(err) => Some(Err(err)),
        }
    }

    /// Bind the packet to a slot and hand over its first frame.
    fn start(&self, packet: A::Packet, wait: bool) -> Result<SlotRef> {
        let context = Context::Task;
        let length = packet.len();
        if length > MTU {
            self.pool.allocator().release(packet, context);
            return Err(Error::BadSize);
        }

        let session = match self.ids.next_id() {
            Ok(session) => session,
            Err(err) => {
                self.pool.allocator().release(packet, context);
                return Err(err);
            },
        };

        let id = packet.id();
        let ident = Identifier {
            src: id.src(),
            dst: id.dst(),
            frame_type: FrameType::Begin,
            remain: ((length + HEADER_LEN - 1) / FRAME_LEN) as u8,
            session,
        };

        let bytes = length.min(FRAME_LEN - HEADER_LEN);
        let mut data = [0; FRAME_LEN];
        let header = begin::new_unchecked_mut(&mut data[..HEADER_LEN + bytes]);
        BeginRepr { id, length: length as u16 }.emit(header);
        header.payload_mut_slice().copy_from_slice(&packet.payload()[..bytes]);

        let frame = match ident.encode()
            .map_err(Error::from)
            .and_then(|key| Frame::new(key, &data[..HEADER_LEN + bytes]))
        {
            Ok(frame) => frame,
            Err(err) => {
                self.pool.allocator().release(packet, context);
                return Err(err);
            },
        };

        let slot = self.pool.access(context, |table| {
            match table.allocate(frame.id) {
                Some(slot) => {
                    let entry = table.slot_mut(slot);
                    entry.packet = Some(packet);
                    entry.tx_count = bytes as u16;
                    entry.waiter = wait;
                    Ok(slot)
                },
                None => {
                    table.allocator().release(packet, context);
                    Err(Error::PoolExhausted)
                },
            }
        }).and_then(|slot| slot)?;

        // Armed before the driver can complete the packet.
        self.pool.signal(slot).take(Duration::ZERO);

        if let Err(err) = self.driver.send(&frame, context) {
            net_debug!("can: driver refused first frame: {}", err);
            if self.pool.release(slot, context).is_err() {
                net_warn!("can: could not release slot {}", slot.index());
            }
            return Err(Error::DriverSendFailure);
        }

        Ok(slot)
    }

    /// Continue a packet after the driver reported on one of its frames.
    ///
    /// If the slot table is contended the report is lost. The packet then stays bound to its
    /// slot until it goes stale.
    pub(crate) fn sent(&self, id: u32, status: Result<()>, context: Context) {
        let step = self.pool.access(context, |table| {
            let slot = match table.find(id, Identifier::CONNECTION_MASK) {
                Some(slot) => slot,
                None => return Step::Failed(Error::Unmatched, None),
            };

            if let Err(err) = status {
                return Self::fail(table, slot, err);
            }

            let entry = table.slot_mut(slot);
            let key = entry.key;
            let sent = usize::from(entry.tx_count);
            let packet = match &entry.packet {
                Some(packet) => packet,
                None => return Self::fail(table, slot, Error::Unmatched),
            };

            let length = packet.len();
            if sent >= length {
                let waiter = table.finish(slot, State::Done).then_some(slot);
                return Step::Done(length, waiter);
            }

            let bytes = (length - sent).min(FRAME_LEN);
            let remain = (length - sent - bytes + FRAME_LEN - 1) / FRAME_LEN;
            let frame = Identifier::decode(key)
                .and_then(|ident| Identifier {
                    frame_type: FrameType::More,
                    remain: remain as u8,
                    ..ident
                }.encode())
                .map_err(Error::from)
                .and_then(|more| Frame::new(more, &packet.payload()[sent..sent + bytes]));

            match frame {
                Ok(frame) => {
                    table.slot_mut(slot).tx_count += u16::from(frame.dlc);
                    Step::Next(frame)
                },
                Err(err) => Self::fail(table, slot, err),
            }
        }).unwrap_or_else(|err| Step::Failed(err, None));

        match step {
            Step::Next(frame) => {
                if let Err(err) = self.driver.send(&frame, context) {
                    net_debug!("can: driver refused frame {}: {}", frame, err);
                    self.abandon(frame.id, context);
                    self.stats.tx_error();
                }
            },
            Step::Done(length, waiter) => {
                net_trace!("can: sent {} bytes", length);
                self.stats.sent(length);
                self.wake(waiter, context);
            },
            Step::Failed(err, waiter) => {
                net_debug!("can: transmission of {:08x} failed: {}", id, err);
                self.stats.tx_error();
                self.wake(waiter, context);
            },
        }
    }

    fn fail(table: &mut Table<A, C>, slot: SlotRef, err: Error) -> Step {
        let waiter = table.finish(slot, State::Failed).then_some(slot);
        Step::Failed(err, waiter)
    }

    fn wake(&self, waiter: Option<SlotRef>, context: Context) {
        if let Some(slot) = waiter {
            self.pool.signal(slot).signal(context);
        }
    }

    /// Retire the slot of a packet whose frame the driver refused.
    ///
    /// The driver never reports on a refused frame, so nothing else would.
    fn abandon(&self, id: u32, context: Context) {
        let retired = self.pool.access(context, |table| {
            table.find(id, Identifier::CONNECTION_MASK)
                .map(|slot| table.finish(slot, State::Failed).then_some(slot))
        });

        match retired {
            Ok(Some(waiter)) => self.wake(waiter, context),
            _ => {
                net_warn!("can: could not release slot of {:08x}", id);
            },
        }
    }
}
