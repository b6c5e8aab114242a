use core::fmt;
use byteorder::{ByteOrder, NetworkEndian};

use crate::wire::{Error, Result};

/// The 32-bit identifier of a network packet.
///
/// Holds routing information of the packet, from the most significant bit on:
/// priority (2), source (5), destination (5), destination port (6), source port (6), four reserved
/// bits and four flag bits. It travels in network byte order at the start of the first frame.
#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy, Default)]
pub struct PacketId(pub u32);

/// Scheduling priority of a packet.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum Priority {
    Critical = 0,
    High = 1,
    Normal = 2,
    Low = 3,
}

/// The flag bits of a packet identifier.
#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy, Default)]
pub struct Flags(pub u8);

mod field {
    use crate::wire::field::*;

    pub(crate) const ID:      Field = 0..4;
    pub(crate) const LENGTH:  Field = 4..6;
    pub(crate) const PAYLOAD: Rest  = 6..;

    /// Bit fields of the packet identifier as `(shift, width)`.
    pub(crate) const PRIORITY: (u32, u32) = (30, 2);
    pub(crate) const SRC:      (u32, u32) = (25, 5);
    pub(crate) const DST:      (u32, u32) = (20, 5);
    pub(crate) const DPORT:    (u32, u32) = (14, 6);
    pub(crate) const SPORT:    (u32, u32) = (8, 6);
    pub(crate) const FLAGS:    (u32, u32) = (0, 4);
}

impl PacketId {
    fn get(&self, (shift, width): (u32, u32)) -> u8 {
        ((self.0 >> shift) & ((1 << width) - 1)) as u8
    }

    fn set(&mut self, (shift, width): (u32, u32), value: u8) {
        let mask = ((1u32 << width) - 1) << shift;
        self.0 = (self.0 & !mask) | ((u32::from(value) << shift) & mask);
    }

    /// Assemble an identifier from its parts.
    ///
    /// Fails with `Error::Malformed` if an address does not fit five bits or a port does not fit
    /// six bits.
    pub fn new(priority: Priority, src: u8, dst: u8, dport: u8, sport: u8) -> Result<Self> {
        if src > 31 || dst > 31 || dport > 63 || sport > 63 {
            return Err(Error::Malformed);
        }

        let mut id = PacketId(0);
        id.set(field::PRIORITY, priority as u8);
        id.set(field::SRC, src);
        id.set(field::DST, dst);
        id.set(field::DPORT, dport);
        id.set(field::SPORT, sport);
        Ok(id)
    }

    pub fn priority(&self) -> Priority {
        match self.get(field::PRIORITY) {
            0 => Priority::Critical,
            1 => Priority::High,
            2 => Priority::Normal,
            _ => Priority::Low,
        }
    }

    pub fn src(&self) -> u8 {
        self.get(field::SRC)
    }

    pub fn dst(&self) -> u8 {
        self.get(field::DST)
    }

    pub fn dport(&self) -> u8 {
        self.get(field::DPORT)
    }

    pub fn sport(&self) -> u8 {
        self.get(field::SPORT)
    }

    pub fn flags(&self) -> Flags {
        Flags(self.get(field::FLAGS))
    }

    pub fn set_flags(&mut self, flags: Flags) {
        self.set(field::FLAGS, flags.0)
    }
}

impl Flags {
    pub const HMAC: u8 = 0x08;
    pub const XTEA: u8 = 0x04;
    pub const RDP: u8 = 0x02;
    pub const CRC32: u8 = 0x01;

    pub fn hmac(&self) -> bool {
        self.0 & Self::HMAC != 0
    }

    pub fn xtea(&self) -> bool {
        self.0 & Self::XTEA != 0
    }

    pub fn rdp(&self) -> bool {
        self.0 & Self::RDP != 0
    }

    pub fn crc32(&self) -> bool {
        self.0 & Self::CRC32 != 0
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{} -> {}:{} prio={:?}",
               self.src(), self.sport(), self.dst(), self.dport(), self.priority())
    }
}

byte_wrapper! {
    /// A byte sequence representing the first frame of a fragmented packet.
    ///
    /// Starts with the packet identifier and the total packet length, both in network byte order,
    /// followed by the first bytes of packet data.
    #[derive(Debug, PartialEq, Eq)]
    pub struct begin([u8]);
}

impl begin {
    /// Imbue a raw octet buffer with first frame structure.
    pub fn new_unchecked(data: &[u8]) -> &Self {
        Self::__from_macro_new_unchecked(data)
    }

    /// Imbue a mutable octet buffer with first frame structure.
    pub fn new_unchecked_mut(data: &mut [u8]) -> &mut Self {
        Self::__from_macro_new_unchecked_mut(data)
    }

    pub fn new_checked(data: &[u8]) -> Result<&Self> {
        Self::new_unchecked(data).check_len()?;
        Ok(Self::new_unchecked(data))
    }

    /// Ensure that no accessor method will panic if called.
    /// Returns `Err(Error::Truncated)` if the buffer is too short.
    pub fn check_len(&self) -> Result<()> {
        if self.0.len() < field::PAYLOAD.start {
            Err(Error::Truncated)
        } else {
            Ok(())
        }
    }

    /// Return the length of the header.
    pub fn header_len() -> usize {
        field::PAYLOAD.start
    }

    pub fn packet_id(&self) -> PacketId {
        PacketId(NetworkEndian::read_u32(&self.0[field::ID]))
    }

    pub fn packet_len(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::LENGTH])
    }

    pub fn set_packet_id(&mut self, value: PacketId) {
        NetworkEndian::write_u32(&mut self.0[field::ID], value.0)
    }

    pub fn set_packet_len(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::LENGTH], value)
    }

    /// Return the packet data carried by this frame.
    pub fn payload_slice(&self) -> &[u8] {
        &self.0[field::PAYLOAD]
    }

    pub fn payload_mut_slice(&mut self) -> &mut [u8] {
        &mut self.0[field::PAYLOAD]
    }
}

impl AsRef<[u8]> for begin {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A high-level representation of the first frame header.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct BeginRepr {
    pub id: PacketId,
    pub length: u16,
}

impl BeginRepr {
    /// Parse a first frame and return a high-level representation.
    pub fn parse(frame: &begin) -> Result<BeginRepr> {
        frame.check_len()?;
        Ok(BeginRepr {
            id: frame.packet_id(),
            length: frame.packet_len(),
        })
    }

    /// Return the length of the header that will be emitted.
    pub fn header_len(&self) -> usize {
        field::PAYLOAD.start
    }

    /// Emit the header into a first frame.
    pub fn emit(&self, frame: &mut begin) {
        frame.set_packet_id(self.id);
        frame.set_packet_len(self.length);
    }
}
