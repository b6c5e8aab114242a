use core::fmt;

use crate::wire::{Error, Result};

enum_with_unknown! {
    /// Position of a frame within its fragmented packet.
    pub doc enum FrameType(u8) {
        /// The first frame of a packet, carrying the packet header.
        Begin = 0,
        /// Any subsequent frame.
        More = 1,
    }
}

/// The fragmentation header, packed into a 29-bit extended CAN identifier.
///
/// From the most to the least significant bit the identifier holds:
///
/// | field    | bits |
/// |----------|------|
/// | `src`    | 5    |
/// | `dst`    | 5    |
/// | `type`   | 1    |
/// | `remain` | 8    |
/// | `id`     | 10   |
///
/// Source and destination match the addresses of the carried packet. The `remain` field counts
/// the frames still to come after this one and decreases by exactly one per frame. The session
/// `id` separates concurrent packets between the same pair of nodes, similar to the identification
/// field of IP.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub struct Identifier {
    pub src: u8,
    pub dst: u8,
    pub frame_type: FrameType,
    pub remain: u8,
    pub session: u16,
}

mod field {
    /// A bit field as `(shift, width)`.
    pub(crate) type Bits = (u32, u32);

    pub(crate) const SESSION: Bits = (0, 10);
    pub(crate) const REMAIN:  Bits = (10, 8);
    pub(crate) const TYPE:    Bits = (18, 1);
    pub(crate) const DST:     Bits = (19, 5);
    pub(crate) const SRC:     Bits = (24, 5);

    pub(crate) const fn mask((shift, width): Bits) -> u32 {
        ((1 << width) - 1) << shift
    }

    pub(crate) const fn get(raw: u32, (shift, width): Bits) -> u32 {
        (raw >> shift) & ((1 << width) - 1)
    }

    pub(crate) const fn fits(value: u32, (_, width): Bits) -> bool {
        value >> width == 0
    }

    pub(crate) const fn make(value: u32, (shift, width): Bits) -> u32 {
        (value & ((1 << width) - 1)) << shift
    }
}

impl Identifier {
    /// All bits used by the extended identifier format.
    pub const MASK: u32 = 0x1fff_ffff;

    /// The bits shared by all frames of one packet: source, destination and session.
    pub const CONNECTION_MASK: u32 =
        field::mask(field::SRC) | field::mask(field::DST) | field::mask(field::SESSION);

    /// The destination bits, used for acceptance filtering.
    pub const DST_MASK: u32 = field::mask(field::DST);

    /// The largest node address.
    pub const MAX_ADDRESS: u8 = (1 << field::SRC.1) - 1;

    /// The number of distinct session identifiers.
    pub const SESSIONS: u16 = 1 << field::SESSION.1;

    /// Ensure that every field fits its width.
    ///
    /// Returns `Err(Error::Malformed)` otherwise. The frame type must also be one of the known
    /// values since the field only has a single bit.
    pub fn check(&self) -> Result<()> {
        let in_range = field::fits(self.src.into(), field::SRC)
            && field::fits(self.dst.into(), field::DST)
            && field::fits(self.session.into(), field::SESSION)
            && matches!(self.frame_type, FrameType::Begin | FrameType::More);
        if in_range {
            Ok(())
        } else {
            Err(Error::Malformed)
        }
    }

    /// Pack the fields into the raw 29-bit identifier.
    pub fn encode(&self) -> Result<u32> {
        self.check()?;
        Ok(field::make(self.src.into(), field::SRC)
            | field::make(self.dst.into(), field::DST)
            | field::make(u8::from(self.frame_type).into(), field::TYPE)
            | field::make(self.remain.into(), field::REMAIN)
            | field::make(self.session.into(), field::SESSION))
    }

    /// Unpack a raw identifier.
    ///
    /// Fails with `Error::Malformed` if any bit outside the 29-bit format is set.
    pub fn decode(raw: u32) -> Result<Self> {
        if raw & !Self::MASK != 0 {
            return Err(Error::Malformed);
        }

        Ok(Identifier {
            src: field::get(raw, field::SRC) as u8,
            dst: field::get(raw, field::DST) as u8,
            frame_type: FrameType::from(field::get(raw, field::TYPE) as u8),
            remain: field::get(raw, field::REMAIN) as u8,
            session: field::get(raw, field::SESSION) as u16,
        })
    }

    /// The connection bits of a raw identifier.
    pub fn connection(raw: u32) -> u32 {
        raw & Self::CONNECTION_MASK
    }

    /// The raw identifier bits selecting a destination address, for acceptance filters.
    pub fn destination(dst: u8) -> u32 {
        field::make(dst.into(), field::DST)
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FrameType::Begin => write!(f, "BEGIN"),
            FrameType::More => write!(f, "MORE"),
            FrameType::Unknown(other) => write!(f, "0x{:02x}", other),
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CFP src={} dst={} type={} remain={} id={}",
               self.src, self.dst, self.frame_type, self.remain, self.session)
    }
}
