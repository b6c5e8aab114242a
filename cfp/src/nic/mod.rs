//! Encapsulates a CAN controller.
//!
//! Also permits software emulation or implementation of one as well, of course.
//!
//! A controller is driven through two halves. Downwards, the [`Driver`] accepts single frames for
//! transmission and is configured with an acceptance [`Filter`] once. Upwards, the controller
//! reports received frames and the outcome of each transmission through [`Callbacks`], usually
//! from its interrupt handler.
//!
//! [`Driver`]: trait.Driver.html
//! [`Filter`]: struct.Filter.html
//! [`Callbacks`]: trait.Callbacks.html
pub mod common;
pub mod loopback;
mod loss;

#[cfg(feature = "sys")]
#[path="sys/mod.rs"]
mod sys_internal;

use core::fmt;

use crate::layer::{Error, Result};
use crate::sync::Context;
use crate::wire::{Identifier, FRAME_LEN};

#[cfg(feature = "sys")]
pub use self::sys_internal::exports as sys;

pub use self::loss::{Lossy, PrngLoss, Xoroshiro256};

/// A CAN frame with an extended identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Frame {
    /// The 29-bit arbitration identifier.
    pub id: u32,
    /// The number of valid data bytes.
    pub dlc: u8,
    /// The data area.
    pub data: [u8; FRAME_LEN],
}

/// An acceptance filter.
///
/// A frame passes if its identifier agrees with `id` on every bit set in `mask`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Filter {
    /// The expected identifier bits.
    pub id: u32,
    /// The bits to compare.
    pub mask: u32,
}

/// A CAN controller accepting frames for transmission.
pub trait Driver {
    /// Configure the acceptance filter.
    ///
    /// Called once when an interface is created on top of the driver.
    fn init(&mut self, filter: Filter) -> Result<()>;

    /// Queue a frame for transmission.
    ///
    /// An `Ok` promises a later call to [`Callbacks::on_frame_sent`] for this frame. An `Err`
    /// means the frame was refused and no completion will ever be reported for it.
    ///
    /// The completion is reported from interrupt context. Should the interface find its slot
    /// table locked at that moment, the report is dropped and the packet stays bound until its
    /// slot goes stale.
    ///
    /// [`Callbacks::on_frame_sent`]: trait.Callbacks.html#tymethod.on_frame_sent
    fn send(&self, frame: &Frame, context: Context) -> Result<()>;
}

/// The entry points a controller calls back into.
pub trait Callbacks {
    /// A frame passed the acceptance filter.
    fn on_frame_received(&self, frame: &Frame, context: Context);

    /// A frame previously accepted by `Driver::send` left the controller, or failed to.
    fn on_frame_sent(&self, id: u32, status: Result<()>, context: Context);
}

/// A node attached to a software bus.
#[derive(Clone, Copy)]
pub struct Station<'a> {
    /// The node address, compared with the source field of sent frames.
    pub address: u8,
    /// The acceptance filter of the node.
    pub filter: Filter,
    /// The entry points of the node.
    pub callbacks: &'a dyn Callbacks,
}

impl Frame {
    /// Create a frame, copying the data.
    ///
    /// Fails with `Error::BadSize` if the data exceeds eight bytes or with `Error::Illegal` if the
    /// identifier does not fit 29 bits.
    pub fn new(id: u32, data: &[u8]) -> Result<Self> {
        if id & !Identifier::MASK != 0 {
            return Err(Error::Illegal);
        }

        if data.len() > FRAME_LEN {
            return Err(Error::BadSize);
        }

        let mut frame = Frame {
            id,
            dlc: data.len() as u8,
            data: [0; FRAME_LEN],
        };
        frame.data[..data.len()].copy_from_slice(data);
        Ok(frame)
    }

    /// The valid data bytes.
    ///
    /// A corrupt length code is clamped to the size of the data area.
    pub fn payload(&self) -> &[u8] {
        let len = usize::from(self.dlc).min(FRAME_LEN);
        &self.data[..len]
    }
}

impl Filter {
    /// Accept all frames addressed to `address`.
    pub fn masked(address: u8) -> Self {
        Filter {
            id: Identifier::destination(address),
            mask: Identifier::DST_MASK,
        }
    }

    /// Accept every frame.
    pub fn promiscuous() -> Self {
        Filter { id: 0, mask: 0 }
    }

    /// Check a frame identifier against the filter.
    pub fn accepts(&self, id: u32) -> bool {
        (id ^ self.id) & self.mask == 0
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:08x} [{}]", self.id, self.dlc)?;
        for byte in self.payload() {
            write!(f, " {:02x}", byte)?;
        }
        Ok(())
    }
}

impl<D: Driver + ?Sized> Driver for &'_ mut D {
    fn init(&mut self, filter: Filter) -> Result<()> {
        (**self).init(filter)
    }

    fn send(&self, frame: &Frame, context: Context) -> Result<()> {
        (**self).send(frame, context)
    }
}

impl<C: Callbacks + ?Sized> Callbacks for &'_ C {
    fn on_frame_received(&self, frame: &Frame, context: Context) {
        (**self).on_frame_received(frame, context)
    }

    fn on_frame_sent(&self, id: u32, status: Result<()>, context: Context) {
        (**self).on_frame_sent(id, status, context)
    }
}
