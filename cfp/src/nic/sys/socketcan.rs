// Copyright (C) 2016 whitequark@whitequark.org
// Copyright (C) 2019 Andreas Molzer <andreas.molzer@tum.de>
//
// in large parts from `smoltcp` originally distributed under 0-clause BSD
use core::mem;
use std::os::unix::io::{AsRawFd, RawFd};

use libc;
use mutex::{BlockingMutex, ConstInit, ScopedRawMutex};

use super::{ifreq, linux, Errno, FdResult, IoLenResult, LibcResult};
use super::linux::IfIndex;

use crate::layer::{Error, Result};
use crate::nic::{Callbacks, Driver, Filter, Frame};
use crate::nic::common::Ring;
use crate::sync::{self, Context};

/// A raw CAN socket of the Linux SocketCAN subsystem.
///
/// Sends and receives frames with extended identifiers only. The socket is non-blocking. The
/// kernel does not report when a frame left the controller, so every frame it accepted counts as
/// transmitted and is reported from the next call to [`poll`]. Up to `Q` such reports are kept;
/// `send` refuses frames while the queue is full.
///
/// [`poll`]: #method.poll
pub struct SocketCan<R, const Q: usize> {
    lower: libc::c_int,
    ifreq: ifreq,
    sent: BlockingMutex<R, Ring<u32, Q>>,
}

impl<R: ScopedRawMutex + ConstInit, const Q: usize> SocketCan<R, Q> {
    /// Open a socket and bind it to the named interface, such as `can0` or `vcan0`.
    pub fn new(name: &str) -> core::result::Result<Self, Errno> {
        let lower = unsafe {
            libc::socket(
                linux::AF_CAN,
                libc::SOCK_RAW | libc::SOCK_NONBLOCK,
                linux::CAN_RAW)
        };

        FdResult(lower).errno()?;

        let mut socket = SocketCan {
            lower,
            ifreq: ifreq::new(name),
            sent: BlockingMutex::new(Ring::new()),
        };
        socket.bind_interface()?;
        Ok(socket)
    }
}

impl<R: ScopedRawMutex, const Q: usize> SocketCan<R, Q> {
    fn bind_interface(&mut self) -> core::result::Result<(), Errno> {
        let sockaddr = linux::sockaddr_can {
            can_family: linux::AF_CAN as libc::sa_family_t,
            can_ifindex: self.ifreq.get_if_index(self.lower)?,
            can_addr: [0; 2],
        };

        let res = unsafe {
            libc::bind(
                self.lower,
                &sockaddr as *const linux::sockaddr_can as *const libc::sockaddr,
                mem::size_of::<linux::sockaddr_can>() as libc::socklen_t)
        };

        FdResult(res).errno()
    }

    fn set_filter(&self, filter: Filter) -> core::result::Result<(), Errno> {
        let filter = linux::can_filter {
            can_id: filter.id | linux::CAN_EFF_FLAG,
            can_mask: filter.mask | linux::CAN_EFF_FLAG | linux::CAN_RTR_FLAG,
        };

        let res = unsafe {
            libc::setsockopt(
                self.lower,
                linux::SOL_CAN_RAW,
                linux::CAN_RAW_FILTER,
                &filter as *const linux::can_filter as *const libc::c_void,
                mem::size_of::<linux::can_filter>() as libc::socklen_t)
        };

        FdResult(res).errno()
    }

    fn write(&self, frame: &Frame) -> core::result::Result<(), Errno> {
        let raw = linux::can_frame {
            can_id: frame.id | linux::CAN_EFF_FLAG,
            can_dlc: frame.payload().len() as u8,
            data: frame.data,
            ..linux::can_frame::default()
        };

        let len = unsafe {
            libc::write(
                self.lower,
                &raw as *const linux::can_frame as *const libc::c_void,
                mem::size_of::<linux::can_frame>())
        };

        IoLenResult(len).errno()
    }

    /// Read a single frame, `None` if there is nothing to read.
    fn read(&self) -> core::result::Result<Option<linux::can_frame>, Errno> {
        let mut raw = linux::can_frame::default();
        let len = unsafe {
            libc::read(
                self.lower,
                &mut raw as *mut linux::can_frame as *mut libc::c_void,
                mem::size_of::<linux::can_frame>())
        };

        match IoLenResult(len).errno() {
            Ok(()) => Ok(Some(raw)),
            Err(ref err) if err.0 == libc::EWOULDBLOCK => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Report completed transmissions, then dispatch up to `max` received frames.
    ///
    /// Callbacks are invoked in interrupt context. Returns the number of received frames.
    pub fn poll(&self, callbacks: &dyn Callbacks, max: usize)
        -> core::result::Result<usize, Errno>
    {
        while let Some(id) = self.sent.with_lock(|sent| sent.pop()) {
            callbacks.on_frame_sent(id, Ok(()), Context::Interrupt);
        }

        let mut count = 0;
        while count < max {
            let raw = match self.read()? {
                None => break,
                Some(raw) => raw,
            };

            let flags = linux::CAN_EFF_FLAG | linux::CAN_RTR_FLAG | linux::CAN_ERR_FLAG;
            if raw.can_id & flags != linux::CAN_EFF_FLAG {
                net_trace!("socketcan: ignored frame {:08x}", raw.can_id);
                continue;
            }

            let frame = Frame {
                id: raw.can_id & linux::CAN_EFF_MASK,
                dlc: raw.can_dlc.min(8),
                data: raw.data,
            };
            callbacks.on_frame_received(&frame, Context::Interrupt);
            count += 1;
        }

        Ok(count)
    }

    /// The number of transmissions not yet reported.
    pub fn pending(&self) -> usize {
        self.sent.with_lock(|sent| sent.len())
    }
}

impl<R: ScopedRawMutex, const Q: usize> Driver for SocketCan<R, Q> {
    fn init(&mut self, filter: Filter) -> Result<()> {
        self.set_filter(filter).map_err(|err| {
            net_error!("socketcan: setting filter failed: {}", err);
            Error::Illegal
        })
    }

    fn send(&self, frame: &Frame, context: Context) -> Result<()> {
        sync::with_context(&self.sent, context, |sent| {
            if sent.len() == Q {
                return Err(Error::DriverSendFailure);
            }

            self.write(frame).map_err(|err| {
                net_debug!("socketcan: write failed: {}", err);
                Error::DriverSendFailure
            })?;

            sent.push(frame.id).map_err(|_| Error::DriverSendFailure)
        }).unwrap_or(Err(Error::DriverSendFailure))
    }
}

impl<R, const Q: usize> AsRawFd for SocketCan<R, Q> {
    fn as_raw_fd(&self) -> RawFd {
        self.lower
    }
}

impl<R, const Q: usize> Drop for SocketCan<R, Q> {
    fn drop(&mut self) {
        unsafe { libc::close(self.lower); }
    }
}
