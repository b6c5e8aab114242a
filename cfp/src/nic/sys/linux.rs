// Copyright (C) 2016 whitequark@whitequark.org
// Copyright (C) 2019 Andreas Molzer <andreas.molzer@tum.de>
//
// in large parts from `smoltcp` originally distributed under 0-clause BSD
use super::{ifreq, Errno, LibcResult, IoctlResult};
use libc;

pub(crate) const AF_CAN:         libc::c_int = 29;
pub(crate) const CAN_RAW:        libc::c_int = 1;
pub(crate) const SOL_CAN_RAW:    libc::c_int = 101;
pub(crate) const CAN_RAW_FILTER: libc::c_int = 1;

/// Marks an extended frame format identifier.
pub(crate) const CAN_EFF_FLAG:   u32 = 0x8000_0000;
/// Marks a remote transmission request.
pub(crate) const CAN_RTR_FLAG:   u32 = 0x4000_0000;
/// Marks an error frame.
pub(crate) const CAN_ERR_FLAG:   u32 = 0x2000_0000;
pub(crate) const CAN_EFF_MASK:   u32 = 0x1fff_ffff;

/// `struct can_frame` of `linux/can.h`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct can_frame {
    pub(crate) can_id: u32,
    pub(crate) can_dlc: u8,
    pub(crate) pad: u8,
    pub(crate) res0: u8,
    pub(crate) res1: u8,
    pub(crate) data: [u8; 8],
}

/// `struct can_filter` of `linux/can.h`.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub(crate) struct can_filter {
    pub(crate) can_id: u32,
    pub(crate) can_mask: u32,
}

/// `struct sockaddr_can` of `linux/can.h`, with the address union as raw storage.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub(crate) struct sockaddr_can {
    pub(crate) can_family: libc::sa_family_t,
    pub(crate) can_ifindex: libc::c_int,
    pub(crate) can_addr: [u64; 2],
}

pub(crate) trait IfIndex {
    fn get_if_index(&mut self, fd: libc::c_int) -> Result<libc::c_int, Errno>;
}

impl ifreq {
    pub(crate) const SIOCGIFINDEX: libc::Ioctl = 0x8933;
}

impl IfIndex for ifreq {
    fn get_if_index(&mut self, fd: libc::c_int) -> Result<libc::c_int, Errno> {
        #[repr(C)]
        struct Request {
            interface: ifreq,
            ifr_ifindex: libc::c_int,
            // The kernel copies a whole `struct ifreq`.
            _pad: [u8; 20],
        }

        let mut request = Request {
            interface: *self,
            ifr_ifindex: 0,
            _pad: [0; 20],
        };

        let res = unsafe {
            libc::ioctl(fd, Self::SIOCGIFINDEX, &mut request as *mut _)
        };

        IoctlResult(res).errno()?;

        Ok(request.ifr_ifindex)
    }
}
