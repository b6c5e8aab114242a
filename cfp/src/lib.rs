//! The CAN fragmentation protocol (CFP) interface of a small satellite network stack.
//!
//! ## Table of contents
//!
//! This is also a recommended reading order but feel free to skip ahead, each chapter tries to be
//! somewhat self-contained.
//!
//! 1. [Design](#design-and-relevant-core-concepts)
//! 2. [The wire module](wire/index.html)
//!    1. [The fragmentation identifier](wire/struct.Identifier.html)
//!    1. [The first frame header](wire/struct.begin.html)
//! 3. [The can layer](layer/can/index.html)
//!    1. [Buffer pool](layer/can/pool/index.html)
//!    1. [Receiving](layer/can/index.html#receiving)
//!    1. [Sending](layer/can/index.html#sending)
//! 4. [CAN drivers](nic/index.html)
//!    1. [Software bus](nic/loopback/index.html)
//!    1. [Simulated loss](nic/struct.Lossy.html)
//! 5. Internals
//!    1. [Packet storage](storage/index.html)
//!    2. [Execution contexts](sync/index.html)
//!
//! ## Design and relevant core concepts
//!
//! A CAN frame carries at most eight bytes. Network packets are larger, up to the interface MTU of
//! 256 bytes, so they are split into a sequence of frames on transmission and glued back together
//! on reception. All frames of one packet share the source, destination and session identifier
//! bits of the 29-bit extended CAN identifier; the remaining bits say whether a frame starts a
//! packet and how many frames are still to come.
//!
//! Nothing within `cfp` *ever* dynamically allocates memory. Every in-flight packet occupies one
//! slot of a pool whose size is fixed at compile time, and packet buffers come from an allocator
//! chosen by the caller. Frames arrive in driver callbacks which usually run in interrupt context.
//! Every entry point thus takes an explicit [`Context`] that decides how shared state is locked
//! and which clock is read. No path taken in interrupt context ever blocks.
//!
//! [`Context`]: sync/enum.Context.html
#![warn(missing_docs)]
#![warn(unreachable_pub)]

// tests should be able to use `std`
#![cfg_attr(all(
    not(feature = "std"),
    not(test)),
no_std)]

#[macro_use] mod macros;
pub mod layer;
pub mod nic;
pub mod storage;
pub mod sync;
pub mod time;
pub mod wire;
