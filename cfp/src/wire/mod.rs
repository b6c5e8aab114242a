/*! Low-level frame access and construction.

# An overview over frame representations

The `wire` module deals with the frame *representation*. It provides two levels of functionality.

 * First, it provides functions to extract fields from sequences of octets, and to insert fields
   into sequences of octets. This happens in the lowercase structures, here [`begin`] for the
   header at the start of the first frame of a packet.
 * Second, it provides a compact, high-level representation of header data that can be created from
   parsing and emitted into a sequence of octets. This happens through the `Repr` family of
   structs, e.g. [`BeginRepr`], and through [`Identifier`] which is packed into the 29-bit
   extended CAN identifier instead of the frame data.

[`begin`]: struct.begin.html
[`BeginRepr`]: struct.BeginRepr.html
[`Identifier`]: struct.Identifier.html

The lowercase structures guarantee that, if `check_len()` returned `Ok(())`, then no field
accessor or setter method will panic. The `Repr::parse()` method never panics and `Repr::emit()`
never panics as long as the underlying buffer is at least `Repr::header_len()` octets long.

# Examples

To emit a fragmentation header and the first frame of a packet, and then parse both back:

```rust
use cfp::wire::*;
let ident = Identifier {
    src: 3,
    dst: 7,
    frame_type: FrameType::Begin,
    remain: 3,
    session: 9,
};
let repr = BeginRepr {
    id: PacketId::new(Priority::Normal, 3, 7, 1, 16).unwrap(),
    length: 20,
};

let raw = ident.encode().expect("fields out of range");
let mut data = [0; 8];
{ // emission
    let frame = begin::new_unchecked_mut(&mut data);
    repr.emit(frame);
}
{ // parsing
    assert_eq!(Identifier::decode(raw), Ok(ident));
    let frame = begin::new_checked(&data)
        .expect("truncated frame");
    assert_eq!(BeginRepr::parse(frame), Ok(repr));
}
```
*/
#![allow(missing_docs)]

mod field {
    pub(crate) type Field = ::core::ops::Range<usize>;
    pub(crate) type Rest  = ::core::ops::RangeFrom<usize>;
}

mod error;
mod header;
mod identifier;

pub use self::error::{
    Error,
    Result};

pub use self::header::{
    begin,
    BeginRepr,
    Flags as PacketFlags,
    PacketId,
    Priority};

pub use self::identifier::{
    FrameType,
    Identifier};

/// The number of data bytes a classic CAN frame carries.
pub const FRAME_LEN: usize = 8;
