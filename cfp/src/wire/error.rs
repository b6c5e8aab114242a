use core::fmt;

/// The error type for parsing and emitting frame representations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Error {
    /// An incoming frame could not be parsed because it was shorter than assumed.
    ///
    /// A first frame must at least hold the packet identifier and the packet length.
    Truncated,

    /// A value does not fit the width of its field.
    ///
    /// Examples: an identifier with bits set above the 29-bit extended format; a node address
    /// that does not fit five bits; a frame payload longer than eight bytes.
    Malformed,
}

/// The result type for the wire module.
pub type Result<T> = core::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Truncated => write!(f, "truncated frame"),
            Error::Malformed => write!(f, "field value out of range"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
