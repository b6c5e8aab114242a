//! Implementation of a software CAN bus.
use mutex::{BlockingMutex, ConstInit, ScopedRawMutex};

use crate::layer::{Error, Result};
use crate::sync::{self, Context};
use crate::wire::Identifier;

use super::common::Ring;
use super::{Driver, Filter, Frame, Station};

/// A software CAN bus.
///
/// Maintains a ring buffer of frames in flight. Frames are only moved when [`poll`] is called,
/// which plays the role of the controller interrupt for all stations on the bus: each frame is
/// handed to every other station whose filter accepts it, then its sender is told about the
/// completed transmission.
///
/// Errors can be injected to exercise the error paths of the layers above.
///
/// [`poll`]: #method.poll
pub struct Loopback<R, const Q: usize> {
    state: BlockingMutex<R, State<Q>>,
}

struct State<const Q: usize> {
    frames: Ring<InFlight, Q>,
    /// Number of upcoming frames to refuse in `send`.
    refuse: u32,
    /// Number of upcoming frames whose transmission fails.
    corrupt: u32,
}

#[derive(Clone, Copy)]
struct InFlight {
    frame: Frame,
    failed: bool,
}

impl<R: ScopedRawMutex + ConstInit, const Q: usize> Loopback<R, Q> {
    /// Create an idle bus that holds up to `Q` frames in flight.
    pub fn new() -> Self {
        Loopback {
            state: BlockingMutex::new(State {
                frames: Ring::new(),
                refuse: 0,
                corrupt: 0,
            }),
        }
    }
}

impl<R: ScopedRawMutex + ConstInit, const Q: usize> Default for Loopback<R, Q> {
    fn default() -> Self {
        Loopback::new()
    }
}

impl<R: ScopedRawMutex, const Q: usize> Loopback<R, Q> {
    /// Refuse the next `count` frames handed to `send`.
    pub fn refuse(&self, count: u32) {
        self.state.with_lock(|state| state.refuse = count)
    }

    /// Let the transmission of the next `count` accepted frames fail.
    ///
    /// The failed frames are not delivered and their sender is told about the error.
    pub fn inject_error(&self, count: u32) {
        self.state.with_lock(|state| state.corrupt = count)
    }

    /// The number of frames in flight.
    pub fn pending(&self) -> usize {
        self.state.with_lock(|state| state.frames.len())
    }

    /// Move up to `max` frames across the bus.
    ///
    /// Returns the number of frames moved. Callbacks are invoked in interrupt context and without
    /// holding the bus lock, so they may send further frames.
    pub fn poll(&self, stations: &[Station], max: usize) -> usize {
        let mut count = 0;

        for _ in 0..max {
            let InFlight { frame, failed } = match self.state.with_lock(|state| state.frames.pop()) {
                None => break,
                Some(in_flight) => in_flight,
            };

            let src = Identifier::decode(frame.id).ok().map(|ident| ident.src);

            if !failed {
                stations.iter()
                    .filter(|station| Some(station.address) != src)
                    .filter(|station| station.filter.accepts(frame.id))
                    .for_each(|station| {
                        station.callbacks.on_frame_received(&frame, Context::Interrupt)
                    });
            }

            let status = if failed { Err(Error::DriverSendFailure) } else { Ok(()) };
            stations.iter()
                .filter(|station| Some(station.address) == src)
                .for_each(|station| {
                    station.callbacks.on_frame_sent(frame.id, status, Context::Interrupt)
                });

            count += 1;
        }

        count
    }
}

impl<R: ScopedRawMutex, const Q: usize> Driver for &'_ Loopback<R, Q> {
    fn init(&mut self, filter: Filter) -> Result<()> {
        net_debug!("loopback: station filter {:08x}/{:08x}", filter.id, filter.mask);
        Ok(())
    }

    fn send(&self, frame: &Frame, context: Context) -> Result<()> {
        let frame = *frame;
        sync::with_context(&self.state, context, |state| {
            if state.refuse > 0 {
                state.refuse -= 1;
                return Err(Error::DriverSendFailure);
            }

            let failed = state.corrupt > 0;
            state.frames.push(InFlight { frame, failed })
                .map_err(|_| Error::DriverSendFailure)?;
            if failed {
                state.corrupt -= 1;
            }
            Ok(())
        }).unwrap_or(Err(Error::DriverSendFailure))
    }
}
