use std::sync::Mutex;

use mutex::raw_impls::cs::CriticalSectionRawMutex;

use super::*;
use crate::layer::FnHandler;
use crate::nic::{Lossy, PrngLoss, loopback::Loopback};
use crate::storage::{Packet, PacketBuffer, PacketPool};
use crate::sync::StdSemaphore;
use crate::time::{Instant, ManualClock};
use crate::wire::{begin, BeginRepr, FrameType, PacketId, Priority, FRAME_LEN};

type Raw = CriticalSectionRawMutex;
type Bus = Loopback<Raw, 64>;
type Packets = PacketPool<Raw, 8>;
type Iface<'a> = Interface<
    Raw,
    &'a Packets,
    &'a ManualClock,
    StdSemaphore,
    &'a Bus,
    &'a Collector<'a>,
    4>;

const SNIFFER: u8 = 31;

struct Fixture {
    bus: Bus,
    packets: Packets,
    clock: ManualClock,
}

/// Keeps a copy of every delivered packet and returns the buffer.
struct Collector<'a> {
    packets: &'a Packets,
    received: Mutex<Vec<(PacketId, Vec<u8>)>>,
}

/// Records every frame seen on the bus.
#[derive(Default)]
struct Sniffer {
    frames: Mutex<Vec<Frame>>,
}

impl Fixture {
    fn new() -> Self {
        Fixture {
            bus: Loopback::new(),
            packets: PacketPool::new(),
            clock: ManualClock::new(Instant::from_millis(0)),
        }
    }

    fn collector(&self) -> Collector<'_> {
        Collector {
            packets: &self.packets,
            received: Mutex::new(Vec::new()),
        }
    }

    fn node<'a>(&'a self, address: u8, collector: &'a Collector<'a>) -> Iface<'a> {
        Interface::new(Config::new(address), &self.bus, collector, &self.packets, &self.clock)
            .expect("valid configuration")
    }

    fn packet(&self, src: u8, dst: u8, data: &[u8]) -> Packet {
        let mut packet = self.packets.acquire(data.len(), Context::Task)
            .expect("packet available");
        packet.set_id(PacketId::new(Priority::Normal, src, dst, 1, 16).unwrap());
        packet.set_len(data.len()).unwrap();
        packet.buffer_mut()[..data.len()].copy_from_slice(data);
        packet
    }

    /// Move frames until the bus is idle.
    fn run(&self, stations: &[Station]) {
        while self.bus.poll(stations, 64) > 0 {}
    }
}

impl Receiver<Packet> for Collector<'_> {
    fn deliver(&self, packet: Packet, iface: &Identity, _: Context) {
        assert_eq!(iface.name, "CAN");
        assert_eq!(iface.mtu, MTU);
        self.received.lock().unwrap().push((packet.id(), packet.payload().to_vec()));
        self.packets.release(packet, Context::Interrupt);
    }
}

impl Collector<'_> {
    fn take(&self) -> Vec<(PacketId, Vec<u8>)> {
        core::mem::take(&mut *self.received.lock().unwrap())
    }
}

impl Callbacks for Sniffer {
    fn on_frame_received(&self, frame: &Frame, _: Context) {
        self.frames.lock().unwrap().push(*frame);
    }

    fn on_frame_sent(&self, _: u32, _: Result<()>, _: Context) {}
}

fn data(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 1) as u8).collect()
}

fn first_frame(src: u8, dst: u8, session: u16, remain: u8, length: u16, data: &[u8]) -> Frame {
    let key = Identifier { src, dst, frame_type: FrameType::Begin, remain, session }
        .encode()
        .unwrap();
    let repr = BeginRepr {
        id: PacketId::new(Priority::Normal, src, dst, 0, 0).unwrap(),
        length,
    };
    let mut bytes = vec![0; HEADER_LEN + data.len()];
    repr.emit(begin::new_unchecked_mut(&mut bytes));
    bytes[HEADER_LEN..].copy_from_slice(data);
    Frame::new(key, &bytes).unwrap()
}

fn more_frame(src: u8, dst: u8, session: u16, remain: u8, data: &[u8]) -> Frame {
    let key = Identifier { src, dst, frame_type: FrameType::More, remain, session }
        .encode()
        .unwrap();
    Frame::new(key, data).unwrap()
}

#[test]
fn twenty_bytes_end_to_end() {
    let fixture = Fixture::new();
    let (out, inc) = (fixture.collector(), fixture.collector());
    let a = fixture.node(3, &out);
    let b = fixture.node(7, &inc);
    let sniffer = Sniffer::default();
    let stations = [
        a.station(),
        b.station(),
        Station { address: SNIFFER, filter: Filter::promiscuous(), callbacks: &sniffer },
    ];

    let payload = data(20);
    let packet = fixture.packet(3, 7, &payload);
    assert_eq!(a.send(packet, Duration::ZERO), Ok(()));
    fixture.run(&stations);

    let frames = sniffer.frames.lock().unwrap().clone();
    let idents: Vec<Identifier> = frames.iter()
        .map(|frame| Identifier::decode(frame.id).unwrap())
        .collect();

    assert_eq!(frames.len(), 4);
    assert_eq!(frames[0].payload().len(), HEADER_LEN + 2);
    let data_bytes: Vec<usize> = frames[1..].iter().map(|frame| frame.payload().len()).collect();
    assert_eq!(data_bytes, [8, 8, 2]);

    let remain: Vec<u8> = idents.iter().map(|ident| ident.remain).collect();
    assert_eq!(remain, [3, 2, 1, 0]);
    assert_eq!(idents[0].frame_type, FrameType::Begin);
    for ident in &idents {
        assert_eq!((ident.src, ident.dst), (3, 7));
        assert_eq!(ident.session, idents[0].session);
    }
    for ident in &idents[1..] {
        assert_eq!(ident.frame_type, FrameType::More);
    }

    let repr = BeginRepr::parse(begin::new_checked(frames[0].payload()).unwrap()).unwrap();
    assert_eq!(repr.length, 20);
    assert_eq!((repr.id.src(), repr.id.dst()), (3, 7));

    let received = inc.take();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].1, payload);
    assert_eq!(received[0].0, repr.id);
    assert!(out.take().is_empty());

    assert_eq!(a.stats().snapshot(), Counters { tx: 1, tx_bytes: 20, ..Counters::default() });
    assert_eq!(b.stats().snapshot(), Counters { rx: 1, rx_bytes: 20, ..Counters::default() });
    assert_eq!(a.pool().in_use(), 0);
    assert_eq!(b.pool().in_use(), 0);
    assert_eq!(fixture.packets.available(), 8);
}

#[test]
fn every_length_round_trips() {
    let fixture = Fixture::new();
    let (out, inc) = (fixture.collector(), fixture.collector());
    let a = fixture.node(3, &out);
    let b = fixture.node(7, &inc);
    let stations = [a.station(), b.station()];

    for len in 0..=MTU {
        let payload = data(len);
        assert_eq!(a.send(fixture.packet(3, 7, &payload), Duration::ZERO), Ok(()));
        fixture.run(&stations);

        let received = inc.take();
        assert_eq!(received.len(), 1, "length {}", len);
        assert_eq!(received[0].1, payload, "length {}", len);
    }

    let sent = a.stats().snapshot();
    assert_eq!(sent.tx as usize, MTU + 1);
    assert_eq!(sent.tx_error, 0);
    assert_eq!(b.stats().snapshot().frame, 0);
    assert_eq!(fixture.packets.available(), 8);
}

#[test]
fn frame_count_matches_remain() {
    let fixture = Fixture::new();
    let (out, inc) = (fixture.collector(), fixture.collector());
    let a = fixture.node(3, &out);
    let b = fixture.node(7, &inc);
    let sniffer = Sniffer::default();
    let stations = [
        a.station(),
        b.station(),
        Station { address: SNIFFER, filter: Filter::promiscuous(), callbacks: &sniffer },
    ];

    for len in [0, 1, 2, 3, 10, 11, 249, 250, 251, MTU] {
        a.send(fixture.packet(3, 7, &data(len)), Duration::ZERO).unwrap();
        fixture.run(&stations);

        let frames = core::mem::take(&mut *sniffer.frames.lock().unwrap());
        let first = Identifier::decode(frames[0].id).unwrap();
        assert_eq!(frames.len(), usize::from(first.remain) + 1, "length {}", len);
        assert_eq!(frames.len(), (len + HEADER_LEN + FRAME_LEN - 1) / FRAME_LEN, "length {}", len);
    }
}

#[test]
fn pool_is_bounded() {
    let fixture = Fixture::new();
    let inc = fixture.collector();
    let b = fixture.node(7, &inc);

    for session in 0..4 {
        b.on_frame_received(&first_frame(3, 7, session, 3, 20, &[1, 2]), Context::Interrupt);
    }
    assert_eq!(b.pool().in_use(), 4);
    assert_eq!(b.stats().snapshot().rx_error, 0);

    b.on_frame_received(&first_frame(3, 7, 4, 3, 20, &[1, 2]), Context::Interrupt);
    assert_eq!(b.stats().snapshot().rx_error, 1);
    assert_eq!(fixture.packets.available(), 4);
}

#[test]
fn first_frame_without_buffer() {
    let fixture = Fixture::new();
    let inc = fixture.collector();
    let b = fixture.node(7, &inc);

    let held: Vec<Packet> = core::iter::from_fn(|| fixture.packets.acquire(MTU, Context::Task))
        .collect();
    assert_eq!(held.len(), 8);

    b.on_frame_received(&first_frame(3, 7, 1, 1, 4, &[1, 2]), Context::Interrupt);
    assert_eq!(b.pool().in_use(), 0);
    assert_eq!(b.stats().snapshot(), Counters { frame: 1, ..Counters::default() });

    for packet in held {
        fixture.packets.release(packet, Context::Task);
    }
    b.on_frame_received(&first_frame(3, 7, 1, 1, 4, &[1, 2]), Context::Interrupt);
    assert_eq!(b.pool().in_use(), 1);
}

#[test]
fn contended_interrupt_drops_frame() {
    let fixture = Fixture::new();
    let inc = fixture.collector();
    let b = fixture.node(7, &inc);

    let dropped = b.pool().access(Context::Task, |_| {
        b.on_frame_received(&first_frame(3, 7, 1, 0, 2, &[1, 2]), Context::Interrupt);
    });
    assert_eq!(dropped, Ok(()));
    assert_eq!(b.stats().snapshot(), Counters { rx_error: 1, ..Counters::default() });
    assert!(inc.take().is_empty());
    assert_eq!(b.pool().in_use(), 0);

    // Without the task holding the table the same frame goes through.
    b.on_frame_received(&first_frame(3, 7, 1, 0, 2, &[1, 2]), Context::Interrupt);
    assert_eq!(inc.take().len(), 1);
}

#[test]
fn stale_slot_reclaimed_once() {
    let fixture = Fixture::new();
    let inc = fixture.collector();
    let b = fixture.node(7, &inc);

    for session in 0..4 {
        b.on_frame_received(&first_frame(3, 7, session, 3, 20, &[1, 2]), Context::Interrupt);
    }
    assert_eq!(fixture.packets.available(), 4);

    fixture.clock.advance(STALE_TIMEOUT);
    b.on_frame_received(&first_frame(3, 7, 4, 3, 20, &[1, 2]), Context::Interrupt);
    assert_eq!(b.stats().snapshot().rx_error, 1);

    fixture.clock.advance(Duration::from_millis(1));
    b.on_frame_received(&first_frame(3, 7, 4, 3, 20, &[1, 2]), Context::Interrupt);
    assert_eq!(b.stats().snapshot().rx_error, 1);
    // One stale packet went back, one was taken for the new session.
    assert_eq!(fixture.packets.available(), 4);
    assert_eq!(b.pool().in_use(), 4);

    // The evicted session is gone, its continuation is out of order.
    b.on_frame_received(&more_frame(3, 7, 0, 2, &[0; 8]), Context::Interrupt);
    assert_eq!(b.stats().snapshot().frame, 1);

    // The new session completes normally.
    b.on_frame_received(&more_frame(3, 7, 4, 2, &[0; 8]), Context::Interrupt);
    b.on_frame_received(&more_frame(3, 7, 4, 1, &[0; 8]), Context::Interrupt);
    b.on_frame_received(&more_frame(3, 7, 4, 0, &[0; 2]), Context::Interrupt);
    assert_eq!(inc.take().len(), 1);
    assert_eq!(b.pool().in_use(), 3);
    assert_eq!(fixture.packets.available(), 5);
}

#[test]
fn continuation_without_session() {
    let fixture = Fixture::new();
    let inc = fixture.collector();
    let b = fixture.node(7, &inc);

    b.on_frame_received(&more_frame(3, 7, 9, 0, &[1, 2, 3]), Context::Interrupt);
    assert_eq!(b.stats().snapshot(), Counters { frame: 1, ..Counters::default() });
    assert_eq!(b.pool().in_use(), 0);
    assert!(inc.take().is_empty());
}

#[test]
fn skipped_frame_drops_packet() {
    let fixture = Fixture::new();
    let inc = fixture.collector();
    let b = fixture.node(7, &inc);

    b.on_frame_received(&first_frame(3, 7, 9, 3, 20, &[1, 2]), Context::Interrupt);
    assert_eq!(fixture.packets.available(), 7);
    b.on_frame_received(&more_frame(3, 7, 9, 1, &[0; 8]), Context::Interrupt);

    assert_eq!(b.stats().snapshot().frame, 1);
    assert_eq!(b.pool().in_use(), 0);
    assert_eq!(fixture.packets.available(), 8);

    // A repeated frame does not continue the sequence either.
    b.on_frame_received(&first_frame(3, 7, 9, 3, 20, &[1, 2]), Context::Interrupt);
    b.on_frame_received(&more_frame(3, 7, 9, 2, &[0; 8]), Context::Interrupt);
    b.on_frame_received(&more_frame(3, 7, 9, 2, &[0; 8]), Context::Interrupt);
    assert_eq!(b.stats().snapshot().frame, 2);
    assert_eq!(b.pool().in_use(), 0);
    assert!(inc.take().is_empty());
}

#[test]
fn overflow_is_rejected() {
    let fixture = Fixture::new();
    let inc = fixture.collector();
    let b = fixture.node(7, &inc);

    // Declares 4 bytes but carries 2 + 8.
    b.on_frame_received(&first_frame(3, 7, 1, 1, 4, &[1, 2]), Context::Interrupt);
    b.on_frame_received(&more_frame(3, 7, 1, 0, &[0; 8]), Context::Interrupt);
    assert_eq!(b.stats().snapshot().frame, 1);
    assert_eq!(b.pool().in_use(), 0);

    // Declares more than a buffer holds.
    b.on_frame_received(&first_frame(3, 7, 2, 37, 300, &[1, 2]), Context::Interrupt);
    assert_eq!(b.stats().snapshot().frame, 2);
    assert_eq!(b.pool().in_use(), 0);

    // Carries data beyond an empty packet.
    b.on_frame_received(&first_frame(3, 7, 3, 0, 0, &[1]), Context::Interrupt);
    assert_eq!(b.stats().snapshot().frame, 3);

    assert_eq!(fixture.packets.available(), 8);
    assert!(inc.take().is_empty());
}

#[test]
fn short_first_frame() {
    let fixture = Fixture::new();
    let inc = fixture.collector();
    let b = fixture.node(7, &inc);

    let key = Identifier { src: 3, dst: 7, frame_type: FrameType::Begin, remain: 0, session: 5 }
        .encode()
        .unwrap();
    b.on_frame_received(&Frame::new(key, &[0; 5]).unwrap(), Context::Interrupt);
    assert_eq!(b.stats().snapshot().frame, 1);
    assert_eq!(b.pool().in_use(), 0);
    assert_eq!(fixture.packets.available(), 8);
}

#[test]
fn empty_packet_in_single_frame() {
    let fixture = Fixture::new();
    let inc = fixture.collector();
    let b = fixture.node(7, &inc);

    b.on_frame_received(&first_frame(3, 7, 5, 0, 0, &[]), Context::Interrupt);
    let received = inc.take();
    assert_eq!(received.len(), 1);
    assert!(received[0].1.is_empty());
    assert_eq!(b.stats().snapshot(), Counters { rx: 1, ..Counters::default() });
}

#[test]
fn unknown_frame_type() {
    let fixture = Fixture::new();
    let inc = fixture.collector();
    let b = fixture.node(7, &inc);

    let frame = first_frame(3, 7, 5, 3, 20, &[1, 2]);
    b.on_frame_received(&frame, Context::Interrupt);
    assert_eq!(b.pool().in_use(), 1);

    let ident = Identifier {
        frame_type: FrameType::Unknown(2),
        remain: 2,
        ..Identifier::decode(frame.id).unwrap()
    };
    b.handle(frame.id, ident, &[0; 8], Context::Interrupt);
    assert_eq!(b.stats().snapshot().frame, 1);
    assert_eq!(b.pool().in_use(), 0);
    assert_eq!(fixture.packets.available(), 8);

    // Without a session it is dropped all the same.
    b.handle(frame.id, ident, &[0; 8], Context::Interrupt);
    assert_eq!(b.stats().snapshot().frame, 2);
    assert_eq!(b.pool().in_use(), 0);
}

#[test]
fn restarted_session_reuses_buffer() {
    let fixture = Fixture::new();
    let inc = fixture.collector();
    let b = fixture.node(7, &inc);

    b.on_frame_received(&first_frame(3, 7, 5, 3, 20, &[9, 9]), Context::Interrupt);
    b.on_frame_received(&more_frame(3, 7, 5, 2, &[9; 8]), Context::Interrupt);
    assert_eq!(fixture.packets.available(), 7);

    b.on_frame_received(&first_frame(3, 7, 5, 1, 4, &[1, 2]), Context::Interrupt);
    assert_eq!(b.stats().snapshot().frame, 1);
    assert_eq!(fixture.packets.available(), 7);

    b.on_frame_received(&more_frame(3, 7, 5, 0, &[3, 4]), Context::Interrupt);
    let received = inc.take();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].1, [1, 2, 3, 4]);
    assert_eq!(b.pool().in_use(), 0);
    assert_eq!(fixture.packets.available(), 8);
}

#[test]
fn sessions_are_interleaved() {
    let fixture = Fixture::new();
    let inc = fixture.collector();
    let b = fixture.node(7, &inc);

    b.on_frame_received(&first_frame(3, 7, 1, 1, 4, &[1, 1]), Context::Interrupt);
    b.on_frame_received(&first_frame(4, 7, 1, 1, 4, &[2, 2]), Context::Interrupt);
    b.on_frame_received(&first_frame(3, 7, 2, 1, 4, &[3, 3]), Context::Interrupt);
    assert_eq!(b.pool().in_use(), 3);

    b.on_frame_received(&more_frame(3, 7, 2, 0, &[3, 3]), Context::Interrupt);
    b.on_frame_received(&more_frame(4, 7, 1, 0, &[2, 2]), Context::Interrupt);
    b.on_frame_received(&more_frame(3, 7, 1, 0, &[1, 1]), Context::Interrupt);

    let payloads: Vec<Vec<u8>> = inc.take().into_iter().map(|(_, data)| data).collect();
    assert_eq!(payloads, [vec![3; 4], vec![2; 4], vec![1; 4]]);
    assert_eq!(b.stats().snapshot().frame, 0);
}

#[test]
fn blocking_send_waits_for_completion() {
    let fixture = Fixture::new();
    let (out, inc) = (fixture.collector(), fixture.collector());
    let a = fixture.node(3, &out);
    let b = fixture.node(7, &inc);
    let packet = fixture.packet(3, 7, &data(100));

    std::thread::scope(|scope| {
        let sender = scope.spawn(|| a.send(packet, Duration::from_secs(10)));

        let stations = [a.station(), b.station()];
        while !sender.is_finished() {
            fixture.bus.poll(&stations, 1);
            std::thread::yield_now();
        }

        assert_eq!(sender.join().unwrap(), Ok(()));
    });

    assert_eq!(inc.take().len(), 1);
    assert_eq!(a.stats().snapshot().tx, 1);
    assert_eq!(a.pool().in_use(), 0);
}

#[test]
fn blocking_send_times_out() {
    let fixture = Fixture::new();
    let (out, inc) = (fixture.collector(), fixture.collector());
    let a = fixture.node(3, &out);
    let b = fixture.node(7, &inc);

    let packet = fixture.packet(3, 7, &data(20));
    assert_eq!(a.send(packet, Duration::from_millis(10)), Err(Error::Timeout));
    assert_eq!(a.stats().snapshot().tx_error, 0);
    assert_eq!(a.pool().in_use(), 1);

    // The packet still goes out afterwards and is counted once.
    fixture.run(&[a.station(), b.station()]);
    assert_eq!(inc.take().len(), 1);
    assert_eq!(a.pool().in_use(), 0);
    assert_eq!(a.stats().snapshot().tx, 1);
    assert_eq!(a.stats().snapshot().tx_error, 0);

    // The signal is usable for the next packet.
    let packet = fixture.packet(3, 7, &data(3));
    assert_eq!(a.send(packet, Duration::ZERO), Ok(()));
    fixture.run(&[a.station(), b.station()]);
    assert_eq!(a.stats().snapshot().tx, 2);
}

#[test]
fn blocking_send_reports_its_own_packet() {
    let fixture = Fixture::new();
    let (out, inc) = (fixture.collector(), fixture.collector());
    let a: Interface<Raw, _, _, StdSemaphore, _, _, 1> =
        Interface::new(Config::new(3), &fixture.bus, &out, &fixture.packets, &fixture.clock)
            .unwrap();
    let b = fixture.node(7, &inc);
    let stations = [a.station(), b.station()];
    let mut reused = 0;

    for _ in 0..20 {
        let first = fixture.packet(3, 7, &[]);
        let second = fixture.packet(3, 7, &data(1));

        std::thread::scope(|scope| {
            let waiting = scope.spawn(|| a.send(first, Duration::from_millis(200)));
            while fixture.bus.pending() == 0 {
                std::thread::yield_now();
            }

            // Complete the awaited packet, then immediately try to take its slot.
            assert_eq!(fixture.bus.poll(&stations, 1), 1);
            match a.send(second, Duration::ZERO) {
                Ok(()) => reused += 1,
                Err(err) => assert_eq!(err, Error::PoolExhausted),
            }

            assert_eq!(waiting.join().unwrap(), Ok(()));
        });

        fixture.run(&stations);
        assert_eq!(a.pool().in_use(), 0);
    }

    let counters = a.stats().snapshot();
    assert_eq!(counters.tx, 20 + reused);
    assert_eq!(counters.tx + counters.tx_error, 40);
    assert_eq!(inc.take().len(), 20 + reused as usize);
    assert_eq!(fixture.packets.available(), 8);
}

#[test]
fn blocking_send_reports_failure() {
    let fixture = Fixture::new();
    let (out, inc) = (fixture.collector(), fixture.collector());
    let a = fixture.node(3, &out);
    let b = fixture.node(7, &inc);
    let packet = fixture.packet(3, 7, &data(20));

    fixture.bus.inject_error(1);
    std::thread::scope(|scope| {
        let sender = scope.spawn(|| a.send(packet, Duration::from_secs(10)));

        let stations = [a.station(), b.station()];
        while !sender.is_finished() {
            fixture.bus.poll(&stations, 1);
            std::thread::yield_now();
        }

        assert_eq!(sender.join().unwrap(), Err(Error::DriverSendFailure));
    });

    let counters = a.stats().snapshot();
    assert_eq!((counters.tx, counters.tx_error), (0, 1));
    assert_eq!(a.pool().in_use(), 0);
    assert!(inc.take().is_empty());
}

#[test]
fn refused_frame_releases_slot() {
    let fixture = Fixture::new();
    let (out, inc) = (fixture.collector(), fixture.collector());
    let a = fixture.node(3, &out);
    let b = fixture.node(7, &inc);

    fixture.bus.refuse(1);
    let packet = fixture.packet(3, 7, &data(20));
    assert_eq!(a.send(packet, Duration::ZERO), Err(Error::DriverSendFailure));
    assert_eq!(a.pool().in_use(), 0);
    assert_eq!(a.stats().snapshot().tx_error, 1);
    assert_eq!(fixture.packets.available(), 8);

    // Refused in the middle of a packet.
    let packet = fixture.packet(3, 7, &data(20));
    assert_eq!(a.send(packet, Duration::ZERO), Ok(()));
    fixture.bus.refuse(1);
    fixture.run(&[a.station(), b.station()]);
    assert_eq!(a.stats().snapshot().tx_error, 2);
    assert_eq!(a.pool().in_use(), 0);
    assert!(inc.take().is_empty());

    // The receiver keeps the partial packet until it goes stale.
    assert_eq!(b.pool().in_use(), 1);
    fixture.clock.advance(STALE_TIMEOUT + Duration::from_millis(1));
    for session in 10..14 {
        b.on_frame_received(&first_frame(4, 7, session, 3, 20, &[1, 2]), Context::Interrupt);
    }
    assert_eq!(b.stats().snapshot().rx_error, 0);
}

#[test]
fn failed_transmission_releases_slot() {
    let fixture = Fixture::new();
    let (out, inc) = (fixture.collector(), fixture.collector());
    let a = fixture.node(3, &out);
    let b = fixture.node(7, &inc);

    fixture.bus.inject_error(1);
    let packet = fixture.packet(3, 7, &data(20));
    assert_eq!(a.send(packet, Duration::ZERO), Ok(()));
    fixture.run(&[a.station(), b.station()]);

    assert_eq!(a.stats().snapshot(), Counters { tx_error: 1, ..Counters::default() });
    assert_eq!(a.pool().in_use(), 0);
    assert_eq!(b.pool().in_use(), 0);
    assert!(inc.take().is_empty());
    assert_eq!(fixture.packets.available(), 8);
}

#[test]
fn send_without_free_slot() {
    let fixture = Fixture::new();
    let (out, inc) = (fixture.collector(), fixture.collector());
    let a = fixture.node(3, &out);
    let b = fixture.node(7, &inc);

    for _ in 0..4 {
        let packet = fixture.packet(3, 7, &data(20));
        assert_eq!(a.send(packet, Duration::ZERO), Ok(()));
    }
    assert_eq!(fixture.packets.available(), 4);

    let packet = fixture.packet(3, 7, &data(20));
    assert_eq!(a.send(packet, Duration::from_millis(10)), Err(Error::PoolExhausted));
    assert_eq!(fixture.packets.available(), 4);
    assert_eq!(a.stats().snapshot().tx_error, 1);

    fixture.run(&[a.station(), b.station()]);
    assert_eq!(inc.take().len(), 4);
    assert_eq!(a.stats().snapshot().tx, 4);
    assert_eq!(fixture.packets.available(), 8);
}

/// A heap buffer not bounded by the MTU.
struct Jumbo {
    id: PacketId,
    data: Vec<u8>,
}

/// Hands out `Jumbo` buffers and counts the returned ones.
#[derive(Default)]
struct JumboHeap {
    released: core::sync::atomic::AtomicUsize,
}

impl PacketBuffer for Jumbo {
    fn id(&self) -> PacketId {
        self.id
    }

    fn set_id(&mut self, id: PacketId) {
        self.id = id;
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn set_len(&mut self, len: usize) -> Result<()> {
        self.data.resize(len, 0);
        Ok(())
    }

    fn capacity(&self) -> usize {
        usize::MAX
    }

    fn buffer(&self) -> &[u8] {
        &self.data
    }

    fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Allocator for JumboHeap {
    type Packet = Jumbo;

    fn acquire(&self, size: usize, _: Context) -> Option<Jumbo> {
        Some(Jumbo { id: PacketId::default(), data: vec![0; size] })
    }

    fn release(&self, _: Jumbo, _: Context) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
fn oversized_packet_rejected() {
    let fixture = Fixture::new();
    let heap = JumboHeap::default();
    let a: Interface<Raw, _, _, StdSemaphore, _, _, 2> = Interface::new(
        Config::new(3),
        &fixture.bus,
        FnHandler(|_: Jumbo, _: &Identity, _: Context| {}),
        &heap,
        &fixture.clock).unwrap();

    let id = PacketId::new(Priority::Normal, 3, 7, 1, 16).unwrap();
    let packet = Jumbo { id, data: data(MTU + 1) };
    assert_eq!(a.send(packet, Duration::ZERO), Err(Error::BadSize));
    assert_eq!(heap.released.load(Ordering::Relaxed), 1);
    assert_eq!(a.stats().snapshot().tx_error, 1);
    assert_eq!(a.pool().in_use(), 0);
    assert_eq!(fixture.bus.pending(), 0);

    // Exactly one MTU is fine.
    let packet = Jumbo { id, data: data(MTU) };
    assert_eq!(a.send(packet, Duration::ZERO), Ok(()));
    assert_eq!(fixture.bus.pending(), 1);
}

#[test]
fn lost_completion_leaves_slot_bound() {
    let fixture = Fixture::new();
    let (out, inc) = (fixture.collector(), fixture.collector());
    let a = fixture.node(3, &out);
    let b = fixture.node(7, &inc);
    let stations = [a.station(), b.station()];

    let packet = fixture.packet(3, 7, &data(2));
    assert_eq!(a.send(packet, Duration::ZERO), Ok(()));
    let held = a.pool().access(Context::Task, |_| fixture.run(&stations));
    assert_eq!(held, Ok(()));

    assert_eq!(inc.take().len(), 1);
    assert_eq!(a.stats().snapshot(), Counters { tx_error: 1, ..Counters::default() });
    assert_eq!(a.pool().in_use(), 1);
    assert_eq!(fixture.packets.available(), 7);

    // Only stale reclamation frees the slot.
    fixture.clock.advance(STALE_TIMEOUT + Duration::from_millis(1));
    for _ in 0..4 {
        let packet = fixture.packet(3, 7, &data(2));
        assert_eq!(a.send(packet, Duration::ZERO), Ok(()));
    }
    fixture.run(&stations);
    assert_eq!(a.stats().snapshot().tx, 4);
    assert_eq!(a.pool().in_use(), 0);
    assert_eq!(fixture.packets.available(), 8);
}

#[test]
fn unmatched_completion() {
    let fixture = Fixture::new();
    let out = fixture.collector();
    let a = fixture.node(3, &out);

    a.on_frame_sent(0x123, Ok(()), Context::Interrupt);
    assert_eq!(a.stats().snapshot().tx_error, 1);
}

#[test]
fn lost_frame_detected() {
    let fixture = Fixture::new();
    let (out, inc) = (fixture.collector(), fixture.collector());
    let a = fixture.node(3, &out);
    let b = fixture.node(7, &inc);
    // Loses every third frame.
    let lossy = Lossy::<Raw, _>::new(&b, PrngLoss::pulsed(1, 3));
    let stations = [
        a.station(),
        Station { address: 7, filter: b.filter(), callbacks: &lossy },
    ];

    a.send(fixture.packet(3, 7, &data(20)), Duration::ZERO).unwrap();
    fixture.run(&stations);

    assert!(inc.take().is_empty());
    assert_eq!(b.stats().snapshot(), Counters { frame: 1, ..Counters::default() });
    assert_eq!(b.pool().in_use(), 0);
    assert_eq!(a.stats().snapshot().tx, 1);
    assert_eq!(fixture.packets.available(), 8);
}

#[test]
fn masked_filter_ignores_other_destinations() {
    let fixture = Fixture::new();
    let (out, inc, other) = (fixture.collector(), fixture.collector(), fixture.collector());
    let a = fixture.node(3, &out);
    let b = fixture.node(7, &inc);
    let c = fixture.node(8, &other);

    a.send(fixture.packet(3, 8, &data(12)), Duration::ZERO).unwrap();
    fixture.run(&[a.station(), b.station(), c.station()]);

    assert!(inc.take().is_empty());
    assert_eq!(other.take().len(), 1);
    assert_eq!(b.stats().snapshot(), Counters::default());
}

#[test]
fn configuration() {
    let fixture = Fixture::new();
    let out = fixture.collector();

    let config = Config { mode: Mode::Promiscuous, ..Config::new(3) };
    assert_eq!(config.filter(), Filter::promiscuous());
    assert_eq!(Config::new(3).filter(), Filter::masked(3));

    let result: Result<Iface> = Interface::new(
        Config::new(32), &fixture.bus, &out, &fixture.packets, &fixture.clock);
    assert!(matches!(result, Err(Error::Illegal)));

    let a = fixture.node(31, &out);
    assert_eq!(*a.identity(), Identity { name: "CAN", address: 31, mtu: MTU });
}

#[test]
fn closure_receiver() {
    let fixture = Fixture::new();
    let total = core::sync::atomic::AtomicUsize::new(0);
    let receiver = FnHandler(|packet: Packet, iface: &Identity, context: Context| {
        assert_eq!(context, Context::Interrupt);
        assert_eq!(iface.address, 7);
        total.fetch_add(packet.len(), Ordering::Relaxed);
        fixture.packets.release(packet, context);
    });

    let b: Interface<Raw, _, _, StdSemaphore, _, _, 2> = Interface::new(
        Config::new(7), &fixture.bus, receiver, &fixture.packets, &fixture.clock).unwrap();
    b.on_frame_received(&first_frame(3, 7, 1, 1, 5, &[1, 2]), Context::Interrupt);
    b.on_frame_received(&more_frame(3, 7, 1, 0, &[3, 4, 5]), Context::Interrupt);

    assert_eq!(total.load(Ordering::Relaxed), 5);
    assert_eq!(fixture.packets.available(), 8);
}
