//! Echoes every packet received on a SocketCAN interface back to its sender.
//!
//! # Usage
//!
//! The demo binds a raw CAN socket, so a (virtual) CAN interface must exist and be up:
//!
//!   > $ ip link add dev vcan0 type vcan
//!
//!   > $ ip link set up vcan0
//!
//! Then start the echo node with its bus address:
//!
//!   > $ cargo run --features sys --example can_echo -- vcan0 10
//!
//! Every packet addressed to node 10 is returned to its source with the ports swapped.
use std::collections::VecDeque;
use std::io::{stdout, Write};
use std::os::unix::io::AsRawFd;
use std::sync::Mutex;

use structopt::StructOpt;

use mutex::raw_impls::cs::CriticalSectionRawMutex;

use cfp::layer::can::{self, Identity, Interface, Mode};
use cfp::layer::Receiver;
use cfp::nic::sys::{sys_wait, SocketCan};
use cfp::storage::{Packet, PacketBuffer, PacketPool};
use cfp::sync::{Context, StdSemaphore};
use cfp::time::{Duration, StdClock};
use cfp::wire::PacketId;

#[derive(Clone, StructOpt)]
struct Config {
    /// The CAN interface, such as `vcan0`.
    name: String,
    /// The node address, at most 31.
    address: u8,
    /// Accept all frames on the bus, not only those addressed to this node.
    #[structopt(long)]
    promiscuous: bool,
}

/// Keeps received packets until the main loop answers them.
#[derive(Default)]
struct Inbox {
    packets: Mutex<VecDeque<Packet>>,
}

impl Receiver<Packet> for Inbox {
    fn deliver(&self, packet: Packet, _: &Identity, _: Context) {
        self.packets.lock().unwrap().push_back(packet);
    }
}

fn main() {
    let Config {
        name,
        address,
        promiscuous,
    } = Config::from_args();

    let config = can::Config {
        mode: if promiscuous { Mode::Promiscuous } else { Mode::Masked },
        ..can::Config::new(address)
    };

    let socket = SocketCan::<CriticalSectionRawMutex, 64>::new(&name)
        .expect("Couldn't open CAN socket");
    let fd = socket.as_raw_fd();
    let inbox = Inbox::default();
    let packets = PacketPool::<CriticalSectionRawMutex, 16>::new();
    let clock = StdClock::new();

    let iface: Interface<CriticalSectionRawMutex, _, _, StdSemaphore, _, _, 8> =
        Interface::new(config, socket, &inbox, &packets, &clock)
            .expect("Couldn't configure CAN socket");

    let out = stdout();
    let mut out = out.lock();
    writeln!(out, "Echoing packets at {} on {}", address, name).unwrap();

    loop {
        sys_wait(fd, Some(Duration::from_millis(100)))
            .unwrap_or_else(|err| panic!("Error waiting for frames: {}", err));
        iface.driver().poll(&iface, 32)
            .unwrap_or_else(|err| panic!("Error during receive: {}", err));

        loop {
            let next = inbox.packets.lock().unwrap().pop_front();
            let Some(mut packet) = next else { break };
            let id = packet.id();
            let reply = PacketId::new(id.priority(), address, id.src(), id.sport(), id.dport())
                .expect("Fields of a received identifier are in range");
            packet.set_id(reply);

            let len = packet.len();
            match iface.send(packet, Duration::ZERO) {
                Ok(()) => writeln!(out, "{}: echoed {} bytes", id, len).unwrap(),
                Err(err) => writeln!(out, "{}: echo failed: {}", id, err).unwrap(),
            }
        }

        out.flush().unwrap();
    }
}
