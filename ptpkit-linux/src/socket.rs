//! The PTP UDP transport: event (319) and general (320) multicast sockets
//! with software timestamps taken from the local clock.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::Path;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use ptpkit::ClockIdentity;

/// All PTP messages except peer delay go to this group.
const PRIMARY_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 1, 129);
/// Peer delay messages are link-local.
const PDELAY_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 107);

pub const EVENT_PORT: u16 = 319;
pub const GENERAL_PORT: u16 = 320;

pub struct PtpSocket {
    socket: UdpSocket,
    port: u16,
}

impl PtpSocket {
    pub fn new_event(interface_ip: Ipv4Addr) -> io::Result<Self> {
        Self::bind(EVENT_PORT, interface_ip)
    }

    pub fn new_general(interface_ip: Ipv4Addr) -> io::Result<Self> {
        Self::bind(GENERAL_PORT, interface_ip)
    }

    fn bind(port: u16, interface_ip: Ipv4Addr) -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;
        socket.join_multicast_v4(&PRIMARY_GROUP, &interface_ip)?;
        socket.join_multicast_v4(&PDELAY_GROUP, &interface_ip)?;
        socket.set_multicast_if_v4(&interface_ip)?;
        socket.set_multicast_loop_v4(false)?;
        socket.set_multicast_ttl_v4(64)?;
        socket.set_nonblocking(true)?;

        let socket = UdpSocket::from_std(socket.into())?;
        Ok(Self { socket, port })
    }

    pub async fn recv(&self, buffer: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buffer).await
    }

    /// Send a serialized PTP message to the multicast group it belongs to.
    pub async fn send(&self, data: &[u8]) -> io::Result<()> {
        let group = if is_pdelay_message(data) {
            PDELAY_GROUP
        } else {
            PRIMARY_GROUP
        };
        self.socket
            .send_to(data, SocketAddrV4::new(group, self.port))
            .await?;
        Ok(())
    }
}

/// Peer delay messages (message type nibble 0x2, 0x3 and 0xA) use the
/// link-local group.
fn is_pdelay_message(data: &[u8]) -> bool {
    matches!(data.first().map(|b| b & 0x0F), Some(0x2 | 0x3 | 0xA))
}

/// The IPv4 address of the named interface, for multicast membership.
pub fn interface_ipv4(name: &str) -> io::Result<Ipv4Addr> {
    let interfaces = if_addrs::get_if_addrs()?;
    interfaces
        .iter()
        .find_map(|interface| match (interface.name.as_str(), interface.ip()) {
            (if_name, std::net::IpAddr::V4(ip)) if if_name == name => Some(ip),
            _ => None,
        })
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("interface {name} has no IPv4 address"),
            )
        })
}

/// Derive an EUI-64 clock identity from the interface MAC address.
pub fn interface_clock_identity(name: &str) -> Option<ClockIdentity> {
    let path = Path::new("/sys/class/net").join(name).join("address");
    let contents = std::fs::read_to_string(path).ok()?;
    mac_to_identity(contents.trim())
}

fn mac_to_identity(mac: &str) -> Option<ClockIdentity> {
    let mut bytes = [0u8; 6];
    let mut parts = mac.split(':');
    for byte in &mut bytes {
        *byte = u8::from_str_radix(parts.next()?, 16).ok()?;
    }
    if parts.next().is_some() || bytes.iter().all(|&b| b == 0) {
        return None;
    }

    Some(ClockIdentity([
        bytes[0], bytes[1], bytes[2], 0xFF, 0xFE, bytes[3], bytes[4], bytes[5],
    ]))
}
