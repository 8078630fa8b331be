//! UDP Protocol Implementation (RFC 768)
//!
//! Sockets are bound to one interface and matched on receive by local port
//! and, unless the socket takes any source, remote port. The first matching
//! socket in the interface's list (newest first) gets the datagram.

use alloc::sync::Arc;
use core::fmt;
use core::net::Ipv4Addr;

use log::{debug, info};

use crate::net::checksum;
use crate::net::error::NetError;
use crate::net::ethernet::MacAddr;
use crate::net::ipv4::{self, protocol};
use crate::net::netif::IfaceId;
use crate::net::packet::{BufferError, ResetMode};
use crate::net::stack::NetStack;

/// UDP protocol number for IPv4
pub const UDP_PROTOCOL: u8 = protocol::UDP;

/// UDP header size (8 bytes)
pub const HEADER_SIZE: usize = 8;

/// Errors that can occur while parsing a UDP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UdpError {
    /// Packet is too short to contain a valid UDP header
    PacketTooShort,
    /// Length field doesn't match actual packet size
    InvalidLength,
    /// Source or destination port is zero
    InvalidPort,
}

impl fmt::Display for UdpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UdpError::PacketTooShort => write!(f, "packet too short"),
            UdpError::InvalidLength => write!(f, "invalid length"),
            UdpError::InvalidPort => write!(f, "zero port"),
        }
    }
}

/// UDP header structure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    /// Length of UDP header + data (minimum 8 bytes)
    pub length: u16,
    /// Checksum (optional for IPv4, can be 0)
    pub checksum: u16,
}

impl UdpHeader {
    /// Parse a UDP header from raw bytes
    ///
    /// `data` is the whole datagram; the length field must fit inside it.
    pub fn from_bytes(data: &[u8]) -> Result<Self, UdpError> {
        if data.len() < HEADER_SIZE {
            return Err(UdpError::PacketTooShort);
        }

        let header = Self {
            src_port: u16::from_be_bytes([data[0], data[1]]),
            dst_port: u16::from_be_bytes([data[2], data[3]]),
            length: u16::from_be_bytes([data[4], data[5]]),
            checksum: u16::from_be_bytes([data[6], data[7]]),
        };

        if header.src_port == 0 || header.dst_port == 0 {
            return Err(UdpError::InvalidPort);
        }
        if (header.length as usize) < HEADER_SIZE || header.length as usize > data.len() {
            return Err(UdpError::InvalidLength);
        }

        Ok(header)
    }

    pub fn write(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        buf[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
        buf[4..6].copy_from_slice(&self.length.to_be_bytes());
        buf[6..8].copy_from_slice(&self.checksum.to_be_bytes());
    }
}

/// Calculate UDP checksum with pseudo-header
///
/// # Arguments
/// * `src_ip` - Source IPv4 address
/// * `dest_ip` - Destination IPv4 address
/// * `datagram` - UDP header and data, checksum field zeroed
///
/// A computed checksum of zero goes on the wire as 0xFFFF; zero means
/// "no checksum".
pub fn pseudo_header_checksum(src_ip: Ipv4Addr, dest_ip: Ipv4Addr, datagram: &[u8]) -> u16 {
    let mut sum = checksum::sum(&src_ip.octets(), 0);
    sum = checksum::sum(&dest_ip.octets(), sum);
    sum += UDP_PROTOCOL as u32;
    sum += datagram.len() as u32;
    sum = checksum::sum(datagram, sum);

    match checksum::finish(sum) {
        0 => 0xFFFF,
        csum => csum,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketHandle(u32);

/// Addressing of a datagram delivered to a socket
///
/// The payload is the packet buffer's valid region while the handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpDatagram {
    pub iface: IfaceId,
    pub socket: SocketHandle,
    pub src_addr: Ipv4Addr,
    pub dst_addr: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
}

/// Receive callback of a socket
pub trait UdpHandler: Send + Sync {
    fn receive(&self, stack: &mut NetStack, dgram: UdpDatagram);
}

impl<F> UdpHandler for F
where
    F: Fn(&mut NetStack, UdpDatagram) + Send + Sync,
{
    fn receive(&self, stack: &mut NetStack, dgram: UdpDatagram) {
        self(stack, dgram)
    }
}

pub struct UdpSocket {
    handle: SocketHandle,
    iface: IfaceId,
    local_port: u16,
    /// `None` accepts datagrams from any source port
    remote_port: Option<u16>,
    handler: Arc<dyn UdpHandler>,
}

impl UdpSocket {
    pub fn handle(&self) -> SocketHandle {
        self.handle
    }

    pub fn iface(&self) -> IfaceId {
        self.iface
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn remote_port(&self) -> Option<u16> {
        self.remote_port
    }

    fn matches(&self, dst_port: u16, src_port: u16) -> bool {
        self.local_port == dst_port && self.remote_port.is_none_or(|p| p == src_port)
    }
}

impl fmt::Debug for UdpSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdpSocket")
            .field("handle", &self.handle)
            .field("iface", &self.iface)
            .field("local_port", &self.local_port)
            .field("remote_port", &self.remote_port)
            .finish()
    }
}

/// Bind a socket on `iface`
///
/// # Arguments
/// * `local_port` - Port datagrams must be addressed to
/// * `remote_port` - Source port to accept, `None` for any
/// * `handler` - Called once per matching datagram
pub fn register_socket(
    stack: &mut NetStack,
    iface: IfaceId,
    local_port: u16,
    remote_port: Option<u16>,
    handler: Arc<dyn UdpHandler>,
) -> Result<SocketHandle, NetError> {
    stack.etherif(iface)?;
    stack.next_socket_id += 1;
    let handle = SocketHandle(stack.next_socket_id);

    stack.etherif_mut(iface)?.sockets.insert(
        0,
        UdpSocket {
            handle,
            iface,
            local_port,
            remote_port,
            handler,
        },
    );
    debug!("UDP: socket {:?} bound to {}:{}", handle, iface, local_port);
    Ok(handle)
}

pub fn unregister_socket(stack: &mut NetStack, handle: SocketHandle) -> Result<(), NetError> {
    for netif in stack.netifs.iter_mut() {
        let Some(ether) = netif.as_ether_mut() else {
            continue;
        };
        if let Some(pos) = ether.sockets.iter().position(|s| s.handle == handle) {
            ether.sockets.remove(pos);
            return Ok(());
        }
    }
    Err(NetError::NotRegistered)
}

/// Find a socket by handle
pub fn socket(stack: &NetStack, handle: SocketHandle) -> Option<&UdpSocket> {
    stack
        .netifs
        .iter()
        .filter_map(|n| n.as_ether())
        .flat_map(|e| e.sockets.iter())
        .find(|s| s.handle == handle)
}

/// Prepend a UDP header to the `payload_len` bytes already pushed and send
/// the datagram
#[allow(clippy::too_many_arguments)]
pub fn xmit(
    stack: &mut NetStack,
    iface: IfaceId,
    dst_mac: MacAddr,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    payload_len: u16,
) -> Result<(), NetError> {
    if payload_len as usize != stack.packet().len() {
        return Err(NetError::LengthMismatch);
    }
    let length = payload_len
        .checked_add(HEADER_SIZE as u16)
        .ok_or(NetError::LengthMismatch)?;
    let with_checksum = stack.config.udp_tx_checksum;

    let pkt = stack.packet_mut();
    let header = UdpHeader {
        src_port,
        dst_port,
        length,
        checksum: 0,
    };
    header.write(pkt.push(HEADER_SIZE)?);

    if with_checksum {
        let datagram = pkt
            .data_mut()
            .get_mut(..length as usize)
            .ok_or(BufferError::Truncated)?;
        let csum = pseudo_header_checksum(src, dst, datagram);
        datagram[6..8].copy_from_slice(&csum.to_be_bytes());
    }

    ipv4::xmit(stack, iface, dst_mac, UDP_PROTOCOL, src, dst, length)
}

/// Send the `payload_len` bytes already pushed from a socket's own ports
///
/// Sockets bound with a wildcard remote port have no destination port;
/// use [`socket_xmit_to`] for those.
pub fn socket_xmit(
    stack: &mut NetStack,
    handle: SocketHandle,
    dst_mac: MacAddr,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    payload_len: u16,
) -> Result<(), NetError> {
    let sock = socket(stack, handle).ok_or(NetError::NotRegistered)?;
    let dst_port = sock.remote_port.ok_or(NetError::NoRemotePort)?;
    socket_xmit_to(stack, handle, dst_mac, src, dst, dst_port, payload_len)
}

pub fn socket_xmit_to(
    stack: &mut NetStack,
    handle: SocketHandle,
    dst_mac: MacAddr,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    dst_port: u16,
    payload_len: u16,
) -> Result<(), NetError> {
    let sock = socket(stack, handle).ok_or(NetError::NotRegistered)?;
    let (iface, src_port) = (sock.iface, sock.local_port);
    xmit(stack, iface, dst_mac, src, dst, src_port, dst_port, payload_len)
}

/// Copy `payload` into a fresh packet and send it from the socket
pub fn socket_send(
    stack: &mut NetStack,
    handle: SocketHandle,
    dst_mac: MacAddr,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    payload: &[u8],
) -> Result<(), NetError> {
    let len = u16::try_from(payload.len()).map_err(|_| NetError::LengthMismatch)?;
    let pkt = stack.packet_mut();
    pkt.reset(ResetMode::Tail);
    pkt.push_slice(payload)?;
    socket_xmit(stack, handle, dst_mac, src, dst, len)
}

/// UDP receive handler, registered for IP protocol 17
pub fn receive(stack: &mut NetStack, iface: IfaceId) {
    let Some(rx) = stack.ipv4_rx() else {
        return;
    };

    let header = match UdpHeader::from_bytes(stack.packet().data()) {
        Ok(header) => header,
        Err(e) => {
            debug!("UDP: dropping datagram on {}: {}", iface, e);
            return;
        }
    };

    let found = stack.etherif(iface).ok().and_then(|ether| {
        ether
            .sockets
            .iter()
            .find(|s| s.matches(header.dst_port, header.src_port))
            .map(|s| (s.handle, Arc::clone(&s.handler)))
    });
    let Some((handle, handler)) = found else {
        info!(
            "UDP: no socket for {}:{} -> port {}",
            rx.src, header.src_port, header.dst_port
        );
        return;
    };

    let pkt = stack.packet_mut();
    pkt.set_len(header.length as usize);
    if pkt.pull(HEADER_SIZE).is_err() {
        return;
    }

    handler.receive(
        stack,
        UdpDatagram {
            iface,
            socket: handle,
            src_addr: rx.src,
            dst_addr: rx.dst,
            src_port: header.src_port,
            dst_port: header.dst_port,
        },
    );
}
