//! IPv4 Protocol Implementation
//!
//! Header building and validation, the receive filter, and dispatch to the
//! protocols registered by IP protocol number.
//!
//! No options (IHL is always 5) and no fragmentation: every datagram fits
//! in one link frame.
//!
//! # References
//! - RFC 791: Internet Protocol (IPv4)
//! - RFC 1071: Computing the Internet Checksum

use alloc::sync::Arc;
use core::fmt;

use log::debug;

pub use core::net::Ipv4Addr;

use crate::net::checksum;
use crate::net::error::NetError;
use crate::net::ethernet::{self, EtherType, MacAddr};
use crate::net::netif::IfaceId;
use crate::net::registry::{ProtoId, ProtocolHandler};
use crate::net::stack::NetStack;

/// IPv4 Protocol Numbers (IANA assigned)
pub mod protocol {
    pub const ICMP: u8 = 1;
    pub const TCP: u8 = 6;
    pub const UDP: u8 = 17;
}

/// IPv4 Header Flags
pub mod flags {
    pub const DONT_FRAGMENT: u16 = 0x4000;
}

/// TTL on every datagram we send
pub const DEFAULT_TTL: u8 = 255;

/// Header size; options are not supported
pub const HEADER_SIZE: usize = 20;

/// IPv4 configuration of an interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Info {
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    /// Default router, unspecified when there is none
    pub router: Ipv4Addr,
}

impl Ipv4Info {
    pub fn new(ip: Ipv4Addr, netmask: Ipv4Addr, router: Ipv4Addr) -> Self {
        Self { ip, netmask, router }
    }

    /// Check if a destination IP is on the local subnet
    pub fn is_local(&self, dest_ip: Ipv4Addr) -> bool {
        let mask = self.netmask.to_bits();
        (self.ip.to_bits() & mask) == (dest_ip.to_bits() & mask)
    }

    /// Subnet-directed broadcast address
    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from_bits(self.ip.to_bits() | !self.netmask.to_bits())
    }

    /// Determine the next hop for a destination IP
    ///
    /// # Returns
    /// - `Some(ip)` - the destination itself if on-link, otherwise the router
    /// - `None` - off-link and no router configured
    pub fn next_hop(&self, dest_ip: Ipv4Addr) -> Option<Ipv4Addr> {
        if self.is_local(dest_ip) {
            Some(dest_ip)
        } else if !self.router.is_unspecified() {
            Some(self.router)
        } else {
            None
        }
    }
}

/// IPv4 Error Types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ipv4Error {
    /// Packet is too short to contain a valid header
    PacketTooShort,
    /// Invalid IP version (not 4)
    InvalidVersion(u8),
    /// IHL other than 5; options are not supported
    UnsupportedIhl(u8),
    /// Invalid total length field
    InvalidLength,
    /// Header checksum mismatch
    ChecksumMismatch,
    /// TTL reached zero
    TtlExpired,
    /// Destination is not one of our addresses
    NotForUs(Ipv4Addr),
}

impl fmt::Display for Ipv4Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ipv4Error::PacketTooShort => write!(f, "Packet too short"),
            Ipv4Error::InvalidVersion(v) => write!(f, "Invalid IP version: {}", v),
            Ipv4Error::UnsupportedIhl(ihl) => write!(f, "Unsupported IHL: {}", ihl),
            Ipv4Error::InvalidLength => write!(f, "Invalid total length"),
            Ipv4Error::ChecksumMismatch => write!(f, "Checksum mismatch"),
            Ipv4Error::TtlExpired => write!(f, "TTL expired"),
            Ipv4Error::NotForUs(dst) => write!(f, "Not addressed to us: {}", dst),
        }
    }
}

/// IPv4 Header Structure
///
/// ```text
/// 0                   1                   2                   3
/// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |Version|  IHL  |    DSCP   |ECN|         Total Length          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |         Identification        |Flags|      Fragment Offset    |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  Time to Live |    Protocol   |         Header Checksum       |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                       Source Address                          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                    Destination Address                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    pub dscp: u8,
    /// Header plus payload, in bytes
    pub total_length: u16,
    pub identification: u16,
    /// Flags and fragment offset as on the wire
    pub flags_fragment: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub src_ip: Ipv4Addr,
    pub dest_ip: Ipv4Addr,
}

impl Ipv4Header {
    /// Header for an outgoing datagram; the checksum is filled in by `write`
    pub fn new(src_ip: Ipv4Addr, dest_ip: Ipv4Addr, protocol: u8, payload_len: u16) -> Self {
        Self {
            dscp: 0,
            total_length: payload_len.saturating_add(HEADER_SIZE as u16),
            identification: 0, // no fragmentation, so the id is meaningless
            flags_fragment: flags::DONT_FRAGMENT,
            ttl: DEFAULT_TTL,
            protocol,
            checksum: 0,
            src_ip,
            dest_ip,
        }
    }

    /// Parse and validate an IPv4 header
    ///
    /// # Validation
    /// - Version 4, IHL 5
    /// - Total length covers the header and fits in `data`
    /// - Header checksum verifies
    pub fn from_bytes(data: &[u8]) -> Result<Self, Ipv4Error> {
        if data.len() < HEADER_SIZE {
            return Err(Ipv4Error::PacketTooShort);
        }

        let version = data[0] >> 4;
        let ihl = data[0] & 0x0F;
        if version != 4 {
            return Err(Ipv4Error::InvalidVersion(version));
        }
        if ihl != 5 {
            return Err(Ipv4Error::UnsupportedIhl(ihl));
        }

        let total_length = u16::from_be_bytes([data[2], data[3]]);
        if (total_length as usize) < HEADER_SIZE || total_length as usize > data.len() {
            return Err(Ipv4Error::InvalidLength);
        }

        if checksum::checksum(&data[..HEADER_SIZE]) != 0 {
            return Err(Ipv4Error::ChecksumMismatch);
        }

        Ok(Self {
            dscp: data[1] >> 2,
            total_length,
            identification: u16::from_be_bytes([data[4], data[5]]),
            flags_fragment: u16::from_be_bytes([data[6], data[7]]),
            ttl: data[8],
            protocol: data[9],
            checksum: u16::from_be_bytes([data[10], data[11]]),
            src_ip: Ipv4Addr::new(data[12], data[13], data[14], data[15]),
            dest_ip: Ipv4Addr::new(data[16], data[17], data[18], data[19]),
        })
    }

    /// Serialize into the first `HEADER_SIZE` bytes of `buf`, computing the
    /// checksum
    pub fn write(&self, buf: &mut [u8]) {
        buf[0] = (4 << 4) | 5;
        buf[1] = self.dscp << 2;
        buf[2..4].copy_from_slice(&self.total_length.to_be_bytes());
        buf[4..6].copy_from_slice(&self.identification.to_be_bytes());
        buf[6..8].copy_from_slice(&self.flags_fragment.to_be_bytes());
        buf[8] = self.ttl;
        buf[9] = self.protocol;
        buf[10] = 0;
        buf[11] = 0;
        buf[12..16].copy_from_slice(&self.src_ip.octets());
        buf[16..20].copy_from_slice(&self.dest_ip.octets());

        let csum = checksum::checksum(&buf[..HEADER_SIZE]);
        buf[10..12].copy_from_slice(&csum.to_be_bytes());
    }
}

/// Addressing of the datagram currently being dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4RxInfo {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub protocol: u8,
}

/// Register a protocol for datagrams carrying `protocol`
pub fn register_proto(
    stack: &mut NetStack,
    protocol: u8,
    handler: Arc<dyn ProtocolHandler>,
) -> ProtoId {
    debug!("IPv4: registering protocol {}", protocol);
    stack.ipv4_protos.register(protocol, handler)
}

pub fn unregister_proto(stack: &mut NetStack, id: ProtoId) -> Result<(), NetError> {
    stack.ipv4_protos.unregister(id)
}

/// Prepend an IPv4 header to the `payload_len` bytes already pushed and
/// send the datagram to `dst_mac`
pub fn xmit(
    stack: &mut NetStack,
    iface: IfaceId,
    dst_mac: MacAddr,
    protocol: u8,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    payload_len: u16,
) -> Result<(), NetError> {
    if payload_len as usize != stack.packet().len()
        || payload_len as usize > u16::MAX as usize - HEADER_SIZE
    {
        return Err(NetError::LengthMismatch);
    }
    let header = Ipv4Header::new(src, dst, protocol, payload_len);
    header.write(stack.packet_mut().push(HEADER_SIZE)?);
    ethernet::xmit(stack, iface, dst_mac, EtherType::IPV4)
}

/// Accept only datagrams addressed to this interface, its subnet
/// broadcast, or the limited broadcast
fn filter(header: &Ipv4Header, info: Option<&Ipv4Info>) -> Result<(), Ipv4Error> {
    if header.ttl == 0 {
        return Err(Ipv4Error::TtlExpired);
    }

    let dst = header.dest_ip;
    if dst.is_unspecified() {
        return Err(Ipv4Error::NotForUs(dst));
    }
    if dst == Ipv4Addr::BROADCAST {
        return Ok(());
    }

    match info {
        Some(info) if dst == info.ip || dst == info.broadcast() => Ok(()),
        _ => Err(Ipv4Error::NotForUs(dst)),
    }
}

/// IPv4 receive handler, registered for EtherType 0x0800
pub fn receive(stack: &mut NetStack, iface: IfaceId) {
    let header = match Ipv4Header::from_bytes(stack.packet().data()) {
        Ok(header) => header,
        Err(e) => {
            debug!("IPv4: dropping packet on {}: {}", iface, e);
            return;
        }
    };

    let info = stack.etherif(iface).ok().and_then(|e| e.ipv4_info().copied());
    if let Err(e) = filter(&header, info.as_ref()) {
        debug!("IPv4: dropping packet on {}: {}", iface, e);
        return;
    }

    let Some(handler) = stack.ipv4_protos.lookup(&header.protocol) else {
        debug!("IPv4: unsupported protocol {:02x}", header.protocol);
        return;
    };

    // Link-layer padding is not part of the datagram
    let pkt = stack.packet_mut();
    pkt.set_len(header.total_length as usize);
    if pkt.pull(HEADER_SIZE).is_err() {
        return;
    }

    // Restored afterwards: a handler may dispatch further frames
    let outer = stack.ipv4_rx.replace(Ipv4RxInfo {
        src: header.src_ip,
        dst: header.dest_ip,
        protocol: header.protocol,
    });
    handler.receive(stack, iface);
    stack.ipv4_rx = outer;
}
