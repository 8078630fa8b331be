//! ICMP (Internet Control Message Protocol) Implementation
//! RFC 792 - https://www.rfc-editor.org/rfc/rfc792
//!
//! Answers echo requests (ping). Everything else is logged and dropped.
//!
//! Format:
//! ```text
//! [Type (1)][Code (1)][Checksum (2)]
//! [Identifier (2)][Sequence (2)][Data (variable)]
//! ```

use core::fmt;

use log::{debug, warn};

use crate::net::checksum;
use crate::net::ethernet;
use crate::net::ipv4::{self, protocol};
use crate::net::netif::IfaceId;
use crate::net::stack::NetStack;

/// Minimum ICMP packet size (header only)
pub const HEADER_SIZE: usize = 8;

/// ICMP message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpType {
    /// Echo Reply (Type 0)
    EchoReply,
    /// Destination Unreachable (Type 3)
    DestinationUnreachable,
    /// Echo Request (Type 8)
    EchoRequest,
    /// Time Exceeded (Type 11)
    TimeExceeded,
    /// Unknown type
    Unknown(u8),
}

impl From<u8> for IcmpType {
    fn from(value: u8) -> Self {
        match value {
            0 => IcmpType::EchoReply,
            3 => IcmpType::DestinationUnreachable,
            8 => IcmpType::EchoRequest,
            11 => IcmpType::TimeExceeded,
            other => IcmpType::Unknown(other),
        }
    }
}

impl From<IcmpType> for u8 {
    fn from(icmp_type: IcmpType) -> Self {
        match icmp_type {
            IcmpType::EchoReply => 0,
            IcmpType::DestinationUnreachable => 3,
            IcmpType::EchoRequest => 8,
            IcmpType::TimeExceeded => 11,
            IcmpType::Unknown(val) => val,
        }
    }
}

impl fmt::Display for IcmpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IcmpType::EchoReply => write!(f, "Echo Reply"),
            IcmpType::DestinationUnreachable => write!(f, "Destination Unreachable"),
            IcmpType::EchoRequest => write!(f, "Echo Request"),
            IcmpType::TimeExceeded => write!(f, "Time Exceeded"),
            IcmpType::Unknown(val) => write!(f, "Unknown({})", val),
        }
    }
}

/// ICMP receive handler, registered for IP protocol 1
pub fn receive(stack: &mut NetStack, iface: IfaceId) {
    let data = stack.packet().data();
    if data.len() < HEADER_SIZE {
        debug!("ICMP: runt packet on {}", iface);
        return;
    }

    match IcmpType::from(data[0]) {
        IcmpType::EchoRequest => echo_request_recv(stack, iface),
        other => warn!("ICMP: unsupported message type {}", other),
    }
}

/// Turn the echo request in the buffer into a reply and send it back
///
/// The payload is reused in place; only the headers in front of it are
/// rewritten.
fn echo_request_recv(stack: &mut NetStack, iface: IfaceId) {
    let Ok(Some(own_ip)) = stack.ip_addr(iface) else {
        return;
    };
    let Some(rx) = stack.ipv4_rx() else {
        return;
    };

    // The Ethernet header is still in front of the IPv4 header
    let behind = ipv4::HEADER_SIZE + ethernet::HEADER_SIZE;
    let pkt = stack.packet_mut();
    let dst_mac = match pkt.push(behind) {
        Ok(headers) => match ethernet::EthernetHeader::from_bytes(headers) {
            Ok(eth) => eth.src_mac,
            Err(_) => return,
        },
        Err(_) => return,
    };
    if pkt.pull(behind).is_err() {
        return;
    }

    let icmp = pkt.data_mut();
    icmp[0] = IcmpType::EchoReply.into();
    icmp[1] = 0;
    icmp[2] = 0;
    icmp[3] = 0;
    let csum = checksum::checksum(icmp);
    icmp[2..4].copy_from_slice(&csum.to_be_bytes());
    let len = icmp.len() as u16;

    debug!("ICMP: echo reply to {}", rx.src);
    if let Err(e) = ipv4::xmit(stack, iface, dst_mac, protocol::ICMP, own_ip, rx.src, len) {
        warn!("ICMP: echo reply to {} failed: {}", rx.src, e);
    }
}
