//! ARP (Address Resolution Protocol) - RFC 826
//!
//! Maps IPv4 addresses to MAC addresses on local networks.
//! Packet format: [HW Type (2)][Proto Type (2)][HW Len (1)][Proto Len (1)]
//!                [Operation (2)][Sender MAC (6)][Sender IP (4)]
//!                [Target MAC (6)][Target IP (4)]
//!
//! There is no cache. At most one resolution is in flight stack-wide; a
//! second `resolve` while one is pending is refused.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;
use core::net::Ipv4Addr;

use log::{debug, error, info, warn};

use crate::net::error::NetError;
use crate::net::ethernet::{self, format_mac, EtherType, MacAddr, BROADCAST_MAC, ZERO_MAC};
use crate::net::event::{StackTimer, TimerId};
use crate::net::netif::IfaceId;
use crate::net::packet::ResetMode;
use crate::net::stack::NetStack;

/// ARP hardware type for Ethernet
pub const HW_TYPE_ETHERNET: u16 = 1;

/// ARP protocol type for IPv4
pub const PROTO_TYPE_IPV4: u16 = 0x0800;

/// ARP operation codes
pub const ARP_REQUEST: u16 = 1;
pub const ARP_REPLY: u16 = 2;

/// ARP packet size (fixed at 28 bytes)
pub const ARP_PACKET_SIZE: usize = 28;

/// Errors that can occur during ARP operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpError {
    /// Packet is too short to be valid
    PacketTooShort,
    /// Invalid hardware type (not Ethernet)
    InvalidHardwareType,
    /// Invalid protocol type (not IPv4)
    InvalidProtocolType,
    /// Invalid hardware address length
    InvalidHardwareLength,
    /// Invalid protocol address length
    InvalidProtocolLength,
    /// Unknown operation code
    UnknownOperation,
    /// Another resolution is already in flight
    AlreadyPending,
    /// No reply after every retransmission
    TimedOut,
    /// The interface was unregistered while the resolution was pending
    NoSuchInterface,
    /// The stack was shut down while the resolution was pending
    Cancelled,
}

impl fmt::Display for ArpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArpError::PacketTooShort => write!(f, "packet too short"),
            ArpError::InvalidHardwareType => write!(f, "not an Ethernet ARP packet"),
            ArpError::InvalidProtocolType => write!(f, "not an IPv4 ARP packet"),
            ArpError::InvalidHardwareLength => write!(f, "bad hardware address length"),
            ArpError::InvalidProtocolLength => write!(f, "bad protocol address length"),
            ArpError::UnknownOperation => write!(f, "unsupported operation"),
            ArpError::AlreadyPending => write!(f, "a resolution is already pending"),
            ArpError::TimedOut => write!(f, "request timed out"),
            ArpError::NoSuchInterface => write!(f, "interface went away"),
            ArpError::Cancelled => write!(f, "resolution cancelled"),
        }
    }
}

/// ARP packet structure
#[derive(Debug, Clone, PartialEq)]
pub struct ArpPacket {
    /// Hardware type (1 = Ethernet)
    pub hw_type: u16,
    /// Protocol type (0x0800 = IPv4)
    pub proto_type: u16,
    /// Hardware address length (6 for MAC)
    pub hw_len: u8,
    /// Protocol address length (4 for IPv4)
    pub proto_len: u8,
    /// Operation (1 = request, 2 = reply)
    pub operation: u16,
    /// Sender MAC address
    pub sender_mac: MacAddr,
    /// Sender IP address
    pub sender_ip: Ipv4Addr,
    /// Target MAC address
    pub target_mac: MacAddr,
    /// Target IP address
    pub target_ip: Ipv4Addr,
}

impl ArpPacket {
    /// Create a new ARP request packet
    ///
    /// # Arguments
    /// * `sender_mac` - Our MAC address
    /// * `sender_ip` - Our IP address (unspecified if we have none yet)
    /// * `target_ip` - The IP address we want to resolve
    pub fn new_request(sender_mac: MacAddr, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Self {
        Self {
            hw_type: HW_TYPE_ETHERNET,
            proto_type: PROTO_TYPE_IPV4,
            hw_len: 6,
            proto_len: 4,
            operation: ARP_REQUEST,
            sender_mac,
            sender_ip,
            target_mac: ZERO_MAC, // Unknown, set to zeros
            target_ip,
        }
    }

    /// Create a new ARP reply packet
    ///
    /// # Arguments
    /// * `sender_mac` - Our MAC address
    /// * `sender_ip` - Our IP address
    /// * `target_mac` - The MAC address of the requester
    /// * `target_ip` - The IP address of the requester
    pub fn new_reply(
        sender_mac: MacAddr,
        sender_ip: Ipv4Addr,
        target_mac: MacAddr,
        target_ip: Ipv4Addr,
    ) -> Self {
        Self {
            hw_type: HW_TYPE_ETHERNET,
            proto_type: PROTO_TYPE_IPV4,
            hw_len: 6,
            proto_len: 4,
            operation: ARP_REPLY,
            sender_mac,
            sender_ip,
            target_mac,
            target_ip,
        }
    }

    /// Parse an ARP packet from raw bytes
    ///
    /// Only Ethernet/IPv4 requests and replies are accepted.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ArpError> {
        if data.len() < ARP_PACKET_SIZE {
            return Err(ArpError::PacketTooShort);
        }

        let hw_type = u16::from_be_bytes([data[0], data[1]]);
        if hw_type != HW_TYPE_ETHERNET {
            return Err(ArpError::InvalidHardwareType);
        }

        let proto_type = u16::from_be_bytes([data[2], data[3]]);
        if proto_type != PROTO_TYPE_IPV4 {
            return Err(ArpError::InvalidProtocolType);
        }

        let hw_len = data[4];
        let proto_len = data[5];
        if hw_len != 6 {
            return Err(ArpError::InvalidHardwareLength);
        }
        if proto_len != 4 {
            return Err(ArpError::InvalidProtocolLength);
        }

        let operation = u16::from_be_bytes([data[6], data[7]]);
        if operation != ARP_REQUEST && operation != ARP_REPLY {
            return Err(ArpError::UnknownOperation);
        }

        let mut sender_mac = [0u8; 6];
        sender_mac.copy_from_slice(&data[8..14]);
        let sender_ip = Ipv4Addr::new(data[14], data[15], data[16], data[17]);

        let mut target_mac = [0u8; 6];
        target_mac.copy_from_slice(&data[18..24]);
        let target_ip = Ipv4Addr::new(data[24], data[25], data[26], data[27]);

        Ok(Self {
            hw_type,
            proto_type,
            hw_len,
            proto_len,
            operation,
            sender_mac,
            sender_ip,
            target_mac,
            target_ip,
        })
    }

    /// Write the packet into the first `ARP_PACKET_SIZE` bytes of `buf`
    pub fn write(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&self.hw_type.to_be_bytes());
        buf[2..4].copy_from_slice(&self.proto_type.to_be_bytes());
        buf[4] = self.hw_len;
        buf[5] = self.proto_len;
        buf[6..8].copy_from_slice(&self.operation.to_be_bytes());
        buf[8..14].copy_from_slice(&self.sender_mac);
        buf[14..18].copy_from_slice(&self.sender_ip.octets());
        buf[18..24].copy_from_slice(&self.target_mac);
        buf[24..28].copy_from_slice(&self.target_ip.octets());
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = alloc::vec![0u8; ARP_PACKET_SIZE];
        self.write(&mut bytes);
        bytes
    }

    /// Check if this is an ARP request
    pub fn is_request(&self) -> bool {
        self.operation == ARP_REQUEST
    }

    /// Check if this is an ARP reply
    pub fn is_reply(&self) -> bool {
        self.operation == ARP_REPLY
    }
}

/// Completion callback for [`resolve`], run exactly once
pub type ResolveCallback = Box<dyn FnOnce(&mut NetStack, Result<MacAddr, ArpError>) + Send>;

struct PendingResolution {
    iface: IfaceId,
    target: Ipv4Addr,
    retries_left: u8,
    timer: Option<TimerId>,
    callback: ResolveCallback,
}

/// The stack's single resolution slot
#[derive(Default)]
pub(crate) struct ArpState {
    pending: Option<PendingResolution>,
}

/// Start resolving `target` on `iface`
///
/// Broadcasts a request and returns; `callback` runs later, from the
/// dispatch of the matching reply or from the final retry timeout.
/// Refused with `AlreadyPending` while another resolution is in flight,
/// in which case the existing one is left untouched.
pub fn resolve<F>(
    stack: &mut NetStack,
    iface: IfaceId,
    target: Ipv4Addr,
    callback: F,
) -> Result<(), NetError>
where
    F: FnOnce(&mut NetStack, Result<MacAddr, ArpError>) + Send + 'static,
{
    if let Some(pending) = &stack.arp.pending {
        error!(
            "ARP: resolve {} refused, {} still pending",
            target, pending.target
        );
        return Err(ArpError::AlreadyPending.into());
    }

    send_request(stack, iface, target)?;
    let timer = stack
        .timers
        .timer_set(stack.config.arp_timeout_ms, StackTimer::ArpRetry);

    stack.arp.pending = Some(PendingResolution {
        iface,
        target,
        retries_left: stack.config.arp_retries,
        timer: Some(timer),
        callback: Box::new(callback),
    });
    Ok(())
}

/// Interface and target of the resolution in flight
pub fn pending(stack: &NetStack) -> Option<(IfaceId, Ipv4Addr)> {
    stack.arp.pending.as_ref().map(|p| (p.iface, p.target))
}

fn send_request(stack: &mut NetStack, iface: IfaceId, target: Ipv4Addr) -> Result<(), NetError> {
    let ether = stack.etherif(iface)?;
    let sender_ip = ether
        .ipv4_info()
        .map(|info| info.ip)
        .unwrap_or(Ipv4Addr::UNSPECIFIED);
    let request = ArpPacket::new_request(ether.mac_address(), sender_ip, target);

    debug!("ARP: who has {}? tell {}", target, sender_ip);
    send(stack, iface, BROADCAST_MAC, &request)
}

fn send(stack: &mut NetStack, iface: IfaceId, dst: MacAddr, packet: &ArpPacket) -> Result<(), NetError> {
    let pkt = stack.packet_mut();
    pkt.reset(ResetMode::Tail);
    packet.write(pkt.push(ARP_PACKET_SIZE)?);
    ethernet::xmit(stack, iface, dst, EtherType::ARP)
}

/// ARP protocol receive handler
pub fn receive(stack: &mut NetStack, iface: IfaceId) {
    let packet = match ArpPacket::from_bytes(stack.packet().data()) {
        Ok(packet) => packet,
        Err(e) => {
            info!("ARP: dropping packet on {}: {}", iface, e);
            return;
        }
    };

    if packet.is_reply() {
        reply_recv(stack, iface, &packet);
    } else {
        request_recv(stack, iface, &packet);
    }
}

fn reply_recv(stack: &mut NetStack, iface: IfaceId, packet: &ArpPacket) {
    let matches = stack
        .arp
        .pending
        .as_ref()
        .is_some_and(|p| p.iface == iface && p.target == packet.sender_ip);
    if !matches {
        debug!("ARP: unsolicited reply from {}", packet.sender_ip);
        return;
    }

    info!(
        "ARP: {} is at {}",
        packet.sender_ip,
        format_mac(&packet.sender_mac)
    );
    complete(stack, Ok(packet.sender_mac));
}

fn request_recv(stack: &mut NetStack, iface: IfaceId, packet: &ArpPacket) {
    let own_ip = match stack.etherif(iface).ok().and_then(|e| e.ipv4_info()) {
        Some(info) => info.ip,
        None => return,
    };
    if packet.target_ip != own_ip {
        return;
    }

    let own_mac = match stack.mac_addr(iface) {
        Ok(mac) => mac,
        Err(_) => return,
    };
    let reply = ArpPacket::new_reply(own_mac, own_ip, packet.sender_mac, packet.sender_ip);
    if let Err(e) = send(stack, iface, packet.sender_mac, &reply) {
        warn!("ARP: failed to answer {}: {}", packet.sender_ip, e);
    }
}

fn complete(stack: &mut NetStack, result: Result<MacAddr, ArpError>) {
    if let Some(pending) = stack.arp.pending.take() {
        if let Some(timer) = pending.timer {
            stack.timers.timer_del(timer);
        }
        (pending.callback)(stack, result);
    }
}

/// Retry timer expiry: retransmit while retries remain, then give up
pub(crate) fn on_retry_timer(stack: &mut NetStack) {
    let Some(pending) = stack.arp.pending.as_mut() else {
        return;
    };
    pending.timer = None;

    if pending.retries_left == 0 {
        error!("ARP: request for {} timed out", pending.target);
        complete(stack, Err(ArpError::TimedOut));
        return;
    }
    pending.retries_left -= 1;
    let (iface, target) = (pending.iface, pending.target);

    if let Err(e) = send_request(stack, iface, target) {
        warn!("ARP: retransmit for {} failed: {}", target, e);
    }
    let timer = stack
        .timers
        .timer_set(stack.config.arp_timeout_ms, StackTimer::ArpRetry);
    if let Some(pending) = stack.arp.pending.as_mut() {
        pending.timer = Some(timer);
    }
}

/// Fail a resolution waiting on an interface that is going away
pub(crate) fn interface_gone(stack: &mut NetStack, iface: IfaceId) {
    if stack.arp.pending.as_ref().is_some_and(|p| p.iface == iface) {
        complete(stack, Err(ArpError::NoSuchInterface));
    }
}

/// Fail whatever resolution is pending
pub(crate) fn cancel(stack: &mut NetStack) {
    complete(stack, Err(ArpError::Cancelled));
}

/// Resolve the next hop towards `dst`: `dst` itself when on-link,
/// otherwise the interface's router
pub fn resolve_route<F>(
    stack: &mut NetStack,
    iface: IfaceId,
    dst: Ipv4Addr,
    callback: F,
) -> Result<Ipv4Addr, NetError>
where
    F: FnOnce(&mut NetStack, Result<MacAddr, ArpError>) + Send + 'static,
{
    let info = stack.etherif(iface)?.ipv4_info().copied().ok_or(NetError::NoAddress)?;
    let hop = info.next_hop(dst).ok_or(NetError::NoRoute)?;
    resolve(stack, iface, hop, callback)?;
    Ok(hop)
}
