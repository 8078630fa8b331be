//! Errors surfaced to callers of the stack
//!
//! Malformed frames never show up here: those are logged and dropped where
//! they are parsed. What remains is caller misuse and buffer exhaustion.

use core::fmt;

use crate::drivers::net::TransmitError;
use crate::net::arp::ArpError;
use crate::net::netif::IfaceId;
use crate::net::packet::BufferError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetError {
    /// No interface with this id is registered
    UnknownInterface(IfaceId),
    /// The interface exists but has no Ethernet device behind it
    NotEthernet(IfaceId),
    /// The interface does not implement the operation
    Unsupported,
    /// Unregistering a protocol or socket that is not registered
    NotRegistered,
    /// Packet buffer push/pull failed
    Buffer(BufferError),
    /// The link driver refused the frame
    Transmit(TransmitError),
    /// Driver notification queue is full
    QueueFull,
    /// No next hop for the destination
    NoRoute,
    /// The interface has no IPv4 address yet
    NoAddress,
    /// No DHCP client is running on the interface
    DhcpNotRunning,
    /// The socket accepts any source port, so it has no port to send to
    NoRemotePort,
    /// The payload length passed to `xmit` does not match the packet
    LengthMismatch,
    /// Address resolution failed or was refused
    Arp(ArpError),
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetError::UnknownInterface(id) => write!(f, "unknown interface {}", id),
            NetError::NotEthernet(id) => write!(f, "interface {} is not an Ethernet interface", id),
            NetError::Unsupported => write!(f, "operation not supported"),
            NetError::NotRegistered => write!(f, "not registered"),
            NetError::Buffer(e) => write!(f, "packet buffer: {}", e),
            NetError::Transmit(e) => write!(f, "transmit failed: {}", e),
            NetError::QueueFull => write!(f, "event queue full"),
            NetError::NoRoute => write!(f, "no route to host"),
            NetError::NoAddress => write!(f, "interface has no IPv4 address"),
            NetError::DhcpNotRunning => write!(f, "DHCP client not running"),
            NetError::NoRemotePort => write!(f, "socket has no remote port"),
            NetError::LengthMismatch => write!(f, "payload length does not match the packet"),
            NetError::Arp(e) => write!(f, "ARP: {}", e),
        }
    }
}

impl From<BufferError> for NetError {
    fn from(e: BufferError) -> Self {
        NetError::Buffer(e)
    }
}

impl From<TransmitError> for NetError {
    fn from(e: TransmitError) -> Self {
        NetError::Transmit(e)
    }
}

impl From<ArpError> for NetError {
    fn from(e: ArpError) -> Self {
        NetError::Arp(e)
    }
}
