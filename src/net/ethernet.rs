//Ethernet Frame Layer (OSI Layer 2)
//
//Dispatches received frames to the protocol registered for their EtherType
//and prepends the Ethernet header on transmit.
//Frame structure: [Dest MAC (6)][Src MAC (6)][EtherType (2)][Payload]
//The driver strips and appends the CRC; the stack never sees it.

use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use core::fmt;

use log::{debug, error};

use crate::net::error::NetError;
use crate::net::event::ResourceId;
use crate::net::netif::IfaceId;
use crate::net::packet::ResetMode;
use crate::net::registry::{ProtoId, ProtocolHandler};
use crate::net::stack::NetStack;

pub type MacAddr = [u8; 6];

/// EtherType constants
pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;

/// Broadcast MAC address (FF:FF:FF:FF:FF:FF)
pub const BROADCAST_MAC: MacAddr = [0xFF; 6];

pub const ZERO_MAC: MacAddr = [0; 6];

/// Ethernet frame header size (excluding CRC)
pub const HEADER_SIZE: usize = 14;

/// EtherType as it appears on the wire (network byte order)
///
/// Registration keys are kept in wire order so dispatch compares the two
/// header bytes directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EtherType(pub [u8; 2]);

impl EtherType {
    pub const IPV4: EtherType = EtherType::from_u16(ETHERTYPE_IPV4);
    pub const ARP: EtherType = EtherType::from_u16(ETHERTYPE_ARP);

    pub const fn from_u16(value: u16) -> Self {
        EtherType(value.to_be_bytes())
    }

    pub fn to_u16(self) -> u16 {
        u16::from_be_bytes(self.0)
    }
}

impl fmt::Display for EtherType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.to_u16())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EthernetError {
    /// Frame is too short to be valid
    FrameTooShort,
}

/// Parsed view of an Ethernet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetHeader {
    pub dest_mac: MacAddr,
    pub src_mac: MacAddr,
    pub ethertype: EtherType,
}

impl EthernetHeader {
    /// Parse the header at the start of `data`
    pub fn from_bytes(data: &[u8]) -> Result<Self, EthernetError> {
        if data.len() < HEADER_SIZE {
            return Err(EthernetError::FrameTooShort);
        }

        let mut dest_mac = [0u8; 6];
        dest_mac.copy_from_slice(&data[0..6]);

        let mut src_mac = [0u8; 6];
        src_mac.copy_from_slice(&data[6..12]);

        Ok(Self {
            dest_mac,
            src_mac,
            ethertype: EtherType([data[12], data[13]]),
        })
    }

    /// Write the header into the first `HEADER_SIZE` bytes of `buf`
    pub fn write(&self, buf: &mut [u8]) {
        buf[0..6].copy_from_slice(&self.dest_mac);
        buf[6..12].copy_from_slice(&self.src_mac);
        buf[12..14].copy_from_slice(&self.ethertype.0);
    }

    pub fn is_broadcast(&self) -> bool {
        self.dest_mac == BROADCAST_MAC
    }
}

/// Register a protocol for frames carrying `ethertype`
pub fn register_proto(
    stack: &mut NetStack,
    ethertype: EtherType,
    handler: Arc<dyn ProtocolHandler>,
) -> ProtoId {
    debug!("ETH: registering protocol {}", ethertype);
    stack.ether_protos.register(ethertype, handler)
}

pub fn unregister_proto(stack: &mut NetStack, id: ProtoId) -> Result<(), NetError> {
    stack.ether_protos.unregister(id)
}

/// Packet-received handler installed on every Ethernet interface
pub fn on_packet_received(stack: &mut NetStack, res: ResourceId) {
    match res.as_netif() {
        Some((iface, _)) => receive(stack, iface),
        None => error!("ETH: bad resource {}", res),
    }
}

/// Pull one frame from the interface's driver and dispatch it
pub fn receive(stack: &mut NetStack, iface: IfaceId) {
    let (ether, pkt) = match stack.etherif_and_packet(iface) {
        Ok(parts) => parts,
        Err(e) => {
            error!("ETH: receive on {}: {}", iface, e);
            return;
        }
    };

    pkt.reset(ResetMode::Head);
    let len = match ether.device_mut().packet_recv(pkt.data_mut()) {
        Ok(len) => len,
        Err(e) => {
            debug!("ETH: nothing read on {}: {}", iface, e);
            return;
        }
    };
    pkt.set_len(len);

    let data = pkt.data();
    if data.len() < HEADER_SIZE {
        debug!("ETH: runt frame ({} bytes) on {}", data.len(), iface);
        return;
    }
    let ethertype = EtherType([data[12], data[13]]);

    let Some(handler) = stack.ether_protos.lookup(&ethertype) else {
        debug!("ETH: no protocol for ethertype {}, dropping", ethertype);
        return;
    };

    if stack.packet.pull(HEADER_SIZE).is_err() {
        return;
    }
    handler.receive(stack, iface);
}

/// Prepend the Ethernet header to the payload already in the buffer and
/// hand the frame to the driver
pub fn xmit(
    stack: &mut NetStack,
    iface: IfaceId,
    dst: MacAddr,
    ethertype: EtherType,
) -> Result<(), NetError> {
    let (ether, pkt) = stack.etherif_and_packet(iface)?;

    let header = EthernetHeader {
        dest_mac: dst,
        src_mac: ether.mac_address(),
        ethertype,
    };
    header.write(pkt.push(HEADER_SIZE)?);

    ether.device_mut().packet_xmit(pkt.data())?;
    Ok(())
}

/// Format a MAC address for display
pub fn format_mac(mac: &MacAddr) -> String {
    format!(
        "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}
