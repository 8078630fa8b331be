//! Ethernet interfaces
//!
//! An `EtherIf` wraps a link driver and holds the protocol state the stack
//! keeps per interface: the installed IPv4 configuration, the DHCP client
//! and the UDP sockets bound to it.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use log::info;

use crate::drivers::net::{EtherDevice, LinkStatus};
use crate::net::dhcp::DhcpClient;
use crate::net::error::NetError;
use crate::net::ethernet::{self, MacAddr};
use crate::net::event::{NetifEvent, ResourceId};
use crate::net::ipv4::Ipv4Info;
use crate::net::netif::{IfaceId, NetifKind};
use crate::net::packet::PacketBuffer;
use crate::net::stack::NetStack;
use crate::net::udp::UdpSocket;

pub struct EtherIf {
    device: Box<dyn EtherDevice>,
    pub(crate) ipv4_info: Option<Ipv4Info>,
    pub(crate) dhcpc: Option<DhcpClient>,
    /// Newest first
    pub(crate) sockets: Vec<UdpSocket>,
}

impl EtherIf {
    pub fn new(device: Box<dyn EtherDevice>) -> Self {
        Self {
            device,
            ipv4_info: None,
            dhcpc: None,
            sockets: Vec::new(),
        }
    }

    pub fn device_mut(&mut self) -> &mut dyn EtherDevice {
        self.device.as_mut()
    }

    pub fn mac_address(&self) -> MacAddr {
        self.device.mac_address()
    }

    pub fn link_status(&self) -> LinkStatus {
        self.device.link_status()
    }

    /// Largest frame the driver accepts, if it says
    pub fn packet_size(&self) -> Option<usize> {
        self.device.packet_size()
    }

    pub fn ipv4_info(&self) -> Option<&Ipv4Info> {
        self.ipv4_info.as_ref()
    }

    pub fn dhcp_client(&self) -> Option<&DhcpClient> {
        self.dhcpc.as_ref()
    }

    pub fn sockets(&self) -> &[UdpSocket] {
        &self.sockets
    }
}

impl NetStack {
    /// Register an Ethernet link driver as a new interface
    ///
    /// The interface's packet-received slot is wired to Ethernet dispatch,
    /// so every `packet_received` notification pulls one frame from the
    /// driver and runs it up the stack.
    pub fn register_etherif(&mut self, device: Box<dyn EtherDevice>) -> IfaceId {
        let id = self.attach_netif(NetifKind::Ether(EtherIf::new(device)));
        if let Ok(netif) = self.netif_mut(id) {
            netif.set_handler(
                NetifEvent::PacketReceived,
                Some(Arc::new(ethernet::on_packet_received)),
            );
        }
        id
    }

    pub fn etherif(&self, id: IfaceId) -> Result<&EtherIf, NetError> {
        self.netif(id)?.as_ether().ok_or(NetError::NotEthernet(id))
    }

    pub fn etherif_mut(&mut self, id: IfaceId) -> Result<&mut EtherIf, NetError> {
        self.netif_mut(id)?
            .as_ether_mut()
            .ok_or(NetError::NotEthernet(id))
    }

    /// The interface and the packet buffer, borrowed together
    pub(crate) fn etherif_and_packet(
        &mut self,
        id: IfaceId,
    ) -> Result<(&mut EtherIf, &mut PacketBuffer), NetError> {
        let netif = self
            .netifs
            .iter_mut()
            .find(|n| n.id() == id)
            .ok_or(NetError::UnknownInterface(id))?;
        let ether = netif.as_ether_mut().ok_or(NetError::NotEthernet(id))?;
        Ok((ether, &mut self.packet))
    }

    pub fn ipv4_info(&self, id: IfaceId) -> Result<Option<Ipv4Info>, NetError> {
        Ok(self.etherif(id)?.ipv4_info)
    }

    /// Install IPv4 configuration and fire the interface's `Ipv4InfoSet`
    /// event
    pub fn set_ipv4_info(&mut self, id: IfaceId, info: Ipv4Info) -> Result<(), NetError> {
        self.etherif_mut(id)?.ipv4_info = Some(info);
        info!(
            "NET: {} configured: {} / {} router {}",
            id, info.ip, info.netmask, info.router
        );
        self.trigger(ResourceId::netif(id, NetifEvent::Ipv4InfoSet));
        Ok(())
    }

    pub fn clear_ipv4_info(&mut self, id: IfaceId) -> Result<Option<Ipv4Info>, NetError> {
        Ok(self.etherif_mut(id)?.ipv4_info.take())
    }
}
