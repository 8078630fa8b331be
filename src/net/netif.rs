//! Network interfaces
//!
//! Every interface lives in one registry on the [`NetStack`] and shares a
//! single id space. An interface is either an Ethernet interface, whose
//! protocol state (IPv4 info, DHCP client, UDP sockets) the stack manages,
//! or a self-contained device that implements the interface operations
//! itself (a Wi-Fi module with its own IP stack, for example).

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::net::Ipv4Addr;

use log::{debug, info};

use crate::drivers::net::LinkStatus;
use crate::net::dhcp;
use crate::net::error::NetError;
use crate::net::etherif::EtherIf;
use crate::net::ethernet::MacAddr;
use crate::net::event::{EventHandler, NetifEvent, ResourceId};
use crate::net::stack::NetStack;
use crate::net::arp;

/// Interface id, assigned at registration and never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IfaceId(pub u32);

impl fmt::Display for IfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "if{}", self.0)
    }
}

/// Operations of a device that manages its own IP connectivity
pub trait NetDevice: Send {
    fn mac_address(&self) -> MacAddr;

    fn link_status(&self) -> LinkStatus;

    /// Bring up IP connectivity (join a network, request an address)
    fn ip_connect(&mut self) -> Result<(), NetError>;

    fn ip_disconnect(&mut self) -> Result<(), NetError>;

    fn tcp_connect(&mut self, _addr: Ipv4Addr, _port: u16) -> Result<(), NetError> {
        Err(NetError::Unsupported)
    }

    fn tcp_disconnect(&mut self) -> Result<(), NetError> {
        Err(NetError::Unsupported)
    }

    /// Current IPv4 address, if one is assigned
    fn ip_addr(&self) -> Option<Ipv4Addr>;
}

pub enum NetifKind {
    Ether(EtherIf),
    Device(Box<dyn NetDevice>),
}

/// A registered interface and its event slots
pub struct Netif {
    id: IfaceId,
    kind: NetifKind,
    events: [Option<Arc<dyn EventHandler>>; NetifEvent::COUNT],
}

impl Netif {
    pub(crate) fn new(id: IfaceId, kind: NetifKind) -> Self {
        Self {
            id,
            kind,
            events: Default::default(),
        }
    }

    pub fn id(&self) -> IfaceId {
        self.id
    }

    pub fn kind(&self) -> &NetifKind {
        &self.kind
    }

    pub fn is_ether(&self) -> bool {
        matches!(self.kind, NetifKind::Ether(_))
    }

    pub fn as_ether(&self) -> Option<&EtherIf> {
        match &self.kind {
            NetifKind::Ether(ether) => Some(ether),
            NetifKind::Device(_) => None,
        }
    }

    pub fn as_ether_mut(&mut self) -> Option<&mut EtherIf> {
        match &mut self.kind {
            NetifKind::Ether(ether) => Some(ether),
            NetifKind::Device(_) => None,
        }
    }

    pub fn mac_address(&self) -> MacAddr {
        match &self.kind {
            NetifKind::Ether(ether) => ether.mac_address(),
            NetifKind::Device(dev) => dev.mac_address(),
        }
    }

    pub fn link_status(&self) -> LinkStatus {
        match &self.kind {
            NetifKind::Ether(ether) => ether.link_status(),
            NetifKind::Device(dev) => dev.link_status(),
        }
    }

    pub fn ip_addr(&self) -> Option<Ipv4Addr> {
        match &self.kind {
            NetifKind::Ether(ether) => ether.ipv4_info().map(|info| info.ip),
            NetifKind::Device(dev) => dev.ip_addr(),
        }
    }

    pub fn has_handler(&self, kind: NetifEvent) -> bool {
        self.events[kind.index()].is_some()
    }

    pub(crate) fn handler(&self, kind: NetifEvent) -> Option<Arc<dyn EventHandler>> {
        self.events[kind.index()].clone()
    }

    pub(crate) fn set_handler(
        &mut self,
        kind: NetifEvent,
        handler: Option<Arc<dyn EventHandler>>,
    ) -> Option<Arc<dyn EventHandler>> {
        core::mem::replace(&mut self.events[kind.index()], handler)
    }
}

impl fmt::Debug for Netif {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Netif")
            .field("id", &self.id)
            .field("ether", &self.is_ether())
            .finish()
    }
}

impl NetStack {
    /// Register a self-contained device as an interface
    pub fn register_netif(&mut self, device: Box<dyn NetDevice>) -> IfaceId {
        self.attach_netif(NetifKind::Device(device))
    }

    pub(crate) fn attach_netif(&mut self, kind: NetifKind) -> IfaceId {
        self.next_iface_id += 1;
        let id = IfaceId(self.next_iface_id);
        self.netifs.insert(0, Netif::new(id, kind));
        info!("NET: registered interface {}", id);
        id
    }

    /// Remove an interface from the registry
    ///
    /// Its event slots go with it, so notifications still queued for it are
    /// dropped at dispatch. A resolution pending on it fails with
    /// `NoSuchInterface`.
    pub fn unregister_netif(&mut self, id: IfaceId) -> Result<Netif, NetError> {
        let pos = self
            .netifs
            .iter()
            .position(|n| n.id == id)
            .ok_or(NetError::UnknownInterface(id))?;
        let netif = self.netifs.remove(pos);

        if let Some(timer) = netif
            .as_ether()
            .and_then(|ether| ether.dhcp_client())
            .and_then(|client| client.timer())
        {
            self.timers.timer_del(timer);
        }
        arp::interface_gone(self, id);

        info!("NET: unregistered interface {}", id);
        Ok(netif)
    }

    pub fn netif(&self, id: IfaceId) -> Result<&Netif, NetError> {
        self.netifs
            .iter()
            .find(|n| n.id == id)
            .ok_or(NetError::UnknownInterface(id))
    }

    pub fn netif_mut(&mut self, id: IfaceId) -> Result<&mut Netif, NetError> {
        self.netifs
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or(NetError::UnknownInterface(id))
    }

    /// Self-contained device behind `id`. Ethernet interfaces have no
    /// device-level operations, so they report `Unsupported`.
    fn device_mut(&mut self, id: IfaceId) -> Result<&mut dyn NetDevice, NetError> {
        match &mut self.netif_mut(id)?.kind {
            NetifKind::Ether(_) => Err(NetError::Unsupported),
            NetifKind::Device(dev) => Ok(dev.as_mut()),
        }
    }

    /// Registered interfaces, newest first
    pub fn netif_ids(&self) -> Vec<IfaceId> {
        self.netifs.iter().map(|n| n.id).collect()
    }

    pub fn mac_addr(&self, id: IfaceId) -> Result<MacAddr, NetError> {
        Ok(self.netif(id)?.mac_address())
    }

    pub fn link_status(&self, id: IfaceId) -> Result<LinkStatus, NetError> {
        Ok(self.netif(id)?.link_status())
    }

    pub fn ip_addr(&self, id: IfaceId) -> Result<Option<Ipv4Addr>, NetError> {
        Ok(self.netif(id)?.ip_addr())
    }

    /// Bring up IP connectivity. Ethernet interfaces start their DHCP client.
    pub fn ip_connect(&mut self, id: IfaceId) -> Result<(), NetError> {
        if self.netif(id)?.is_ether() {
            return dhcp::start(self, id);
        }
        self.device_mut(id)?.ip_connect()
    }

    /// Drop IP connectivity. Ethernet interfaces stop DHCP and forget their
    /// address.
    pub fn ip_disconnect(&mut self, id: IfaceId) -> Result<(), NetError> {
        if self.netif(id)?.is_ether() {
            dhcp::stop(self, id)?;
            self.clear_ipv4_info(id)?;
            return Ok(());
        }
        self.device_mut(id)?.ip_disconnect()
    }

    pub fn tcp_connect(&mut self, id: IfaceId, addr: Ipv4Addr, port: u16) -> Result<(), NetError> {
        self.device_mut(id)?.tcp_connect(addr, port)
    }

    pub fn tcp_disconnect(&mut self, id: IfaceId) -> Result<(), NetError> {
        self.device_mut(id)?.tcp_disconnect()
    }

    /// Install a handler in one of the interface's event slots, replacing
    /// any previous one
    pub fn on_event_set(
        &mut self,
        id: IfaceId,
        kind: NetifEvent,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), NetError> {
        self.netif_mut(id)?.set_handler(kind, Some(handler));
        Ok(())
    }

    /// Empty an event slot, returning what was in it
    pub fn on_event_clear(
        &mut self,
        id: IfaceId,
        kind: NetifEvent,
    ) -> Result<Option<Arc<dyn EventHandler>>, NetError> {
        Ok(self.netif_mut(id)?.set_handler(kind, None))
    }

    /// Run the handler for `res`, if there is one
    pub fn trigger(&mut self, res: ResourceId) {
        let Some((id, kind)) = res.as_netif() else {
            debug!("NET: ignoring foreign resource {}", res);
            return;
        };

        let handler = match self.netif(id) {
            Ok(netif) => netif.handler(kind),
            Err(_) => {
                debug!("NET: event {:?} for unknown interface {}", kind, id);
                return;
            }
        };

        if let Some(handler) = handler {
            handler.trigger(self, res);
        }
    }

    pub fn packet_received(&mut self, id: IfaceId) {
        self.trigger(ResourceId::netif(id, NetifEvent::PacketReceived));
    }

    pub fn packet_xmitted(&mut self, id: IfaceId) {
        self.trigger(ResourceId::netif(id, NetifEvent::PacketXmitted));
    }

    pub fn port_changed(&mut self, id: IfaceId) {
        self.trigger(ResourceId::netif(id, NetifEvent::PortChange));
    }
}
