//! Events, driver notifications and timers
//!
//! Drivers never call into the stack directly. They push a [`ResourceId`]
//! onto the [`Notifier`] queue and the event loop later hands it to
//! [`NetStack::dispatch_one`], which runs exactly one handler per call.
//!
//! [`NetStack::dispatch_one`]: crate::net::stack::NetStack::dispatch_one

use alloc::sync::Arc;
use core::fmt;

use crossbeam_queue::ArrayQueue;
use log::warn;

use crate::net::error::NetError;
use crate::net::netif::IfaceId;
use crate::net::stack::NetStack;

/// Resource base for network interface events
pub const NETIF_BASE: u16 = 0x4e49;

/// Per-interface event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NetifEvent {
    /// Link went up or down
    PortChange = 0,
    /// The driver has a frame waiting
    PacketReceived = 1,
    /// The driver finished sending a frame
    PacketXmitted = 2,
    /// IPv4 configuration was installed on the interface
    Ipv4InfoSet = 3,
    TcpConnected = 4,
}

impl NetifEvent {
    pub const COUNT: usize = 5;

    pub const ALL: [NetifEvent; Self::COUNT] = [
        NetifEvent::PortChange,
        NetifEvent::PacketReceived,
        NetifEvent::PacketXmitted,
        NetifEvent::Ipv4InfoSet,
        NetifEvent::TcpConnected,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }
}

/// Identifies one schedulable source: `(base, major, minor)`
///
/// For interface events `major` is the interface id and `minor` the
/// [`NetifEvent`] kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId {
    pub base: u16,
    pub major: u32,
    pub minor: u8,
}

impl ResourceId {
    pub const fn new(base: u16, major: u32, minor: u8) -> Self {
        Self { base, major, minor }
    }

    pub fn netif(iface: IfaceId, kind: NetifEvent) -> Self {
        Self::new(NETIF_BASE, iface.0, kind as u8)
    }

    /// Decode an interface event id
    pub fn as_netif(self) -> Option<(IfaceId, NetifEvent)> {
        if self.base != NETIF_BASE {
            return None;
        }
        NetifEvent::from_index(self.minor).map(|kind| (IfaceId(self.major), kind))
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{}:{}", self.base, self.major, self.minor)
    }
}

/// Callback stored in an interface event slot
pub trait EventHandler: Send + Sync {
    fn trigger(&self, stack: &mut NetStack, res: ResourceId);
}

impl<F> EventHandler for F
where
    F: Fn(&mut NetStack, ResourceId) + Send + Sync,
{
    fn trigger(&self, stack: &mut NetStack, res: ResourceId) {
        self(stack, res)
    }
}

/// Driver side of the notification queue
///
/// Cheap to clone; hand one to every driver that raises events.
#[derive(Clone)]
pub struct Notifier {
    queue: Arc<ArrayQueue<ResourceId>>,
}

impl Notifier {
    pub fn new(depth: usize) -> Self {
        Self {
            queue: Arc::new(ArrayQueue::new(depth.max(1))),
        }
    }

    pub fn notify(&self, res: ResourceId) -> Result<(), NetError> {
        self.queue.push(res).map_err(|res| {
            warn!("NET: event queue full, dropping {}", res);
            NetError::QueueFull
        })
    }

    /// A frame is waiting in the driver's receive buffer
    pub fn packet_received(&self, iface: IfaceId) -> Result<(), NetError> {
        self.notify(ResourceId::netif(iface, NetifEvent::PacketReceived))
    }

    pub fn packet_xmitted(&self, iface: IfaceId) -> Result<(), NetError> {
        self.notify(ResourceId::netif(iface, NetifEvent::PacketXmitted))
    }

    pub fn port_changed(&self, iface: IfaceId) -> Result<(), NetError> {
        self.notify(ResourceId::netif(iface, NetifEvent::PortChange))
    }

    pub(crate) fn pop(&self) -> Option<ResourceId> {
        self.queue.pop()
    }

    /// Notifications not yet dispatched
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("pending", &self.queue.len())
            .field("capacity", &self.queue.capacity())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u32);

/// What a timer was armed for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackTimer {
    /// The pending ARP request went unanswered
    ArpRetry,
    /// The DHCP exchange on this interface went unanswered
    DhcpRetransmit(IfaceId),
}

/// Timer collaborator supplied by the event loop
///
/// When a timer expires the loop calls [`NetStack::on_timer`] with the
/// [`StackTimer`] it was armed with.
///
/// [`NetStack::on_timer`]: crate::net::stack::NetStack::on_timer
pub trait TimerService: Send {
    fn timer_set(&mut self, delay_ms: u32, timer: StackTimer) -> TimerId;
    fn timer_del(&mut self, id: TimerId);
}

/// Timer service that never fires
#[derive(Debug, Default)]
pub struct NoTimers {
    next_id: u32,
}

impl TimerService for NoTimers {
    fn timer_set(&mut self, _delay_ms: u32, _timer: StackTimer) -> TimerId {
        self.next_id = self.next_id.wrapping_add(1);
        TimerId(self.next_id)
    }

    fn timer_del(&mut self, _id: TimerId) {}
}
