//! Network Stack Integration
//!
//! [`NetStack`] owns everything the protocol layers share: the packet
//! buffer, the interface registry, the protocol tables, the pending ARP
//! resolution, the DHCP transaction counter, the driver notification queue
//! and the timer service. Every operation borrows it mutably, which is what
//! keeps a single packet in flight.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use log::{debug, info, warn};

use crate::net::arp::{self, ArpState};
use crate::net::config::StackConfig;
use crate::net::dhcp;
use crate::net::error::NetError;
use crate::net::ethernet::{self, EtherType};
use crate::net::event::{NoTimers, Notifier, StackTimer, TimerService};
use crate::net::icmp;
use crate::net::ipv4::{self, protocol, Ipv4RxInfo};
use crate::net::netif::Netif;
use crate::net::packet::PacketBuffer;
use crate::net::registry::{ProtoId, ProtoLayer, ProtoRegistry};
use crate::net::udp;

/// Registrations made by `init`, undone by `uninit`
#[derive(Debug, Clone, Copy)]
struct BuiltinProtos {
    arp: ProtoId,
    ipv4: ProtoId,
    icmp: ProtoId,
    udp: ProtoId,
}

pub struct NetStack {
    pub(crate) config: StackConfig,
    pub(crate) packet: PacketBuffer,
    /// Newest first
    pub(crate) netifs: Vec<Netif>,
    pub(crate) next_iface_id: u32,
    pub(crate) ether_protos: ProtoRegistry<EtherType>,
    pub(crate) ipv4_protos: ProtoRegistry<u8>,
    pub(crate) arp: ArpState,
    /// Addressing of the IPv4 datagram being dispatched
    pub(crate) ipv4_rx: Option<Ipv4RxInfo>,
    pub(crate) dhcp_xid: u32,
    pub(crate) next_socket_id: u32,
    pub(crate) timers: Box<dyn TimerService>,
    notifier: Notifier,
    builtins: Option<BuiltinProtos>,
}

impl NetStack {
    /// Create a stack whose timers never fire
    pub fn new(config: StackConfig) -> Self {
        Self::with_timers(config, Box::new(NoTimers::default()))
    }

    /// Create a stack driven by the integrator's timer service
    pub fn with_timers(config: StackConfig, timers: Box<dyn TimerService>) -> Self {
        let mut stack = Self {
            packet: PacketBuffer::new(config.packet_size),
            netifs: Vec::new(),
            next_iface_id: 0,
            ether_protos: ProtoRegistry::new(ProtoLayer::Ethernet),
            ipv4_protos: ProtoRegistry::new(ProtoLayer::Ipv4),
            arp: ArpState::default(),
            ipv4_rx: None,
            dhcp_xid: config.dhcp_xid_seed,
            next_socket_id: 0,
            timers,
            notifier: Notifier::new(config.event_queue_depth),
            builtins: None,
            config,
        };
        stack.init();
        stack
    }

    fn init(&mut self) {
        let arp = ethernet::register_proto(self, EtherType::ARP, Arc::new(arp::receive));
        let ipv4 = ethernet::register_proto(self, EtherType::IPV4, Arc::new(ipv4::receive));
        let icmp = ipv4::register_proto(self, protocol::ICMP, Arc::new(icmp::receive));
        let udp = ipv4::register_proto(self, protocol::UDP, Arc::new(udp::receive));

        self.builtins = Some(BuiltinProtos {
            arp,
            ipv4,
            icmp,
            udp,
        });
        info!(
            "NET: stack up, {} byte packet buffer",
            self.packet.capacity()
        );
    }

    /// Unregister the built-in protocols and cancel any pending ARP
    /// resolution, whose callback sees `ArpError::Cancelled`
    ///
    /// Interfaces stay registered. Calling it twice is harmless.
    pub fn uninit(&mut self) -> Result<(), NetError> {
        let Some(builtins) = self.builtins.take() else {
            return Ok(());
        };

        ipv4::unregister_proto(self, builtins.udp)?;
        ipv4::unregister_proto(self, builtins.icmp)?;
        ethernet::unregister_proto(self, builtins.ipv4)?;
        ethernet::unregister_proto(self, builtins.arp)?;

        arp::cancel(self);
        info!("NET: stack down");
        Ok(())
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    pub fn packet(&self) -> &PacketBuffer {
        &self.packet
    }

    pub fn packet_mut(&mut self) -> &mut PacketBuffer {
        &mut self.packet
    }

    /// Handle for drivers to queue notifications with
    pub fn notifier(&self) -> Notifier {
        self.notifier.clone()
    }

    /// Source, destination and protocol of the IPv4 datagram being
    /// dispatched. `None` outside of IPv4 receive.
    pub fn ipv4_rx(&self) -> Option<Ipv4RxInfo> {
        self.ipv4_rx
    }

    /// Trigger the oldest queued notification
    ///
    /// Returns `false` when the queue was empty.
    pub fn dispatch_one(&mut self) -> bool {
        match self.notifier.pop() {
            Some(res) => {
                self.trigger(res);
                true
            }
            None => false,
        }
    }

    /// Dispatch queued notifications one at a time until the queue is
    /// empty, including ones queued by the handlers themselves
    pub fn dispatch_pending(&mut self) -> usize {
        let mut count = 0;
        while self.dispatch_one() {
            count += 1;
        }
        count
    }

    /// Run the expiry of a timer armed through the timer service
    pub fn on_timer(&mut self, timer: StackTimer) {
        debug!("NET: timer {:?} fired", timer);
        match timer {
            StackTimer::ArpRetry => arp::on_retry_timer(self),
            StackTimer::DhcpRetransmit(iface) => {
                if let Err(e) = dhcp::on_retransmit_timer(self, iface) {
                    warn!("DHCP: retransmit on {}: {}", iface, e);
                }
            }
        }
    }
}

impl Default for NetStack {
    fn default() -> Self {
        Self::new(StackConfig::default())
    }
}
