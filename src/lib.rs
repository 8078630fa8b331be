//! Network core for small devices: Ethernet, ARP, IPv4, UDP and a DHCP
//! client running over one shared packet buffer.
//!
//! Everything hangs off a [`NetStack`]. Link drivers implement
//! [`drivers::net::EtherDevice`], get registered as interfaces, and tell the
//! stack about incoming frames through a [`net::event::Notifier`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

//Network drivers
pub mod drivers;

//Networking protocols
pub mod net;

pub use net::config::StackConfig;
pub use net::error::NetError;
pub use net::ipv4::Ipv4Info;
pub use net::netif::IfaceId;
pub use net::stack::NetStack;
