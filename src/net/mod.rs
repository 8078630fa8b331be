//! Network stack implementation
//!
//! Layering, leaf to root: packet buffer, interfaces, Ethernet, ARP, IPv4,
//! ICMP/UDP, DHCP client.

pub mod packet;
pub mod config;
pub mod error;
pub mod event;
pub mod registry;
pub mod netif;
pub mod etherif;
pub mod checksum;
pub mod ethernet;
pub mod arp;
pub mod ipv4;
pub mod icmp;
pub mod udp;
pub mod dhcp;
pub mod stack;

pub use ethernet::MacAddr;
pub use ipv4::Ipv4Info;
