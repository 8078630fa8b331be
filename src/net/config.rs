//! Stack configuration
//!
//! Every tunable the stack reads lives here; nothing is read from globals.

use crate::net::packet::DEFAULT_PACKET_SIZE;

/// Default ARP request timeout (milliseconds)
pub const ARP_TIMEOUT_MS: u32 = 2000;

/// Default number of ARP retransmissions before giving up
pub const ARP_RETRIES: u8 = 4;

/// Seed for the DHCP transaction id counter
pub const DHCP_XID_SEED: u32 = 0x453a_939a;

/// Minimum DHCP message length on the wire (BOOTP compatibility)
pub const DHCP_MIN_MESSAGE_LEN: usize = 300;

/// Default capacity of the driver notification queue
pub const EVENT_QUEUE_DEPTH: usize = 32;

/// Stack configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackConfig {
    /// Size of the shared packet buffer in bytes
    pub packet_size: usize,
    /// Delay before an unanswered ARP request is retransmitted
    pub arp_timeout_ms: u32,
    /// Retransmissions before a resolution fails
    pub arp_retries: u8,
    /// First DHCP transaction id handed out
    pub dhcp_xid_seed: u32,
    /// DHCP messages are zero-padded up to this length
    pub dhcp_min_message_len: usize,
    /// Restart an unanswered DHCP exchange after this delay.
    /// `None` waits forever.
    pub dhcp_retransmit_ms: Option<u32>,
    /// Compute UDP checksums on transmit instead of sending zero
    pub udp_tx_checksum: bool,
    /// Capacity of the driver notification queue
    pub event_queue_depth: usize,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            packet_size: DEFAULT_PACKET_SIZE,
            arp_timeout_ms: ARP_TIMEOUT_MS,
            arp_retries: ARP_RETRIES,
            dhcp_xid_seed: DHCP_XID_SEED,
            dhcp_min_message_len: DHCP_MIN_MESSAGE_LEN,
            dhcp_retransmit_ms: None,
            udp_tx_checksum: false,
            event_queue_depth: EVENT_QUEUE_DEPTH,
        }
    }
}

impl StackConfig {
    pub fn with_packet_size(mut self, size: usize) -> Self {
        self.packet_size = size;
        self
    }

    pub fn with_arp_timeout_ms(mut self, ms: u32) -> Self {
        self.arp_timeout_ms = ms;
        self
    }

    pub fn with_arp_retries(mut self, retries: u8) -> Self {
        self.arp_retries = retries;
        self
    }

    pub fn with_dhcp_xid_seed(mut self, seed: u32) -> Self {
        self.dhcp_xid_seed = seed;
        self
    }

    pub fn with_dhcp_min_message_len(mut self, len: usize) -> Self {
        self.dhcp_min_message_len = len;
        self
    }

    pub fn with_dhcp_retransmit_ms(mut self, ms: Option<u32>) -> Self {
        self.dhcp_retransmit_ms = ms;
        self
    }

    pub fn with_udp_tx_checksum(mut self, enabled: bool) -> Self {
        self.udp_tx_checksum = enabled;
        self
    }

    pub fn with_event_queue_depth(mut self, depth: usize) -> Self {
        self.event_queue_depth = depth;
        self
    }
}
