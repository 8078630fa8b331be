// Network Device Abstraction Layer
//
// Link drivers (Ethernet MACs, PHYs, radios that hand out raw frames)
// implement `EtherDevice`. The stack wraps each one in an Ethernet
// interface; the driver never sees protocol state.

use core::fmt;

pub mod loopback;

/// link status of a network interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Up,
    Down,
    Unknown,
}

impl LinkStatus {
    pub fn is_up(self) -> bool {
        self == LinkStatus::Up
    }
}

/// Errors that can occur during packet transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitError {
    /// Packet too large for the device
    PacketTooLarge,
    /// TX buffer is full, try again later
    BufferFull,
    /// Device is not ready
    NotReady,
    /// Hardware error during transmission
    HardwareError,
}

impl fmt::Display for TransmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransmitError::PacketTooLarge => write!(f, "packet too large"),
            TransmitError::BufferFull => write!(f, "transmit buffer full"),
            TransmitError::NotReady => write!(f, "device not ready"),
            TransmitError::HardwareError => write!(f, "hardware error"),
        }
    }
}

/// Errors that can occur during packet reception
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveError {
    /// No packet available
    NoPacket,
    /// CRC error in received packet
    CrcError,
    /// Hardware error during reception
    HardwareError,
}

impl fmt::Display for ReceiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReceiveError::NoPacket => write!(f, "no packet available"),
            ReceiveError::CrcError => write!(f, "CRC error"),
            ReceiveError::HardwareError => write!(f, "hardware error"),
        }
    }
}

/// Operations an Ethernet link driver provides to the stack
pub trait EtherDevice: Send {
    /// Get the MAC address of this device
    fn mac_address(&self) -> [u8; 6];

    /// Get the current link status
    fn link_status(&self) -> LinkStatus;

    /// Largest frame the device handles, if it knows.
    ///
    /// Callers fall back to the stack's configured packet size.
    fn packet_size(&self) -> Option<usize> {
        None
    }

    /// Copy the frame that is waiting into `buf`
    ///
    /// # Returns
    /// * `Ok(len)` - number of bytes written, truncated to `buf.len()`
    /// * `Err(ReceiveError)` if nothing could be read
    fn packet_recv(&mut self, buf: &mut [u8]) -> Result<usize, ReceiveError>;

    /// Transmit a complete Ethernet frame (header included)
    fn packet_xmit(&mut self, frame: &[u8]) -> Result<(), TransmitError>;
}
