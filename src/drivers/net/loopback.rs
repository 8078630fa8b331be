//! In-memory Ethernet driver
//!
//! Frames handed to `packet_xmit` are recorded instead of sent, and frames
//! injected through a [`LoopbackHandle`] come back out of `packet_recv`.
//! With echo enabled every transmitted frame is also queued for receive,
//! so the stack hears itself.
//!
//! The handle shares state with the device, so a test keeps it after the
//! device has been boxed and registered.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use crate::drivers::net::{EtherDevice, LinkStatus, ReceiveError, TransmitError};

/// Default number of frames either queue holds
pub const DEFAULT_QUEUE_SIZE: usize = 64;

struct LoopbackState {
    mac_addr: [u8; 6],
    link: LinkStatus,
    echo: bool,
    /// Frames waiting for `packet_recv`
    rx_queue: VecDeque<Vec<u8>>,
    /// Frames passed to `packet_xmit`, oldest first
    tx_log: VecDeque<Vec<u8>>,
    max_queue_size: usize,
}

pub struct LoopbackDevice {
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackDevice {
    pub fn new(mac_addr: [u8; 6]) -> Self {
        Self::with_queue_size(mac_addr, DEFAULT_QUEUE_SIZE)
    }

    /// # Arguments
    /// * `max_queue_size` - frames kept per direction before transmit
    ///   reports `BufferFull`
    pub fn with_queue_size(mac_addr: [u8; 6], max_queue_size: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(LoopbackState {
                mac_addr,
                link: LinkStatus::Up,
                echo: false,
                rx_queue: VecDeque::with_capacity(max_queue_size),
                tx_log: VecDeque::new(),
                max_queue_size,
            })),
        }
    }

    /// A device that receives everything it transmits
    pub fn echo(mac_addr: [u8; 6]) -> Self {
        let dev = Self::new(mac_addr);
        dev.state.lock().echo = true;
        dev
    }

    pub fn handle(&self) -> LoopbackHandle {
        LoopbackHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl EtherDevice for LoopbackDevice {
    fn mac_address(&self) -> [u8; 6] {
        self.state.lock().mac_addr
    }

    fn link_status(&self) -> LinkStatus {
        self.state.lock().link
    }

    fn packet_recv(&mut self, buf: &mut [u8]) -> Result<usize, ReceiveError> {
        let frame = self
            .state
            .lock()
            .rx_queue
            .pop_front()
            .ok_or(ReceiveError::NoPacket)?;

        let len = frame.len().min(buf.len());
        buf[..len].copy_from_slice(&frame[..len]);
        Ok(len)
    }

    fn packet_xmit(&mut self, frame: &[u8]) -> Result<(), TransmitError> {
        let mut state = self.state.lock();
        if !state.link.is_up() {
            return Err(TransmitError::NotReady);
        }
        if state.tx_log.len() >= state.max_queue_size {
            return Err(TransmitError::BufferFull);
        }

        if state.echo {
            if state.rx_queue.len() >= state.max_queue_size {
                return Err(TransmitError::BufferFull);
            }
            state.rx_queue.push_back(frame.to_vec());
        }
        state.tx_log.push_back(frame.to_vec());
        Ok(())
    }
}

/// Test-side view of a [`LoopbackDevice`]
#[derive(Clone)]
pub struct LoopbackHandle {
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackHandle {
    /// Queue a frame for the next `packet_recv`
    pub fn inject(&self, frame: &[u8]) {
        self.state.lock().rx_queue.push_back(frame.to_vec());
    }

    /// Frames waiting to be received
    pub fn pending_rx(&self) -> usize {
        self.state.lock().rx_queue.len()
    }

    /// Drain the transmit log
    pub fn take_transmitted(&self) -> Vec<Vec<u8>> {
        self.state.lock().tx_log.drain(..).collect()
    }

    pub fn last_transmitted(&self) -> Option<Vec<u8>> {
        self.state.lock().tx_log.back().cloned()
    }

    pub fn transmitted_count(&self) -> usize {
        self.state.lock().tx_log.len()
    }

    pub fn set_link(&self, link: LinkStatus) {
        self.state.lock().link = link;
    }
}
