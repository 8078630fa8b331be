//! Protocol registration tables
//!
//! One table per dispatch layer (Ethernet keyed by EtherType, IPv4 keyed by
//! protocol number). New registrations go to the front and lookup returns
//! the first match, so the most recent registration for a key wins.

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::net::error::NetError;
use crate::net::netif::IfaceId;
use crate::net::stack::NetStack;

/// Protocol handler trait for frame dispatching
///
/// The receive callback runs with the packet buffer positioned just past
/// the header of the layer that dispatched it.
pub trait ProtocolHandler: Send + Sync {
    fn receive(&self, stack: &mut NetStack, iface: IfaceId);
}

impl<F> ProtocolHandler for F
where
    F: Fn(&mut NetStack, IfaceId) + Send + Sync,
{
    fn receive(&self, stack: &mut NetStack, iface: IfaceId) {
        self(stack, iface)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtoLayer {
    Ethernet,
    Ipv4,
}

/// Handle returned by registration, needed to unregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtoId {
    layer: ProtoLayer,
    id: u32,
}

struct ProtoEntry<K> {
    id: ProtoId,
    key: K,
    handler: Arc<dyn ProtocolHandler>,
}

pub struct ProtoRegistry<K> {
    layer: ProtoLayer,
    entries: Vec<ProtoEntry<K>>,
    next_id: u32,
}

impl<K: PartialEq> ProtoRegistry<K> {
    pub const fn new(layer: ProtoLayer) -> Self {
        Self {
            layer,
            entries: Vec::new(),
            next_id: 0,
        }
    }

    pub fn register(&mut self, key: K, handler: Arc<dyn ProtocolHandler>) -> ProtoId {
        self.next_id += 1;
        let id = ProtoId {
            layer: self.layer,
            id: self.next_id,
        };
        self.entries.insert(0, ProtoEntry { id, key, handler });
        id
    }

    pub fn unregister(&mut self, id: ProtoId) -> Result<(), NetError> {
        let pos = self
            .entries
            .iter()
            .position(|e| e.id == id)
            .ok_or(NetError::NotRegistered)?;
        self.entries.remove(pos);
        Ok(())
    }

    /// First handler registered for `key`
    pub fn lookup(&self, key: &K) -> Option<Arc<dyn ProtocolHandler>> {
        self.entries
            .iter()
            .find(|e| e.key == *key)
            .map(|e| Arc::clone(&e.handler))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
