//! Known peers, de-duplicated by address

use hashbrown::HashMap;

use crate::types::PeerDevice;

/// Insertion-ordered set of peers keyed by address
///
/// A rediscovered address overwrites name and origin in place and keeps its
/// original position. The registry emits nothing; callers publish snapshots.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    peers: Vec<PeerDevice>,
    index: HashMap<String, usize>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new peer or update the existing one with the same address.
    /// Returns true if the address was not known before.
    pub fn upsert(&mut self, peer: PeerDevice) -> bool {
        match self.index.get(peer.address()) {
            Some(&position) => {
                self.peers[position] = peer;
                false
            }
            None => {
                self.index.insert(peer.address().to_string(), self.peers.len());
                self.peers.push(peer);
                true
            }
        }
    }

    /// Peers in insertion order
    pub fn list(&self) -> &[PeerDevice] {
        &self.peers
    }

    pub fn get(&self, address: &str) -> Option<&PeerDevice> {
        self.index.get(address).map(|&position| &self.peers[position])
    }

    pub fn contains(&self, address: &str) -> bool {
        self.index.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn clear(&mut self) {
        self.peers.clear();
        self.index.clear();
    }
}
