use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::mux::Multiplexer;

/// Live multiplexers keyed by peer id.
///
/// Owned by whatever accepts connections and passed by reference to code
/// that needs to reach a particular peer.
#[derive(Default)]
pub struct PeerTable {
    peers: Mutex<HashMap<String, Multiplexer>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `mux` under its own id, returning any multiplexer it replaces.
    pub fn insert(&self, mux: Multiplexer) -> Option<Multiplexer> {
        self.lock().insert(mux.id().to_string(), mux)
    }

    /// Track `mux` under an explicit key (e.g. the remote IP).
    pub fn insert_as(&self, key: impl Into<String>, mux: Multiplexer) -> Option<Multiplexer> {
        self.lock().insert(key.into(), mux)
    }

    pub fn get(&self, key: &str) -> Option<Multiplexer> {
        self.lock().get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<Multiplexer> {
        self.lock().remove(key)
    }

    /// Tracked keys, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget multiplexers whose dispatch loop has ended. Returns how many.
    pub fn prune_closed(&self) -> usize {
        let mut peers = self.lock();
        let before = peers.len();
        peers.retain(|_, mux| !mux.is_closed());
        before - peers.len()
    }

    /// Close every tracked connection and forget it.
    pub fn close_all(&self) {
        let drained: Vec<Multiplexer> = self.lock().drain().map(|(_, mux)| mux).collect();
        for mux in drained {
            if let Err(err) = mux.close() {
                tracing::debug!(peer = mux.id(), error = %err, "close failed");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Multiplexer>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use hurpc_transport::IpcStream;

    use super::*;
    use crate::config::MuxConfig;

    fn mux(id: &str) -> (Multiplexer, IpcStream) {
        let (local, remote) = IpcStream::pair().unwrap();
        let config = MuxConfig::with_timeout(Duration::from_secs(1)).read_timeout(None);
        (Multiplexer::with_id(id, local, config).unwrap(), remote)
    }

    #[test]
    fn insert_get_remove() {
        let table = PeerTable::new();
        let (a, _ra) = mux("peer-1");
        let (b, _rb) = mux("peer-2");

        assert!(table.insert(a).is_none());
        assert!(table.insert_as("10.0.0.7", b).is_none());

        assert_eq!(table.ids(), vec!["10.0.0.7".to_string(), "peer-1".to_string()]);
        assert_eq!(table.get("10.0.0.7").unwrap().id(), "peer-2");
        assert!(table.get("missing").is_none());

        assert!(table.remove("peer-1").is_some());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn reinserting_replaces() {
        let table = PeerTable::new();
        let (first, _r1) = mux("peer-1");
        let (second, _r2) = mux("peer-1");

        table.insert(first);
        let replaced = table.insert(second);
        assert!(replaced.is_some());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn prune_drops_finished_connections() {
        let table = PeerTable::new();
        let (live, _live_remote) = mux("live");
        let (dead, dead_remote) = mux("dead");
        live.spawn().unwrap();
        let handle = dead.spawn().unwrap();
        table.insert(live);
        table.insert(dead);

        drop(dead_remote);
        handle.join().unwrap().unwrap();

        assert_eq!(table.prune_closed(), 1);
        assert_eq!(table.ids(), vec!["live".to_string()]);

        table.close_all();
        assert!(table.is_empty());
    }
}
