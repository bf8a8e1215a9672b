use std::collections::HashMap;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Mutex, MutexGuard, PoisonError};

use hurpc_envelope::Envelope;

/// Pending calls keyed by token, each with a single-slot completion channel.
///
/// An entry is removed by whichever happens first: its completion arriving
/// (`resolve`), the caller giving up (`remove`), or the connection ending
/// (`drain`). A completion whose entry is already gone is dropped.
#[derive(Default)]
pub struct CorrelationTable {
    waiters: Mutex<HashMap<i64, SyncSender<Envelope>>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh completion channel for `token`.
    ///
    /// Must happen before the request is written, or a fast reply could
    /// arrive with nobody waiting for it.
    pub fn register(&self, token: i64) -> Receiver<Envelope> {
        let (tx, rx) = sync_channel(1);
        self.lock().insert(token, tx);
        rx
    }

    /// Hand a completed envelope to its waiter, removing the entry.
    ///
    /// Returns whether a waiter was registered under the envelope's token.
    pub fn resolve(&self, envelope: Envelope) -> bool {
        let Some(waiter) = self.lock().remove(&envelope.token) else {
            return false;
        };
        // Capacity 1 and the entry is gone, so this is the only send. It only
        // fails if the caller dropped its receiver, which is harmless.
        let _ = waiter.try_send(envelope);
        true
    }

    /// Drop the entry for `token`. Returns whether one existed.
    pub fn remove(&self, token: i64) -> bool {
        self.lock().remove(&token).is_some()
    }

    /// Drop every entry. Waiters observe a disconnected channel.
    pub fn drain(&self) -> usize {
        let mut waiters = self.lock();
        let count = waiters.len();
        waiters.clear();
        count
    }

    /// Number of outstanding calls.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<i64, SyncSender<Envelope>>> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::TryRecvError;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn resolve_delivers_once_and_removes() {
        let table = CorrelationTable::new();
        let waiter = table.register(7);
        assert_eq!(table.len(), 1);

        assert!(table.resolve(Envelope::response(7, &b"done"[..])));
        assert!(table.is_empty());

        let envelope = waiter.try_recv().unwrap();
        assert_eq!(envelope.payload.as_ref(), b"done");

        // A second completion for the same token finds nobody.
        assert!(!table.resolve(Envelope::response(7, &b"again"[..])));
        assert!(matches!(waiter.try_recv(), Err(TryRecvError::Disconnected)));
    }

    #[test]
    fn unknown_token_is_dropped() {
        let table = CorrelationTable::new();
        let _waiter = table.register(1);
        assert!(!table.resolve(Envelope::response(2, &b"stray"[..])));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn resolve_after_remove_is_dropped() {
        let table = CorrelationTable::new();
        let waiter = table.register(3);

        assert!(table.remove(3));
        assert!(!table.remove(3));
        assert!(!table.resolve(Envelope::response(3, &b"late"[..])));
        assert!(waiter.try_recv().is_err());
    }

    #[test]
    fn resolve_tolerates_dropped_receiver() {
        let table = CorrelationTable::new();
        drop(table.register(4));
        assert!(table.resolve(Envelope::response(4, &b"nobody"[..])));
    }

    #[test]
    fn drain_disconnects_waiters() {
        let table = CorrelationTable::new();
        let a = table.register(1);
        let b = table.register(2);

        assert_eq!(table.drain(), 2);
        assert!(table.is_empty());
        assert!(matches!(a.try_recv(), Err(TryRecvError::Disconnected)));
        assert!(matches!(b.try_recv(), Err(TryRecvError::Disconnected)));
    }

    #[test]
    fn concurrent_resolution_never_cross_delivers() {
        let table = Arc::new(CorrelationTable::new());
        let waiters: Vec<_> = (0..64).map(|token| (token, table.register(token))).collect();

        let resolvers: Vec<_> = (0..4)
            .map(|lane| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || {
                    for token in (lane..64).step_by(4) {
                        let payload = format!("reply-{token}").into_bytes();
                        assert!(table.resolve(Envelope::response(token, payload)));
                    }
                })
            })
            .collect();
        for resolver in resolvers {
            resolver.join().unwrap();
        }

        for (token, waiter) in waiters {
            let envelope = waiter.recv().unwrap();
            assert_eq!(envelope.token, token);
            assert_eq!(envelope.payload.as_ref(), format!("reply-{token}").as_bytes());
        }
        assert!(table.is_empty());
    }
}
