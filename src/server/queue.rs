//! Tracks which lineages are waiting to be pushed to which clients (§4.I).
//! The original implicitly queues by iterating `clients x domains` inline in
//! `Server.sync`; here the queue is explicit so the dispatcher (serial or
//! parallel) can be driven independently of discovery.
use std::collections::HashMap;
use std::sync::Mutex;

use crate::types::Lineage;

/// One pending push: a lineage bound for one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub client_hash: String,
    pub lineage: Lineage,
}

/// A simple in-memory queue keyed by client identity hash. Newest lineage
/// for a given client replaces any still-pending one — there's no value in
/// pushing the same domain's certs twice in a row.
#[derive(Default)]
pub struct Queue {
    pending: Mutex<HashMap<String, Lineage>>,
}

impl Queue {
    pub fn new() -> Self {
        Queue::default()
    }

    pub fn push(&self, client_hash: &str, lineage: Lineage) {
        self.pending.lock().unwrap().insert(client_hash.to_string(), lineage);
    }

    pub fn drain(&self) -> Vec<QueueEntry> {
        self.pending
            .lock()
            .unwrap()
            .drain()
            .map(|(client_hash, lineage)| QueueEntry { client_hash, lineage })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn lineage(name: &str) -> Lineage {
        Lineage { name: name.to_string(), path: PathBuf::from(format!("/queue/{name}")) }
    }

    #[test]
    fn push_replaces_pending_entry_for_same_client() {
        let queue = Queue::new();
        queue.push("abc", lineage("example.com"));
        queue.push("abc", lineage("example.org"));
        let drained = queue.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].lineage.name, "example.org");
    }

    #[test]
    fn drain_empties_the_queue() {
        let queue = Queue::new();
        queue.push("abc", lineage("example.com"));
        assert!(!queue.is_empty());
        queue.drain();
        assert!(queue.is_empty());
    }
}
