//! Shared server pool
//!
//! Ordered list of known-good servers. Index 0 is the preferred server;
//! the supervisor always launches it and demotes it on failure.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::models::ServerDescriptor;

/// Lock-guarded, ordered collection of candidate servers
///
/// Every operation holds the lock for its whole duration, so readers
/// never observe a half-replaced list.
#[derive(Debug, Default)]
pub struct ServerPool {
    servers: RwLock<Vec<Arc<ServerDescriptor>>>,
}

impl ServerPool {
    pub fn new() -> Self {
        Self {
            servers: RwLock::new(Vec::new()),
        }
    }

    pub fn with_servers(servers: Vec<ServerDescriptor>) -> Self {
        let pool = Self::new();
        pool.replace(servers);
        pool
    }

    /// Swap the whole pool contents
    pub fn replace(&self, servers: Vec<ServerDescriptor>) {
        let fresh: Vec<Arc<ServerDescriptor>> = servers.into_iter().map(Arc::new).collect();
        *self.servers.write() = fresh;
    }

    /// Most preferred server, left in place
    pub fn peek_first(&self) -> Option<Arc<ServerDescriptor>> {
        self.servers.read().first().cloned()
    }

    /// Drop the most preferred server, keeping the order of the rest
    pub fn demote_first(&self) -> Option<Arc<ServerDescriptor>> {
        let mut servers = self.servers.write();
        if servers.is_empty() {
            None
        } else {
            Some(servers.remove(0))
        }
    }

    /// Drop the most preferred server only if it is still `server`
    ///
    /// A refresh may have swapped the list since `server` was peeked; the
    /// new head has not been tried and stays. Returns whether anything
    /// was removed.
    pub fn demote_if_first(&self, server: &Arc<ServerDescriptor>) -> bool {
        let mut servers = self.servers.write();
        match servers.first() {
            Some(head) if Arc::ptr_eq(head, server) => {
                servers.remove(0);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.servers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ServerDefaults;

    fn server(host: &str, latency_ms: f64) -> ServerDescriptor {
        ServerDescriptor::new(host, 443, "aes-256-cfb", "pw", &ServerDefaults::default())
            .with_latency(latency_ms)
    }

    #[test]
    fn test_empty_pool() {
        let pool = ServerPool::new();
        assert!(pool.is_empty());
        assert!(pool.peek_first().is_none());
        assert!(pool.demote_first().is_none());
    }

    #[test]
    fn test_peek_does_not_remove() {
        let pool = ServerPool::with_servers(vec![server("a", 1.0), server("b", 2.0)]);

        assert_eq!(pool.peek_first().unwrap().host, "a");
        assert_eq!(pool.peek_first().unwrap().host, "a");
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_demote_removes_exactly_the_peeked_server() {
        let pool = ServerPool::with_servers(vec![
            server("a", 1.0),
            server("b", 2.0),
            server("c", 3.0),
        ]);

        let peeked = pool.peek_first().unwrap();
        let demoted = pool.demote_first().unwrap();
        assert!(Arc::ptr_eq(&peeked, &demoted));

        assert_eq!(pool.len(), 2);
        assert_eq!(pool.peek_first().unwrap().host, "b");
        pool.demote_first();
        assert_eq!(pool.peek_first().unwrap().host, "c");
    }

    #[test]
    fn test_demote_if_first_matches_identity() {
        let pool = ServerPool::with_servers(vec![server("a", 1.0), server("b", 2.0)]);
        let active = pool.peek_first().unwrap();

        // Same host, fresh entry: not the server that was peeked.
        pool.replace(vec![server("x", 1.0), server("a", 2.0), server("y", 3.0)]);
        assert!(!pool.demote_if_first(&active));
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.peek_first().unwrap().host, "x");

        let head = pool.peek_first().unwrap();
        assert!(pool.demote_if_first(&head));
        assert_eq!(pool.peek_first().unwrap().host, "a");
        assert_eq!(pool.len(), 2);

        assert!(!ServerPool::new().demote_if_first(&head));
    }

    #[test]
    fn test_replace_discards_previous_contents() {
        let pool = ServerPool::with_servers(vec![server("a", 1.0)]);
        pool.replace(vec![server("x", 5.0), server("y", 6.0)]);

        assert_eq!(pool.len(), 2);
        assert_eq!(pool.peek_first().unwrap().host, "x");

        pool.replace(Vec::new());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_active_server_survives_replace() {
        let pool = ServerPool::with_servers(vec![server("a", 1.0)]);
        let active = pool.peek_first().unwrap();

        pool.replace(vec![server("b", 1.0)]);
        assert_eq!(active.host, "a");
    }

    #[test]
    fn test_replace_is_atomic_for_readers() {
        let old: Vec<_> = (0..64).map(|i| server(&format!("old-{}", i), 1.0)).collect();
        let pool = Arc::new(ServerPool::with_servers(old));

        let writer = {
            let pool = pool.clone();
            std::thread::spawn(move || {
                for round in 0..200 {
                    let prefix = if round % 2 == 0 { "new" } else { "old" };
                    let servers = (0..64)
                        .map(|i| server(&format!("{}-{}", prefix, i), 1.0))
                        .collect();
                    pool.replace(servers);
                }
            })
        };

        for _ in 0..2000 {
            let guard = pool.servers.read();
            let prefix = guard[0].host.split('-').next().unwrap().to_string();
            assert_eq!(guard.len(), 64);
            assert!(guard.iter().all(|s| s.host.starts_with(&prefix)));
        }

        writer.join().unwrap();
    }
}
