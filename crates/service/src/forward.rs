//! Forward Query Table (§3, §4.6): remembers which indirect displays this
//! manager forwarded to a peer manager, so that when the forwarded session
//! eventually reaches Accept/Decline/Refuse/Manage we know which manager to
//! notify via MANAGED_FORWARD.

use std::{
    net::SocketAddr,
    time::{Duration, Instant},
};

use parking_lot::Mutex;

/// Bounded FIFO entry limit (§3).
pub const MAX_FORWARD_QUERIES: usize = 10;

/// Entries older than this are evicted lazily on lookup (§3, §5).
pub const FORWARD_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct ForwardQuery {
    pub display_addr: SocketAddr,
    pub originating_manager_addr: SocketAddr,
    pub acctime: Instant,
}

#[derive(Default)]
pub struct ForwardQueryTable(Mutex<Vec<ForwardQuery>>);

impl ForwardQueryTable {
    /// `alloc` (§4.6): evict the oldest entry until there is room, then
    /// record a fresh one.
    pub fn alloc(&self, originating_manager_addr: SocketAddr, display_addr: SocketAddr, now: Instant) {
        let mut entries = self.0.lock();

        while entries.len() >= MAX_FORWARD_QUERIES {
            let oldest = entries
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| e.acctime)
                .map(|(i, _)| i);

            match oldest {
                Some(i) => {
                    entries.remove(i);
                }
                None => break,
            }
        }

        entries.push(ForwardQuery {
            display_addr,
            originating_manager_addr,
            acctime: now,
        });
    }

    /// `lookup` (§4.6): linear scan, opportunistically evicting anything
    /// past [`FORWARD_QUERY_TIMEOUT`] along the way.
    pub fn lookup(&self, display_addr: &SocketAddr, now: Instant) -> Option<ForwardQuery> {
        let mut entries = self.0.lock();
        entries.retain(|e| now.saturating_duration_since(e.acctime) <= FORWARD_QUERY_TIMEOUT);

        entries
            .iter()
            .find(|e| codec::addr::equal(&e.display_addr, display_addr))
            .copied()
    }

    /// `dispose` (§4.6): remove the entry for `display_addr`, if any.
    pub fn dispose(&self, display_addr: &SocketAddr) {
        self.0
            .lock()
            .retain(|e| !codec::addr::equal(&e.display_addr, display_addr));
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn alloc_evicts_oldest_past_capacity() {
        let table = ForwardQueryTable::default();
        let base = Instant::now();

        for i in 0..MAX_FORWARD_QUERIES {
            table.alloc(
                addr("198.51.100.2:177"),
                format!("192.0.2.{}:177", i + 1).parse().unwrap(),
                base + Duration::from_millis(i as u64),
            );
        }

        assert_eq!(table.len(), MAX_FORWARD_QUERIES);

        table.alloc(
            addr("198.51.100.2:177"),
            "192.0.2.99:177".parse().unwrap(),
            base + Duration::from_millis(1000),
        );

        assert_eq!(table.len(), MAX_FORWARD_QUERIES);
        assert!(table.lookup(&"192.0.2.1:177".parse().unwrap(), base).is_none());
    }

    #[test]
    fn lookup_evicts_expired_entries() {
        let table = ForwardQueryTable::default();
        let now = Instant::now();
        let display = addr("192.0.2.5:177");
        table.alloc(addr("198.51.100.2:177"), display, now);

        let later = now + FORWARD_QUERY_TIMEOUT + Duration::from_secs(1);
        assert!(table.lookup(&display, later).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn lookup_matches_ipv4_mapped_addresses() {
        let table = ForwardQueryTable::default();
        let now = Instant::now();
        table.alloc(addr("198.51.100.2:177"), addr("192.0.2.5:177"), now);

        let mapped: SocketAddr = "[::ffff:192.0.2.5]:177".parse().unwrap();
        assert!(table.lookup(&mapped, now).is_some());
    }
}
