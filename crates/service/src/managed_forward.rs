//! Managed-Forward Retransmitter (§3, §4.7): resends MANAGED_FORWARD to the
//! peer manager that forwarded an indirect query, until it is acknowledged
//! by GOT_MANAGED_FORWARD or the retry budget is exhausted.

use std::{
    net::SocketAddr,
    time::{Duration, Instant},
};

use parking_lot::Mutex;

/// Retransmit cadence (§3, §5).
pub const MANAGED_FORWARD_INTERVAL: Duration = Duration::from_millis(1500);

/// Retries after the initial send before giving up (§3: "attempts >= 2").
pub const MANAGED_FORWARD_MAX_RETRIES: u32 = 2;

#[derive(Debug, Clone, Copy)]
struct Entry {
    peer_manager_addr: SocketAddr,
    origin_display_addr: SocketAddr,
    attempts: u32,
    last_sent: Instant,
}

/// A send the caller should perform: resend MANAGED_FORWARD(origin) to peer.
#[derive(Debug, Clone, Copy)]
pub struct Retransmit {
    pub peer_manager_addr: SocketAddr,
    pub origin_display_addr: SocketAddr,
}

#[derive(Default)]
pub struct ManagedForwardTable(Mutex<Vec<Entry>>);

impl ManagedForwardTable {
    /// Register a record after the initial MANAGED_FORWARD send; the first
    /// retransmit is scheduled one interval out.
    pub fn start(&self, peer_manager_addr: SocketAddr, origin_display_addr: SocketAddr, now: Instant) {
        self.0.lock().push(Entry {
            peer_manager_addr,
            origin_display_addr,
            attempts: 0,
            last_sent: now,
        });
    }

    /// On GOT_MANAGED_FORWARD from `peer` carrying `origin`, cancel the
    /// matching record. Returns whether one was found (the reply is sent
    /// either way by the caller — §4.7's "idempotent" rule tolerates a
    /// GOT_MANAGED_FORWARD with no matching record).
    pub fn ack(&self, peer: &SocketAddr, origin: &SocketAddr) -> bool {
        let mut entries = self.0.lock();
        let before = entries.len();
        entries.retain(|e| {
            !(codec::addr::equal(&e.peer_manager_addr, peer)
                && codec::addr::equal(&e.origin_display_addr, origin))
        });

        entries.len() != before
    }

    /// Drop any record matching `(peer, origin)` without sending GOT_
    /// MANAGED_FORWARD — used when a ForwardQuery is superseded by a fresh
    /// one before it was ever acknowledged (§4.10.4).
    pub fn cancel(&self, peer: &SocketAddr, origin: &SocketAddr) {
        self.ack(peer, origin);
    }

    /// Sweep due entries: anything past [`MANAGED_FORWARD_INTERVAL`] either
    /// gets resent (attempts incremented) or, past
    /// [`MANAGED_FORWARD_MAX_RETRIES`], is dropped.
    pub fn due(&self, now: Instant) -> Vec<Retransmit> {
        let mut entries = self.0.lock();
        let mut due = Vec::new();

        entries.retain_mut(|e| {
            if now.saturating_duration_since(e.last_sent) < MANAGED_FORWARD_INTERVAL {
                return true;
            }

            if e.attempts >= MANAGED_FORWARD_MAX_RETRIES {
                return false;
            }

            e.attempts += 1;
            e.last_sent = now;
            due.push(Retransmit {
                peer_manager_addr: e.peer_manager_addr,
                origin_display_addr: e.origin_display_addr,
            });

            true
        });

        due
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
