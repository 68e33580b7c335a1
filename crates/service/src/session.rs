//! Session Table (§3, §4.5): the set of pending and managed XDMCP displays,
//! with the admission-relevant invariants (I1-I6) maintained by a narrow
//! mutation API rather than by callers poking at a shared list directly.

use std::{
    net::SocketAddr,
    time::{Duration, Instant},
};

use parking_lot::{Mutex, RwLock};
use rand::Rng;

/// A session's lifecycle position (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayState {
    Pending,
    Managed,
}

/// Whether the display speaks plain XDMCP or is relayed through an
/// xdmcp-proxy instance (§3). The core treats both identically for
/// admission and lifecycle purposes; the distinction exists purely for the
/// session supervisor to pick a launch strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayKind {
    Xdmcp,
    XdmcpProxy,
}

/// A display the manager is tracking, pending or managed (§3).
#[derive(Debug, Clone)]
pub struct Display {
    pub session_id: u32,
    pub remote_addr: SocketAddr,
    pub hostname: String,
    pub resolved_addrs: Vec<SocketAddr>,
    pub display_number: u16,
    pub state: DisplayState,
    pub accept_time: Instant,
    pub kind: DisplayKind,
    pub cookie: [u8; 16],
    pub use_chooser: bool,
    pub indirect_id: Option<u32>,
}

impl Display {
    pub fn is_pending(&self) -> bool {
        matches!(self.state, DisplayState::Pending)
    }

    pub fn is_managed(&self) -> bool {
        matches!(self.state, DisplayState::Managed)
    }
}

/// Generates non-zero 32-bit session serials, unique across live displays
/// (I1/I2). Seeded from a random value so that restarts don't hand out the
/// same sequence of ids as a prior run; rerolls a result of zero and
/// reseeds from fresh randomness on `u32` wraparound rather than
/// continuing arithmetic overflow, matching the reference implementation's
/// `get_next_session_serial`.
pub struct SerialAllocator(Mutex<u32>);

impl Default for SerialAllocator {
    fn default() -> Self {
        Self(Mutex::new(Self::seed()))
    }
}

impl SerialAllocator {
    fn seed() -> u32 {
        loop {
            let value = rand::rng().random::<u32>();
            if value != 0 {
                return value;
            }
        }
    }

    pub fn next(&self) -> u32 {
        let mut serial = self.0.lock();

        loop {
            *serial = serial.wrapping_add(1);
            if *serial != 0 {
                return *serial;
            }

            *serial = Self::seed();
        }
    }
}

/// The set of pending and managed displays plus the `num_sessions` /
/// `num_pending` counters admission checks rely on (§4.5). Counters are
/// maintained incrementally by the mutation methods; [`SessionTable::recount`]
/// recomputes them from the authoritative list and is meant to run as a
/// consistency check (a `debug_assert`-style backstop for drift introduced
/// by an external session supervisor disposing displays out of band, per
/// the redesign note in spec §9), not as the primary bookkeeping mechanism.
pub struct SessionTable {
    displays: RwLock<Vec<Display>>,
    serials: SerialAllocator,
}

impl Default for SessionTable {
    fn default() -> Self {
        Self {
            displays: RwLock::new(Vec::with_capacity(32)),
            serials: SerialAllocator::default(),
        }
    }
}

impl SessionTable {
    /// `allocate` (§4.5): create a new Pending display with a fresh,
    /// non-zero session id.
    pub fn allocate(
        &self,
        remote_addr: SocketAddr,
        hostname: String,
        resolved_addrs: Vec<SocketAddr>,
        display_number: u16,
        kind: DisplayKind,
        cookie: [u8; 16],
        now: Instant,
    ) -> Display {
        let display = Display {
            session_id: self.serials.next(),
            remote_addr,
            hostname,
            resolved_addrs,
            display_number,
            state: DisplayState::Pending,
            accept_time: now,
            kind,
            cookie,
            use_chooser: false,
            indirect_id: None,
        };

        self.displays.write().push(display.clone());
        display
    }

    /// `promote` (§4.5): Pending -> Managed. Returns the promoted display on
    /// success, `None` if `session_id` is unknown or already Managed.
    pub fn promote(&self, session_id: u32) -> Option<Display> {
        let mut displays = self.displays.write();
        let entry = displays
            .iter_mut()
            .find(|d| d.session_id == session_id && d.is_pending())?;

        entry.state = DisplayState::Managed;
        Some(entry.clone())
    }

    /// Record that MANAGE arrived for a display that was itself the result
    /// of an indirect query without a pre-chosen host (§4.10.10).
    pub fn set_use_chooser(&self, session_id: u32, indirect_id: Option<u32>) {
        let mut displays = self.displays.write();
        if let Some(entry) = displays.iter_mut().find(|d| d.session_id == session_id) {
            entry.use_chooser = indirect_id.is_some();
            entry.indirect_id = indirect_id;
        }
    }

    pub fn lookup_by_session(&self, session_id: u32) -> Option<Display> {
        self.displays
            .read()
            .iter()
            .find(|d| d.session_id == session_id)
            .cloned()
    }

    pub fn lookup_by_host(&self, addr: &SocketAddr, display_number: u16) -> Option<Display> {
        self.displays
            .read()
            .iter()
            .find(|d| codec::addr::equal(&d.remote_addr, addr) && d.display_number == display_number)
            .cloned()
    }

    /// `dispose_duplicates` (§4.5, I3): any display sharing `(addr,
    /// display_number)` with the one we are about to admit is stale and
    /// must go, Managed or Pending alike.
    pub fn dispose_duplicates(&self, addr: &SocketAddr, display_number: u16) -> Vec<Display> {
        let mut displays = self.displays.write();
        let mut removed = Vec::new();

        displays.retain(|d| {
            let duplicate =
                codec::addr::equal(&d.remote_addr, addr) && d.display_number == display_number;
            if duplicate {
                removed.push(d.clone());
            }

            !duplicate
        });

        removed
    }

    /// `purge_stale_pending` (§4.5, §5): evict Pending displays older than
    /// `max_wait`. Called on every Request per §5.
    pub fn purge_stale_pending(&self, max_wait: Duration, now: Instant) -> Vec<Display> {
        let mut displays = self.displays.write();
        let mut removed = Vec::new();

        displays.retain(|d| {
            let stale = d.is_pending() && now.saturating_duration_since(d.accept_time) > max_wait;
            if stale {
                removed.push(d.clone());
            }

            !stale
        });

        removed
    }

    pub fn dispose(&self, session_id: u32) -> Option<Display> {
        let mut displays = self.displays.write();
        let index = displays.iter().position(|d| d.session_id == session_id)?;
        Some(displays.remove(index))
    }

    pub fn num_sessions(&self) -> usize {
        self.displays.read().iter().filter(|d| d.is_managed()).count()
    }

    pub fn num_pending(&self) -> usize {
        self.displays.read().iter().filter(|d| d.is_pending()).count()
    }

    /// Managed count from `addr` (admission rule 6, §4.4).
    pub fn managed_count_for_host(&self, addr: &SocketAddr) -> usize {
        self.displays
            .read()
            .iter()
            .filter(|d| d.is_managed() && codec::addr::equal(&d.remote_addr, addr))
            .count()
    }

    /// Recompute `num_sessions`/`num_pending` from the authoritative list.
    /// Since both counters here are *derived* on every call rather than
    /// cached, this never drifts — it exists to document and preserve the
    /// reconciliation point the original design called for (§4.5, §9),
    /// should a future caching optimization be layered on top.
    pub fn recount(&self) -> (usize, usize) {
        (self.num_sessions(), self.num_pending())
    }

    pub fn all(&self) -> Vec<Display> {
        self.displays.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn allocate_assigns_nonzero_unique_ids() {
        let table = SessionTable::default();
        let now = Instant::now();

        let a = table.allocate(
            addr("192.0.2.5:4000"),
            "192.0.2.5".into(),
            vec![],
            7,
            DisplayKind::Xdmcp,
            [0; 16],
            now,
        );
        let b = table.allocate(
            addr("192.0.2.6:4000"),
            "192.0.2.6".into(),
            vec![],
            7,
            DisplayKind::Xdmcp,
            [0; 16],
            now,
        );

        assert_ne!(a.session_id, 0);
        assert_ne!(b.session_id, 0);
        assert_ne!(a.session_id, b.session_id);
    }

    #[test]
    fn promote_transitions_pending_to_managed_and_counters_follow() {
        let table = SessionTable::default();
        let now = Instant::now();
        let display = table.allocate(
            addr("192.0.2.5:4000"),
            "192.0.2.5".into(),
            vec![],
            7,
            DisplayKind::Xdmcp,
            [0; 16],
            now,
        );

        assert_eq!(table.num_pending(), 1);
        assert_eq!(table.num_sessions(), 0);

        table.promote(display.session_id).unwrap();

        assert_eq!(table.num_pending(), 0);
        assert_eq!(table.num_sessions(), 1);
    }

    #[test]
    fn dispose_duplicates_removes_prior_sessions_from_same_display() {
        let table = SessionTable::default();
        let now = Instant::now();
        let first = table.allocate(
            addr("192.0.2.5:4000"),
            "192.0.2.5".into(),
            vec![],
            7,
            DisplayKind::Xdmcp,
            [0; 16],
            now,
        );
        table.promote(first.session_id).unwrap();

        let removed = table.dispose_duplicates(&addr("192.0.2.5:4000"), 7);
        assert_eq!(removed.len(), 1);
        assert_eq!(table.num_sessions(), 0);
    }

    #[test]
    fn purge_stale_pending_evicts_past_max_wait() {
        let table = SessionTable::default();
        let now = Instant::now();
        table.allocate(
            addr("192.0.2.5:4000"),
            "192.0.2.5".into(),
            vec![],
            7,
            DisplayKind::Xdmcp,
            [0; 16],
            now,
        );

        let later = now + Duration::from_secs(30);
        let purged = table.purge_stale_pending(Duration::from_secs(15), later);
        assert_eq!(purged.len(), 1);
        assert_eq!(table.num_pending(), 0);
    }

    #[test]
    fn serial_allocator_never_returns_zero() {
        let serials = SerialAllocator(Mutex::new(u32::MAX));
        assert_ne!(serials.next(), 0);
    }
}
