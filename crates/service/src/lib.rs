//! XDMCP manager core (§2): owns the Session Table, Forward Query Table,
//! Indirect Chooser Adapter, and Managed-Forward Retransmitter, and wires
//! them together behind the packet dispatcher in [`dispatch`]. The binary
//! that owns the UDP socket feeds datagrams in through [`Manager::dispatch`]
//! and sends back whatever [`Outbound`] values come out; nothing in this
//! crate touches a socket directly.

pub mod admission;
pub mod dispatch;
pub mod forward;
pub mod indirect;
pub mod managed_forward;
pub mod session;

use std::{
    net::SocketAddr,
    path::PathBuf,
    time::{Duration, Instant},
};

use crate::{
    admission::{Quotas, UnwillingLimiter, WillingCache},
    forward::ForwardQueryTable,
    indirect::IndirectTable,
    managed_forward::{ManagedForwardTable, Retransmit},
    session::{Display, SessionTable},
};

pub use dispatch::Outbound;

/// §6.4: the external collaborators the core consults but does not own.
/// A minimal implementation only needs the required methods; the two
/// lifecycle notifications default to no-ops, matching the reference
/// workspace's `ServiceHandler` pattern of optional hooks with default
/// bodies.
pub trait ManagerHandler: Send + Sync {
    /// TCP-wrappers-style host ACL check (§4.4 rule 1, §6.4).
    fn host_acl(&self, peer: &SocketAddr) -> bool;

    /// Reverse-resolve `peer` to a hostname and the set of addresses that
    /// hostname resolves back to (§3 `hostname`/`resolved_addrs`, §6.4
    /// `resolve`). §5 notes this is the one acknowledged latency pitfall;
    /// implementers that move it off the dispatch path must still make the
    /// result available before [`Manager::dispatch`] returns.
    fn resolve(&self, peer: &SocketAddr) -> Hostent;

    /// Every address bound on a local interface (§4.2 `is_local`, §6.4
    /// `enumerate_local_addrs`).
    fn enumerate_local_addrs(&self) -> Vec<SocketAddr>;

    /// Generate and store the 16-byte MIT-MAGIC-COOKIE-1 secret for a newly
    /// admitted display (§3 `cookie`, §6.4 `auth_secure_display`). `None`
    /// means the external auth component failed; the caller Declines.
    fn secure_display(&self, peer: &SocketAddr, display_number: u16) -> Option<[u8; 16]>;

    /// Hand a promoted display to the session supervisor (§4.5 `promote`,
    /// §6.4 `display_manage`). `false` means launch failed; the caller
    /// sends Failed and disposes the display.
    fn manage_display(&self, display: &Display) -> bool;

    /// Tell the session supervisor a managed display is going away (§6.4
    /// `display_unmanage`), e.g. because admission disposed a duplicate.
    fn unmanage_display(&self, display: &Display);

    /// Optional notification: a display was successfully promoted and
    /// handed to the session supervisor.
    #[allow(unused_variables)]
    fn on_session_managed(&self, display: &Display) {}

    /// Optional notification: a display was disposed (duplicate, stale
    /// pending, or a failed `manage_display`).
    #[allow(unused_variables)]
    fn on_session_disposed(&self, display: &Display) {}
}

/// §6.4 `resolve`'s result: a hostname plus the addresses it resolves back
/// to. A "not found" lookup is represented by a handler returning the
/// peer's numeric address as `hostname` and an empty `addrs` list, rather
/// than by a separate flag — the core never branches on resolution success,
/// only stores whatever it is given (§3).
#[derive(Debug, Clone)]
pub struct Hostent {
    pub hostname: String,
    pub addrs: Vec<SocketAddr>,
}

/// Construction-time configuration (§9: replaces the original's
/// introspectable-properties pattern with an immutable value built once and
/// passed by reference; every field here becomes a constructor argument
/// rather than a post-construction setter).
pub struct ManagerOptions<H> {
    /// System id string (`sysname + " " + release`), the status ARRAY8
    /// Willing/Unwilling carry (§3 `ServerIdentity`, §4.4).
    pub sysid: String,
    /// Local hostname, wire-ready ARRAY8 form (§3 `ServerIdentity`). Distinct
    /// from `sysid`: this is the hostname ARRAY8 Willing/Unwilling carry, the
    /// terminal-visible server identity, never the status string.
    pub hostname: Vec<u8>,
    pub handler: H,
    pub quotas: Quotas,
    /// Pending-display timeout (§3 `accept_time`, §4.5 `purge_stale_pending`).
    pub max_wait: Duration,
    /// Whether to answer IndirectQuery at all (§6.2 `honor_indirect`).
    pub honor_indirect: bool,
    /// Optional advisory script for the Willing status (§4.4).
    pub willing_script: Option<PathBuf>,
}

/// The XDMCP manager core (§2, §9). Meant to be constructed once per
/// process and shared (typically behind an `Arc`) with whatever owns the
/// UDP socket; §9 replaces the original's process-wide singleton with this
/// explicit owned value held by the caller.
pub struct Manager<H> {
    pub(crate) sysid: String,
    pub(crate) hostname: Vec<u8>,
    pub(crate) handler: H,
    pub(crate) quotas: Quotas,
    pub(crate) max_wait: Duration,
    pub(crate) honor_indirect: bool,
    pub(crate) willing_script: Option<PathBuf>,
    pub(crate) sessions: SessionTable,
    pub(crate) forward_queries: ForwardQueryTable,
    pub(crate) indirect: IndirectTable,
    pub(crate) managed_forwards: ManagedForwardTable,
    pub(crate) willing_cache: WillingCache,
    pub(crate) unwilling_limiter: UnwillingLimiter,
}

impl<H> Manager<H>
where
    H: ManagerHandler,
{
    pub fn new(options: ManagerOptions<H>) -> Self {
        Self {
            sysid: options.sysid,
            hostname: options.hostname,
            handler: options.handler,
            quotas: options.quotas,
            max_wait: options.max_wait,
            honor_indirect: options.honor_indirect,
            willing_script: options.willing_script,
            sessions: SessionTable::default(),
            forward_queries: ForwardQueryTable::default(),
            indirect: IndirectTable::default(),
            managed_forwards: ManagedForwardTable::default(),
            willing_cache: WillingCache::default(),
            unwilling_limiter: UnwillingLimiter::default(),
        }
    }

    /// Decode and dispatch one datagram (§4.9) — the sole entry point for
    /// state mutation (§2, §5). Returns the datagrams the caller should
    /// send in reply; never panics on malformed input.
    pub fn dispatch(&self, data: &[u8], peer: SocketAddr, now: Instant) -> Vec<Outbound> {
        dispatch::dispatch(self, data, peer, now)
    }

    /// Managed-Forward retransmits due at `now` (§4.7), encoded ready to
    /// send. Driven from the caller's event loop alongside socket
    /// read-readiness (§5, SPEC_FULL §5).
    pub fn due_managed_forwards(&self, now: Instant) -> Vec<Outbound> {
        self.managed_forwards
            .due(now)
            .into_iter()
            .map(|r: Retransmit| Outbound {
                to: r.peer_manager_addr,
                bytes: dispatch::encode_managed_forward_retransmit(r.origin_display_addr),
            })
            .collect()
    }

    /// Evict Pending displays past `max_wait`, independent of Request
    /// traffic (§4.5, §5; the background sweep SPEC_FULL §5 describes).
    /// `handle_request` already calls this inline on every Request; this
    /// is for a caller that wants the same reclamation during a lull.
    pub fn purge_stale_pending(&self, now: Instant) -> Vec<Display> {
        let purged = self.sessions.purge_stale_pending(self.max_wait, now);
        for display in &purged {
            self.handler.on_session_disposed(display);
        }
        purged
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::DisplayKind;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct TestHandler {
        managed_ok: AtomicBool,
    }

    impl ManagerHandler for TestHandler {
        fn host_acl(&self, _peer: &SocketAddr) -> bool {
            true
        }

        fn resolve(&self, peer: &SocketAddr) -> Hostent {
            Hostent {
                hostname: peer.ip().to_string(),
                addrs: vec![*peer],
            }
        }

        fn enumerate_local_addrs(&self) -> Vec<SocketAddr> {
            vec!["127.0.0.1:177".parse().unwrap()]
        }

        fn secure_display(&self, _peer: &SocketAddr, _display_number: u16) -> Option<[u8; 16]> {
            Some([7; 16])
        }

        fn manage_display(&self, _display: &Display) -> bool {
            self.managed_ok.load(Ordering::SeqCst)
        }

        fn unmanage_display(&self, _display: &Display) {}
    }

    fn manager() -> Manager<TestHandler> {
        Manager::new(ManagerOptions {
            sysid: "testhost 1.0".into(),
            hostname: b"testhost".to_vec(),
            handler: TestHandler {
                managed_ok: AtomicBool::new(true),
            },
            quotas: Quotas::default(),
            max_wait: Duration::from_secs(15),
            honor_indirect: true,
            willing_script: None,
        })
    }

    fn encode_query(opcode: codec::Opcode) -> Vec<u8> {
        let mut buf = codec::XdmcpBuffer::default();
        codec::message::QueryPayload {
            authentication_names: vec![],
        }
        .encode(&mut buf);
        buf.finish(codec::XDM_PROTOCOL_VERSION, opcode)
    }

    #[test]
    fn end_to_end_direct_session_scenario_1() {
        let manager = manager();
        let client: SocketAddr = "192.0.2.5:4000".parse().unwrap();
        let now = Instant::now();

        let out = manager.dispatch(&encode_query(codec::Opcode::Query), client, now);
        assert_eq!(out.len(), 1);
        let header = codec::Header::decode(&out[0].bytes).unwrap();
        assert_eq!(header.opcode, codec::Opcode::Willing);

        let mut req_buf = codec::XdmcpBuffer::default();
        codec::message::RequestPayload {
            display_number: 7,
            connection_types: vec![],
            connection_addrs: vec![],
            auth_name: vec![],
            auth_data: vec![],
            authorization_names: vec![codec::message::MIT_MAGIC_COOKIE_1.to_vec()],
            manufacturer: b"x".to_vec(),
        }
        .encode(&mut req_buf);
        let req = req_buf.finish(codec::XDM_PROTOCOL_VERSION, codec::Opcode::Request);

        let out = manager.dispatch(&req, client, now);
        assert_eq!(out.len(), 1);
        let header = codec::Header::decode(&out[0].bytes).unwrap();
        assert_eq!(header.opcode, codec::Opcode::Accept);

        let mut payload_buf = codec::XdmcpBuffer::default();
        payload_buf.load(&out[0].bytes[codec::HEADER_SIZE..]);
        let accept = codec::message::AcceptPayload::decode(&mut payload_buf).unwrap();

        let mut manage_buf = codec::XdmcpBuffer::default();
        codec::message::ManagePayload {
            session_id: accept.session_id,
            display_number: 7,
            display_class: vec![],
        }
        .encode(&mut manage_buf);
        let manage = manage_buf.finish(codec::XDM_PROTOCOL_VERSION, codec::Opcode::Manage);

        let out = manager.dispatch(&manage, client, now);
        assert!(out.is_empty(), "Manage on success sends no reply");

        assert_eq!(manager.sessions().num_sessions(), 1);
        assert_eq!(manager.sessions().num_pending(), 0);
    }

    #[test]
    fn wrong_authorization_is_declined_scenario_6() {
        let manager = manager();
        let client: SocketAddr = "192.0.2.5:4000".parse().unwrap();

        let mut buf = codec::XdmcpBuffer::default();
        codec::message::RequestPayload {
            display_number: 1,
            connection_types: vec![],
            connection_addrs: vec![],
            auth_name: vec![],
            auth_data: vec![],
            authorization_names: vec![b"XDM-AUTHORIZATION-1".to_vec()],
            manufacturer: vec![],
        }
        .encode(&mut buf);
        let req = buf.finish(codec::XDM_PROTOCOL_VERSION, codec::Opcode::Request);

        let out = manager.dispatch(&req, client, Instant::now());
        assert_eq!(out.len(), 1);

        let mut payload_buf = codec::XdmcpBuffer::default();
        payload_buf.load(&out[0].bytes[codec::HEADER_SIZE..]);
        let decline = codec::message::DeclinePayload::decode(&mut payload_buf).unwrap();
        assert_eq!(decline.status, b"Only MIT-MAGIC-COOKIE-1 supported");
    }

    #[test]
    fn pending_timeout_refuses_manage_scenario_4() {
        let manager = manager();
        let client: SocketAddr = "192.0.2.5:4000".parse().unwrap();
        let now = Instant::now();

        let mut buf = codec::XdmcpBuffer::default();
        codec::message::RequestPayload {
            display_number: 7,
            connection_types: vec![],
            connection_addrs: vec![],
            auth_name: vec![],
            auth_data: vec![],
            authorization_names: vec![codec::message::MIT_MAGIC_COOKIE_1.to_vec()],
            manufacturer: vec![],
        }
        .encode(&mut buf);
        let req = buf.finish(codec::XDM_PROTOCOL_VERSION, codec::Opcode::Request);

        let out = manager.dispatch(&req, client, now);
        let mut payload_buf = codec::XdmcpBuffer::default();
        payload_buf.load(&out[0].bytes[codec::HEADER_SIZE..]);
        let accept = codec::message::AcceptPayload::decode(&mut payload_buf).unwrap();

        let later = now + manager.max_wait + Duration::from_secs(1);

        let mut manage_buf = codec::XdmcpBuffer::default();
        codec::message::ManagePayload {
            session_id: accept.session_id,
            display_number: 7,
            display_class: vec![],
        }
        .encode(&mut manage_buf);
        let manage = manage_buf.finish(codec::XDM_PROTOCOL_VERSION, codec::Opcode::Manage);

        // A fresh Request is what actually purges stale pending displays
        // per §5; fire one from an unrelated client first.
        manager.dispatch(&req, "192.0.2.9:4000".parse().unwrap(), later);

        let out = manager.dispatch(&manage, client, later);
        assert_eq!(out.len(), 1);
        let header = codec::Header::decode(&out[0].bytes).unwrap();
        assert_eq!(header.opcode, codec::Opcode::Refuse);

        let mut payload_buf = codec::XdmcpBuffer::default();
        payload_buf.load(&out[0].bytes[codec::HEADER_SIZE..]);
        let refuse = codec::message::RefusePayload::decode(&mut payload_buf).unwrap();
        assert_eq!(refuse.session_id, accept.session_id);
    }

    #[test]
    fn failed_manage_sends_failed_and_disposes() {
        let manager = Manager::new(ManagerOptions {
            sysid: "testhost 1.0".into(),
            hostname: b"testhost".to_vec(),
            handler: TestHandler {
                managed_ok: AtomicBool::new(false),
            },
            quotas: Quotas::default(),
            max_wait: Duration::from_secs(15),
            honor_indirect: true,
            willing_script: None,
        });
        let client: SocketAddr = "192.0.2.5:4000".parse().unwrap();
        let now = Instant::now();

        let mut buf = codec::XdmcpBuffer::default();
        codec::message::RequestPayload {
            display_number: 7,
            connection_types: vec![],
            connection_addrs: vec![],
            auth_name: vec![],
            auth_data: vec![],
            authorization_names: vec![codec::message::MIT_MAGIC_COOKIE_1.to_vec()],
            manufacturer: vec![],
        }
        .encode(&mut buf);
        let req = buf.finish(codec::XDM_PROTOCOL_VERSION, codec::Opcode::Request);
        let out = manager.dispatch(&req, client, now);
        let mut payload_buf = codec::XdmcpBuffer::default();
        payload_buf.load(&out[0].bytes[codec::HEADER_SIZE..]);
        let accept = codec::message::AcceptPayload::decode(&mut payload_buf).unwrap();

        let mut manage_buf = codec::XdmcpBuffer::default();
        codec::message::ManagePayload {
            session_id: accept.session_id,
            display_number: 7,
            display_class: vec![],
        }
        .encode(&mut manage_buf);
        let manage = manage_buf.finish(codec::XDM_PROTOCOL_VERSION, codec::Opcode::Manage);

        let out = manager.dispatch(&manage, client, now);
        assert_eq!(out.len(), 1);
        let header = codec::Header::decode(&out[0].bytes).unwrap();
        assert_eq!(header.opcode, codec::Opcode::Failed);
        assert!(manager.sessions().lookup_by_session(accept.session_id).is_none());
    }
}
