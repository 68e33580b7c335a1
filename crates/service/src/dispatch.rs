//! Packet Dispatcher (§4.9) and the opcode handlers it drives (§4.10). One
//! function per opcode, each given the peer address and a buffer positioned
//! just past the header; each returns the datagrams the caller should send.
//! No handler touches a socket directly — that stays in the binary that
//! owns the UDP socket.

use std::{net::SocketAddr, time::Instant};

use codec::{
    Error as CodecError, HEADER_SIZE, Header, MDM_XDMCP_PROTOCOL_VERSION, Opcode,
    XDM_PROTOCOL_VERSION, XdmcpBuffer, addr,
    message::{
        AcceptPayload, AlivePayload, DeclinePayload, FailedPayload, ForwardQueryPayload,
        KeepAlivePayload, ManagePayload, ManagedForwardPayload, QueryPayload, RefusePayload,
        RequestPayload, UnwillingPayload, WillingPayload,
    },
};

use crate::{ManagerHandler, admission, session::DisplayKind};

/// A datagram to send, and who to send it to. Produced by dispatch/handlers,
/// consumed by whatever owns the socket.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub to: SocketAddr,
    pub bytes: Vec<u8>,
}

fn to(addr: SocketAddr, bytes: Vec<u8>) -> Outbound {
    Outbound { to: addr, bytes }
}

/// §4.4 rule 1's reason for a Decline triggered by the host ACL, as opposed
/// to one triggered by a quota or authorization-scheme mismatch.
const ACL_DENIED_REASON: &str = "Not authorized";

const UNWILLING_STATUS: &str = "Display not authorized to connect";

fn family_of(peer: &SocketAddr) -> addr::AddressFamily {
    if peer.is_ipv6() {
        addr::AddressFamily::V6
    } else {
        addr::AddressFamily::V4
    }
}

fn encode_willing(hostname: &[u8], status: &str) -> Vec<u8> {
    let mut buf = XdmcpBuffer::default();
    WillingPayload {
        authentication_name: Vec::new(),
        hostname: hostname.to_vec(),
        status: status.as_bytes().to_vec(),
    }
    .encode(&mut buf);
    buf.finish(XDM_PROTOCOL_VERSION, Opcode::Willing)
}

fn encode_unwilling(hostname: &[u8], status: &str) -> Vec<u8> {
    let mut buf = XdmcpBuffer::default();
    UnwillingPayload {
        hostname: hostname.to_vec(),
        status: status.as_bytes().to_vec(),
    }
    .encode(&mut buf);
    buf.finish(XDM_PROTOCOL_VERSION, Opcode::Unwilling)
}

fn encode_accept(session_id: u32, cookie: [u8; 16]) -> Vec<u8> {
    let mut buf = XdmcpBuffer::default();
    AcceptPayload {
        session_id,
        auth_name: Vec::new(),
        auth_data: Vec::new(),
        authorization_name: codec::message::MIT_MAGIC_COOKIE_1.to_vec(),
        authorization_data: cookie.to_vec(),
    }
    .encode(&mut buf);
    buf.finish(XDM_PROTOCOL_VERSION, Opcode::Accept)
}

fn encode_decline(status: &str) -> Vec<u8> {
    let mut buf = XdmcpBuffer::default();
    DeclinePayload {
        status: status.as_bytes().to_vec(),
        auth_name: Vec::new(),
        auth_data: Vec::new(),
    }
    .encode(&mut buf);
    buf.finish(XDM_PROTOCOL_VERSION, Opcode::Decline)
}

fn encode_refuse(session_id: u32) -> Vec<u8> {
    let mut buf = XdmcpBuffer::default();
    RefusePayload { session_id }.encode(&mut buf);
    buf.finish(XDM_PROTOCOL_VERSION, Opcode::Refuse)
}

fn encode_failed(session_id: u32, status: &str) -> Vec<u8> {
    let mut buf = XdmcpBuffer::default();
    FailedPayload {
        session_id,
        status: status.as_bytes().to_vec(),
    }
    .encode(&mut buf);
    buf.finish(XDM_PROTOCOL_VERSION, Opcode::Failed)
}

fn encode_alive(session_running: u8, session_id: u32) -> Vec<u8> {
    let mut buf = XdmcpBuffer::default();
    AlivePayload {
        session_running,
        session_id,
    }
    .encode(&mut buf);
    buf.finish(XDM_PROTOCOL_VERSION, Opcode::Alive)
}

fn encode_forward_query(display_addr: SocketAddr, authentication_names: Vec<Vec<u8>>) -> Vec<u8> {
    let mut buf = XdmcpBuffer::default();
    ForwardQueryPayload {
        display_addr: addr::addr_bytes(&display_addr),
        display_port: display_addr.port().to_be_bytes().to_vec(),
        authentication_names,
    }
    .encode(&mut buf);
    buf.finish(XDM_PROTOCOL_VERSION, Opcode::ForwardQuery)
}

/// Shared by MANAGED_FORWARD and its GOT_MANAGED_FORWARD ack — both carry
/// just the origin display's address (§4.7, private extension).
fn encode_managed_forward(origin: SocketAddr, opcode: Opcode) -> Vec<u8> {
    let mut buf = XdmcpBuffer::default();
    ManagedForwardPayload {
        display_addr: addr::addr_bytes(&origin),
        display_port: origin.port().to_be_bytes().to_vec(),
    }
    .encode(&mut buf);
    buf.finish(MDM_XDMCP_PROTOCOL_VERSION, opcode)
}

/// Used by [`crate::Manager::due_managed_forwards`] to re-encode a scheduled
/// retransmit (§4.7) without exposing the private `encode_managed_forward`
/// helper itself.
pub(crate) fn encode_managed_forward_retransmit(origin: SocketAddr) -> Vec<u8> {
    encode_managed_forward(origin, Opcode::ManagedForward)
}

/// §4.9: "each handler ... must verify that its parsed payload length
/// equals [the header length] — mismatched packets are logged and
/// discarded." Called immediately after a payload decodes successfully and
/// before any state is touched, so a checksum mismatch never leaves a
/// partial mutation behind.
fn verify_checksum(buf: &XdmcpBuffer, expected_len: u16) -> Result<(), CodecError> {
    if buf.checksum(expected_len) {
        Ok(())
    } else {
        Err(CodecError::Truncated)
    }
}

/// Entry point (§4.9): decode the header, check the version, slice out
/// exactly `header.length` bytes of payload, and route by opcode. Anything
/// that fails to decode or mismatches its own header length is logged and
/// dropped before any state is touched.
pub fn dispatch<H: ManagerHandler>(
    manager: &crate::Manager<H>,
    data: &[u8],
    peer: SocketAddr,
    now: Instant,
) -> Vec<Outbound> {
    let header = match Header::decode(data) {
        Ok(h) => h,
        Err(e) => {
            log::debug!("dropping packet from {peer}: bad header ({e})");
            return Vec::new();
        }
    };

    if header.version != XDM_PROTOCOL_VERSION && header.version != MDM_XDMCP_PROTOCOL_VERSION {
        log::debug!("dropping packet from {peer}: unsupported version {}", header.version);
        return Vec::new();
    }

    let expected_len = header.length as usize;
    let payload = match data.get(HEADER_SIZE..HEADER_SIZE + expected_len) {
        Some(p) => p,
        None => {
            log::debug!("dropping packet from {peer}: truncated payload");
            return Vec::new();
        }
    };

    let mut buf = XdmcpBuffer::default();
    buf.load(payload);

    let expected_len = header.length;
    let outbound = match header.opcode {
        Opcode::BroadcastQuery => handle_broadcast_query(manager, peer, &mut buf, expected_len, now),
        Opcode::Query => handle_query(manager, peer, &mut buf, expected_len, now),
        Opcode::IndirectQuery => handle_indirect_query(manager, peer, &mut buf, expected_len, now),
        Opcode::ForwardQuery => handle_forward_query(manager, peer, &mut buf, expected_len, now),
        Opcode::Request => handle_request(manager, peer, &mut buf, expected_len, now),
        Opcode::Manage => handle_manage(manager, peer, &mut buf, expected_len, now),
        Opcode::KeepAlive => handle_keep_alive(manager, peer, &mut buf, expected_len),
        Opcode::ManagedForward => handle_managed_forward(manager, peer, &mut buf, expected_len),
        Opcode::GotManagedForward => handle_got_managed_forward(manager, peer, &mut buf, expected_len),
        other => {
            log::debug!("dropping unhandled opcode {other:?} from {peer}");
            Err(CodecError::ArrayTooLarge)
        }
    };

    match outbound {
        Ok(out) => out,
        Err(e) => {
            log::debug!("dropping packet from {peer}: {e}");
            Vec::new()
        }
    }
}

fn willing_status<H: ManagerHandler>(
    manager: &crate::Manager<H>,
    client: &SocketAddr,
    now: Instant,
) -> String {
    let local_addrs = manager.handler.enumerate_local_addrs();
    let client_is_local = addr::is_local(client, &local_addrs);
    let busy = !client_is_local
        && manager.sessions.managed_count_for_host(client) >= manager.quotas.max_displays_per_host;

    manager
        .willing_cache
        .get(now, &manager.sysid, manager.willing_script.as_ref(), busy)
}

fn handle_broadcast_query<H: ManagerHandler>(
    manager: &crate::Manager<H>,
    peer: SocketAddr,
    buf: &mut XdmcpBuffer,
    expected_len: u16,
    now: Instant,
) -> Result<Vec<Outbound>, CodecError> {
    QueryPayload::decode(buf)?;
    verify_checksum(buf, expected_len)?;

    if !manager.handler.host_acl(&peer) {
        return Ok(Vec::new());
    }

    let status = willing_status(manager, &peer, now);
    Ok(vec![to(peer, encode_willing(&manager.hostname, &status))])
}

fn handle_query<H: ManagerHandler>(
    manager: &crate::Manager<H>,
    peer: SocketAddr,
    buf: &mut XdmcpBuffer,
    expected_len: u16,
    now: Instant,
) -> Result<Vec<Outbound>, CodecError> {
    QueryPayload::decode(buf)?;
    verify_checksum(buf, expected_len)?;

    if manager.handler.host_acl(&peer) {
        let status = willing_status(manager, &peer, now);
        return Ok(vec![to(peer, encode_willing(&manager.hostname, &status))]);
    }

    if manager.unwilling_limiter.allow(now) {
        Ok(vec![to(
            peer,
            encode_unwilling(&manager.hostname, UNWILLING_STATUS),
        )])
    } else {
        Ok(Vec::new())
    }
}

fn handle_indirect_query<H: ManagerHandler>(
    manager: &crate::Manager<H>,
    peer: SocketAddr,
    buf: &mut XdmcpBuffer,
    expected_len: u16,
    now: Instant,
) -> Result<Vec<Outbound>, CodecError> {
    let payload = QueryPayload::decode(buf)?;
    verify_checksum(buf, expected_len)?;

    if !manager.honor_indirect || !manager.handler.host_acl(&peer) {
        return Ok(Vec::new());
    }

    let record = match manager.indirect.lookup(&peer) {
        None => {
            manager.indirect.alloc(peer);
            None
        }
        Some(rec) => Some(rec),
    };

    let Some(record) = record else {
        let status = willing_status(manager, &peer, now);
        return Ok(vec![to(peer, encode_willing(&manager.hostname, &status))]);
    };

    let Some(chosen) = record.chosen_host else {
        let status = willing_status(manager, &peer, now);
        return Ok(vec![to(peer, encode_willing(&manager.hostname, &status))]);
    };

    let local_addrs = manager.handler.enumerate_local_addrs();

    if addr::is_local(&chosen, &local_addrs) {
        manager.indirect.dispose(record.id);
        let status = willing_status(manager, &peer, now);
        return Ok(vec![to(peer, encode_willing(&manager.hostname, &status))]);
    }

    // Workaround (§4.8, §9 open question): a loopback client has no return
    // path a remote manager could dial directly, so we ask the chosen
    // manager to try every non-loopback address we have instead.
    if addr::is_loopback(&peer) {
        let outbound = local_addrs
            .iter()
            .filter(|a| !addr::is_loopback(a))
            .map(|local| {
                to(
                    chosen,
                    encode_forward_query(*local, payload.authentication_names.clone()),
                )
            })
            .collect();
        return Ok(outbound);
    }

    Ok(vec![to(
        chosen,
        encode_forward_query(peer, payload.authentication_names),
    )])
}

fn handle_forward_query<H: ManagerHandler>(
    manager: &crate::Manager<H>,
    peer: SocketAddr,
    buf: &mut XdmcpBuffer,
    expected_len: u16,
    now: Instant,
) -> Result<Vec<Outbound>, CodecError> {
    let payload = ForwardQueryPayload::decode(buf)?;
    verify_checksum(buf, expected_len)?;

    if !manager.handler.host_acl(&peer) {
        return Ok(vec![to(peer, encode_decline(ACL_DENIED_REASON))]);
    }

    let disp_sa = match addr::from_request(
        &payload.display_addr,
        Some(&payload.display_port),
        family_of(&peer),
    ) {
        Some(a) => a,
        None => {
            log::debug!("dropping ForwardQuery from {peer}: unparsable display address");
            return Ok(Vec::new());
        }
    };

    // This forward is about to be superseded; any retransmit we owed peer
    // for the prior handoff of the same display no longer applies.
    manager.managed_forwards.cancel(&peer, &disp_sa);

    if !manager.handler.host_acl(&disp_sa) {
        return Ok(Vec::new());
    }

    manager.forward_queries.dispose(&disp_sa);
    manager.forward_queries.alloc(peer, disp_sa, now);

    let status = willing_status(manager, &disp_sa, now);
    Ok(vec![to(disp_sa, encode_willing(&manager.hostname, &status))])
}

fn handle_request<H: ManagerHandler>(
    manager: &crate::Manager<H>,
    peer: SocketAddr,
    buf: &mut XdmcpBuffer,
    expected_len: u16,
    now: Instant,
) -> Result<Vec<Outbound>, CodecError> {
    let payload = RequestPayload::decode(buf)?;
    verify_checksum(buf, expected_len)?;

    manager.sessions.purge_stale_pending(manager.max_wait, now);

    if !manager.handler.host_acl(&peer) {
        return Ok(vec![to(peer, encode_decline(ACL_DENIED_REASON))]);
    }

    let local_addrs = manager.handler.enumerate_local_addrs();
    let client_is_local = addr::is_local(&peer, &local_addrs);

    let admitted = admission::admit(
        &manager.sessions,
        &manager.quotas,
        &peer,
        client_is_local,
        payload.offers_mit_magic_cookie(),
    );

    let reason = match admitted {
        Ok(()) => None,
        Err(reason) => Some(reason),
    };

    let Some(reason) = reason else {
        for duplicate in manager.sessions.dispose_duplicates(&peer, payload.display_number) {
            if duplicate.is_managed() {
                manager.handler.unmanage_display(&duplicate);
            }
            manager.handler.on_session_disposed(&duplicate);
        }
        let hostent = manager.handler.resolve(&peer);

        let cookie = match manager.handler.secure_display(&peer, payload.display_number) {
            Some(cookie) => cookie,
            None => return Ok(vec![to(peer, encode_decline("Failed to secure display"))]),
        };

        let display = manager.sessions.allocate(
            peer,
            hostent.hostname,
            hostent.addrs,
            payload.display_number,
            DisplayKind::Xdmcp,
            cookie,
            now,
        );

        return Ok(vec![to(peer, encode_accept(display.session_id, cookie))]);
    };

    let mut outbound = vec![to(peer, encode_decline(reason.message()))];
    if let Some(fq) = manager.forward_queries.lookup(&peer, now) {
        manager.managed_forwards.start(fq.originating_manager_addr, peer, now);
        outbound.push(to(
            fq.originating_manager_addr,
            encode_managed_forward(peer, Opcode::ManagedForward),
        ));
        manager.forward_queries.dispose(&peer);
    }

    Ok(outbound)
}

fn handle_manage<H: ManagerHandler>(
    manager: &crate::Manager<H>,
    peer: SocketAddr,
    buf: &mut XdmcpBuffer,
    expected_len: u16,
    now: Instant,
) -> Result<Vec<Outbound>, CodecError> {
    let payload = ManagePayload::decode(buf)?;
    verify_checksum(buf, expected_len)?;

    if !manager.handler.host_acl(&peer) {
        return Ok(Vec::new());
    }

    let Some(display) = manager.sessions.lookup_by_session(payload.session_id) else {
        let mut outbound = vec![to(peer, encode_refuse(payload.session_id))];
        if let Some(fq) = manager.forward_queries.lookup(&peer, now) {
            manager.managed_forwards.start(fq.originating_manager_addr, peer, now);
            outbound.push(to(
                fq.originating_manager_addr,
                encode_managed_forward(peer, Opcode::ManagedForward),
            ));
            manager.forward_queries.dispose(&peer);
        }
        return Ok(outbound);
    };

    if display.is_managed() {
        log::debug!("Manage for already-managed session {} from {peer}", payload.session_id);
        return Ok(Vec::new());
    }

    match manager.indirect.lookup(&peer) {
        Some(rec) if rec.chosen_host.is_none() => {
            manager.sessions.set_use_chooser(display.session_id, Some(rec.id));
        }
        Some(rec) => {
            manager.sessions.set_use_chooser(display.session_id, None);
            manager.indirect.dispose(rec.id);
        }
        None => manager.sessions.set_use_chooser(display.session_id, None),
    }

    let mut outbound = Vec::new();
    if let Some(fq) = manager.forward_queries.lookup(&peer, now) {
        manager.managed_forwards.start(fq.originating_manager_addr, peer, now);
        outbound.push(to(
            fq.originating_manager_addr,
            encode_managed_forward(peer, Opcode::ManagedForward),
        ));
        manager.forward_queries.dispose(&peer);
    }

    manager.sessions.promote(display.session_id);
    let promoted = manager
        .sessions
        .lookup_by_session(display.session_id)
        .expect("just promoted");

    if manager.handler.manage_display(&promoted) {
        manager.handler.on_session_managed(&promoted);
    } else {
        manager.sessions.dispose(display.session_id);
        manager.handler.on_session_disposed(&promoted);
        outbound.push(to(
            peer,
            encode_failed(display.session_id, "Failed to manage display"),
        ));
    }

    Ok(outbound)
}

fn handle_keep_alive<H: ManagerHandler>(
    manager: &crate::Manager<H>,
    peer: SocketAddr,
    buf: &mut XdmcpBuffer,
    expected_len: u16,
) -> Result<Vec<Outbound>, CodecError> {
    let payload = KeepAlivePayload::decode(buf)?;
    verify_checksum(buf, expected_len)?;

    let display = manager
        .sessions
        .lookup_by_session(payload.session_id)
        .or_else(|| manager.sessions.lookup_by_host(&peer, payload.display_number));

    let running = display.as_ref().map(|d| d.is_managed() as u8).unwrap_or(0);
    let session_id = display.map(|d| d.session_id).unwrap_or(0);

    Ok(vec![to(peer, encode_alive(running, session_id))])
}

fn handle_managed_forward<H: ManagerHandler>(
    manager: &crate::Manager<H>,
    peer: SocketAddr,
    buf: &mut XdmcpBuffer,
    expected_len: u16,
) -> Result<Vec<Outbound>, CodecError> {
    let payload = ManagedForwardPayload::decode(buf)?;
    verify_checksum(buf, expected_len)?;
    let origin = match addr::from_request(
        &payload.display_addr,
        Some(&payload.display_port),
        family_of(&peer),
    ) {
        Some(a) => a,
        None => {
            log::debug!("dropping MANAGED_FORWARD from {peer}: unparsable origin address");
            return Ok(Vec::new());
        }
    };

    manager.indirect.dispose_by_chosen(&origin, &peer);

    // Idempotent (§4.7): reply even if we had no matching IndirectRecord, to
    // tolerate a previously lost GOT_MANAGED_FORWARD.
    Ok(vec![to(peer, encode_managed_forward(origin, Opcode::GotManagedForward))])
}

fn handle_got_managed_forward<H: ManagerHandler>(
    manager: &crate::Manager<H>,
    peer: SocketAddr,
    buf: &mut XdmcpBuffer,
    expected_len: u16,
) -> Result<Vec<Outbound>, CodecError> {
    let payload = ManagedForwardPayload::decode(buf)?;
    verify_checksum(buf, expected_len)?;
    let origin = match addr::from_request(
        &payload.display_addr,
        Some(&payload.display_port),
        family_of(&peer),
    ) {
        Some(a) => a,
        None => return Ok(Vec::new()),
    };

    manager.managed_forwards.ack(&peer, &origin);
    Ok(Vec::new())
}
