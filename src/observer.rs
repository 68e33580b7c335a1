//! The default [`service::ManagerHandler`] (§6.4, SPEC_FULL §6): DNS
//! resolution, local-interface enumeration, and MIT-MAGIC-COOKIE-1
//! generation, with allow-all host ACL and no-op session-supervisor hooks.
//! Mirrors the reference workspace's `Observer`: a thin struct holding
//! shared config, logging every lifecycle event it's told about.

use std::{
    net::{SocketAddr, ToSocketAddrs},
    sync::Arc,
};

use rand::RngCore;
use service::{Hostent, ManagerHandler};

use crate::config::Config;

#[derive(Clone)]
pub struct Observer {
    config: Arc<Config>,
}

impl Observer {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }
}

impl ManagerHandler for Observer {
    /// No ACL backend is configured by default; every peer is accepted and
    /// left to the admission quotas in §4.4.
    fn host_acl(&self, _peer: &SocketAddr) -> bool {
        true
    }

    /// Reverse-resolve `peer` via the system resolver. A lookup failure
    /// falls back to the numeric address as the hostname and an empty
    /// `addrs` list, matching §3's "resolution failure is not fatal" note.
    fn resolve(&self, peer: &SocketAddr) -> Hostent {
        match dns_lookup::lookup_addr(&peer.ip()) {
            Ok(hostname) => {
                let addrs = format!("{hostname}:0")
                    .to_socket_addrs()
                    .map(|it| it.collect())
                    .unwrap_or_default();

                Hostent { hostname, addrs }
            }
            Err(e) => {
                log::debug!("reverse lookup failed for {peer}: {e}");
                Hostent {
                    hostname: peer.ip().to_string(),
                    addrs: vec![],
                }
            }
        }
    }

    /// Every unicast address bound to a local, non-loopback-only interface
    /// (§4.2 `is_local`).
    fn enumerate_local_addrs(&self) -> Vec<SocketAddr> {
        match if_addrs::get_if_addrs() {
            Ok(ifaces) => ifaces
                .into_iter()
                .map(|iface| SocketAddr::new(iface.ip(), self.config.server.port))
                .collect(),
            Err(e) => {
                log::warn!("failed to enumerate local interfaces: {e}");
                vec![]
            }
        }
    }

    /// Generates a fresh 16-byte MIT-MAGIC-COOKIE-1 secret (§3 `cookie`).
    /// There is no external auth component in this default implementation,
    /// so generation never fails.
    fn secure_display(&self, _peer: &SocketAddr, display_number: u16) -> Option<[u8; 16]> {
        let mut cookie = [0u8; 16];
        rand::rng().fill_bytes(&mut cookie);
        log::debug!("secured display :{display_number} with a fresh MIT-MAGIC-COOKIE-1");
        Some(cookie)
    }

    /// No external session supervisor is wired up by default; a display is
    /// considered managed as soon as the manager promotes it.
    fn manage_display(&self, display: &service::session::Display) -> bool {
        log::info!(
            "manage: host={:?}, display=:{}, session={}",
            display.remote_addr,
            display.display_number,
            display.session_id
        );
        true
    }

    fn unmanage_display(&self, display: &service::session::Display) {
        log::info!(
            "unmanage: host={:?}, display=:{}, session={}",
            display.remote_addr,
            display.display_number,
            display.session_id
        );
    }

    fn on_session_managed(&self, display: &service::session::Display) {
        log::info!(
            "session managed: host={:?}, display=:{}",
            display.remote_addr,
            display.display_number
        );
    }

    fn on_session_disposed(&self, display: &service::session::Display) {
        log::info!(
            "session disposed: host={:?}, display=:{}",
            display.remote_addr,
            display.display_number
        );
    }
}
