//! UDP socket layer (§4.3) and the core event loop (§5, SPEC_FULL §5):
//! dual-stack bind with IPv4 fallback, optional multicast join, a single
//! `recv_from`/dispatch/`send_to` loop driven by `tokio`, and the
//! Managed-Forward retransmit timer ticking alongside it. Modeled on the
//! reference workspace's `fork_socket` read loop, adapted to the
//! single-threaded, event-driven model §5 requires instead of a
//! thread-per-core pool.

use std::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::{Arc, Weak},
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use service::{Manager, ManagerHandler};

use crate::config::Config;

/// Largest datagram we'll ever read; XDMCP payloads are small (hostnames,
/// a handful of connection addresses), well under a single UDP MTU.
const RECV_BUFFER_SIZE: usize = 4096;

/// How often the background sweep re-checks for stale Pending displays
/// during a lull in traffic (SPEC_FULL §5).
const PURGE_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Bind the manager's UDP socket, preferring a dual-stack IPv6 socket
/// (`IPV6_V6ONLY` cleared) so IPv4 peers arrive as IPv4-mapped IPv6
/// addresses and fall back to IPv4-only when the platform refuses
/// dual-stack sockets.
fn bind(port: u16) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))
        .context("failed to create ipv6 udp socket")?;

    if socket.set_only_v6(false).is_ok() {
        socket
            .bind(&SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), port).into())
            .context("failed to bind dual-stack udp socket")?;
        socket.set_nonblocking(true)?;
        return Ok(socket.into());
    }

    log::warn!("platform does not support dual-stack sockets, falling back to ipv4-only");
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .context("failed to create ipv4 udp socket")?;
    socket
        .bind(&SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), port).into())
        .context("failed to bind ipv4 udp socket")?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Join `group` on every non-loopback, non-down interface (§4.3). A
/// per-interface join failure is logged and skipped rather than aborting
/// startup, since one misbehaving interface shouldn't take the whole
/// manager down.
fn join_multicast(socket: &UdpSocket, group_addr: Ipv6Addr) -> Result<()> {
    let interfaces = if_addrs::get_if_addrs().context("failed to enumerate interfaces")?;
    let mut joined = 0usize;

    for iface in interfaces {
        if iface.is_loopback() {
            continue;
        }

        let Some(index) = iface.index else {
            continue;
        };

        if let Err(e) = socket.join_multicast_v6(&group_addr, index) {
            log::warn!(
                "failed to join multicast group {group_addr} on interface {}: {e}",
                iface.name
            );
            continue;
        }

        joined += 1;
    }

    if joined == 0 {
        log::warn!("joined multicast group {group_addr} on no interfaces");
    }

    Ok(())
}

/// Spawn the background sweep thread that re-runs `purge_stale_pending`
/// independent of Request traffic (SPEC_FULL §5). Holds only a `Weak`
/// reference so the manager's drop is never blocked on this thread, and
/// exits quietly once the last strong reference is gone.
fn spawn_purge_sweep<H: ManagerHandler + 'static>(manager: Weak<Manager<H>>) {
    std::thread::spawn(move || loop {
        std::thread::sleep(PURGE_SWEEP_INTERVAL);

        let Some(manager) = manager.upgrade() else {
            return;
        };

        let purged = manager.purge_stale_pending(Instant::now());
        if !purged.is_empty() {
            log::debug!("purge sweep reclaimed {} stale pending display(s)", purged.len());
        }
    });
}

/// Run the manager's event loop until the process is killed. Owns the UDP
/// socket; `manager` must already be fully configured.
pub async fn start<H: ManagerHandler + 'static>(
    config: &Config,
    manager: Arc<Manager<H>>,
) -> Result<()> {
    let std_socket = bind(config.server.port)?;
    let socket = UdpSocket::from_std(std_socket).context("failed to hand udp socket to tokio")?;
    let local_addr = socket.local_addr()?;
    log::info!("xdmcp manager listening on {local_addr}");

    if config.server.use_multicast {
        join_multicast(&socket, config.server.multicast_address)?;
    }

    spawn_purge_sweep(Arc::downgrade(&manager));

    let mut retransmit_tick = tokio::time::interval(managed_forward_tick());
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];

    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                let (size, peer) = match result {
                    Ok(v) => v,
                    Err(e) => {
                        log::warn!("udp socket receive error: {e}");
                        continue;
                    }
                };

                log::trace!("udp socket receive: size={size}, peer={peer}");
                for outbound in manager.dispatch(&buf[..size], peer, Instant::now()) {
                    send(&socket, outbound.to, &outbound.bytes).await;
                }
            }

            _ = retransmit_tick.tick() => {
                for outbound in manager.due_managed_forwards(Instant::now()) {
                    send(&socket, outbound.to, &outbound.bytes).await;
                }
            }
        }
    }
}

async fn send(socket: &UdpSocket, to: SocketAddr, bytes: &[u8]) {
    if let Err(e) = socket.send_to(bytes, to).await {
        log::warn!("udp socket send error to {to}: {e}");
    }
}

/// §4.7's retransmit cadence, exposed as a free function so the interval's
/// period doesn't silently drift from the table's own constant.
fn managed_forward_tick() -> Duration {
    service::managed_forward::MANAGED_FORWARD_INTERVAL
}
