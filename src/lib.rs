//! A pure Rust-implemented XDMCP (X Display Manager Control Protocol)
//! session manager: wire codec and protocol core live in [`codec`] and
//! [`service`]; this crate is the binary's ambient stack (config, logging,
//! the default [`ManagerHandler`](service::ManagerHandler), and the UDP
//! socket layer) that wires them to a running process.

pub mod config;
pub mod observer;
pub mod server;

use std::sync::Arc;

use self::{config::Config, observer::Observer};
use service::{Manager, ManagerOptions};

/// In order to let integration tests use this crate directly and start the
/// manager, a function is exposed to replace `main` so it can be driven
/// from a test harness instead of only from the compiled binary.
pub async fn startup(config: Arc<Config>) -> anyhow::Result<()> {
    let manager = Arc::new(Manager::new(ManagerOptions {
        sysid: sysid(),
        hostname: hostname(),
        handler: Observer::new(config.clone()),
        quotas: service::admission::Quotas {
            max_displays: config.server.max_displays,
            max_displays_per_host: config.server.max_displays_per_host,
            max_pending_displays: config.server.max_pending_displays,
        },
        max_wait: std::time::Duration::from_secs(config.server.max_wait_secs),
        honor_indirect: config.server.honor_indirect,
        willing_script: config.server.willing_script.clone(),
    }));

    server::start(&config, manager).await
}

/// The Willing/Unwilling status string (§3 `ServerIdentity`, §4.4): `sysname`
/// followed by the crate's own release, since this manager has no
/// underlying OS `uname` identity of its own to report.
fn sysid() -> String {
    format!("xdmcp-manager {}", env!("CARGO_PKG_VERSION"))
}

/// The local hostname, wire-ready ARRAY8 form (§3 `ServerIdentity`) — the
/// value Willing/Unwilling actually carry in their hostname field, distinct
/// from `sysid` above.
fn hostname() -> Vec<u8> {
    gethostname::gethostname().to_string_lossy().into_owned().into_bytes()
}
