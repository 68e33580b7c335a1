use std::{fs::read_to_string, net::Ipv6Addr, path::PathBuf, str::FromStr};

use anyhow::Result;
use clap::Parser;
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" => Self::Warn,
            "error" => Self::Error,
            _ => return Err(format!("unknown log level: {value}")),
        })
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Log {
    #[serde(default)]
    pub level: LogLevel,
}

/// The UDP interface the manager listens on (§4.3, §6.2).
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Server {
    /// Port bound for XDMCP traffic (§6.2 `port`, default 177, the IANA
    /// `xdmcp` port).
    #[serde(default = "Server::port")]
    pub port: u16,

    /// Join the IPv6 multicast group below on every non-loopback interface
    /// at startup (§4.3, §6.2 `use_multicast`).
    #[serde(default)]
    pub use_multicast: bool,

    /// Multicast group to join when `use_multicast` is set (§6.2
    /// `multicast_address`).
    #[serde(default = "Server::multicast_address")]
    pub multicast_address: Ipv6Addr,

    /// Answer IndirectQuery at all (§6.2 `honor_indirect`).
    #[serde(default = "Server::honor_indirect")]
    pub honor_indirect: bool,

    /// §6.2 `max_displays_per_host`.
    #[serde(default = "Server::max_displays_per_host")]
    pub max_displays_per_host: usize,

    /// §6.2 `max_displays`.
    #[serde(default = "Server::max_displays")]
    pub max_displays: usize,

    /// §6.2 `max_pending_displays`.
    #[serde(default = "Server::max_pending_displays")]
    pub max_pending_displays: usize,

    /// §6.2 `max_wait`, in seconds.
    #[serde(default = "Server::max_wait_secs")]
    pub max_wait_secs: u64,

    /// §6.2 `willing_script`: an optional advisory script whose first line
    /// of stdout becomes the cached Willing status.
    #[serde(default)]
    pub willing_script: Option<PathBuf>,
}

impl Server {
    fn port() -> u16 {
        177
    }

    fn multicast_address() -> Ipv6Addr {
        Ipv6Addr::from_str("ff02::1").unwrap()
    }

    fn honor_indirect() -> bool {
        true
    }

    fn max_displays_per_host() -> usize {
        2
    }

    fn max_displays() -> usize {
        16
    }

    fn max_pending_displays() -> usize {
        4
    }

    fn max_wait_secs() -> u64 {
        15
    }
}

impl Default for Server {
    fn default() -> Self {
        Self {
            port: Self::port(),
            use_multicast: false,
            multicast_address: Self::multicast_address(),
            honor_indirect: Self::honor_indirect(),
            max_displays_per_host: Self::max_displays_per_host(),
            max_displays: Self::max_displays(),
            max_pending_displays: Self::max_pending_displays(),
            max_wait_secs: Self::max_wait_secs(),
            willing_script: None,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub log: Log,
}

#[derive(Parser, Debug)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS")
)]
struct Cli {
    /// Specify the configuration file path.
    ///
    /// Example: xdmcp-manager --config /etc/xdmcp-manager/config.toml
    #[arg(long, short)]
    config: Option<String>,
}

impl Config {
    /// Load configuration from the file named on the command line, or fall
    /// back to every field's default when no `--config` is given.
    pub fn load() -> Result<Self> {
        match Cli::parse().config {
            Some(path) => Ok(toml::from_str(&read_to_string(path)?)?),
            None => Ok(Self::default()),
        }
    }
}
