//! Gateway configuration, assembled from environment variables.
//!
//! A single struct built in one function, validated as it's built, with
//! defaults documented alongside the field that uses them.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{ensure, Context};
use bbs_gateway_env_vars::{var, var_parsed};

use crate::addr::CidrEntry;
use crate::ip_filter::{IpFilter, IpFilterConfig};

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_port: u16,
    pub backend_host: String,
    pub backend_port: u16,

    pub max_connections: usize,
    pub connection_timeout: Duration,

    pub blocked_countries: Vec<String>,
    pub block_unknown_countries: bool,
    pub geoip_database_path: Option<PathBuf>,

    pub blocklist_path: Option<PathBuf>,
    pub whitelist_path: Option<PathBuf>,

    pub rate_limit_enabled: bool,
    pub max_connections_per_window: u32,
    pub rate_limit_window: Duration,
    pub rate_limit_block_duration: Duration,

    pub ssh_enabled: bool,
    pub ssh_listen_port: u16,
    pub ssh_host_key: PathBuf,
    pub ssh_ciphers: Vec<String>,

    pub encoding_detection_enabled: bool,
    pub backend_port_utf8: Option<u16>,
    pub backend_port_cp437: Option<u16>,

    pub log_level: String,
}

/// The legacy-friendly default cipher list, in the order they are
/// advertised to the client — the first mutually supported cipher wins.
const DEFAULT_SSH_CIPHERS: &[&str] = &[
    "aes128-ctr",
    "aes192-ctr",
    "aes256-ctr",
    "aes128-cbc",
    "3des-cbc",
];

fn is_valid_port(port: u32) -> bool {
    (1..=65535).contains(&port)
}

impl Config {
    /// Builds the configuration from the process environment. Panics are
    /// never used here; invalid configuration is an `anyhow::Error` that the
    /// caller turns into exit code `1`.
    pub fn from_env() -> anyhow::Result<Self> {
        let listen_port = var_parsed::<u32>("LISTEN_PORT")?.unwrap_or(23);
        ensure!(is_valid_port(listen_port), "LISTEN_PORT must be between 1 and 65535");

        let backend_host = var("BACKEND_HOST")?.unwrap_or_else(|| "127.0.0.1".to_string());
        ensure!(!backend_host.is_empty(), "BACKEND_HOST must not be empty");

        let backend_port = var_parsed::<u32>("BACKEND_PORT")?.unwrap_or(2323);
        ensure!(is_valid_port(backend_port), "BACKEND_PORT must be between 1 and 65535");

        let max_connections = var_parsed("MAX_CONNECTIONS")?.unwrap_or(100);

        let connection_timeout = Duration::from_millis(var_parsed("CONNECTION_TIMEOUT")?.unwrap_or(300_000));

        let blocked_countries = match var("BLOCKED_COUNTRIES")? {
            None => vec![],
            Some(s) if s.is_empty() => vec![],
            Some(s) => s.split(',').map(|c| c.trim().to_uppercase()).collect(),
        };
        let block_unknown_countries = var("BLOCK_UNKNOWN_COUNTRIES")?
            .map(|s| s == "true" || s == "1")
            .unwrap_or(false);
        let geoip_database_path = var("GEOIP_DATABASE_PATH")?.map(PathBuf::from);

        let blocklist_path = var("BLOCKLIST_PATH")?.filter(|s| !s.is_empty()).map(PathBuf::from);
        let whitelist_path = var("WHITELIST_PATH")?.filter(|s| !s.is_empty()).map(PathBuf::from);

        let rate_limit_enabled = var("RATE_LIMIT_ENABLED")?.map(|s| s != "false" && s != "0").unwrap_or(true);
        let max_connections_per_window: u32 = var_parsed("MAX_CONNECTIONS_PER_WINDOW")?.unwrap_or(10);
        ensure!(max_connections_per_window >= 1, "MAX_CONNECTIONS_PER_WINDOW must be >= 1");

        let rate_limit_window_ms: u64 = var_parsed("RATE_LIMIT_WINDOW_MS")?.unwrap_or(60_000);
        ensure!(rate_limit_window_ms >= 1000, "RATE_LIMIT_WINDOW_MS must be >= 1000");

        let rate_limit_block_duration = Duration::from_millis(
            var_parsed("RATE_LIMIT_BLOCK_DURATION_MS")?.unwrap_or(300_000),
        );

        let ssh_enabled = var("SSH_ENABLED")?.map(|s| s == "true" || s == "1").unwrap_or(false);
        let ssh_listen_port = var_parsed::<u32>("SSH_LISTEN_PORT")?.unwrap_or(2222);
        ensure!(is_valid_port(ssh_listen_port), "SSH_LISTEN_PORT must be between 1 and 65535");

        let ssh_host_key = var("SSH_HOST_KEY")?
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./ssh_host_key"));

        let ssh_ciphers = match var("SSH_CIPHERS")? {
            None => DEFAULT_SSH_CIPHERS.iter().map(|s| s.to_string()).collect(),
            Some(s) if s.is_empty() => DEFAULT_SSH_CIPHERS.iter().map(|s| s.to_string()).collect(),
            Some(s) => s.split(',').map(|c| c.trim().to_string()).collect(),
        };

        let backend_port_utf8 = var_parsed("BACKEND_PORT_UTF8")?;
        let backend_port_cp437 = var_parsed("BACKEND_PORT_CP437")?;
        let encoding_detection_enabled = backend_port_utf8.is_some() || backend_port_cp437.is_some();

        let log_level = var("LOG_LEVEL")?.unwrap_or_else(|| "info".to_string());

        Ok(Config {
            listen_port: listen_port as u16,
            backend_host,
            backend_port: backend_port as u16,
            max_connections,
            connection_timeout,
            blocked_countries,
            block_unknown_countries,
            geoip_database_path,
            blocklist_path,
            whitelist_path,
            rate_limit_enabled,
            max_connections_per_window,
            rate_limit_window: Duration::from_millis(rate_limit_window_ms),
            rate_limit_block_duration,
            ssh_enabled,
            ssh_listen_port: ssh_listen_port as u16,
            ssh_host_key,
            ssh_ciphers,
            encoding_detection_enabled,
            backend_port_utf8,
            backend_port_cp437,
            log_level,
        })
    }

    /// Loads the whitelist and blocklist files named in this configuration
    /// into an [`IpFilter`]. A missing `*_PATH` yields an empty list rather
    /// than an error.
    pub fn build_ip_filter(&self) -> anyhow::Result<IpFilter> {
        let whitelist = self.load_list(self.whitelist_path.as_deref(), "WHITELIST_PATH")?;
        let blocklist = self.load_list(self.blocklist_path.as_deref(), "BLOCKLIST_PATH")?;

        Ok(IpFilter::new(
            whitelist,
            blocklist,
            IpFilterConfig {
                rate_limit_enabled: self.rate_limit_enabled,
                max_connections_per_window: self.max_connections_per_window,
                window: self.rate_limit_window,
                block_duration: self.rate_limit_block_duration,
            },
        ))
    }

    fn load_list(&self, path: Option<&std::path::Path>, var_name: &str) -> anyhow::Result<Vec<CidrEntry>> {
        match path {
            None => Ok(vec![]),
            Some(path) => IpFilter::load_entries(path)
                .with_context(|| format!("failed to load {var_name} from {}", path.display())),
        }
    }
}

/// Always binds all interfaces — this gateway is meant to run as the public
/// edge in front of the BBS backend, not behind another proxy.
pub fn listen_address(port: u16) -> (IpAddr, u16) {
    ([0, 0, 0, 0].into(), port)
}
