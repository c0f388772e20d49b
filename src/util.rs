use std::net::{Ipv4Addr, SocketAddr};

use chrono::Utc;

const DEFAULT_PORT: u16 = 8080;

const DEFAULT_ADDR: Ipv4Addr = Ipv4Addr::new(0, 0, 0, 0);

pub fn get_default_port() -> u16 {
    DEFAULT_PORT
}

pub fn get_default_bind_addr() -> SocketAddr {
    SocketAddr::from((DEFAULT_ADDR, DEFAULT_PORT))
}

/// Read an environment variable, treating blank values as unset.
pub fn read_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Client id for the bus connection, unique per start: `<prefix>_<YYYYmmddHHMMSS>`.
pub fn timestamped_client_id(prefix: &str) -> String {
    format!("{prefix}_{}", Utc::now().format("%Y%m%d%H%M%S"))
}
