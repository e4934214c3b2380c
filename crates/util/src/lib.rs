pub mod config;

use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};

pub use config::{AppConfig, ConfigError, Environment, ImageBox};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

/// Loads `.env` if one is found and returns its path.
pub fn load_env_file() -> Option<PathBuf> {
    dotenvy::dotenv().ok()
}

/// Resolves `APP_BIND_ADDR`, accepting either `host:port` or a bare port
/// bound on loopback.
pub fn server_bind_address() -> Result<SocketAddr, std::net::AddrParseError> {
    let value = env::var("APP_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
    let value = value.trim();
    if let Ok(port) = value.parse::<u16>() {
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port));
    }
    value.parse()
}
