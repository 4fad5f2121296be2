//! Command line and environment configuration for `speedtest-server`.
//!
//! ```text
//! speedtest-server [--listen-addr 0.0.0.0:8080] [--path /speedtest] [--log-level debug]
//! ```

use std::net::SocketAddr;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "speedtest-server", version, about = "HTTP download and upload speed test endpoint")]
pub struct Config {
    /// Address the HTTP server listens on.
    ///
    /// Environment variable: `SPEEDTEST_LISTEN_ADDR`.
    #[arg(long, env = "SPEEDTEST_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: SocketAddr,

    /// Path the speed test endpoint is mounted at. Must start with `/`.
    ///
    /// Environment variable: `SPEEDTEST_PATH`.
    #[arg(long, env = "SPEEDTEST_PATH", default_value = "/speedtest", value_parser = parse_route_path)]
    pub path: String,

    /// Log filter (tracing-subscriber EnvFilter syntax).
    ///
    /// Falls back to `RUST_LOG`, then `info`.
    /// Environment variable: `SPEEDTEST_LOG`.
    #[arg(long, env = "SPEEDTEST_LOG")]
    pub log_level: Option<String>,
}

fn parse_route_path(path: &str) -> Result<String, String> {
    if !path.starts_with('/') {
        return Err(format!("path {path:?} must start with '/'"));
    }
    if path.contains(['{', '}', '*']) {
        return Err(format!("path {path:?} must not contain route parameters"));
    }
    Ok(path.to_string())
}
