use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Listening address for HTTP and Websocket
    #[arg(short, long, default_value = "0.0.0.0")]
    pub(crate) address: IpAddr,
    /// Listening port
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    pub(crate) port: u16,
    /// Relay configuration file, created with defaults if missing
    #[arg(short, long, default_value = "relay.toml")]
    pub(crate) config: PathBuf,
    /// Proxies trusted to set X-Forwarded-For
    #[arg(long)]
    pub(crate) trusted_proxy: Vec<IpAddr>,
    /// Base64 salt used to hash client IPs in metric labels
    #[arg(long, env = "IP_HASH_SALT")]
    pub(crate) ip_hash_salt: Option<String>,
}
