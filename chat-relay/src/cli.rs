use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};

use clap::{Args, Parser, Subcommand, builder::RangedU64ValueParser};

use crate::hub::{DEFAULT_QUEUE_CAPACITY, MIN_QUEUE_CAPACITY};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay: a JSON-lines TCP endpoint plus the web front end.
    Serve(ServeArgs),
    /// Connect to a relay's TCP endpoint and chat from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address for the JSON-lines TCP endpoint. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub listen: SocketAddr,

    /// Interface the web front end binds to.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// Port for the web front end (WebSocket at /ws plus static assets).
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Directory of static assets served by the web front end.
    #[arg(long, env = "STATIC_DIR", default_value = "public")]
    pub static_dir: PathBuf,

    /// Events buffered per connection before a slow reader is dropped.
    #[arg(
        long,
        default_value_t = DEFAULT_QUEUE_CAPACITY,
        value_parser = RangedU64ValueParser::<usize>::new().range(MIN_QUEUE_CAPACITY as u64..),
    )]
    pub queue_capacity: usize,

    /// Only run the TCP endpoint.
    #[arg(long)]
    pub no_web: bool,
}

impl ServeArgs {
    pub fn web_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Address of the relay's TCP endpoint.
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub server: SocketAddr,

    /// Nickname to request right after connecting.
    #[arg(long)]
    pub nickname: Option<String>,
}
