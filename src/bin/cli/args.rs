use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stomp")]
#[command(version)]
#[command(about = "Interactive STOMP client CLI")]
pub struct Cli {
    /// Broker host name or IP address
    #[arg(short, long, default_value = "127.0.0.1")]
    pub server: String,

    /// Broker STOMP port
    #[arg(short = 'P', long, default_value_t = 61613)]
    pub port: u16,

    /// Login username
    #[arg(short, long, default_value = "guest")]
    pub login: String,

    /// Passcode
    #[arg(short, long, default_value = "guest")]
    pub passcode: String,

    /// Destinations to subscribe to (can be specified multiple times)
    #[arg(short = 'S', long)]
    pub subscribe: Vec<String>,

    /// Give up on the login handshake after this many milliseconds
    #[arg(long, default_value_t = 10_000)]
    pub connect_timeout: u64,

    /// Append every sent message to this file (e.g. <login>.log)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Show session summary on exit
    #[arg(long)]
    pub summary: bool,
}
