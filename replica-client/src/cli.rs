use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::{ClientConfig, DEFAULT_DIRECTORY, LinkPolicy};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Store a value under a key.
    Put {
        #[arg(allow_negative_numbers = true)]
        key: i64,
        value: String,
    },
    /// Print the value stored under a key.
    Get {
        #[arg(allow_negative_numbers = true)]
        key: i64,
    },
    /// Print the values returned by a scan starting at a key.
    Scan {
        #[arg(allow_negative_numbers = true)]
        key: i64,
    },
    /// Read commands interactively from stdin.
    Shell,
}

/// How replica latency is measured at bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ProbeKind {
    /// ICMP round trip via the system `ping`.
    #[default]
    Ping,
    /// TCP handshake time to the replica port.
    Tcp,
}

#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Address of the directory service.
    #[arg(long, default_value = DEFAULT_DIRECTORY)]
    pub directory: String,

    /// Treat the cluster as leaderless.
    #[arg(long)]
    pub leaderless: bool,

    /// Use fast-path (broadcast) submission.
    #[arg(long)]
    pub fast: bool,

    /// Whether an unreachable replica aborts the bootstrap.
    #[arg(long, value_enum, default_value_t = LinkPolicy::BestEffort)]
    pub link_policy: LinkPolicy,

    /// Milliseconds to wait for a single reply.
    #[arg(long, default_value_t = 5000)]
    pub reply_timeout_ms: u64,

    /// Milliseconds between replica-list polls while the directory is not ready.
    #[arg(long, default_value_t = 0)]
    pub poll_interval_ms: u64,

    #[arg(long, value_enum, default_value_t = ProbeKind::Ping)]
    pub probe: ProbeKind,
}

impl ConnectionArgs {
    pub fn config(&self) -> ClientConfig {
        ClientConfig {
            directory: self.directory.clone(),
            leaderless: self.leaderless,
            fast: self.fast,
            link_policy: self.link_policy,
            reply_timeout: Duration::from_millis(self.reply_timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}
