use std::time::Duration;

use clap::ValueEnum;

pub const DEFAULT_DIRECTORY: &str = "127.0.0.1:7087";

pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// What to do when a replica cannot be reached while opening links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LinkPolicy {
    /// Abort the bootstrap.
    FailFast,
    /// Log it and keep the link as down; submissions to it count as reply failures.
    #[default]
    BestEffort,
}

/// Settings for [`crate::session::ClientSession::connect`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `host:port` of the directory service.
    pub directory: String,
    /// No leader exists; every command goes to the closest replica.
    pub leaderless: bool,
    /// Broadcast submission. Not implemented past routing.
    pub fast: bool,
    pub link_policy: LinkPolicy,
    /// Upper bound on the wait for a single reply.
    pub reply_timeout: Duration,
    /// Pause between replica-list polls while the directory is not ready.
    /// Zero retries immediately.
    pub poll_interval: Duration,
}

impl ClientConfig {
    pub fn new(directory: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            leaderless: false,
            fast: false,
            link_policy: LinkPolicy::default(),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            poll_interval: Duration::ZERO,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DIRECTORY)
    }
}
