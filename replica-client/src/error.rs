use std::{io, time::Duration};

use thiserror::Error;

use crate::command::{CommandId, ReplicaId};

pub type Result<T, E = ClientError> = std::result::Result<T, E>;

/// Errors surfaced to callers of [`crate::session::ClientSession`].
///
/// Every variant except `Io` and `Codec` is fatal for the session; the
/// embedding application decides whether that ends the process.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("cannot reach directory at {addr}: {source}")]
    DirectoryUnreachable {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("leader query failed: {0}")]
    LeaderQuery(String),

    #[error("cannot probe latency of {addr}: {reason}")]
    Probe { addr: String, reason: String },

    #[error("replica {id} at {addr} is unreachable: {source}")]
    ReplicaUnreachable {
        id: ReplicaId,
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid topology: {0}")]
    Topology(String),

    #[error("fast-path submission is not implemented")]
    FastPathUnsupported,

    #[error("a second reply failed; cannot recover")]
    Unrecoverable,

    #[error("command ids exhausted after {0}")]
    CommandIdsExhausted(CommandId),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
}

/// Why a single submission produced no usable reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplyFailure {
    #[error("reply could not be decoded: {0}")]
    Garbled(String),

    #[error("replica rejected the command")]
    Rejected,

    #[error("connection to replica lost")]
    Disconnected,

    #[error("no reply within {0:?}")]
    TimedOut(Duration),

    #[error("replica link is down")]
    LinkDown,

    #[error("failed to send command: {0}")]
    SendFailed(String),
}
