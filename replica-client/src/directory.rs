//! Client for the cluster directory service.
//!
//! The directory speaks newline-delimited JSON over one persistent TCP
//! connection: each request line gets exactly one reply line.

use std::{io, time::Duration};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time::sleep,
};
use tracing::{debug, info};

use crate::{
    command::ReplicaId,
    error::{ClientError, Result},
    topology::ClusterView,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DirectoryRequest {
    GetReplicaList,
    GetLeader,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DirectoryReply {
    ReplicaList { ready: bool, replicas: Vec<String> },
    Leader { leader_id: ReplicaId },
    Error { message: String },
}

/// Reads one JSON message, skipping blank lines. `None` means the peer closed.
pub async fn read_message<R, T>(reader: &mut R) -> io::Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    while reader.read_line(&mut line).await? > 0 {
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            return serde_json::from_str(trimmed)
                .map(Some)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err));
        }
        line.clear();
    }
    Ok(None)
}

pub async fn write_message<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut encoded = serde_json::to_vec(message)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaList {
    pub ready: bool,
    pub replicas: Vec<String>,
}

pub struct DirectoryClient {
    addr: String,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl DirectoryClient {
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream =
            TcpStream::connect(addr)
                .await
                .map_err(|source| ClientError::DirectoryUnreachable {
                    addr: addr.to_string(),
                    source,
                })?;
        debug!(%addr, "connected to directory");

        let (reader, writer) = stream.into_split();
        Ok(Self {
            addr: addr.to_string(),
            reader: BufReader::new(reader),
            writer,
        })
    }

    async fn call(&mut self, request: DirectoryRequest) -> Result<DirectoryReply> {
        write_message(&mut self.writer, &request).await?;
        read_message(&mut self.reader).await?.ok_or_else(|| {
            ClientError::Protocol(format!("directory {} closed the connection", self.addr))
        })
    }

    pub async fn replica_list(&mut self) -> Result<ReplicaList> {
        match self.call(DirectoryRequest::GetReplicaList).await? {
            DirectoryReply::ReplicaList { ready, replicas } => Ok(ReplicaList { ready, replicas }),
            DirectoryReply::Error { message } => Err(ClientError::Protocol(message)),
            other => Err(ClientError::Protocol(format!(
                "unexpected reply to replica list request: {other:?}"
            ))),
        }
    }

    /// Polls the replica list until the directory reports it ready.
    pub async fn wait_for_replica_list(&mut self, poll_interval: Duration) -> Result<Vec<String>> {
        let mut polls = 0u64;
        loop {
            polls += 1;
            let list = self.replica_list().await?;
            if list.ready {
                debug!(polls, "replica list is ready");
                return Ok(list.replicas);
            }
            if poll_interval.is_zero() {
                tokio::task::yield_now().await;
            } else {
                sleep(poll_interval).await;
            }
        }
    }

    pub async fn leader(&mut self) -> Result<ReplicaId> {
        match self.call(DirectoryRequest::GetLeader).await {
            Ok(DirectoryReply::Leader { leader_id }) => Ok(leader_id),
            Ok(DirectoryReply::Error { message }) => Err(ClientError::LeaderQuery(message)),
            Ok(other) => Err(ClientError::LeaderQuery(format!(
                "unexpected reply to leader request: {other:?}"
            ))),
            Err(err) => Err(ClientError::LeaderQuery(err.to_string())),
        }
    }
}

/// Resolves the cluster layout from the directory at `addr`.
///
/// The leader is only queried when `leaderless` is false.
pub async fn resolve(addr: &str, leaderless: bool, poll_interval: Duration) -> Result<ClusterView> {
    let mut directory = DirectoryClient::connect(addr).await?;
    let replicas = directory.wait_for_replica_list(poll_interval).await?;

    let leader = if leaderless {
        None
    } else {
        let leader = directory.leader().await?;
        info!(leader, "the leader is replica {leader}");
        Some(leader)
    };

    ClusterView::new(replicas, leader)
}
