//! One persistent connection per replica.
//!
//! Each live link has a writer task that owns the buffered write half and
//! writes whole frames taken from a channel, and a reader task that decodes
//! every reply frame and hands it to the link's [`Correlator`]. Callers only
//! enqueue frames, so dropping a caller never leaves half a frame on the
//! socket. The reader task is aborted when the link is dropped; the writer
//! task drains its queue and shuts the socket down.

use std::sync::Arc;

use futures::future::join_all;
use tokio::{
    io::{AsyncWriteExt, BufReader, BufWriter},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    command::{Propose, ReplicaId},
    config::LinkPolicy,
    correlator::{Correlator, PendingReply},
    error::{ClientError, ReplyFailure, Result},
    topology::dial_address,
    wire::{self, ReplyFrame},
};

pub struct ReplicaLink {
    id: ReplicaId,
    addr: String,
    state: LinkState,
}

enum LinkState {
    Up(Connection),
    Down { reason: String },
}

struct Connection {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    correlator: Arc<Correlator>,
    writer: JoinHandle<()>,
    _reader: AbortOnDrop,
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl ReplicaLink {
    pub async fn connect(id: ReplicaId, addr: &str) -> std::io::Result<Self> {
        let stream = TcpStream::connect(dial_address(addr)).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();

        let correlator = Arc::new(Correlator::new());
        let reader = tokio::spawn(read_replies(
            id,
            BufReader::new(reader),
            Arc::clone(&correlator),
        ));
        let (outbound, frames) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_frames(
            id,
            BufWriter::new(writer),
            frames,
            Arc::clone(&correlator),
        ));
        info!(replica = id, %addr, "connected to replica");

        Ok(Self {
            id,
            addr: addr.to_string(),
            state: LinkState::Up(Connection {
                outbound,
                correlator,
                writer,
                _reader: AbortOnDrop(reader),
            }),
        })
    }

    /// A placeholder for a replica that could not be reached.
    pub fn down(id: ReplicaId, addr: &str, reason: impl Into<String>) -> Self {
        Self {
            id,
            addr: addr.to_string(),
            state: LinkState::Down {
                reason: reason.into(),
            },
        }
    }

    pub fn id(&self) -> ReplicaId {
        self.id
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// False for links that never connected or whose connection has since been lost.
    pub fn is_connected(&self) -> bool {
        match &self.state {
            LinkState::Up(connection) => !connection.correlator.is_closed(),
            LinkState::Down { .. } => false,
        }
    }

    pub fn down_reason(&self) -> Option<&str> {
        match &self.state {
            LinkState::Up(_) => None,
            LinkState::Down { reason } => Some(reason),
        }
    }

    /// Registers a waiter for the proposal's reply, then queues its frame.
    ///
    /// The waiter is in place before any byte leaves, so even an immediate
    /// reply finds it. Nothing here awaits: once this returns the frame is
    /// either fully queued or not queued at all.
    pub fn submit(&self, propose: &Propose) -> Result<PendingReply, ReplyFailure> {
        let connection = match &self.state {
            LinkState::Up(connection) => connection,
            LinkState::Down { .. } => return Err(ReplyFailure::LinkDown),
        };

        let frame = wire::encode_propose(propose)
            .map_err(|err| ReplyFailure::SendFailed(err.to_string()))?;
        let pending = connection.correlator.register(propose.command_id);
        connection
            .outbound
            .send(frame)
            .map_err(|_| ReplyFailure::SendFailed("writer task has stopped".to_string()))?;

        Ok(pending)
    }

    /// Stops accepting frames, then waits for queued frames to be written.
    async fn shutdown(self) {
        if let LinkState::Up(Connection {
            outbound, writer, ..
        }) = self.state
        {
            drop(outbound);
            if let Err(error) = writer.await {
                debug!(replica = self.id, ?error, "replica writer task failed");
            }
        }
    }
}

async fn write_frames(
    id: ReplicaId,
    mut writer: BufWriter<OwnedWriteHalf>,
    mut frames: mpsc::UnboundedReceiver<Vec<u8>>,
    correlator: Arc<Correlator>,
) {
    while let Some(frame) = frames.recv().await {
        let written = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        };
        if let Err(error) = written.await {
            warn!(replica = id, ?error, "failed to send command");
            correlator.close(ReplyFailure::SendFailed(error.to_string()));
            return;
        }
    }

    if let Err(error) = writer.shutdown().await {
        debug!(replica = id, ?error, "failed to shut down replica link");
    }
}

async fn read_replies(
    id: ReplicaId,
    mut reader: BufReader<OwnedReadHalf>,
    correlator: Arc<Correlator>,
) {
    loop {
        match wire::read_reply(&mut reader).await {
            Ok(Some(ReplyFrame { command_id, reply })) => {
                let outcome = reply.map_err(|err| {
                    warn!(replica = id, command_id, error = %err, "error when reading reply");
                    ReplyFailure::Garbled(err.to_string())
                });
                if !correlator.deliver(command_id, outcome) {
                    debug!(replica = id, command_id, "dropping reply nobody is waiting for");
                }
            }
            Ok(None) => {
                warn!(replica = id, "replica closed the connection");
                correlator.close(ReplyFailure::Disconnected);
                return;
            }
            Err(error) => {
                warn!(replica = id, ?error, "reply stream failed");
                correlator.close(ReplyFailure::Garbled(error.to_string()));
                return;
            }
        }
    }
}

/// The links of a session, indexed by replica id.
pub struct LinkPool {
    links: Vec<ReplicaLink>,
}

impl LinkPool {
    /// Opens a link to every address concurrently.
    ///
    /// Under [`LinkPolicy::BestEffort`] unreachable replicas become down links,
    /// so the pool always holds one link per address.
    pub async fn connect(addresses: &[String], policy: LinkPolicy) -> Result<Self> {
        let attempts = join_all(
            addresses
                .iter()
                .enumerate()
                .map(|(id, addr)| async move {
                    (id, addr, ReplicaLink::connect(id, addr).await)
                }),
        )
        .await;

        let mut links = Vec::with_capacity(addresses.len());
        for (id, addr, attempt) in attempts {
            match attempt {
                Ok(link) => links.push(link),
                Err(source) if policy == LinkPolicy::FailFast => {
                    return Err(ClientError::ReplicaUnreachable {
                        id,
                        addr: addr.clone(),
                        source,
                    });
                }
                Err(error) => {
                    warn!(replica = id, %addr, ?error, "error connecting to replica");
                    links.push(ReplicaLink::down(id, addr, error.to_string()));
                }
            }
        }

        Ok(Self { links })
    }

    pub fn get(&self, id: ReplicaId) -> Option<&ReplicaLink> {
        self.links.get(id)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReplicaLink> {
        self.links.iter()
    }

    /// Closes every link once its queued frames are written.
    pub async fn shutdown(self) {
        join_all(self.links.into_iter().map(ReplicaLink::shutdown)).await;
    }
}
