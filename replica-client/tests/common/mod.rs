//! In-process stand-ins for the directory service and replicas.

#![allow(dead_code)]

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use replica_client::{
    command::{CommandId, Operation, Propose, ProposeReply, ReplicaId},
    config::ClientConfig,
    directory::{DirectoryReply, DirectoryRequest, read_message, write_message},
    error::{self, ClientError},
    proximity::LatencyProbe,
    wire,
};
use tokio::{
    io::BufReader,
    net::{TcpListener, TcpStream},
    sync::Mutex,
    task::JoinHandle,
};

type Store = Arc<Mutex<BTreeMap<i64, Vec<u8>>>>;

/// Misbehaviour applied to the next reply a replica sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Reply frame with an undecodable body.
    Garble,
    /// Well-formed reply with `ok = false`.
    Reject,
    /// No reply at all.
    Silent,
}

#[derive(Default)]
struct ReplicaLog {
    seen: Vec<(CommandId, Operation, i64)>,
    faults: VecDeque<Fault>,
}

pub struct MockReplica {
    pub addr: String,
    log: Arc<Mutex<ReplicaLog>>,
    task: JoinHandle<()>,
}

impl MockReplica {
    async fn spawn(store: Store) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?.to_string();
        let log = Arc::new(Mutex::new(ReplicaLog::default()));

        let task = tokio::spawn(accept_replica_connections(listener, store, Arc::clone(&log)));
        Ok(Self { addr, log, task })
    }

    /// A replica with a store of its own.
    pub async fn spawn_standalone() -> Result<Self> {
        Self::spawn(Arc::default()).await
    }

    pub async fn inject(&self, fault: Fault) {
        self.log.lock().await.faults.push_back(fault);
    }

    /// Every proposal received so far, in arrival order.
    pub async fn seen(&self) -> Vec<(CommandId, Operation, i64)> {
        self.log.lock().await.seen.clone()
    }

    pub async fn seen_ids(&self) -> Vec<CommandId> {
        self.seen().await.into_iter().map(|(id, _, _)| id).collect()
    }
}

impl Drop for MockReplica {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_replica_connections(
    listener: TcpListener,
    store: Store,
    log: Arc<Mutex<ReplicaLog>>,
) {
    while let Ok((stream, _)) = listener.accept().await {
        let store = Arc::clone(&store);
        let log = Arc::clone(&log);
        tokio::spawn(async move {
            let _ = serve_replica(stream, store, log).await;
        });
    }
}

async fn serve_replica(stream: TcpStream, store: Store, log: Arc<Mutex<ReplicaLog>>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    while let Some(propose) = wire::read_propose(&mut reader).await? {
        let fault = {
            let mut log = log.lock().await;
            let command = &propose.command;
            log.seen.push((propose.command_id, command.op, command.key));
            log.faults.pop_front()
        };

        // The command is applied even when its reply goes missing.
        let reply = apply(&store, &propose).await;
        match fault {
            None => wire::write_reply(&mut writer, &reply).await?,
            Some(Fault::Garble) => {
                wire::write_reply_frame(&mut writer, propose.command_id, &[0xff, 0x00]).await?
            }
            Some(Fault::Reject) => {
                wire::write_reply(&mut writer, &ProposeReply::rejected(propose.command_id)).await?
            }
            Some(Fault::Silent) => {}
        }
    }
    Ok(())
}

async fn apply(store: &Store, propose: &Propose) -> ProposeReply {
    let mut store = store.lock().await;
    let command = &propose.command;
    let value = match command.op {
        Operation::Put => {
            store.insert(command.key, command.value.clone());
            Vec::new()
        }
        Operation::Get => store.get(&command.key).cloned().unwrap_or_default(),
        Operation::Scan => store
            .range(command.key..)
            .flat_map(|(_, value)| value.iter().copied())
            .collect(),
    };
    ProposeReply::ok(propose.command_id, value)
}

struct DirectoryState {
    replicas: Vec<String>,
    leader: Option<ReplicaId>,
    not_ready: AtomicUsize,
    list_calls: AtomicUsize,
}

pub struct MockDirectory {
    pub addr: String,
    state: Arc<DirectoryState>,
    task: JoinHandle<()>,
}

impl MockDirectory {
    /// Serves `replicas`, answering "not ready" to the first `not_ready` list requests.
    pub async fn spawn(
        replicas: Vec<String>,
        leader: Option<ReplicaId>,
        not_ready: usize,
    ) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?.to_string();
        let state = Arc::new(DirectoryState {
            replicas,
            leader,
            not_ready: AtomicUsize::new(not_ready),
            list_calls: AtomicUsize::new(0),
        });

        let task = tokio::spawn(accept_directory_connections(listener, Arc::clone(&state)));
        Ok(Self { addr, state, task })
    }

    pub fn list_calls(&self) -> usize {
        self.state.list_calls.load(Ordering::SeqCst)
    }
}

impl Drop for MockDirectory {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_directory_connections(listener: TcpListener, state: Arc<DirectoryState>) {
    while let Ok((stream, _)) = listener.accept().await {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let _ = serve_directory(stream, state).await;
        });
    }
}

async fn serve_directory(stream: TcpStream, state: Arc<DirectoryState>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    while let Some(request) = read_message::<_, DirectoryRequest>(&mut reader).await? {
        let reply = match request {
            DirectoryRequest::GetReplicaList => {
                state.list_calls.fetch_add(1, Ordering::SeqCst);
                let ready = state
                    .not_ready
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_err();
                DirectoryReply::ReplicaList {
                    ready,
                    replicas: state.replicas.clone(),
                }
            }
            DirectoryRequest::GetLeader => match state.leader {
                Some(leader_id) => DirectoryReply::Leader { leader_id },
                None => DirectoryReply::Error {
                    message: "no leader elected".to_string(),
                },
            },
        };
        write_message(&mut writer, &reply).await?;
    }
    Ok(())
}

/// A directory plus `n` replicas sharing one store.
pub struct MockCluster {
    pub directory: MockDirectory,
    pub replicas: Vec<MockReplica>,
}

impl MockCluster {
    pub async fn spawn(n: usize, leader: Option<ReplicaId>) -> Result<Self> {
        Self::spawn_with(n, leader, 0).await
    }

    pub async fn spawn_with(n: usize, leader: Option<ReplicaId>, not_ready: usize) -> Result<Self> {
        let store: Store = Arc::default();
        let mut replicas = Vec::with_capacity(n);
        for _ in 0..n {
            replicas.push(MockReplica::spawn(Arc::clone(&store)).await?);
        }

        let addresses = replicas.iter().map(|replica| replica.addr.clone()).collect();
        let directory = MockDirectory::spawn(addresses, leader, not_ready).await?;
        Ok(Self { directory, replicas })
    }

    pub fn replica(&self, id: ReplicaId) -> &MockReplica {
        &self.replicas[id]
    }

    pub fn addresses(&self) -> Vec<String> {
        self.replicas.iter().map(|replica| replica.addr.clone()).collect()
    }

    pub fn config(&self) -> ClientConfig {
        client_config(&self.directory.addr)
    }
}

pub fn client_config(directory: &str) -> ClientConfig {
    let mut config = ClientConfig::new(directory);
    config.reply_timeout = Duration::from_secs(2);
    config
}

/// An address nothing listens on.
pub async fn unused_address() -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    Ok(listener.local_addr()?.to_string())
}

/// Latencies fixed per address; unknown addresses fail to probe.
pub struct FixedProbe {
    latencies: HashMap<String, f64>,
}

impl FixedProbe {
    pub fn new(addresses: &[String], latencies: &[f64]) -> Self {
        Self {
            latencies: addresses.iter().cloned().zip(latencies.iter().copied()).collect(),
        }
    }
}

impl LatencyProbe for FixedProbe {
    async fn probe(&self, address: &str) -> error::Result<f64> {
        self.latencies
            .get(address)
            .copied()
            .ok_or_else(|| ClientError::Probe {
                addr: address.to_string(),
                reason: "host unreachable".to_string(),
            })
    }
}
