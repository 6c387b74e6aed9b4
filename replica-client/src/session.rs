//! The client session: bootstrap, routing and the submit/await cycle.
//!
//! Every operation takes a fresh command id, picks a replica, registers a
//! waiter for the reply on that replica's link, sends the proposal and then
//! waits, bounded by the reply timeout. Replies are matched by command id,
//! so a session can be shared by concurrent callers.

use std::sync::atomic::{AtomicI32, Ordering};

use tokio::{sync::Mutex, time::timeout};
use tracing::{debug, error, info, warn};

use crate::{
    command::{Command, CommandId, Operation, Propose, ProposeReply, ReplicaId, Value},
    config::ClientConfig,
    directory,
    error::{ClientError, ReplyFailure, Result},
    failure::{FailureTracker, Health},
    link::LinkPool,
    proximity::{self, LatencyProbe},
    topology::ClusterView,
};

/// Where a command is submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Replica(ReplicaId),
    /// Every replica at once (fast path).
    Broadcast,
}

/// Routing inputs fixed at bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingPolicy {
    pub leaderless: bool,
    pub fast: bool,
    pub closest: ReplicaId,
    /// Replica 0 stands in when the cluster is leaderless.
    pub leader: ReplicaId,
}

impl RoutingPolicy {
    /// Writes go to the leader unless the cluster is leaderless; once the
    /// session is degraded everything goes to the leader; otherwise the
    /// closest replica serves the command.
    pub fn route(&self, op: Operation, forces_leader: bool) -> Route {
        if self.fast {
            Route::Broadcast
        } else if (!self.leaderless && op.is_write()) || forces_leader {
            Route::Replica(self.leader)
        } else {
            Route::Replica(self.closest)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplicaStatus {
    pub id: ReplicaId,
    pub addr: String,
    pub connected: bool,
}

/// Point-in-time view of a session, for display.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub replicas: Vec<ReplicaStatus>,
    pub closest: ReplicaId,
    pub leader: Option<ReplicaId>,
    pub health: Health,
    pub last_command_id: CommandId,
}

pub struct ClientSession {
    config: ClientConfig,
    view: ClusterView,
    links: LinkPool,
    policy: RoutingPolicy,
    command_ids: CommandIds,
    failures: Mutex<FailureTracker>,
}

impl ClientSession {
    /// Bootstraps a session.
    ///
    /// Fails if the directory cannot be reached, the leader cannot be
    /// queried, any replica cannot be probed, or (under fail-fast) any
    /// replica cannot be connected.
    pub async fn connect<P>(config: ClientConfig, probe: &P) -> Result<Self>
    where
        P: LatencyProbe,
    {
        let view =
            directory::resolve(&config.directory, config.leaderless, config.poll_interval)
                .await?;
        let closest = proximity::select_closest(view.addresses(), probe).await?;
        info!(nodes = ?view.addresses(), closest, "resolved cluster");

        let links = LinkPool::connect(view.addresses(), config.link_policy).await?;

        let policy = RoutingPolicy {
            leaderless: config.leaderless,
            fast: config.fast,
            closest,
            leader: view.leader().unwrap_or(0),
        };

        Ok(Self {
            config,
            view,
            links,
            policy,
            command_ids: CommandIds::starting_after(0),
            failures: Mutex::new(FailureTracker::new()),
        })
    }

    pub async fn write(&self, key: i64, value: impl Into<Value>) -> Result<()> {
        self.execute(Command::put(key, value)).await.map(drop)
    }

    pub async fn read(&self, key: i64) -> Result<Value> {
        self.execute(Command::get(key)).await
    }

    pub async fn scan(&self, key: i64) -> Result<Value> {
        self.execute(Command::scan(key)).await
    }

    /// Submits `command` and waits for its value.
    ///
    /// A lost, garbled or rejected reply yields the empty value and degrades
    /// the session; the second such reply returns [`ClientError::Unrecoverable`],
    /// and so does every call after it without contacting any replica.
    pub async fn execute(&self, command: Command) -> Result<Value> {
        let forces_leader = {
            let failures = self.failures.lock().await;
            if failures.health() == Health::Fatal {
                return Err(ClientError::Unrecoverable);
            }
            failures.forces_leader()
        };
        let command_id = self.command_ids.next()?;

        let replica = match self.policy.route(command.op, forces_leader) {
            Route::Replica(replica) => replica,
            Route::Broadcast => return Err(ClientError::FastPathUnsupported),
        };
        debug!(command_id, op = ?command.op, key = command.key, replica, "submitting command");

        let propose = Propose::new(command_id, command);
        match self.submit(replica, &propose).await {
            Ok(reply) if reply.ok => Ok(reply.value),
            Ok(_) => self.reply_failed(replica, command_id, ReplyFailure::Rejected).await,
            Err(failure) => self.reply_failed(replica, command_id, failure).await,
        }
    }

    /// Dropping the pending reply, on timeout or when the caller gives up,
    /// unregisters its waiter.
    async fn submit(
        &self,
        replica: ReplicaId,
        propose: &Propose,
    ) -> Result<ProposeReply, ReplyFailure> {
        let link = self.links.get(replica).ok_or(ReplyFailure::LinkDown)?;
        let pending = link.submit(propose)?;

        match timeout(self.config.reply_timeout, pending).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ReplyFailure::Disconnected),
            Err(_) => Err(ReplyFailure::TimedOut(self.config.reply_timeout)),
        }
    }

    async fn reply_failed(
        &self,
        replica: ReplicaId,
        command_id: CommandId,
        failure: ReplyFailure,
    ) -> Result<Value> {
        warn!(replica, command_id, error = %failure, "failed to receive a response");

        let health = self.failures.lock().await.record_failure();
        match health {
            Health::Degraded => {
                warn!(
                    leader = self.policy.leader,
                    "routing every command to the leader from now on"
                );
                Ok(Value::new())
            }
            Health::Healthy | Health::Fatal => {
                error!(replica, command_id, "cannot recover");
                Err(ClientError::Unrecoverable)
            }
        }
    }

    pub fn last_command_id(&self) -> CommandId {
        self.command_ids.last()
    }

    pub fn closest(&self) -> ReplicaId {
        self.policy.closest
    }

    pub fn leader(&self) -> Option<ReplicaId> {
        self.view.leader()
    }

    pub fn view(&self) -> &ClusterView {
        &self.view
    }

    pub fn policy(&self) -> RoutingPolicy {
        self.policy
    }

    pub async fn health(&self) -> Health {
        self.failures.lock().await.health()
    }

    pub async fn status(&self) -> SessionStatus {
        let replicas = self
            .links
            .iter()
            .map(|link| ReplicaStatus {
                id: link.id(),
                addr: link.addr().to_string(),
                connected: link.is_connected(),
            })
            .collect();

        SessionStatus {
            replicas,
            closest: self.policy.closest,
            leader: self.view.leader(),
            health: self.health().await,
            last_command_id: self.last_command_id(),
        }
    }

    /// Shuts down every replica link.
    pub async fn close(self) {
        self.links.shutdown().await;
    }
}

/// Hands out increasing command ids, starting after a given id.
struct CommandIds {
    last: AtomicI32,
}

impl CommandIds {
    fn starting_after(last: CommandId) -> Self {
        Self {
            last: AtomicI32::new(last),
        }
    }

    /// Ids are never reused: past [`CommandId::MAX`] every call fails.
    fn next(&self) -> Result<CommandId> {
        self.last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| id.checked_add(1))
            .map(|previous| previous + 1)
            .map_err(ClientError::CommandIdsExhausted)
    }

    fn last(&self) -> CommandId {
        self.last.load(Ordering::SeqCst)
    }
}
