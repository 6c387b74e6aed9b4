//! Matches replies to the requests waiting for them.
//!
//! A waiter must be registered before its request is written. A reply that
//! arrives for an id nobody registered is dropped, so registering late would
//! lose replies that come back quickly.

use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll},
};

use tokio::sync::oneshot;
use tracing::warn;

use crate::{
    command::{CommandId, ProposeReply},
    error::ReplyFailure,
};

pub type ReplyOutcome = Result<ProposeReply, ReplyFailure>;

/// Pending-reply table for one replica connection.
///
/// The table is only touched in short, non-async sections, so a blocking
/// mutex is enough and lets [`PendingReply`] clean up from `Drop`.
#[derive(Debug, Default)]
pub struct Correlator {
    table: Mutex<Table>,
}

#[derive(Debug, Default)]
struct Table {
    pending: HashMap<CommandId, oneshot::Sender<ReplyOutcome>>,
    closed: Option<ReplyFailure>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a waiter for `command_id`.
    ///
    /// Once the correlator is closed the returned waiter resolves
    /// immediately with the failure that closed it. Dropping the waiter
    /// unregisters it.
    pub fn register(self: &Arc<Self>, command_id: CommandId) -> PendingReply {
        let (tx, rx) = oneshot::channel();
        {
            let mut table = self.table();
            match &table.closed {
                Some(failure) => {
                    let _ = tx.send(Err(failure.clone()));
                }
                None => {
                    if table.pending.insert(command_id, tx).is_some() {
                        warn!(command_id, "replaced an outstanding waiter");
                    }
                }
            }
        }
        PendingReply {
            command_id,
            rx,
            correlator: Arc::clone(self),
        }
    }

    /// Hands `outcome` to the waiter for `command_id`.
    ///
    /// Returns false when no one is waiting any more.
    pub fn deliver(&self, command_id: CommandId, outcome: ReplyOutcome) -> bool {
        let waiter = self.table().pending.remove(&command_id);
        match waiter {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    pub fn cancel(&self, command_id: CommandId) -> bool {
        self.table().pending.remove(&command_id).is_some()
    }

    /// Fails every outstanding waiter and all future registrations.
    pub fn close(&self, failure: ReplyFailure) -> usize {
        let waiters: Vec<_> = {
            let mut table = self.table();
            table.closed = Some(failure.clone());
            table.pending.drain().map(|(_, tx)| tx).collect()
        };

        let count = waiters.len();
        for tx in waiters {
            let _ = tx.send(Err(failure.clone()));
        }
        count
    }

    pub fn is_closed(&self) -> bool {
        self.table().closed.is_some()
    }

    pub fn outstanding(&self) -> usize {
        self.table().pending.len()
    }
}

/// A registered waiter. Resolves to the reply, or to `Err` if the
/// correlator dropped it without an answer.
#[derive(Debug)]
pub struct PendingReply {
    command_id: CommandId,
    rx: oneshot::Receiver<ReplyOutcome>,
    correlator: Arc<Correlator>,
}

impl PendingReply {
    pub fn command_id(&self) -> CommandId {
        self.command_id
    }
}

impl Future for PendingReply {
    type Output = Result<ReplyOutcome, oneshot::error::RecvError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx)
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.correlator.cancel(self.command_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn correlator() -> Arc<Correlator> {
        Arc::new(Correlator::new())
    }

    #[tokio::test]
    async fn reply_reaches_registered_waiter() {
        let correlator = correlator();
        let pending = correlator.register(1);

        assert!(correlator.deliver(1, Ok(ProposeReply::ok(1, b"v".to_vec()))));
        let reply = pending.await.expect("waiter alive").expect("reply ok");
        assert_eq!(reply.value, b"v".to_vec());
        assert_eq!(correlator.outstanding(), 0);
    }

    #[tokio::test]
    async fn replies_are_matched_out_of_order() {
        let correlator = correlator();
        let first = correlator.register(1);
        let second = correlator.register(2);

        correlator.deliver(2, Ok(ProposeReply::ok(2, b"b".to_vec())));
        correlator.deliver(1, Ok(ProposeReply::ok(1, b"a".to_vec())));

        assert_eq!(first.await.unwrap().unwrap().value, b"a".to_vec());
        assert_eq!(second.await.unwrap().unwrap().value, b"b".to_vec());
    }

    #[tokio::test]
    async fn reply_without_waiter_is_dropped() {
        let correlator = correlator();
        assert!(!correlator.deliver(5, Ok(ProposeReply::ok(5, Vec::new()))));

        // Registering afterwards does not resurrect the early reply.
        let mut pending = correlator.register(5);
        assert!(pending.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancelled_waiter_is_not_delivered() {
        let correlator = correlator();
        let pending = correlator.register(3);
        assert!(correlator.cancel(3));
        assert!(!correlator.deliver(3, Err(ReplyFailure::Rejected)));
        assert!(pending.await.is_err());
    }

    #[test]
    fn dropping_a_waiter_unregisters_it() {
        let correlator = correlator();
        let pending = correlator.register(8);
        let _kept = correlator.register(9);
        assert_eq!(correlator.outstanding(), 2);

        drop(pending);
        assert_eq!(correlator.outstanding(), 1);
        assert!(!correlator.deliver(8, Err(ReplyFailure::Rejected)));
    }

    #[tokio::test]
    async fn close_fails_pending_and_future_waiters() {
        let correlator = correlator();
        let pending = correlator.register(1);

        assert_eq!(correlator.close(ReplyFailure::Disconnected), 1);
        assert_eq!(pending.await.unwrap(), Err(ReplyFailure::Disconnected));

        let late = correlator.register(2);
        assert_eq!(late.await.unwrap(), Err(ReplyFailure::Disconnected));
        assert!(correlator.is_closed());
    }
}
