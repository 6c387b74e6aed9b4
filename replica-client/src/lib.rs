//! Client access layer for a replicated key-value store.
//!
//! A session bootstraps against the cluster directory, measures latency to
//! every replica, keeps one connection per replica, and routes each
//! `PUT`/`GET`/`SCAN` to the right replica: writes to the leader, reads to
//! the closest replica, and everything to the leader once a reply has been
//! lost.
//!
//! - [`directory`] speaks the JSON line protocol of the directory service and
//!   resolves the [`topology::ClusterView`].
//! - [`proximity`] probes replicas and picks the closest one.
//! - [`link`] owns the per-replica connections and their reply readers.
//! - [`correlator`] matches replies to waiting requests by command id.
//! - [`failure`] tracks the healthy/degraded/fatal state of a session.
//! - [`session`] ties everything together behind `write`/`read`/`scan`.
//! - [`command`] and [`wire`] define the replicated command and its framing.
//! - [`cli`], [`config`] and [`shell`] back the `replica-client` binary.

pub mod cli;
pub mod command;
pub mod config;
pub mod correlator;
pub mod directory;
pub mod error;
pub mod failure;
pub mod link;
pub mod proximity;
pub mod session;
pub mod shell;
pub mod topology;
pub mod wire;
