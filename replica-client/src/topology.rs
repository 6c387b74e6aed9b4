use crate::{
    command::ReplicaId,
    error::{ClientError, Result},
};

const LOOPBACK: &str = "127.0.0.1";

/// Replica addresses and leader as reported by the directory at bootstrap.
///
/// Replica ids are indices into the address list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterView {
    addresses: Vec<String>,
    leader: Option<ReplicaId>,
}

impl ClusterView {
    pub fn new(addresses: Vec<String>, leader: Option<ReplicaId>) -> Result<Self> {
        if addresses.is_empty() {
            return Err(ClientError::Topology(
                "directory reported no replicas".to_string(),
            ));
        }
        if let Some(leader) = leader {
            if leader >= addresses.len() {
                return Err(ClientError::Topology(format!(
                    "leader {leader} is outside the {} known replicas",
                    addresses.len()
                )));
            }
        }
        Ok(Self { addresses, leader })
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    pub fn address(&self, id: ReplicaId) -> Option<&str> {
        self.addresses.get(id).map(String::as_str)
    }

    /// `None` in leaderless mode.
    pub fn leader(&self) -> Option<ReplicaId> {
        self.leader
    }
}

/// Host part of a `host:port` address, with loopback standing in for an
/// empty host (`":7070"`).
pub fn host_of(address: &str) -> &str {
    let host = match address.rsplit_once(':') {
        Some((host, _port)) => host,
        None => address,
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() { LOOPBACK } else { host }
}

/// Address suitable for dialing, filling in loopback for an empty host.
pub fn dial_address(address: &str) -> String {
    match address.strip_prefix(':') {
        Some(port) => format!("{LOOPBACK}:{port}"),
        None => address.to_string(),
    }
}
