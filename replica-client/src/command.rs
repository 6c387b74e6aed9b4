use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Raw value bytes. The empty vector doubles as the NIL value.
pub type Value = Vec<u8>;

pub type CommandId = i32;

/// Index of a replica in the directory's replica list.
pub type ReplicaId = usize;

/// Operations understood by the replicated state machine.
///
/// Encoded as a single byte on the wire (`PUT` = 1, `GET` = 2, `SCAN` = 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Operation {
    Put,
    Get,
    Scan,
}

impl Operation {
    pub fn is_write(self) -> bool {
        matches!(self, Operation::Put)
    }
}

impl From<Operation> for u8 {
    fn from(op: Operation) -> Self {
        match op {
            Operation::Put => 1,
            Operation::Get => 2,
            Operation::Scan => 3,
        }
    }
}

impl TryFrom<u8> for Operation {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Operation::Put),
            2 => Ok(Operation::Get),
            3 => Ok(Operation::Scan),
            other => Err(format!("unknown operation code {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub op: Operation,
    pub key: i64,
    pub value: Value,
}

impl Command {
    pub fn put(key: i64, value: impl Into<Value>) -> Self {
        Self {
            op: Operation::Put,
            key,
            value: value.into(),
        }
    }

    pub fn get(key: i64) -> Self {
        Self {
            op: Operation::Get,
            key,
            value: Value::new(),
        }
    }

    pub fn scan(key: i64) -> Self {
        Self {
            op: Operation::Scan,
            key,
            value: Value::new(),
        }
    }
}

/// A command tagged with its id, as submitted to a replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Propose {
    pub command_id: CommandId,
    pub command: Command,
    /// Opaque to the client; always sent as 0.
    pub timestamp: i64,
}

impl Propose {
    pub fn new(command_id: CommandId, command: Command) -> Self {
        Self {
            command_id,
            command,
            timestamp: 0,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// A replica's answer to a [`Propose`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposeReply {
    pub ok: bool,
    pub command_id: CommandId,
    pub value: Value,
    pub timestamp: i64,
}

impl ProposeReply {
    pub fn ok(command_id: CommandId, value: impl Into<Value>) -> Self {
        Self {
            ok: true,
            command_id,
            value: value.into(),
            timestamp: 0,
        }
    }

    pub fn rejected(command_id: CommandId) -> Self {
        Self {
            ok: false,
            command_id,
            value: Value::new(),
            timestamp: 0,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
