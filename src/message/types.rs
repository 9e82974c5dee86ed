use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::ReplicationError;

/// Kind tag carried by every message on the wire.
///
/// The numeric values are part of the wire format and must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageKind {
    ReadRequest = 0,
    ReadResponse = 1,
    WriteRequest = 2,
    WriteResponse = 3,
    Heartbeat = 4,
    NodeFailure = 5,
    NodeRecovery = 6,
    ChainUpdate = 7,
    QuorumPrepare = 8,
    QuorumPromise = 9,
    QuorumAccept = 10,
    QuorumAccepted = 11,
    QuorumCommit = 12,
    QuorumAbort = 13,
    ModeSwitch = 14,
    CacheUpdate = 15,
    BatchRequest = 16,
    BatchResponse = 17,
    ChainForward = 18,
    ChainAck = 19,
}

impl MessageKind {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::ReadRequest),
            1 => Some(Self::ReadResponse),
            2 => Some(Self::WriteRequest),
            3 => Some(Self::WriteResponse),
            4 => Some(Self::Heartbeat),
            5 => Some(Self::NodeFailure),
            6 => Some(Self::NodeRecovery),
            7 => Some(Self::ChainUpdate),
            8 => Some(Self::QuorumPrepare),
            9 => Some(Self::QuorumPromise),
            10 => Some(Self::QuorumAccept),
            11 => Some(Self::QuorumAccepted),
            12 => Some(Self::QuorumCommit),
            13 => Some(Self::QuorumAbort),
            14 => Some(Self::ModeSwitch),
            15 => Some(Self::CacheUpdate),
            16 => Some(Self::BatchRequest),
            17 => Some(Self::BatchResponse),
            18 => Some(Self::ChainForward),
            19 => Some(Self::ChainAck),
            _ => None,
        }
    }

    /// True for client-facing read operations.
    pub fn is_read(self) -> bool {
        self == Self::ReadRequest
    }

    /// True for client-facing write operations.
    pub fn is_write(self) -> bool {
        self == Self::WriteRequest
    }
}

/// Replication discipline selected by the policy engine for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ReplicationMode {
    ChainOnly = 0,
    QuorumOnly = 1,
    Hybrid = 2,
}

impl ReplicationMode {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::ChainOnly),
            1 => Some(Self::QuorumOnly),
            2 => Some(Self::Hybrid),
            _ => None,
        }
    }
}

impl fmt::Display for ReplicationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ChainOnly => "chain",
            Self::QuorumOnly => "quorum",
            Self::Hybrid => "hybrid",
        };
        write!(f, "{}", label)
    }
}

/// Tagged envelope exchanged between nodes.
///
/// The pair `(sender, sequence)` uniquely identifies a logical request
/// across its lifetime; forwards and acknowledgements carry the original
/// sequence so in-flight state can be correlated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub sender: u32,
    pub receiver: u32,
    pub key: String,
    pub value: String,
    pub success: bool,
    /// Microseconds from the local monotone clock.
    pub timestamp: u64,
    /// Per-sender monotone request counter.
    pub sequence: u32,
    /// Opaque correlation id, usually a UUID.
    pub correlation: String,
    /// Ordered peer ids this message addresses (broadcast fan-out, chain order).
    pub targets: Vec<u32>,
    /// Opaque extension field.
    pub metadata: String,
}

impl Default for Message {
    fn default() -> Self {
        Self {
            kind: MessageKind::ReadRequest,
            sender: 0,
            receiver: 0,
            key: String::new(),
            value: String::new(),
            success: false,
            timestamp: 0,
            sequence: 0,
            correlation: String::new(),
            targets: Vec::new(),
            metadata: String::new(),
        }
    }
}

impl Message {
    /// Builds a request envelope stamped with the current time.
    pub fn request(kind: MessageKind, sender: u32, key: &str, value: &str) -> Self {
        Self {
            kind,
            sender,
            key: key.to_string(),
            value: value.to_string(),
            timestamp: now_micros(),
            correlation: uuid::Uuid::new_v4().to_string(),
            ..Self::default()
        }
    }

    /// Builds the response envelope answering `request`.
    pub fn respond(request: &Message, kind: MessageKind, sender: u32) -> Self {
        Self {
            kind,
            sender,
            receiver: request.sender,
            key: request.key.clone(),
            timestamp: now_micros(),
            sequence: request.sequence,
            correlation: request.correlation.clone(),
            ..Self::default()
        }
    }

    /// Encodes the envelope into the pipe-delimited wire form.
    pub fn serialize(&self) -> String {
        let targets = self
            .targets
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");

        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
            self.kind as u8,
            self.sender,
            self.receiver,
            self.key,
            self.value,
            if self.success { "1" } else { "0" },
            self.timestamp,
            self.sequence,
            self.correlation,
            targets,
            self.metadata,
        )
    }

    /// Decodes a wire-form envelope.
    ///
    /// All eleven fields must be present; numeric fields must parse. The
    /// caller is expected to drop the message and log at WARN on error.
    pub fn deserialize(data: &str) -> Result<Self, ReplicationError> {
        let fields: Vec<&str> = data.split('|').collect();
        if fields.len() != 11 {
            return Err(ReplicationError::Parse(format!(
                "expected 11 fields, got {}",
                fields.len()
            )));
        }

        let kind_raw: u8 = parse_field(fields[0], "kind")?;
        let kind = MessageKind::from_u8(kind_raw)
            .ok_or_else(|| ReplicationError::Parse(format!("unknown kind {}", kind_raw)))?;

        let targets = if fields[9].is_empty() {
            Vec::new()
        } else {
            fields[9]
                .split(',')
                .map(|token| parse_field(token, "targets"))
                .collect::<Result<Vec<u32>, _>>()?
        };

        Ok(Self {
            kind,
            sender: parse_field(fields[1], "sender")?,
            receiver: parse_field(fields[2], "receiver")?,
            key: fields[3].to_string(),
            value: fields[4].to_string(),
            success: fields[5] == "1",
            timestamp: parse_field(fields[6], "timestamp")?,
            sequence: parse_field(fields[7], "sequence")?,
            correlation: fields[8].to_string(),
            targets,
            metadata: fields[10].to_string(),
        })
    }
}

fn parse_field<T: std::str::FromStr>(token: &str, name: &str) -> Result<T, ReplicationError> {
    token
        .parse()
        .map_err(|_| ReplicationError::Parse(format!("bad {} field: {:?}", name, token)))
}

/// Current time in microseconds since the epoch.
pub fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}
