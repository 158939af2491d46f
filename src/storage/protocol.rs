//! Storage Network Protocol
//!
//! Defines the internal endpoint and the Data Transfer Objects (DTOs) a remote map
//! handle uses to drive a map hosted by a grid node.
//!
//! Every map call travels as one `MapRequest` carrying the caller's lock owner, so key
//! locks taken over the network belong to the remote handle, not to the serving node.

use super::handle::{MapError, MapErrorKind};
use super::memory::OwnerId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

// --- API Endpoints ---

/// Internal endpoint applying one map command; followed by `/<map name>`.
pub const ENDPOINT_MAP_INTERNAL: &str = "/internal/map";

// --- Data Transfer Objects ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MapRequest {
    /// Lock owner the command runs as.
    pub owner: OwnerId,
    pub command: MapCommand,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MapCommand {
    Put { key: String, value: Value },
    Get { key: String },
    GetAll { keys: BTreeSet<String> },
    Remove { key: String },
    Replace { key: String, value: Value },
    ReplaceIf { key: String, expected: Value, value: Value },
    /// `None` returns every value.
    Values { predicate: Option<String> },
    Clear,
    /// `wait_ms` bounds how long the node waits for a foreign lock; a lock not
    /// granted in time is never granted later. `None` waits indefinitely.
    Lock {
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        wait_ms: Option<u64>,
    },
    Unlock { key: String },
}

impl MapCommand {
    pub fn name(&self) -> &'static str {
        match self {
            MapCommand::Put { .. } => "put",
            MapCommand::Get { .. } => "get",
            MapCommand::GetAll { .. } => "get_all",
            MapCommand::Remove { .. } => "remove",
            MapCommand::Replace { .. } => "replace",
            MapCommand::ReplaceIf { .. } => "replace_if",
            MapCommand::Values { .. } => "values",
            MapCommand::Clear => "clear",
            MapCommand::Lock { .. } => "lock",
            MapCommand::Unlock { .. } => "unlock",
        }
    }

    /// Writes and `lock` wait while another owner holds the key.
    pub fn may_wait(&self) -> bool {
        matches!(
            self,
            MapCommand::Put { .. }
                | MapCommand::Remove { .. }
                | MapCommand::Replace { .. }
                | MapCommand::ReplaceIf { .. }
                | MapCommand::Lock { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MapResponse {
    /// Single value, `None` when the key had none.
    Value { value: Option<Value> },
    Entries { entries: BTreeMap<String, Value> },
    Values { values: Vec<Value> },
    Replaced { replaced: bool },
    Done,
    Failed { kind: MapErrorKind, message: String },
}

impl From<&MapError> for MapResponse {
    fn from(error: &MapError) -> Self {
        MapResponse::Failed {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}
