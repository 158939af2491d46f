use serde::{Deserialize, Serialize};
use std::fmt;

// --- Header Names ---

/// Selects the operation to perform. Mandatory unless the dispatcher has a default.
pub const OPERATION: &str = "GridOperationType";
/// The key of single-key operations, or the set of keys for a bulk lookup.
pub const OBJECT_ID: &str = "GridObjectId";
/// The comparison value of a conditional replace.
pub const OBJECT_VALUE: &str = "GridObjectValue";
/// Predicate expression used by the query operation.
pub const QUERY: &str = "GridQuery";

/// Every operation any dispatcher in the cluster understands.
///
/// Codes are stable and never reused for a different meaning. Not every
/// collection supports every operation; a map dispatcher rejects the queue,
/// atomic-number and topic operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Put,
    Delete,
    Get,
    Update,
    Query,
    GetAll,
    Clear,
    Replace,
    Add,
    Offer,
    Peek,
    Poll,
    Increment,
    Decrement,
    Publish,
}

impl Operation {
    pub const ALL: [Operation; 15] = [
        Operation::Put,
        Operation::Delete,
        Operation::Get,
        Operation::Update,
        Operation::Query,
        Operation::GetAll,
        Operation::Clear,
        Operation::Replace,
        Operation::Add,
        Operation::Offer,
        Operation::Peek,
        Operation::Poll,
        Operation::Increment,
        Operation::Decrement,
        Operation::Publish,
    ];

    /// The wire code carried by the operation header.
    pub fn code(self) -> i64 {
        match self {
            Operation::Put => 1,
            Operation::Delete => 2,
            Operation::Get => 3,
            Operation::Update => 4,
            Operation::Query => 5,
            Operation::GetAll => 6,
            Operation::Clear => 7,
            Operation::Replace => 8,
            Operation::Add => 31,
            Operation::Offer => 32,
            Operation::Peek => 33,
            Operation::Poll => 34,
            Operation::Increment => 40,
            Operation::Decrement => 41,
            Operation::Publish => 50,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.code() == code)
    }

    /// Canonical camel-case name, e.g. `getAll`.
    pub fn name(self) -> &'static str {
        match self {
            Operation::Put => "put",
            Operation::Delete => "delete",
            Operation::Get => "get",
            Operation::Update => "update",
            Operation::Query => "query",
            Operation::GetAll => "getAll",
            Operation::Clear => "clear",
            Operation::Replace => "replace",
            Operation::Add => "add",
            Operation::Offer => "offer",
            Operation::Peek => "peek",
            Operation::Poll => "poll",
            Operation::Increment => "increment",
            Operation::Decrement => "decrement",
            Operation::Publish => "publish",
        }
    }

    /// Matches names case-insensitively and ignores `_` and `-`, so `getAll`,
    /// `get_all` and `GET-ALL` are the same operation.
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized: String = name
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();

        Self::ALL
            .into_iter()
            .find(|op| op.name().to_ascii_lowercase() == normalized)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
