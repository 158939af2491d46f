use crate::operation::decode::UnknownOperation;
use crate::operation::types::Operation;
use crate::storage::handle::MapError;
use crate::storage::predicate::PredicateError;
use serde::{Deserialize, Serialize};

/// Why an operation that was correctly selected could not be carried out.
#[derive(Debug, thiserror::Error)]
pub enum FailureCause {
    #[error("header '{header}' is required")]
    MissingHeader { header: &'static str },

    #[error("header '{header}' holds {found}, expected {expected}")]
    HeaderShape {
        header: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    #[error("invalid query: {0}")]
    Predicate(#[from] PredicateError),

    #[error(transparent)]
    Map(MapError),
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The operation header is missing, unknown, or names an operation maps do not support.
    #[error("The value '{value}' is not allowed for parameter '{header}' on the MAP cache.")]
    InvalidOperation { value: String, header: &'static str },

    #[error("{operation} on map '{map}' failed: {cause}")]
    OperationFailed {
        operation: Operation,
        map: String,
        #[source]
        cause: FailureCause,
    },

    #[error("{operation} on map '{map}' could not reach the grid: {source}")]
    TransportFailure {
        operation: Operation,
        map: String,
        source: MapError,
    },
}

/// Serializable classification of a `DispatchError`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidOperation,
    OperationFailed,
    TransportFailure,
}

impl DispatchError {
    /// Classifies a map failure: transport problems stay distinct from rejected calls.
    pub fn from_map(operation: Operation, map: &str, error: MapError) -> Self {
        if error.is_transport() {
            return DispatchError::TransportFailure {
                operation,
                map: map.to_string(),
                source: error,
            };
        }
        DispatchError::OperationFailed {
            operation,
            map: map.to_string(),
            cause: FailureCause::Map(error),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::InvalidOperation { .. } => ErrorKind::InvalidOperation,
            DispatchError::OperationFailed { .. } => ErrorKind::OperationFailed,
            DispatchError::TransportFailure { .. } => ErrorKind::TransportFailure,
        }
    }
}

impl From<UnknownOperation> for DispatchError {
    fn from(error: UnknownOperation) -> Self {
        DispatchError::InvalidOperation {
            value: error.value,
            header: error.header,
        }
    }
}
