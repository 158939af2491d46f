use super::types::{OPERATION, Operation};
use crate::exchange::types::{HeaderValue, Headers};

/// The operation header did not name any known operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized operation '{value}' in header '{header}'")]
pub struct UnknownOperation {
    /// Rendering of the offending header value (`null` when absent).
    pub value: String,
    pub header: &'static str,
}

impl UnknownOperation {
    fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            header: OPERATION,
        }
    }
}

/// Reads the operation header shared by all dispatchers.
///
/// Accepts an integer code, a decimal string or a symbolic name. When the
/// header is absent the `default` is used, if there is one.
pub fn lookup_operation(
    headers: &Headers,
    default: Option<Operation>,
) -> Result<Operation, UnknownOperation> {
    let Some(value) = headers.get(OPERATION) else {
        return default.ok_or_else(|| UnknownOperation::new("null"));
    };

    let decoded = match value {
        HeaderValue::Int(code) => Operation::from_code(*code),
        HeaderValue::Text(text) => match text.trim().parse::<i64>() {
            Ok(code) => Operation::from_code(code),
            Err(_) => Operation::from_name(text),
        },
        HeaderValue::Keys(_) | HeaderValue::Json(_) => None,
    };

    decoded.ok_or_else(|| UnknownOperation::new(value.to_string()))
}
