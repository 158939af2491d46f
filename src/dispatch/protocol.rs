//! Dispatch HTTP Protocol
//!
//! The public endpoint and DTOs through which a pipeline hands exchanges to a node.

use super::error::ErrorKind;
use crate::exchange::types::{ExchangeId, Headers};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Public endpoint processing one exchange; followed by `/<map name>`.
pub const ENDPOINT_PROCESS: &str = "/process";

/// The inbound section of an exchange.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessRequest {
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub body: Value,
}

/// The outbound section after dispatch, or the reason it failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub exchange_id: ExchangeId,
    pub headers: Headers,
    /// Omitted when the operation writes no body. A lookup that found nothing
    /// is sent as `null`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}
