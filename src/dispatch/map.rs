//! Map Operation Dispatcher
//!
//! Turns the operation headers of an exchange into exactly one call against a
//! bound map, writes lookups back onto the outbound body, then propagates headers.
//!
//! ## Dispatch order
//! 1. Decode the operation header (or fall back to the configured default).
//! 2. Reject operations maps do not support, before touching the map.
//! 3. Run the map call(s). `UPDATE` wraps its replace in a key lock.
//! 4. Write the outbound body (`GET`, `GET_ALL`, `QUERY` only).
//! 5. Run the header propagator.
//!
//! A failure at any step returns early, leaving the outbound section untouched.

use super::error::{DispatchError, FailureCause};
use super::lock::KeyLock;
use crate::config::DispatcherConfig;
use crate::exchange::propagation::{HeaderPropagator, StripControlHeaders};
use crate::exchange::types::{Exchange, HeaderValue, Message};
use crate::operation::decode::lookup_operation;
use crate::operation::types::{OBJECT_ID, OBJECT_VALUE, OPERATION, Operation, QUERY};
use crate::storage::handle::{MapError, MapHandle};
use crate::storage::predicate::Predicate;

use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

/// The operations a map dispatcher carries out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapOperation {
    Put,
    Get,
    GetAll,
    Delete,
    Update,
    Query,
    Replace,
    Clear,
}

impl MapOperation {
    /// `None` for operations that belong to other collection types.
    pub fn from_operation(operation: Operation) -> Option<Self> {
        match operation {
            Operation::Put => Some(MapOperation::Put),
            Operation::Get => Some(MapOperation::Get),
            Operation::GetAll => Some(MapOperation::GetAll),
            Operation::Delete => Some(MapOperation::Delete),
            Operation::Update => Some(MapOperation::Update),
            Operation::Query => Some(MapOperation::Query),
            Operation::Replace => Some(MapOperation::Replace),
            Operation::Clear => Some(MapOperation::Clear),
            Operation::Add
            | Operation::Offer
            | Operation::Peek
            | Operation::Poll
            | Operation::Increment
            | Operation::Decrement
            | Operation::Publish => None,
        }
    }
}

/// The operation and header slots of one exchange, borrowed for one dispatch.
struct OperationRequest<'a> {
    operation: Operation,
    key: Option<&'a HeaderValue>,
    value: Option<&'a HeaderValue>,
    query: Option<&'a HeaderValue>,
    body: &'a Value,
}

impl<'a> OperationRequest<'a> {
    fn from_message(operation: Operation, inbound: &'a Message) -> Self {
        Self {
            operation,
            key: inbound.headers.get(OBJECT_ID),
            value: inbound.headers.get(OBJECT_VALUE),
            query: inbound.headers.get(QUERY),
            body: &inbound.body,
        }
    }

    fn key(&self) -> Result<&'a str, FailureCause> {
        match self.key {
            Some(HeaderValue::Text(key)) => Ok(key),
            Some(other) => Err(FailureCause::HeaderShape {
                header: OBJECT_ID,
                expected: "a string",
                found: other.shape(),
            }),
            None => Err(FailureCause::MissingHeader { header: OBJECT_ID }),
        }
    }

    fn keys(&self) -> Result<&'a BTreeSet<String>, FailureCause> {
        match self.key {
            Some(HeaderValue::Keys(keys)) => Ok(keys),
            Some(other) => Err(FailureCause::HeaderShape {
                header: OBJECT_ID,
                expected: "a set of keys",
                found: other.shape(),
            }),
            None => Err(FailureCause::MissingHeader { header: OBJECT_ID }),
        }
    }

    /// A blank query means "no filter".
    fn query(&self) -> Result<Option<&'a str>, FailureCause> {
        match self.query {
            None => Ok(None),
            Some(value) if value.is_empty() => Ok(None),
            Some(HeaderValue::Text(query)) => Ok(Some(query)),
            Some(other) => Err(FailureCause::HeaderShape {
                header: QUERY,
                expected: "a string",
                found: other.shape(),
            }),
        }
    }

    /// The comparison value of a conditional replace; an empty header counts as none.
    fn comparison(&self) -> Option<Value> {
        self.value
            .filter(|value| !value.is_empty())
            .map(|value| value.clone().into_json())
    }
}

/// Dispatches exchanges against one named map.
///
/// Holds no per-exchange state, so one dispatcher serves any number of
/// concurrent `process` calls.
pub struct MapDispatcher<M: MapHandle> {
    map: M,
    propagator: Arc<dyn HeaderPropagator>,
    default_operation: Option<Operation>,
}

impl<M: MapHandle> MapDispatcher<M> {
    pub fn new(map: M, config: &DispatcherConfig) -> Self {
        Self::with_propagator(map, config, Arc::new(StripControlHeaders))
    }

    pub fn with_propagator(
        map: M,
        config: &DispatcherConfig,
        propagator: Arc<dyn HeaderPropagator>,
    ) -> Self {
        tracing::info!("Map dispatcher bound to '{}'", map.name());
        Self {
            map,
            propagator,
            default_operation: config.default_operation,
        }
    }

    pub fn map_name(&self) -> &str {
        self.map.name()
    }

    pub async fn process(&self, exchange: &mut Exchange) -> Result<(), DispatchError> {
        let operation = lookup_operation(&exchange.inbound.headers, self.default_operation)?;
        let Some(map_operation) = MapOperation::from_operation(operation) else {
            return Err(DispatchError::InvalidOperation {
                value: operation.code().to_string(),
                header: OPERATION,
            });
        };

        tracing::debug!(
            "Dispatching {} on map '{}' for exchange {}",
            operation,
            self.map.name(),
            exchange.id.0
        );

        let request = OperationRequest::from_message(operation, &exchange.inbound);
        let out_body = match self.dispatch(map_operation, &request).await {
            Ok(out_body) => out_body,
            Err(e) => {
                tracing::warn!("Exchange {} failed: {}", exchange.id.0, e);
                return Err(e);
            }
        };

        if let Some(body) = out_body {
            exchange.set_out_body(body);
        }
        self.propagator.copy_headers(exchange);
        Ok(())
    }

    /// Runs the map call(s) and returns the outbound body to write, if any.
    async fn dispatch(
        &self,
        map_operation: MapOperation,
        request: &OperationRequest<'_>,
    ) -> Result<Option<Value>, DispatchError> {
        let operation = request.operation;

        match map_operation {
            MapOperation::Put => {
                let key = request.key().map_err(|c| self.failed(operation, c))?;
                self.map
                    .put(key, request.body.clone())
                    .await
                    .map_err(|e| self.map_failure(operation, e))?;
                Ok(None)
            }
            MapOperation::Get => {
                let key = request.key().map_err(|c| self.failed(operation, c))?;
                let value = self
                    .map
                    .get(key)
                    .await
                    .map_err(|e| self.map_failure(operation, e))?;
                Ok(Some(value.unwrap_or(Value::Null)))
            }
            MapOperation::GetAll => {
                let keys = request.keys().map_err(|c| self.failed(operation, c))?;
                let entries = self
                    .map
                    .get_all(keys)
                    .await
                    .map_err(|e| self.map_failure(operation, e))?;
                Ok(Some(Value::Object(entries.into_iter().collect())))
            }
            MapOperation::Delete => {
                let key = request.key().map_err(|c| self.failed(operation, c))?;
                self.map
                    .remove(key)
                    .await
                    .map_err(|e| self.map_failure(operation, e))?;
                Ok(None)
            }
            MapOperation::Update => {
                let key = request.key().map_err(|c| self.failed(operation, c))?;
                self.update(key, request.body.clone()).await?;
                Ok(None)
            }
            MapOperation::Query => {
                let query = request.query().map_err(|c| self.failed(operation, c))?;
                let values = match query {
                    Some(query) => {
                        let predicate = Predicate::parse(query)
                            .map_err(|e| self.failed(operation, FailureCause::Predicate(e)))?;
                        self.map.values_where(&predicate).await
                    }
                    None => self.map.values().await,
                }
                .map_err(|e| self.map_failure(operation, e))?;
                Ok(Some(Value::Array(values)))
            }
            MapOperation::Replace => {
                let key = request.key().map_err(|c| self.failed(operation, c))?;
                let body = request.body.clone();
                match request.comparison() {
                    Some(expected) => {
                        let replaced = self
                            .map
                            .replace_if(key, expected, body)
                            .await
                            .map_err(|e| self.map_failure(operation, e))?;
                        tracing::debug!("Conditional replace of '{}' applied: {}", key, replaced);
                    }
                    None => {
                        self.map
                            .replace(key, body)
                            .await
                            .map_err(|e| self.map_failure(operation, e))?;
                    }
                }
                Ok(None)
            }
            MapOperation::Clear => {
                self.map
                    .clear()
                    .await
                    .map_err(|e| self.map_failure(operation, e))?;
                Ok(None)
            }
        }
    }

    /// Lock, replace, unlock. The unlock runs even when the replace fails,
    /// and the replace error wins over an unlock error.
    ///
    /// Runs under its own lock owner so concurrent updates of one key exclude
    /// each other.
    async fn update(&self, key: &str, body: Value) -> Result<(), DispatchError> {
        let map = self.map.fork();
        let lock = KeyLock::acquire(&map, key)
            .await
            .map_err(|e| self.map_failure(Operation::Update, e))?;

        let replaced = map.replace(key, body).await;
        let released = lock.release().await;

        if let (Err(_), Err(e)) = (&replaced, &released) {
            tracing::warn!(
                "Unlock of key '{}' of map '{}' failed after a failed replace: {}",
                key,
                self.map.name(),
                e
            );
        }

        replaced.map_err(|e| self.map_failure(Operation::Update, e))?;
        released.map_err(|e| self.map_failure(Operation::Update, e))?;
        Ok(())
    }

    fn failed(&self, operation: Operation, cause: FailureCause) -> DispatchError {
        DispatchError::OperationFailed {
            operation,
            map: self.map.name().to_string(),
            cause,
        }
    }

    fn map_failure(&self, operation: Operation, error: MapError) -> DispatchError {
        DispatchError::from_map(operation, self.map.name(), error)
    }
}
