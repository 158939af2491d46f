//! Remote Grid Client
//!
//! Map handles that route every call over HTTP to a grid node hosting the maps.
//!
//! ## Failure handling
//! - A request that never reached the node (connection refused, DNS) is retried with
//!   exponential backoff and jitter.
//! - Once a request may have reached the node it is never retried, since commands such
//!   as `lock` are not idempotent.
//! - Network failures surface as `MapError::Unavailable`; failures reported by the node
//!   surface as `MapError::Remote` with the node's classification.

use super::handle::{MapError, MapHandle, MapProvider, MapResult};
use super::memory::OwnerId;
use super::predicate::Predicate;
use super::protocol::{ENDPOINT_MAP_INTERNAL, MapCommand, MapRequest, MapResponse};

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Per-request timeout for commands that never wait on a key lock.
    pub timeout: Duration,
    /// Budget for commands the node may hold until a foreign key lock is released.
    pub lock_timeout: Duration,
    /// Connection attempts per request.
    pub attempts: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(500),
            lock_timeout: Duration::from_secs(30),
            attempts: 3,
        }
    }
}

impl RemoteConfig {
    /// How long the node may wait for a foreign key lock. It stays below
    /// `lock_timeout` so the node gives up before the client does.
    pub fn lock_wait(&self) -> Duration {
        self.lock_timeout
            .saturating_sub(self.timeout)
            .max(self.lock_timeout / 2)
    }
}

/// Provider of handles to the maps of one remote grid node.
pub struct RemoteGrid {
    base_url: String,
    http_client: reqwest::Client,
    config: RemoteConfig,
}

impl RemoteGrid {
    /// `base_url` is the node's HTTP root, e.g. `http://127.0.0.1:5701`.
    pub fn new(base_url: &str, config: RemoteConfig) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client: reqwest::Client::new(),
            config,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl MapProvider for RemoteGrid {
    type Map = RemoteMap;

    fn get_map(&self, name: &str) -> RemoteMap {
        RemoteMap {
            name: name.to_string(),
            url: format!("{}{}/{}", self.base_url, ENDPOINT_MAP_INTERNAL, name),
            http_client: self.http_client.clone(),
            config: self.config.clone(),
            owner: OwnerId::new(),
        }
    }
}

#[derive(Clone)]
pub struct RemoteMap {
    name: String,
    url: String,
    http_client: reqwest::Client,
    config: RemoteConfig,
    owner: OwnerId,
}

impl RemoteMap {
    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    async fn post_with_retry(
        &self,
        payload: &MapRequest,
        timeout: Duration,
    ) -> MapResult<reqwest::Response> {
        let attempts = self.config.attempts.max(1);
        let mut delay_ms = 150u64;

        for attempt in 0..attempts {
            let response = self
                .http_client
                .post(&self.url)
                .json(payload)
                .timeout(timeout)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if !e.is_connect() || attempt + 1 == attempts {
                        return Err(MapError::Unavailable(e.to_string()));
                    }
                    tracing::debug!(
                        "Connecting to {} failed (attempt {}/{}): {}",
                        self.url,
                        attempt + 1,
                        attempts,
                        e
                    );
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(MapError::Unavailable("Retry attempts exhausted".to_string()))
    }

    async fn call(&self, command: MapCommand) -> MapResult<MapResponse> {
        let timeout = if command.may_wait() {
            self.config.lock_timeout
        } else {
            self.config.timeout
        };
        let name = command.name();
        let request = MapRequest {
            owner: self.owner.clone(),
            command,
        };

        let response = self.post_with_retry(&request, timeout).await?;
        let status = response.status();
        let body: MapResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                MapError::Unavailable(e.to_string())
            } else {
                MapError::Protocol(format!("'{}' answered {}: {}", name, status, e))
            }
        })?;

        match body {
            MapResponse::Failed { kind, message } => Err(MapError::Remote { kind, message }),
            other => Ok(other),
        }
    }
}

fn unexpected(command: &str, response: &MapResponse) -> MapError {
    MapError::Protocol(format!("unexpected answer to '{}': {:?}", command, response))
}

fn into_value(response: MapResponse) -> MapResult<Option<Value>> {
    match response {
        MapResponse::Value { value } => Ok(value),
        other => Err(unexpected("value", &other)),
    }
}

fn into_values(response: MapResponse) -> MapResult<Vec<Value>> {
    match response {
        MapResponse::Values { values } => Ok(values),
        other => Err(unexpected("values", &other)),
    }
}

fn into_done(response: MapResponse) -> MapResult<()> {
    match response {
        MapResponse::Done => Ok(()),
        other => Err(unexpected("done", &other)),
    }
}

impl MapHandle for RemoteMap {
    fn name(&self) -> &str {
        &self.name
    }

    fn fork(&self) -> Self {
        Self {
            owner: OwnerId::new(),
            ..self.clone()
        }
    }

    async fn put(&self, key: &str, value: Value) -> MapResult<Option<Value>> {
        let command = MapCommand::Put {
            key: key.to_string(),
            value,
        };
        into_value(self.call(command).await?)
    }

    async fn get(&self, key: &str) -> MapResult<Option<Value>> {
        let command = MapCommand::Get {
            key: key.to_string(),
        };
        into_value(self.call(command).await?)
    }

    async fn get_all(&self, keys: &BTreeSet<String>) -> MapResult<BTreeMap<String, Value>> {
        let command = MapCommand::GetAll { keys: keys.clone() };
        match self.call(command).await? {
            MapResponse::Entries { entries } => Ok(entries),
            other => Err(unexpected("get_all", &other)),
        }
    }

    async fn remove(&self, key: &str) -> MapResult<Option<Value>> {
        let command = MapCommand::Remove {
            key: key.to_string(),
        };
        into_value(self.call(command).await?)
    }

    async fn replace(&self, key: &str, value: Value) -> MapResult<Option<Value>> {
        let command = MapCommand::Replace {
            key: key.to_string(),
            value,
        };
        into_value(self.call(command).await?)
    }

    async fn replace_if(&self, key: &str, expected: Value, value: Value) -> MapResult<bool> {
        let command = MapCommand::ReplaceIf {
            key: key.to_string(),
            expected,
            value,
        };
        match self.call(command).await? {
            MapResponse::Replaced { replaced } => Ok(replaced),
            other => Err(unexpected("replace_if", &other)),
        }
    }

    async fn values(&self) -> MapResult<Vec<Value>> {
        into_values(self.call(MapCommand::Values { predicate: None }).await?)
    }

    async fn values_where(&self, predicate: &Predicate) -> MapResult<Vec<Value>> {
        let command = MapCommand::Values {
            predicate: Some(predicate.as_str().to_string()),
        };
        into_values(self.call(command).await?)
    }

    async fn clear(&self) -> MapResult<()> {
        into_done(self.call(MapCommand::Clear).await?)
    }

    async fn lock(&self, key: &str) -> MapResult<()> {
        let command = MapCommand::Lock {
            key: key.to_string(),
            wait_ms: Some(self.config.lock_wait().as_millis() as u64),
        };
        into_done(self.call(command).await?)
    }

    async fn unlock(&self, key: &str) -> MapResult<()> {
        let command = MapCommand::Unlock {
            key: key.to_string(),
        };
        into_done(self.call(command).await?)
    }
}
