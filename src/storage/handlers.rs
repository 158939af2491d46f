use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
};
use std::sync::Arc;
use std::time::Duration;

use super::handle::{MapError, MapErrorKind, MapHandle, MapResult};
use super::memory::{Grid, GridMap};
use super::predicate::Predicate;
use super::protocol::{MapCommand, MapRequest, MapResponse};

/// Serves `POST /internal/map/:map` for remote map handles.
pub async fn handle_map_command(
    Extension(grid): Extension<Arc<Grid>>,
    Path(map_name): Path<String>,
    Json(req): Json<MapRequest>,
) -> (StatusCode, Json<MapResponse>) {
    let map = GridMap::with_owner(grid.store(&map_name), req.owner);
    let command = req.command.name();

    match apply_command(&map, req.command).await {
        Ok(response) => (StatusCode::OK, Json(response)),
        Err(e) => {
            tracing::error!("Map command '{}' on '{}' failed: {}", command, map_name, e);
            let status = match e.kind() {
                MapErrorKind::NotLockOwner | MapErrorKind::LockTimeout => StatusCode::CONFLICT,
                MapErrorKind::NullValue | MapErrorKind::Predicate => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                MapErrorKind::Unavailable | MapErrorKind::Protocol => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            (status, Json(MapResponse::from(&e)))
        }
    }
}

/// Runs one wire command against a map handle.
pub async fn apply_command<M: MapHandle>(map: &M, command: MapCommand) -> MapResult<MapResponse> {
    let response = match command {
        MapCommand::Put { key, value } => MapResponse::Value {
            value: map.put(&key, value).await?,
        },
        MapCommand::Get { key } => MapResponse::Value {
            value: map.get(&key).await?,
        },
        MapCommand::GetAll { keys } => MapResponse::Entries {
            entries: map.get_all(&keys).await?,
        },
        MapCommand::Remove { key } => MapResponse::Value {
            value: map.remove(&key).await?,
        },
        MapCommand::Replace { key, value } => MapResponse::Value {
            value: map.replace(&key, value).await?,
        },
        MapCommand::ReplaceIf {
            key,
            expected,
            value,
        } => MapResponse::Replaced {
            replaced: map.replace_if(&key, expected, value).await?,
        },
        MapCommand::Values { predicate: None } => MapResponse::Values {
            values: map.values().await?,
        },
        MapCommand::Values {
            predicate: Some(query),
        } => {
            let predicate = Predicate::parse(&query)?;
            MapResponse::Values {
                values: map.values_where(&predicate).await?,
            }
        }
        MapCommand::Clear => {
            map.clear().await?;
            MapResponse::Done
        }
        MapCommand::Lock { key, wait_ms: None } => {
            map.lock(&key).await?;
            MapResponse::Done
        }
        MapCommand::Lock {
            key,
            wait_ms: Some(wait_ms),
        } => {
            // Dropping the pending lock on timeout leaves the key untouched.
            let waited = tokio::time::timeout(Duration::from_millis(wait_ms), map.lock(&key)).await;
            match waited {
                Ok(locked) => locked?,
                Err(_) => {
                    return Err(MapError::LockTimeout {
                        map: map.name().to_string(),
                        key,
                        waited_ms: wait_ms,
                    });
                }
            }
            MapResponse::Done
        }
        MapCommand::Unlock { key } => {
            map.unlock(&key).await?;
            MapResponse::Done
        }
    };

    Ok(response)
}
