use super::error::ErrorKind;
use super::protocol::{ErrorBody, ProcessRequest, ProcessResponse};
use super::registry::DispatcherRegistry;
use crate::exchange::types::{Exchange, Headers};
use crate::storage::handle::MapProvider;

use axum::{Extension, Json, extract::Path, http::StatusCode};
use std::sync::Arc;

/// Serves `POST /process/:map`: one exchange, one map operation.
pub async fn handle_process<P: MapProvider>(
    Extension(registry): Extension<Arc<DispatcherRegistry<P>>>,
    Path(map_name): Path<String>,
    Json(req): Json<ProcessRequest>,
) -> (StatusCode, Json<ProcessResponse>) {
    let dispatcher = registry.dispatcher_for(&map_name);
    let mut exchange = Exchange::new(req.headers, req.body);

    match dispatcher.process(&mut exchange).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ProcessResponse {
                exchange_id: exchange.id,
                headers: exchange.outbound.headers,
                body: exchange.outbound.body,
                error: None,
            }),
        ),
        Err(e) => {
            tracing::error!("Failed to process exchange on map '{}': {}", map_name, e);
            let kind = e.kind();
            let status = match kind {
                ErrorKind::InvalidOperation => StatusCode::BAD_REQUEST,
                ErrorKind::OperationFailed => StatusCode::UNPROCESSABLE_ENTITY,
                ErrorKind::TransportFailure => StatusCode::SERVICE_UNAVAILABLE,
            };
            (
                status,
                Json(ProcessResponse {
                    exchange_id: exchange.id,
                    headers: Headers::new(),
                    body: None,
                    error: Some(ErrorBody {
                        kind,
                        message: e.to_string(),
                    }),
                }),
            )
        }
    }
}
