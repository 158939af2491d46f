use axum::{Router, extract::Extension, routing::post};
use clap::Parser;
use grid_dispatch::config::{DispatcherConfig, NodeConfig};
use grid_dispatch::dispatch::handlers::handle_process;
use grid_dispatch::dispatch::protocol::ENDPOINT_PROCESS;
use grid_dispatch::dispatch::registry::DispatcherRegistry;
use grid_dispatch::storage::handle::MapProvider;
use grid_dispatch::storage::handlers::handle_map_command;
use grid_dispatch::storage::memory::Grid;
use grid_dispatch::storage::protocol::ENDPOINT_MAP_INTERNAL;
use grid_dispatch::storage::remote::RemoteGrid;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = NodeConfig::parse();

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .init();

    let dispatcher_config = config.dispatcher_config()?;
    if let Some(operation) = dispatcher_config.default_operation {
        tracing::info!("Default operation: {}", operation);
    }

    // 1. Map provider and routes:
    let app = match &config.grid {
        Some(grid_url) => {
            tracing::info!("Using maps of grid node {}", grid_url);
            let grid = Arc::new(RemoteGrid::new(grid_url, config.remote_config()));
            process_routes(grid, dispatcher_config)
        }
        None => {
            tracing::info!(
                "Hosting maps locally with {} partitions each",
                config.partitions
            );
            let grid = Arc::new(Grid::new(config.partitions));

            // 2. Spawn stats reporter:
            if config.stats_interval_secs > 0 {
                spawn_stats_reporter(grid.clone(), Duration::from_secs(config.stats_interval_secs));
            }

            process_routes(grid.clone(), dispatcher_config).merge(
                Router::new()
                    .route(
                        &format!("{}/:map", ENDPOINT_MAP_INTERNAL),
                        post(handle_map_command),
                    )
                    .layer(Extension(grid)),
            )
        }
    };

    // 3. Start HTTP server:
    tracing::info!("HTTP server listening on {}", config.bind);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn process_routes<P: MapProvider>(provider: Arc<P>, config: DispatcherConfig) -> Router {
    let registry = DispatcherRegistry::new(provider, config);
    Router::new()
        .route(
            &format!("{}/:map", ENDPOINT_PROCESS),
            post(handle_process::<P>),
        )
        .layer(Extension(registry))
}

fn spawn_stats_reporter(grid: Arc<Grid>, period: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);

        loop {
            interval.tick().await;
            let stats = grid.stats();
            tracing::info!("Grid stats: {} maps, {} entries", stats.maps, stats.entries);
            for name in grid.map_names() {
                let map = grid.store(&name);
                tracing::debug!(
                    "  - {} entries={} partitions={}",
                    name,
                    map.local_entry_count(),
                    map.local_partition_count()
                );
            }
        }
    });
}
