use anyhow::{Context, Result};
use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::extract::State;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::api::graphql::{self, SwitchboardSchema};
use crate::api::rest::{self, AppState};
use crate::config::Config;
use crate::domain::device_store::DeviceStore;
use crate::domain::registry::RegistryController;
use crate::monitor::HealthMonitor;
use crate::remote::RemoteActionClient;

pub async fn run(config: Config) -> Result<()> {
    crate::logging::init_daemon(&config.daemon.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "switchboard daemon starting");

    let store = Arc::new(DeviceStore::new(config.registry.file.clone()));
    let actions = RemoteActionClient::winrm(&config.winrm, config.wake.clone())
        .context("building remote action client")?;
    let registry = Arc::new(RegistryController::new(store.clone(), actions));

    // A broken registry file is reported but the daemon still serves.
    match registry.load().await {
        Ok(count) => info!(
            devices = count,
            path = %store.path().display(),
            "registry loaded"
        ),
        Err(e) => error!(error = %e, "registry could not be loaded, starting empty"),
    }

    // Sweeps run for the life of the process; the handle is never joined.
    if config.monitor.enabled {
        HealthMonitor::from_config(&config.monitor, store, registry.event_sender()).spawn();
    } else {
        warn!("health monitor disabled, device status stays unknown");
    }

    let schema = graphql::build_schema(registry.clone());

    let graphql_router = Router::new()
        .route("/graphql", get(graphql_playground).post(graphql_handler))
        .with_state(schema);

    let app = rest::router(AppState { registry })
        .merge(graphql_router)
        .layer(TraceLayer::new_for_http());

    let http_addr = &config.daemon.http_addr;
    let listener = TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("binding to {}", http_addr))?;

    info!(addr = %http_addr, "HTTP server listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("switchboard daemon stopped");
    Ok(())
}

async fn graphql_playground() -> Html<String> {
    Html(async_graphql::http::playground_source(
        async_graphql::http::GraphQLPlaygroundConfig::new("/graphql"),
    ))
}

async fn graphql_handler(
    State(schema): State<SwitchboardSchema>,
    req: GraphQLRequest,
) -> GraphQLResponse {
    schema.execute(req.into_inner()).await.into()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("Received Ctrl+C, shutting down"); },
        _ = terminate => { info!("Received SIGTERM, shutting down"); },
    }
}
