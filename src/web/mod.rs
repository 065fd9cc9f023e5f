//! Web layer
//!
//! HTTP interface for the job monitor: the public ping endpoints addressed
//! by a job's token, and the management API for jobs, channels and
//! subscriptions. Handlers are thin wrappers over [`MonitorService`] and
//! [`SweeperService`]; errors are mapped to status codes at the boundary.

use anyhow::Result;
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{config::Config, database::Database, services::MonitorService, sweeper::SweeperService};

pub mod api;

#[derive(Clone)]
pub struct AppState {
    pub database: Database,
    pub monitor: MonitorService,
    pub sweeper: SweeperService,
}

/// Web server configuration and setup
pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub async fn new(config: Config, database: Database, sweeper: SweeperService) -> Result<Self> {
        let monitor = MonitorService::new(database.clone());
        let app = build_router(AppState {
            database,
            monitor,
            sweeper,
        });

        let addr: SocketAddr = format!("{}:{}", config.web.host, config.web.port).parse()?;

        Ok(Self { app, addr })
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub async fn serve(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, self.app).await?;
        Ok(())
    }
}

/// Create the router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health check (no auth, used by load balancers)
        .route("/health", get(api::health))
        // Public ping endpoints, addressed by the job's token
        .route("/ping/:public_id/start", post(api::ping_start))
        .route("/ping/:public_id/end", post(api::ping_end))
        // Management API
        .nest("/api/v1", api_v1_routes())
        // Middleware (applied in reverse order)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/jobs", get(api::list_jobs).post(api::create_job))
        .route(
            "/jobs/:id",
            get(api::get_job).put(api::update_job).delete(api::delete_job),
        )
        .route("/jobs/:id/force-run", post(api::force_run))
        .route("/jobs/:id/force-active", post(api::force_active))
        .route(
            "/jobs/:id/subscriptions/:channel_id",
            post(api::subscribe).delete(api::unsubscribe),
        )
        .route("/channels", get(api::list_channels).post(api::create_channel))
        .route("/channels/:id", delete(api::delete_channel))
        .route("/sweep", post(api::run_sweep))
}
