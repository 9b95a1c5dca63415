use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::get,
};
use replaygate_storage::{DynRepository, InMemoryTodoRepository};
use tower_http::{
    catch_panic::CatchPanicLayer, compression::CompressionLayer, cors::CorsLayer,
    trace::TraceLayer,
};

use crate::{
    config::AppConfig,
    handlers,
    idempotency::{IdempotencyEngine, idempotency_middleware},
    middleware as app_middleware,
};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub repo: DynRepository,
    pub engine: Arc<IdempotencyEngine>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Fresh in-memory repository and idempotency engine for `cfg`.
    pub fn from_config(cfg: &AppConfig) -> Result<Self, String> {
        let options = cfg.idempotency.to_options()?;
        Ok(Self {
            repo: Arc::new(InMemoryTodoRepository::new()),
            engine: Arc::new(IdempotencyEngine::new(options)),
            config: Arc::new(cfg.clone()),
        })
    }
}

pub struct ReplaygateServer {
    addr: SocketAddr,
    app: Router,
    state: AppState,
}

pub fn build_app(cfg: &AppConfig) -> Result<Router, String> {
    let state = AppState::from_config(cfg)?;
    Ok(build_app_with_state(state))
}

pub fn build_app_with_state(state: AppState) -> Router {
    crate::metrics::init_metrics();

    let cfg = state.config.clone();
    let engine = state.engine.clone();

    let api = Router::new()
        .route(
            handlers::TODOS_PATH,
            get(handlers::list_todos).post(handlers::create_todo),
        )
        .route(
            &format!("{}/{{id}}", handlers::TODOS_PATH),
            get(handlers::get_todo)
                .put(handlers::update_todo)
                .delete(handlers::delete_todo),
        );

    let router = Router::new()
        // Health and info endpoints
        .route("/", get(handlers::root))
        .route("/health/live", get(handlers::health_live))
        .route("/health/ready", get(handlers::health_ready))
        .route("/metrics", get(handlers::metrics))
        .merge(api)
        .with_state(state);

    let router = if cfg.idempotency.enabled {
        router.layer(middleware::from_fn_with_state(engine, idempotency_middleware))
    } else {
        tracing::info!("idempotency middleware disabled");
        router
    };

    // Each `.layer` wraps everything above it, so requests enter at the bottom:
    // body limit -> request id -> trace -> metrics -> cors -> compression
    // -> panic -> deadline -> json only -> idempotency -> routes
    router
        .layer(middleware::from_fn(app_middleware::json_only))
        .layer(middleware::from_fn_with_state(
            cfg.request_timeout(),
            app_middleware::request_deadline,
        ))
        .layer(CatchPanicLayer::custom(app_middleware::handle_panic))
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(app_middleware::http_metrics))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    let req_id = req
                        .extensions()
                        .get::<app_middleware::RequestId>()
                        .map(|id| id.as_str().to_owned())
                        .unwrap_or_default();
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(middleware::from_fn(app_middleware::request_id))
        .layer(axum::extract::DefaultBodyLimit::max(cfg.server.body_limit_bytes))
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    pub fn build(self) -> Result<ReplaygateServer, String> {
        let state = AppState::from_config(&self.config)?;
        let app = build_app_with_state(state.clone());

        Ok(ReplaygateServer {
            addr: self.addr,
            app,
            state,
        })
    }
}

impl ReplaygateServer {
    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        self.serve(listener).await
    }

    /// Serves on an already-bound listener until ctrl-c.
    pub async fn serve(self, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
        let sweeper = self
            .state
            .config
            .idempotency
            .sweep_interval()
            .map(|interval| {
                tracing::info!(interval_secs = interval.as_secs(), "idempotency sweeper enabled");
                self.state.engine.spawn_sweeper(interval)
            });

        tracing::info!("listening on {}", listener.local_addr()?);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        if let Some(handle) = sweeper {
            handle.abort();
        }
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
