pub mod config;
pub mod handlers;
pub mod idempotency;
pub mod metrics;
pub mod middleware;
pub mod observability;
pub mod problem;
pub mod server;

pub use config::{AppConfig, IdempotencySettings, LoggingConfig, ServerConfig};
pub use idempotency::{IdempotencyEngine, IdempotencyOptions, idempotency_middleware};
pub use observability::init_tracing;
pub use problem::{ApiError, Problem};
pub use server::{AppState, ReplaygateServer, ServerBuilder, build_app, build_app_with_state};
