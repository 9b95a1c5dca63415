#![allow(dead_code)]

use replaygate_server::{AppConfig, build_app};
use tokio::task::JoinHandle;

pub const TODOS: &str = "/api/v1/todos";
pub const TOKEN: &str = "3fa85f64-5717-4562-b3fc-2c963f66afa6";

pub struct TestServer {
    pub base: String,
    shutdown: tokio::sync::oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.handle.await;
    }
}

pub async fn start_server() -> TestServer {
    start_server_with(AppConfig::default()).await
}

pub async fn start_server_with(cfg: AppConfig) -> TestServer {
    let app = build_app(&cfg).expect("build app");

    // Bind to an ephemeral port
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await;
    });

    TestServer {
        base: format!("http://{addr}"),
        shutdown: tx,
        handle,
    }
}
