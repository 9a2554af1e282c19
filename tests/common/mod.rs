// tests/common/mod.rs
// Shared scaffolding: a local HTTP server standing in for the upstream
// platforms, plus builders for the fixtures the tests keep reaching for.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Mutex;

use axum::Router;
use tokio::net::TcpListener;
use uuid::Uuid;

use dayroll_ingest::content::SourceKind;
use dayroll_ingest::subscription::{RouteBucket, Subscription};
use dayroll_ingest::types::{CycleObserver, IngestResult};

/// Bind an ephemeral port first so handlers can embed their own base URL.
pub async fn bind() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    (listener, addr)
}

pub fn spawn(listener: TcpListener, app: Router) {
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server");
    });
}

/// Bind-and-serve in one go for handlers that do not need their address.
pub async fn spawn_server(app: Router) -> SocketAddr {
    let (listener, addr) = bind().await;
    spawn(listener, app);
    addr
}

pub fn subscription(kind: SourceKind, source_id: &str) -> Subscription {
    Subscription {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        source_kind: kind,
        source_id: source_id.to_string(),
        source_name: Some("Test Source".to_string()),
        metadata: None,
        is_active: true,
    }
}

/// Observer that records everything it sees, for assertions.
#[derive(Default)]
pub struct RecordingObserver {
    pub results: Mutex<Vec<(RouteBucket, IngestResult)>>,
    pub cycle_errors: Mutex<Vec<String>>,
}

impl CycleObserver for RecordingObserver {
    fn on_result(&self, bucket: RouteBucket, result: &IngestResult) {
        self.results.lock().unwrap().push((bucket, result.clone()));
    }

    fn on_cycle_error(&self, error: &anyhow::Error) {
        self.cycle_errors.lock().unwrap().push(error.to_string());
    }
}
