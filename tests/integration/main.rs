//! chunkmesh integration test harness.
//!
//! Every test runs on loopback: real listeners with real chunk stores, and
//! an in-process tracker served by axum. Nothing needs to be running first.
//!
//!   cargo test --test integration
//!
//! Each test owns its nodes and temp directories and cleans them up.

mod swarm;
mod tracker;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use chunkmesh_core::config::MeshConfig;
use chunkmesh_core::{FileDescriptor, FileSummary, PeerLocation, PublishReceipt};
use chunkmesh_services::dispatch::ServeSettings;
use chunkmesh_services::{ChunkStore, ListenerHandle, PeerClient, PeerListener};

// ── Temp dirs ─────────────────────────────────────────────────────────────────

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Fresh, empty directory unique to this process and call.
pub fn temp_dir(label: &str) -> PathBuf {
    let id = COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir()
        .join(format!("chunkmesh-it-{label}-{}-{}", std::process::id(), id));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Deterministic file contents that are not a repeating single byte.
pub fn sample_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 7) % 256) as u8).collect()
}

// ── Nodes ─────────────────────────────────────────────────────────────────────

pub fn serve_settings() -> ServeSettings {
    ServeSettings {
        io_timeout: Duration::from_secs(5),
        verify_on_receive: true,
        max_chunk_bytes: 1 << 20,
        max_concurrency: 4,
        drain_timeout: Duration::from_secs(2),
    }
}

/// One listening peer with its own store.
pub struct Node {
    pub handle: ListenerHandle,
    pub store: ChunkStore,
}

impl Node {
    pub async fn spawn() -> Node {
        Self::spawn_with(serve_settings()).await
    }

    pub async fn spawn_with(settings: ServeSettings) -> Node {
        let store = ChunkStore::new(temp_dir("node")).unwrap();
        let handle = PeerListener::start("127.0.0.1:0".parse().unwrap(), settings, store.clone())
            .await
            .unwrap();
        Node { handle, store }
    }

    pub fn addr(&self) -> SocketAddr {
        self.handle.local_addr()
    }

    pub fn location(&self) -> PeerLocation {
        PeerLocation::from(self.addr())
    }

    pub async fn stop(self) {
        self.handle.stop().await;
        let _ = std::fs::remove_dir_all(self.store.root());
    }
}

/// A loopback address nothing listens on.
pub async fn dead_peer() -> PeerLocation {
    let l = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    PeerLocation::from(l.local_addr().unwrap())
}

pub fn peer_client() -> PeerClient {
    PeerClient::new(Duration::from_secs(1), Duration::from_secs(5), true)
}

/// Small chunks and short timeouts, storage under a temp dir.
pub fn test_config(tracker_url: &str) -> MeshConfig {
    let root = temp_dir("config");
    let mut config = MeshConfig::default();
    config.tracker.url = tracker_url.to_string();
    config.tracker.timeout_ms = 5_000;
    config.network.connect_timeout_ms = 1_000;
    config.network.io_timeout_ms = 5_000;
    config.transfer.chunk_size = 4096;
    config.transfer.max_concurrency = 3;
    config.storage.chunk_dir = root.join("chunks");
    config.storage.download_dir = root.join("downloads");
    config.storage.staging_dir = root.join("staging");
    config.validate().unwrap();
    config
}

// ── Mock tracker ──────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct TrackerState {
    pub peers: Vec<PeerLocation>,
    pub files: Vec<FileDescriptor>,
}

pub type SharedTracker = Arc<Mutex<TrackerState>>;

pub struct MockTracker {
    pub url: String,
    pub state: SharedTracker,
    task: tokio::task::JoinHandle<()>,
}

impl MockTracker {
    pub async fn start() -> Result<MockTracker> {
        let state: SharedTracker = Arc::default();
        let app = Router::new()
            .route("/peers", get(list_peers))
            .route("/peers/add", post(add_peer))
            .route("/peers/remove", post(remove_peer))
            .route("/files", get(list_files))
            .route("/files/upload_file", post(upload_file))
            .route("/files/download_file/{id}", get(download_file))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("http://{}", listener.local_addr()?);
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(MockTracker { url, state, task })
    }

    pub fn register(&self, peer: PeerLocation) {
        self.state.lock().unwrap().peers.push(peer);
    }

    pub fn file_count(&self) -> usize {
        self.state.lock().unwrap().files.len()
    }
}

impl Drop for MockTracker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn list_peers(State(state): State<SharedTracker>) -> Json<Vec<PeerLocation>> {
    Json(state.lock().unwrap().peers.clone())
}

async fn add_peer(
    State(state): State<SharedTracker>,
    Json(peer): Json<PeerLocation>,
) -> (StatusCode, Json<Value>) {
    let mut s = state.lock().unwrap();
    if s.peers.contains(&peer) {
        return (
            StatusCode::CONFLICT,
            Json(json!({"status": "error", "message": format!("Peer {peer} already exists.")})),
        );
    }
    s.peers.push(peer);
    (
        StatusCode::OK,
        Json(json!({"status": "success", "message": format!("Peer {peer} added.")})),
    )
}

async fn remove_peer(
    State(state): State<SharedTracker>,
    Json(peer): Json<PeerLocation>,
) -> (StatusCode, Json<Value>) {
    let mut s = state.lock().unwrap();
    let before = s.peers.len();
    s.peers.retain(|p| *p != peer);
    if s.peers.len() == before {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"status": "error", "message": format!("Peer {peer} not found.")})),
        );
    }
    (
        StatusCode::OK,
        Json(json!({"status": "success", "message": format!("Peer {peer} removed.")})),
    )
}

async fn list_files(State(state): State<SharedTracker>) -> Json<Vec<FileSummary>> {
    let s = state.lock().unwrap();
    Json(
        s.files
            .iter()
            .map(|f| FileSummary {
                file_id: f.id.unwrap_or_default(),
                file_name: f.name.clone(),
                file_hash: f.hash.to_hex(),
                file_size: f.size,
                file_enc: f.encrypted,
            })
            .collect(),
    )
}

async fn upload_file(
    State(state): State<SharedTracker>,
    Json(mut file): Json<FileDescriptor>,
) -> Json<PublishReceipt> {
    let mut s = state.lock().unwrap();
    let file_id = s.files.len() as u64 + 1;
    file.id = Some(file_id);
    for (i, chunk) in file.chunks.iter_mut().enumerate() {
        chunk.id = Some(file_id * 1000 + i as u64);
    }
    let receipt = PublishReceipt {
        file_id,
        file_name: file.name.clone(),
        file_hash: file.hash.to_hex(),
        message: "File uploaded successfully".into(),
    };
    s.files.push(file);
    Json(receipt)
}

async fn download_file(
    State(state): State<SharedTracker>,
    Path(id): Path<u64>,
) -> Result<Json<FileDescriptor>, (StatusCode, String)> {
    state
        .lock()
        .unwrap()
        .files
        .iter()
        .find(|f| f.id == Some(id))
        .cloned()
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, format!("File {id} not found")))
}
