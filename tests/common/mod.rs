//! Shared fixtures for integration tests
//!
//! Provides an in-process hub server and a manager wired to temp directories.

#![allow(dead_code)]

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use model_host::{
    Manifest, ManifestEntry, ModelManager,
    engine::{EchoLoader, EngineLoader},
    manifest::{HubSource, ModelSource},
    models::{Downloader, HubClient},
};
use futures::StreamExt;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// How [`MockHub`] answers a file request
#[derive(Clone, Copy)]
pub enum MockBody {
    Bytes(&'static [u8]),
    /// 500 Internal Server Error
    Broken,
    /// Sends the first bytes, then never finishes the body
    Stalled(&'static [u8]),
}

#[derive(Clone)]
pub struct MockFile {
    pub name: &'static str,
    pub body: MockBody,
}

pub fn file(name: &'static str, body: &'static [u8]) -> MockFile {
    MockFile {
        name,
        body: MockBody::Bytes(body),
    }
}

pub fn broken_file(name: &'static str) -> MockFile {
    MockFile {
        name,
        body: MockBody::Broken,
    }
}

pub fn stalled_file(name: &'static str, head: &'static [u8]) -> MockFile {
    MockFile {
        name,
        body: MockBody::Stalled(head),
    }
}

#[derive(Clone, Default)]
struct HubState {
    repos: Arc<HashMap<String, Vec<MockFile>>>,
    fetched: Arc<Mutex<Vec<String>>>,
    tokens: Arc<Mutex<Vec<Option<String>>>>,
}

/// Hub stand-in listening on an ephemeral local port
pub struct MockHub {
    pub endpoint: String,
    state: HubState,
}

impl MockHub {
    /// Files requested so far, as `<repo>/<file>`
    pub fn fetched(&self) -> Vec<String> {
        let mut fetched = self.state.fetched.lock().unwrap().clone();
        fetched.sort();
        fetched
    }

    /// Authorization headers seen on every request
    pub fn tokens(&self) -> Vec<Option<String>> {
        self.state.tokens.lock().unwrap().clone()
    }
}

fn record_token(state: &HubState, headers: &HeaderMap) {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.tokens.lock().unwrap().push(token);
}

async fn list_repo(
    State(state): State<HubState>,
    Path((org, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    record_token(&state, &headers);
    let repo = format!("{}/{}", org, name);
    match state.repos.get(&repo) {
        Some(files) => {
            let siblings: Vec<_> = files
                .iter()
                .map(|f| json!({ "rfilename": f.name }))
                .collect();
            Json(json!({ "id": repo, "siblings": siblings })).into_response()
        }
        None => (StatusCode::NOT_FOUND, "Repository not found").into_response(),
    }
}

async fn resolve_file(
    State(state): State<HubState>,
    Path((org, name, path)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Response {
    record_token(&state, &headers);
    let repo = format!("{}/{}", org, name);
    state
        .fetched
        .lock()
        .unwrap()
        .push(format!("{}/{}", repo, path));

    let body = state
        .repos
        .get(&repo)
        .and_then(|files| files.iter().find(|f| f.name == path))
        .map(|f| f.body);

    match body {
        Some(MockBody::Bytes(bytes)) => bytes.into_response(),
        Some(MockBody::Broken) => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
        Some(MockBody::Stalled(head)) => {
            let chunks = futures::stream::once(async move {
                Ok::<_, std::io::Error>(axum::body::Bytes::from_static(head))
            })
            .chain(futures::stream::pending());
            Body::from_stream(chunks).into_response()
        }
        None => (StatusCode::NOT_FOUND, "Entry not found").into_response(),
    }
}

/// Start a hub serving the given repositories
pub async fn spawn_hub(repos: Vec<(&str, Vec<MockFile>)>) -> MockHub {
    let state = HubState {
        repos: Arc::new(
            repos
                .into_iter()
                .map(|(repo, files)| (repo.to_string(), files))
                .collect(),
        ),
        ..Default::default()
    };

    let app = Router::new()
        .route("/api/models/{org}/{name}", get(list_repo))
        .route("/{org}/{name}/resolve/main/{*path}", get(resolve_file))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind mock hub");
    let addr = listener.local_addr().expect("Failed to read mock hub address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Mock hub failed");
    });

    MockHub {
        endpoint: format!("http://{}", addr),
        state,
    }
}

pub fn hub_entry(model_id: &str, repo: &str, include_filter: &str) -> ManifestEntry {
    ManifestEntry {
        model_id: model_id.to_string(),
        source: ModelSource::RemoteHub(HubSource {
            repo: repo.to_string(),
            include_filter: include_filter.to_string(),
        }),
    }
}

pub fn local_entry(model_id: &str, path: &std::path::Path) -> ManifestEntry {
    ManifestEntry {
        model_id: model_id.to_string(),
        source: ModelSource::LocalPath(path.to_path_buf()),
    }
}

/// A local model source directory holding a single weights file
pub fn local_source() -> TempDir {
    let dir = TempDir::new().expect("Failed to create source dir");
    std::fs::write(dir.path().join("model.onnx"), b"weights").unwrap();
    std::fs::write(dir.path().join("tokenizer.json"), b"{}").unwrap();
    dir
}

/// Manager over a fresh models directory
pub fn manager(
    entries: Vec<ManifestEntry>,
    hub_endpoint: &str,
    loader: Arc<dyn EngineLoader>,
) -> (ModelManager, TempDir) {
    let hub = HubClient::new(hub_endpoint, Some("test-token".to_string())).unwrap();
    manager_with_hub(entries, hub, loader)
}

/// Manager over a fresh models directory using a preconfigured hub client
pub fn manager_with_hub(
    entries: Vec<ManifestEntry>,
    hub: HubClient,
    loader: Arc<dyn EngineLoader>,
) -> (ModelManager, TempDir) {
    let root = TempDir::new().expect("Failed to create models dir");
    let manager = ModelManager::new(
        Manifest::from_entries(entries),
        root.path().to_path_buf(),
        Downloader::new(hub),
        loader,
    );
    (manager, root)
}

pub fn echo_loader() -> Arc<dyn EngineLoader> {
    Arc::new(EchoLoader::new())
}
