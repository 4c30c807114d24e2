//! Router tests driven through `tower::ServiceExt::oneshot`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::oneshot;
use tower::ServiceExt;

use beatcast_api::shutdown::drain_jobs_on;
use beatcast_api::{create_router, ApiConfig, AppState};
use beatcast_controller::{
    ControllerConfig, ControllerResult, JobController, LogHub, WorkerHandle, WorkerLauncher,
};
use beatcast_media::{MediaResult, PostProcessor, TranscodeRequest, Transcoder};
use beatcast_models::{ErrorKind, LaunchUrl, Phase, ProgressEvent, RawArtifact, WorkerPhase, WorkerStatus};
use beatcast_storage::ArtifactStore;

struct CopyTranscoder;

#[async_trait]
impl Transcoder for CopyTranscoder {
    async fn transcode(&self, request: &TranscodeRequest) -> MediaResult<()> {
        tokio::fs::copy(&request.input, &request.output).await?;
        Ok(())
    }
}

/// Worker that reports one recording tick and then finishes.
struct QuickLauncher;

struct QuickWorker {
    polls: usize,
}

#[async_trait]
impl WorkerLauncher for QuickLauncher {
    async fn launch(&self, _url: &LaunchUrl) -> ControllerResult<Box<dyn WorkerHandle>> {
        Ok(Box::new(QuickWorker { polls: 0 }))
    }
}

#[async_trait]
impl WorkerHandle for QuickWorker {
    async fn query(&mut self) -> ControllerResult<WorkerStatus> {
        self.polls += 1;
        Ok(if self.polls < 2 {
            WorkerStatus {
                phase: WorkerPhase::Playing,
                progress: 0.5,
                ..Default::default()
            }
        } else {
            WorkerStatus {
                phase: WorkerPhase::Finished,
                done: true,
                progress: 1.0,
                artifact_mime: Some("video/mp4".to_string()),
                artifact_size: Some(64),
                ..Default::default()
            }
        })
    }

    async fn fetch_artifact(&mut self) -> ControllerResult<RawArtifact> {
        Ok(RawArtifact::new(vec![5; 64], "video/mp4"))
    }

    async fn terminate(&mut self) {}
}

/// Worker that keeps playing until it is terminated.
struct EndlessLauncher {
    terminated: Arc<AtomicUsize>,
}

struct EndlessWorker {
    terminated: Arc<AtomicUsize>,
}

#[async_trait]
impl WorkerLauncher for EndlessLauncher {
    async fn launch(&self, _url: &LaunchUrl) -> ControllerResult<Box<dyn WorkerHandle>> {
        Ok(Box::new(EndlessWorker {
            terminated: self.terminated.clone(),
        }))
    }
}

#[async_trait]
impl WorkerHandle for EndlessWorker {
    async fn query(&mut self) -> ControllerResult<WorkerStatus> {
        Ok(WorkerStatus {
            phase: WorkerPhase::Playing,
            progress: 0.25,
            ..Default::default()
        })
    }

    async fn fetch_artifact(&mut self) -> ControllerResult<RawArtifact> {
        Ok(RawArtifact::new(Vec::new(), "video/webm"))
    }

    async fn terminate(&mut self) {
        self.terminated.fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness {
    _dir: TempDir,
    store: Arc<ArtifactStore>,
    controller: Arc<JobController>,
    app: Router,
}

fn harness() -> Harness {
    harness_with(Arc::new(QuickLauncher))
}

fn harness_with(launcher: Arc<dyn WorkerLauncher>) -> Harness {
    let dir = TempDir::new().unwrap();
    let config = ControllerConfig {
        poll_interval: Duration::from_millis(10),
        completion_timeout: Duration::from_secs(10),
        work_dir: dir.path().join("work"),
        export_dir: dir.path().join("exports"),
        ..Default::default()
    };
    let store = Arc::new(ArtifactStore::new(&config.export_dir, "/exports"));
    let post = PostProcessor::new(store.clone(), Arc::new(CopyTranscoder))
        .with_temp_dir(dir.path().join("tmp"));
    let controller = Arc::new(JobController::new(config, launcher, post));

    let state = AppState::new(ApiConfig::default(), controller.clone(), LogHub::new(16));
    Harness {
        _dir: dir,
        store,
        controller,
        app: create_router(state, None),
    }
}

async fn body_bytes(body: Body) -> Vec<u8> {
    to_bytes(body, usize::MAX).await.unwrap().to_vec()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, json: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_reports_idle_controller() {
    let h = harness();
    let response = h.app.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    assert!(response.headers().contains_key("x-request-id"));

    let json: serde_json::Value = serde_json::from_slice(&body_bytes(response.into_body()).await).unwrap();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["liveWorkers"], 0);
    assert!(json.get("activeJob").is_none());
}

#[tokio::test]
async fn exports_are_listed_and_downloadable() {
    let h = harness();
    h.store.persist_bytes("beatcast_a.mp4", b"first").await.unwrap();

    let response = h.app.clone().oneshot(get("/api/exports")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body_bytes(response.into_body()).await).unwrap();
    let exports = json["exports"].as_array().unwrap();
    assert_eq!(exports.len(), 1);
    assert_eq!(exports[0]["name"], "beatcast_a.mp4");
    assert_eq!(exports[0]["size"], 5);
    assert_eq!(exports[0]["url"], "/exports/beatcast_a.mp4");
    assert!(exports[0].get("createdAt").is_some());

    let response = h.app.oneshot(get("/exports/beatcast_a.mp4")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
    assert_eq!(body_bytes(response.into_body()).await, b"first");
}

#[tokio::test]
async fn download_rejects_bad_and_missing_names() {
    let h = harness();

    let response = h.app.clone().oneshot(get("/exports/bad%20name.mp4")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = h.app.oneshot(get("/exports/missing.mp4")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json: serde_json::Value = serde_json::from_slice(&body_bytes(response.into_body()).await).unwrap();
    assert!(json["detail"].as_str().unwrap().contains("missing.mp4"));
}

#[tokio::test]
async fn render_streams_progress_until_done() {
    let h = harness();
    let response = h
        .app
        .oneshot(post_json("/api/render", r#"{"source":"/music/track.wav","output":{"container":"mp4"}}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/x-ndjson");

    let body = String::from_utf8(body_bytes(response.into_body()).await).unwrap();
    let events: Vec<ProgressEvent> = body
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    assert_eq!(events.first().unwrap().status, Phase::Loading);
    let last = events.last().unwrap();
    assert_eq!(last.status, Phase::Done);
    let filename = last.filename.clone().unwrap();
    assert!(filename.ends_with(".mp4"));
    assert_eq!(h.store.list().await.unwrap().len(), 1);
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
}

#[tokio::test]
async fn render_rejects_invalid_params() {
    let h = harness();
    let response = h
        .app
        .oneshot(post_json("/api/render", r#"{"source":""}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json: serde_json::Value = serde_json::from_slice(&body_bytes(response.into_body()).await).unwrap();
    assert!(json["detail"].as_str().unwrap().contains("source"));
}

#[tokio::test]
async fn shutdown_drain_ends_open_render_stream() {
    let terminated = Arc::new(AtomicUsize::new(0));
    let h = harness_with(Arc::new(EndlessLauncher {
        terminated: terminated.clone(),
    }));
    let response = h
        .app
        .oneshot(post_json("/api/render", r#"{"source":"/music/track.wav"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = tokio::spawn(body_bytes(response.into_body()));

    tokio::time::timeout(
        Duration::from_secs(5),
        drain_jobs_on(async {}, h.controller.clone()),
    )
    .await
    .expect("drain finished");

    let body = tokio::time::timeout(Duration::from_secs(5), body)
        .await
        .expect("stream closed")
        .unwrap();
    let events: Vec<ProgressEvent> = String::from_utf8(body)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    let last = events.last().unwrap();
    assert_eq!(last.status, Phase::Error);
    assert_eq!(last.error, Some(ErrorKind::Cancelled));
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert_eq!(terminated.load(Ordering::SeqCst), 1);
    assert!(h.controller.active_job().await.is_none());
}

#[tokio::test]
async fn graceful_serve_returns_with_render_in_flight() {
    let h = harness_with(Arc::new(EndlessLauncher {
        terminated: Arc::new(AtomicUsize::new(0)),
    }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let signal = async move {
        let _ = stop_rx.await;
    };
    let app = h.app.clone();
    let controller = h.controller.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(drain_jobs_on(signal, controller))
            .await
    });

    let payload = r#"{"source":"/music/track.wav"}"#;
    let mut conn = tokio::net::TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "POST /api/render HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        payload.len(),
        payload
    );
    conn.write_all(request.as_bytes()).await.unwrap();

    // Wait for the headers so the stream is open before the signal
    let mut head = vec![0u8; 512];
    let n = conn.read(&mut head).await.unwrap();
    assert!(String::from_utf8_lossy(&head[..n]).starts_with("HTTP/1.1 200"));

    stop_tx.send(()).unwrap();

    let mut rest = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), conn.read_to_end(&mut rest))
        .await
        .expect("stream closed")
        .unwrap();
    assert!(String::from_utf8_lossy(&rest).contains(r#""error":"cancelled""#));

    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server stopped")
        .unwrap()
        .unwrap();
}
