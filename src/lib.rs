use std::net::SocketAddr;
use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;
use vidgrab_core::core::{dependencies, retention};
use vidgrab_core::{
    InMemoryJobStore, JobStore, Orchestrator, ProgressReporter, YtdlpPipeline, YtdlpResolver,
};

pub mod commands;
pub mod models;
pub mod rate_limit;
pub mod storage;

use crate::models::settings::ServerSettings;
use crate::rate_limit::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub reporter: ProgressReporter,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        let reporter = orchestrator.reporter();
        Self {
            orchestrator,
            reporter,
        }
    }
}

/// Serve with `into_make_service_with_connect_info::<SocketAddr>()` so the
/// rate limits are tracked per client address.
pub fn router(state: AppState, server: &ServerSettings) -> Router {
    let info_limit = RateLimiter::per_minute(server.info_requests_per_minute);
    let download_limit = RateLimiter::per_minute(server.download_requests_per_minute);

    Router::new()
        .route("/api/health", get(commands::health::health))
        .route(
            "/api/info",
            post(commands::downloads::get_info)
                .layer(middleware::from_fn_with_state(info_limit, rate_limit::enforce)),
        )
        .route(
            "/api/download",
            post(commands::downloads::start_download)
                .layer(middleware::from_fn_with_state(download_limit, rate_limit::enforce)),
        )
        .route("/api/progress/:id", get(commands::downloads::get_progress))
        .route("/api/file/:id", get(commands::downloads::download_file))
        .route("/api/cancel/:id", post(commands::downloads::cancel_download))
        .fallback(commands::not_found)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

async fn log_dependencies() {
    let (ytdlp, ffmpeg) = tokio::join!(
        dependencies::check_tool("yt-dlp"),
        dependencies::check_tool("ffmpeg"),
    );
    for tool in [ytdlp, ffmpeg] {
        match (tool.available, tool.version) {
            (true, Some(version)) => tracing::info!("{} {}", tool.name, version),
            (true, None) => tracing::info!("{} found, version unknown", tool.name),
            (false, _) => tracing::warn!("{} not found on PATH or in the managed bin dir", tool.name),
        }
    }
}

pub async fn run() -> anyhow::Result<()> {
    init_tracing();

    let settings = storage::config::load_settings()?;
    let work_dir = settings.download.work_dir.clone();
    let jobs_dir = settings.download.jobs_dir();
    tokio::fs::create_dir_all(&jobs_dir).await?;
    if let Err(e) = retention::cleanup_stale_dirs(&jobs_dir).await {
        tracing::warn!("Startup cleanup of {:?} failed: {}", jobs_dir, e);
    }
    log_dependencies().await;

    let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
    let orchestrator = Orchestrator::new(
        Arc::new(YtdlpResolver::new(settings.download.resolve_timeout())),
        Arc::new(YtdlpPipeline::new()),
        store.clone(),
        settings.download.clone(),
    );

    let shutdown = CancellationToken::new();
    let sweeper = retention::spawn_sweeper(
        store,
        settings.download.retention(),
        settings.download.sweep_interval(),
        shutdown.clone(),
    );

    let addr = format!("{}:{}", settings.server.bind, settings.server.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(
        "Listening on http://{} (work dir {:?}, {} concurrent downloads)",
        listener.local_addr()?,
        work_dir,
        settings.download.max_concurrent_downloads
    );

    let app = router(AppState::new(orchestrator), &settings.server);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    shutdown.cancel();
    let _ = sweeper.await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::{json, Value};
    use vidgrab_core::core::testing::{muxed_1080_media, FakePipeline, FakeResolver, FetchBehavior};
    use vidgrab_core::models::settings::OrchestratorSettings;

    const URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

    struct TestServer {
        base_url: String,
        shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
        client: reqwest::Client,
        _work: tempfile::TempDir,
    }

    impl TestServer {
        async fn new(pipeline: FakePipeline) -> Self {
            Self::with_server(pipeline, ServerSettings::default()).await
        }

        async fn with_server(pipeline: FakePipeline, server: ServerSettings) -> Self {
            let work = tempfile::tempdir().unwrap();
            let settings = OrchestratorSettings {
                work_dir: work.path().to_path_buf(),
                ..Default::default()
            };
            let orchestrator = Orchestrator::new(
                Arc::new(FakeResolver::new(muxed_1080_media())),
                Arc::new(pipeline),
                Arc::new(InMemoryJobStore::new()),
                settings,
            );

            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
            let app = router(AppState::new(orchestrator), &server);
            let serve = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async {
                shutdown_rx.await.ok();
            });
            tokio::spawn(async move {
                serve.await.unwrap();
            });

            Self {
                base_url: format!("http://{}", addr),
                shutdown_tx: Some(shutdown_tx),
                client: reqwest::Client::new(),
                _work: work,
            }
        }

        fn url(&self, path: &str) -> String {
            format!("{}{}", self.base_url, path)
        }

        async fn post(&self, path: &str, body: Value) -> (reqwest::StatusCode, Value) {
            let resp = self.client.post(self.url(path)).json(&body).send().await.unwrap();
            let status = resp.status();
            (status, resp.json().await.unwrap())
        }

        async fn get(&self, path: &str) -> (reqwest::StatusCode, Value) {
            let resp = self.client.get(self.url(path)).send().await.unwrap();
            let status = resp.status();
            (status, resp.json().await.unwrap())
        }

        async fn wait_for_status(&self, id: &str, wanted: &str) -> Value {
            for _ in 0..200 {
                let (status, body) = self.get(&format!("/api/progress/{}", id)).await;
                assert_eq!(status, 200);
                if body["status"] == wanted {
                    return body;
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
            panic!("job {} never reached {}", id, wanted);
        }
    }

    impl Drop for TestServer {
        fn drop(&mut self) {
            if let Some(shutdown_tx) = self.shutdown_tx.take() {
                let _ = shutdown_tx.send(());
            }
        }
    }

    #[tokio::test]
    async fn info_lists_catalog() {
        let server = TestServer::new(FakePipeline::succeeding()).await;
        let (status, body) = server.post("/api/info", json!({ "url": URL })).await;
        assert_eq!(status, 200);
        assert_eq!(body["success"], true);
        assert_eq!(body["info"]["title"], "Never Gonna Give You Up");
        assert_eq!(body["formats"]["video"].as_array().unwrap().len(), 1);
        assert_eq!(body["formats"]["video"][0]["resolution"], "1080p");
        assert_eq!(body["formats"]["audio"][0]["abr_str"], "320 kbps");
    }

    #[tokio::test]
    async fn invalid_url_is_bad_request() {
        let server = TestServer::new(FakePipeline::succeeding()).await;
        let (status, body) = server
            .post("/api/info", json!({ "url": "https://vimeo.com/1" }))
            .await;
        assert_eq!(status, 400);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("unsupported source"));
    }

    #[tokio::test]
    async fn download_progress_and_file() {
        let server = TestServer::new(FakePipeline::succeeding()).await;
        let (status, body) = server
            .post(
                "/api/download",
                json!({ "url": URL, "format_type": "video", "quality": "1080" }),
            )
            .await;
        assert_eq!(status, 202);
        let id = body["download_id"].as_str().unwrap().to_string();

        let progress = server.wait_for_status(&id, "completed").await;
        assert_eq!(progress["progress_percent"], 100.0);
        let download_url = progress["download_url"].as_str().unwrap().to_string();
        assert_eq!(download_url, format!("/api/file/{}", id));

        let resp = server.client.get(server.url(&download_url)).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        let disposition = resp.headers()[reqwest::header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .to_string();
        assert!(disposition.starts_with("attachment; filename=\"Never Gonna Give You Up.mp4\""));
        assert_eq!(resp.bytes().await.unwrap().as_ref(), b"media:22");
    }

    #[tokio::test]
    async fn missing_quality_is_bad_request() {
        let server = TestServer::new(FakePipeline::succeeding()).await;
        let (status, body) = server
            .post(
                "/api/download",
                json!({ "url": URL, "format_type": "video", "quality": "720" }),
            )
            .await;
        assert_eq!(status, 400);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn duplicate_download_conflicts_and_cancel_fails_job() {
        let server = TestServer::new(FakePipeline::new(FetchBehavior::WaitForCancel)).await;
        let request = json!({ "url": URL, "format_type": "audio", "quality": "251" });

        let (status, body) = server.post("/api/download", request.clone()).await;
        assert_eq!(status, 202);
        let id = body["download_id"].as_str().unwrap().to_string();

        let (status, _) = server.post("/api/download", request).await;
        assert_eq!(status, 409);

        server.wait_for_status(&id, "downloading").await;
        let (status, body) = server.post(&format!("/api/cancel/{}", id), json!({})).await;
        assert_eq!(status, 200);
        assert_eq!(body["success"], true);

        let progress = server.wait_for_status(&id, "failed").await;
        assert_eq!(progress["error"]["kind"], "cancelled");
        assert!(progress.get("download_url").is_none());

        let resp = server
            .client
            .get(server.url(&format!("/api/file/{}", id)))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn unknown_ids_and_routes_are_not_found() {
        let server = TestServer::new(FakePipeline::succeeding()).await;
        let (status, body) = server.get("/api/progress/unknown").await;
        assert_eq!(status, 404);
        assert_eq!(body["success"], false);

        let (status, body) = server.get("/api/nothing-here").await;
        assert_eq!(status, 404);
        assert_eq!(body["error"], "Not found");
    }

    #[tokio::test]
    async fn download_requests_are_rate_limited_per_client() {
        let server = TestServer::with_server(
            FakePipeline::new(FetchBehavior::WaitForCancel),
            ServerSettings {
                download_requests_per_minute: 2,
                ..Default::default()
            },
        )
        .await;

        let mut ids = Vec::new();
        for (kind, quality) in [("audio", "251"), ("video", "1080")] {
            let (status, body) = server
                .post(
                    "/api/download",
                    json!({ "url": URL, "format_type": kind, "quality": quality }),
                )
                .await;
            assert_eq!(status, 202);
            ids.push(body["download_id"].as_str().unwrap().to_string());
        }

        let (status, body) = server
            .post("/api/download", json!({ "url": URL, "quality": "1080" }))
            .await;
        assert_eq!(status, 429);
        assert_eq!(body, json!({ "success": false, "error": "Rate limit exceeded" }));

        // Other routes keep their own budget.
        let (status, _) = server.post("/api/info", json!({ "url": URL })).await;
        assert_eq!(status, 200);

        for id in ids {
            server.post(&format!("/api/cancel/{}", id), json!({})).await;
            server.wait_for_status(&id, "failed").await;
        }
    }

    #[tokio::test]
    async fn cors_headers_are_sent() {
        let server = TestServer::new(FakePipeline::succeeding()).await;
        let resp = server
            .client
            .get(server.url("/api/health"))
            .header(reqwest::header::ORIGIN, "http://localhost:3000")
            .send()
            .await
            .unwrap();
        assert_eq!(
            resp.headers()[reqwest::header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );

        let preflight = server
            .client
            .request(reqwest::Method::OPTIONS, server.url("/api/download"))
            .header(reqwest::header::ORIGIN, "http://localhost:3000")
            .header(reqwest::header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .send()
            .await
            .unwrap();
        assert!(preflight.status().is_success());
        assert!(preflight
            .headers()
            .contains_key(reqwest::header::ACCESS_CONTROL_ALLOW_METHODS));
    }

    #[tokio::test]
    async fn malformed_bodies_use_the_error_envelope() {
        let server = TestServer::new(FakePipeline::succeeding()).await;
        let resp = server
            .client
            .post(server.url("/api/download"))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body("{ not json")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["success"], false);
        assert!(!body["error"].as_str().unwrap().is_empty());

        let resp = server
            .client
            .post(server.url("/api/info"))
            .body(r#"{"url": "x"}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 415);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn health_reports_tools() {
        let server = TestServer::new(FakePipeline::succeeding()).await;
        let (status, body) = server.get("/api/health").await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["dependencies"].as_array().unwrap().len(), 2);
        assert!(body["ffmpeg_available"].is_boolean());
    }
}
