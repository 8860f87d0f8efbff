use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum_server::tls_rustls::RustlsConfig;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::{Duration, sleep};

pub const PATH_AUTH_LOGIN: &str = "/auth/login";
pub const PATH_STATUS: &str = "/status/{code}";

/// Certificate served by [`TestServer::start_tls`]. No public CA signed it.
pub const SELF_SIGNED_CERT_PEM: &str = include_str!("../certs/self-signed.crt");
const SELF_SIGNED_KEY_PEM: &str = include_str!("../certs/self-signed.key");

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    requests_total: Arc<AtomicU64>,
    login_requests_total: Arc<AtomicU64>,
    saw_json_content_type: Arc<AtomicU64>,
    saw_login_body: Arc<AtomicU64>,
    in_flight: Arc<AtomicU64>,
    in_flight_max: Arc<AtomicU64>,
}

impl TestServerStats {
    fn inc_requests_total(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_login_requests_total(&self) {
        self.login_requests_total.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_saw_json_content_type(&self) {
        self.saw_json_content_type.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_saw_login_body(&self) {
        self.saw_login_body.fetch_add(1, Ordering::Relaxed);
    }

    fn enter(&self) -> InFlightGuard {
        let now = self.in_flight.fetch_add(1, Ordering::Relaxed).saturating_add(1);
        self.in_flight_max.fetch_max(now, Ordering::Relaxed);
        InFlightGuard {
            in_flight: self.in_flight.clone(),
        }
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn login_requests_total(&self) -> u64 {
        self.login_requests_total.load(Ordering::Relaxed)
    }

    pub fn saw_json_content_type(&self) -> u64 {
        self.saw_json_content_type.load(Ordering::Relaxed)
    }

    pub fn saw_login_body(&self) -> u64 {
        self.saw_login_body.load(Ordering::Relaxed)
    }

    /// Highest number of login requests the server saw being handled at once.
    pub fn in_flight_max(&self) -> u64 {
        self.in_flight_max.load(Ordering::Relaxed)
    }
}

struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

/// How the login endpoint answers.
#[derive(Debug, Clone, Copy)]
pub struct LoginBehavior {
    pub status: StatusCode,
    pub delay: Duration,
}

impl Default for LoginBehavior {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
struct AppState {
    stats: TestServerStats,
    login: LoginBehavior,
}

#[derive(Debug, Clone)]
pub struct TestServerUrls {
    pub base_url: String,
    pub auth_login: String,
}

impl TestServerUrls {
    pub fn new(base_url: String) -> Self {
        Self {
            auth_login: format!("{base_url}{PATH_AUTH_LOGIN}"),
            base_url,
        }
    }

    pub fn status(&self, code: u16) -> String {
        format!("{}/status/{code}", self.base_url)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest {
    login_name: String,
    login_password: String,
}

async fn handle_auth_login(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    state.stats.inc_requests_total();
    state.stats.inc_login_requests_total();
    let _guard = state.stats.enter();

    if headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().starts_with("application/json"))
    {
        state.stats.inc_saw_json_content_type();
    }

    match serde_json::from_slice::<LoginRequest>(&body) {
        Ok(req) if !req.login_name.is_empty() && !req.login_password.is_empty() => {
            state.stats.inc_saw_login_body();
        }
        _ => return (StatusCode::BAD_REQUEST, "bad login body"),
    }

    if !state.login.delay.is_zero() {
        sleep(state.login.delay).await;
    }

    (state.login.status, "{\"token\":\"test-token\"}")
}

async fn handle_status(State(state): State<AppState>, Path(code): Path<u16>) -> StatusCode {
    state.stats.inc_requests_total();
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
}

pub fn router(stats: TestServerStats, login: LoginBehavior) -> Router {
    Router::new()
        .route(PATH_AUTH_LOGIN, post(handle_auth_login))
        .route(PATH_STATUS, get(handle_status).post(handle_status))
        .with_state(AppState { stats, login })
}

pub struct TestServer {
    base_url: String,
    urls: TestServerUrls,
    stats: TestServerStats,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        Self::start_with(LoginBehavior::default()).await
    }

    pub async fn start_with(login: LoginBehavior) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let stats = TestServerStats::default();
        let app = router(stats.clone(), login);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        Ok(Self::running(format!("http://{addr}"), stats, shutdown_tx, task))
    }

    /// Same routes over https, with a self-signed certificate for `localhost`/`127.0.0.1`.
    pub async fn start_tls() -> std::io::Result<Self> {
        // Already installed is fine.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let config = RustlsConfig::from_pem(
            SELF_SIGNED_CERT_PEM.as_bytes().to_vec(),
            SELF_SIGNED_KEY_PEM.as_bytes().to_vec(),
        )
        .await?;

        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        let stats = TestServerStats::default();
        let app = router(stats.clone(), LoginBehavior::default());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum_server::from_tcp_rustls(listener, config)
                .serve(app.into_make_service());
            tokio::select! {
                _ = serve => {}
                _ = shutdown_rx => {}
            }
        });

        Ok(Self::running(format!("https://{addr}"), stats, shutdown_tx, task))
    }

    fn running(
        base_url: String,
        stats: TestServerStats,
        shutdown_tx: oneshot::Sender<()>,
        task: tokio::task::JoinHandle<()>,
    ) -> Self {
        Self {
            urls: TestServerUrls::new(base_url.clone()),
            base_url,
            stats,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn urls(&self) -> &TestServerUrls {
        &self.urls
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}
