//! HTTP front door for the voxshell gateway.
//!
//! `/session` and `/tools/shell` are the operational endpoints, `/log` takes
//! browser diagnostics, and everything else is served from the static asset
//! directory. Handlers only dispatch; the work lives in [`SessionRelay`] and
//! [`ShellRunner`].
//!
//! `/tools/shell` runs arbitrary programs with the privileges of this process.
//! There is no authentication here: anything that can reach the socket can
//! run commands, so bind to loopback or put an authenticating proxy in front.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use voxshell_core::types::{CommandRequest, CommandResult, LogEntry};

use crate::relay::{RelayError, SessionRelay};
use crate::shell::{ShellError, ShellRunner};
use crate::sink::{DiagnosticSink, TracingSink};

/// Shared per-process state. Cloned into every request.
#[derive(Clone)]
pub struct AppState {
    shell: ShellRunner,
    relay: SessionRelay,
    sink: Arc<dyn DiagnosticSink>,
}

impl AppState {
    pub fn new(shell: ShellRunner, relay: SessionRelay) -> Self {
        Self {
            shell,
            relay,
            sink: Arc::new(TracingSink),
        }
    }

    /// Route `/log` messages somewhere other than the process log.
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }
}

/// Build the axum router. Unmatched paths are served from `public_dir`.
pub fn router(state: AppState, public_dir: impl AsRef<Path>) -> Router {
    Router::new()
        .route("/session", post(session).fallback(method_not_allowed))
        .route("/tools/shell", post(tools_shell).fallback(method_not_allowed))
        .route("/log", post(log).fallback(method_not_allowed))
        .fallback_service(ServeDir::new(public_dir.as_ref()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Errors ────────────────────────────────────────────────────────────────

/// Request-level failures. Detail stays in the log; callers get a short,
/// fixed message.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("malformed request body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Shell(#[from] ShellError),

    #[error(transparent)]
    Relay(#[from] RelayError),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            GatewayError::Shell(ShellError::EmptyCommand) => {
                (StatusCode::BAD_REQUEST, "missing command")
            }
            GatewayError::MethodNotAllowed => {
                (StatusCode::INTERNAL_SERVER_ERROR, "method not allowed")
            }
            GatewayError::Decode(_) => (StatusCode::INTERNAL_SERVER_ERROR, "malformed request body"),
            GatewayError::Relay(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "session negotiation failed")
            }
        };
        (status, message).into_response()
    }
}

// ─── Client address ────────────────────────────────────────────────────────

/// Best-effort caller address for log lines: first `X-Forwarded-For` entry,
/// then `X-Real-IP`, then the socket peer.
pub struct ClientIp(pub String);

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(Self(client_ip(&parts.headers, peer)))
    }
}

pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(forwarded) = header_str(headers, "x-forwarded-for") {
        if let Some(first) = forwarded.split(',').map(str::trim).find(|p| !p.is_empty()) {
            return first.to_string();
        }
    }
    if let Some(real) = header_str(headers, "x-real-ip").filter(|v| !v.is_empty()) {
        return real.to_string();
    }
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

// ─── Handlers ──────────────────────────────────────────────────────────────

async fn session(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    offer: Bytes,
) -> Result<Response, GatewayError> {
    info!(client_ip = %ip, offer_bytes = offer.len(), "session request");
    let answer = state
        .relay
        .negotiate(offer)
        .await
        .inspect_err(|e| warn!(client_ip = %ip, "session negotiation failed: {e}"))?;
    Ok(([(header::CONTENT_TYPE, "application/sdp")], answer).into_response())
}

async fn tools_shell(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    body: Bytes,
) -> Result<Json<CommandResult>, GatewayError> {
    let request: CommandRequest = serde_json::from_slice(&body)
        .inspect_err(|e| warn!(client_ip = %ip, "bad tools request: {e}"))?;
    info!(client_ip = %ip, command = ?request.command, "tools request");

    let result = state.shell.run(&request).await?;
    info!(
        client_ip = %ip,
        ok = result.ok,
        code = result.exit_code,
        stdout = %String::from_utf8_lossy(&result.stdout),
        stderr = %String::from_utf8_lossy(&result.stderr),
        err = %result.error,
        "tools response"
    );
    Ok(Json(result))
}

async fn log(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    body: Bytes,
) -> Result<StatusCode, GatewayError> {
    let entry: LogEntry = serde_json::from_slice(&body)
        .inspect_err(|e| warn!(client_ip = %ip, "bad log request: {e}"))?;
    state.sink.record(&ip, entry);
    Ok(StatusCode::OK)
}

async fn method_not_allowed() -> GatewayError {
    GatewayError::MethodNotAllowed
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::Mutex;

    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use voxshell_core::credential::Credential;
    use voxshell_core::manifest::CapabilityManifest;
    use voxshell_core::types::{RelayConfig, ShellConfig};

    use super::*;
    use crate::relay::stub_upstream;

    const MISSING_PUBLIC_DIR: &str = "/nonexistent/voxshell-public";

    fn state_for(upstream_url: String) -> AppState {
        let relay = SessionRelay::new(
            RelayConfig {
                upstream_url,
                ..RelayConfig::default()
            },
            Credential::new("sk-test-server"),
            CapabilityManifest::embedded().unwrap(),
        );
        AppState::new(ShellRunner::new(ShellConfig::default()), relay)
    }

    fn app() -> Router {
        router(state_for("http://127.0.0.1:9/unused".into()), MISSING_PUBLIC_DIR)
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, Bytes) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, body)
    }

    #[tokio::test]
    async fn shell_returns_result() {
        let (status, body) = send(app(), post_json("/tools/shell", r#"{"Command":["echo","hi"]}"#)).await;
        assert_eq!(status, StatusCode::OK);
        let result: CommandResult = serde_json::from_slice(&body).unwrap();
        assert!(result.ok);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, b"hi\n");

        let raw: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(raw["Stdout"], "aGkK");
        assert_eq!(raw["OK"], true);
    }

    #[tokio::test]
    async fn shell_failure_is_still_ok_status() {
        let (status, body) = send(
            app(),
            post_json("/tools/shell", r#"{"Command":["voxshell-no-such-binary"]}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let result: CommandResult = serde_json::from_slice(&body).unwrap();
        assert!(!result.ok);
        assert_eq!(result.exit_code, -1);
        assert!(!result.error.is_empty());
    }

    #[tokio::test]
    async fn empty_command_is_bad_request() {
        let (status, body) = send(app(), post_json("/tools/shell", r#"{"Command":[]}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "missing command");

        let (status, _) = send(app(), post_json("/tools/shell", "{}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(app(), post_json("/tools/shell", r#"{"Command":null}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "missing command");
    }

    #[tokio::test]
    async fn malformed_body_is_server_error() {
        let (status, _) = send(app(), post_json("/tools/shell", "{\"Command\": ")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn non_post_is_rejected() {
        for uri in ["/tools/shell", "/session", "/log"] {
            let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
            let (status, _) = send(app(), req).await;
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR, "GET {uri}");
        }
    }

    #[tokio::test]
    async fn session_relays_upstream_answer() {
        let answer = "v=0\r\ns=upstream-answer\r\n";
        let (url, seen) = stub_upstream::spawn(StatusCode::CREATED, answer).await;
        let app = router(state_for(url), MISSING_PUBLIC_DIR);

        let req = Request::builder()
            .method("POST")
            .uri("/session")
            .header(header::CONTENT_TYPE, "application/sdp")
            .body(Body::from("v=0\r\ns=offer\r\n"))
            .unwrap();
        let (status, body) = send(app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, answer);

        let requests = seen.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0["authorization"], "Bearer sk-test-server");
        assert!(String::from_utf8_lossy(&requests[0].1).contains("run_shell"));
    }

    #[tokio::test]
    async fn session_upstream_failure_is_generic() {
        let (url, _) = stub_upstream::spawn(StatusCode::UNAUTHORIZED, "invalid api key sk-...").await;
        let app = router(state_for(url), MISSING_PUBLIC_DIR);

        let req = Request::builder()
            .method("POST")
            .uri("/session")
            .body(Body::from("offer"))
            .unwrap();
        let (status, body) = send(app, req).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "session negotiation failed");
    }

    #[derive(Default)]
    struct RecordingSink {
        entries: Mutex<Vec<(String, LogEntry)>>,
    }

    impl DiagnosticSink for RecordingSink {
        fn record(&self, client_ip: &str, entry: LogEntry) {
            self.entries
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push((client_ip.to_string(), entry));
        }
    }

    #[tokio::test]
    async fn log_goes_to_sink() {
        let sink = Arc::new(RecordingSink::default());
        let state = state_for("http://127.0.0.1:9/unused".into()).with_sink(sink.clone());
        let app = router(state, MISSING_PUBLIC_DIR);

        let mut req = post_json("/log", r#"{"Msg":"dc open","Req":"{}"}"#);
        req.headers_mut()
            .insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        let (status, body) = send(app.clone(), req).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());

        let entries = sink.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "203.0.113.7");
        assert_eq!(entries[0].1.msg, "dc open");
        drop(entries);

        let (status, _) = send(app, post_json("/log", "not json")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn static_files_are_served() {
        let dir = std::env::temp_dir().join(format!("voxshell-public-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("index.html"), "<h1>voxshell</h1>").unwrap();

        let app = router(state_for("http://127.0.0.1:9/unused".into()), &dir);
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let (status, body) = send(app.clone(), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "<h1>voxshell</h1>");

        let req = Request::builder().uri("/missing.js").body(Body::empty()).unwrap();
        let (status, _) = send(app, req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn client_ip_precedence() {
        let peer: SocketAddr = "192.0.2.1:5555".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, Some(peer)), "192.0.2.1");
        assert_eq!(client_ip(&headers, None), "unknown");

        headers.insert("x-real-ip", "198.51.100.2".parse().unwrap());
        assert_eq!(client_ip(&headers, Some(peer)), "198.51.100.2");

        headers.insert("x-forwarded-for", " , 203.0.113.9 ,10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers, Some(peer)), "203.0.113.9");
    }
}
