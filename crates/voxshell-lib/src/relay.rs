//! Session negotiation relay — forwards a browser's session offer to the
//! upstream realtime API and hands back its answer.
//!
//! The offer is opaque: it is never parsed, only wrapped in a multipart form
//! next to the capability manifest and sent with the bearer credential. The
//! answer is returned byte-for-byte. One upstream call per offer, no retries.
//!
//! There is no independent timeout. The upstream call lives inside the
//! request future, so a caller that disconnects cancels it.

use std::sync::Arc;

use axum::body::Bytes;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use tracing::{debug, error, info};

use voxshell_core::credential::Credential;
use voxshell_core::manifest::CapabilityManifest;
use voxshell_core::types::RelayConfig;

/// How much of a rejected upstream body is kept for the operator log.
const LOGGED_BODY_LIMIT: usize = 400;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("upstream request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("upstream rejected session ({status}): {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("failed to read upstream answer: {0}")]
    ReadAnswer(#[source] reqwest::Error),
}

/// Cloneable handle. Credential and manifest are shared read-only.
#[derive(Debug, Clone)]
pub struct SessionRelay {
    client: reqwest::Client,
    config: Arc<RelayConfig>,
    credential: Arc<Credential>,
    manifest: Arc<CapabilityManifest>,
}

impl SessionRelay {
    pub fn new(config: RelayConfig, credential: Credential, manifest: CapabilityManifest) -> Self {
        Self {
            client: reqwest::Client::new(),
            config: Arc::new(config),
            credential: Arc::new(credential),
            manifest: Arc::new(manifest),
        }
    }

    pub fn manifest(&self) -> &CapabilityManifest {
        &self.manifest
    }

    /// Exchange `offer` for the upstream answer.
    pub async fn negotiate(&self, offer: Bytes) -> Result<Bytes, RelayError> {
        let form = Form::new()
            .part("sdp", Part::bytes(offer.to_vec()))
            .text("session", self.manifest.as_json().to_string());

        debug!(
            offer_bytes = offer.len(),
            upstream = %self.config.upstream_url,
            "forwarding session offer"
        );

        let resp = self
            .client
            .post(&self.config.upstream_url)
            .header(reqwest::header::AUTHORIZATION, self.credential.bearer())
            .header("OpenAI-Beta", &self.config.beta)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                error!("session upstream request failed: {e}");
                RelayError::Transport(e)
            })?;

        let status = resp.status();
        if !status.is_success() {
            let mut body = resp.text().await.unwrap_or_default();
            truncate_at_char_boundary(&mut body, LOGGED_BODY_LIMIT);
            error!(%status, body = %body, "session upstream rejected offer");
            return Err(RelayError::Rejected { status, body });
        }

        let answer = resp.bytes().await.map_err(|e| {
            error!("failed to read session answer: {e}");
            RelayError::ReadAnswer(e)
        })?;

        info!(answer_bytes = answer.len(), "session negotiated");
        Ok(answer)
    }
}

fn truncate_at_char_boundary(text: &mut String, limit: usize) {
    if text.len() <= limit {
        return;
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}

/// Minimal upstream stand-in for tests: records what it was sent and replies
/// with a fixed status and body.
#[cfg(test)]
pub(crate) mod stub_upstream {
    use std::sync::{Arc, Mutex};

    use axum::Router;
    use axum::body::Bytes;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;

    #[derive(Clone, Default)]
    pub struct Seen {
        inner: Arc<Mutex<Vec<(HeaderMap, Bytes)>>>,
    }

    impl Seen {
        pub fn requests(&self) -> Vec<(HeaderMap, Bytes)> {
            self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
        }
    }

    #[derive(Clone)]
    struct Stub {
        status: StatusCode,
        answer: &'static str,
        seen: Seen,
    }

    async fn calls(State(stub): State<Stub>, headers: HeaderMap, body: Bytes) -> (StatusCode, &'static str) {
        stub.seen
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((headers, body));
        (stub.status, stub.answer)
    }

    /// Serve on an ephemeral port. Returns the `/v1/realtime/calls` URL.
    pub async fn spawn(status: StatusCode, answer: &'static str) -> (String, Seen) {
        let seen = Seen::default();
        let app = Router::new()
            .route("/v1/realtime/calls", post(calls))
            .with_state(Stub {
                status,
                answer,
                seen: seen.clone(),
            });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/v1/realtime/calls"), seen)
    }
}
