// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Push notification listener. Any valid `POST` to the configured path requests a run.

use std::sync::Arc;

use ctfdx_deployer::{Admission, Scheduler, Trigger, TriggerSource};
use hmac::{Hmac, Mac};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode, service::service_fn};
use hyper_util::rt::{TokioExecutor, TokioIo};
use sha2::Sha256;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::WebhookConfig;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_HEADER: &str = "x-hub-signature-256";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature header")]
    Missing,
    #[error("invalid signature format")]
    InvalidFormat,
    #[error("invalid signature")]
    Mismatch,
}

/// Checks a `sha256=<hex>` HMAC of `body` keyed with `secret`.
pub fn verify_signature(
    secret: &str,
    header: Option<&str>,
    body: &[u8],
) -> Result<(), SignatureError> {
    let header = header.ok_or(SignatureError::Missing)?;
    let expected = header
        .strip_prefix("sha256=")
        .and_then(|digest| hex::decode(digest).ok())
        .ok_or(SignatureError::InvalidFormat)?;
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Mismatch)?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}

/// Best-effort name of whoever caused the push.
fn actor(body: &[u8]) -> Option<String> {
    let payload: serde_json::Value = serde_json::from_slice(body).ok()?;
    payload
        .pointer("/sender/login")
        .or_else(|| payload.pointer("/pusher/name"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

pub struct WebhookState {
    pub scheduler: Scheduler,
    pub path: String,
    pub secret: Option<String>,
}

impl WebhookState {
    pub fn new(scheduler: Scheduler, config: &WebhookConfig) -> Self {
        Self {
            scheduler,
            path: config.path.clone(),
            secret: config.secret.clone(),
        }
    }

    pub fn respond(
        &self,
        method: &Method,
        path: &str,
        signature: Option<&str>,
        body: &[u8],
    ) -> Response<String> {
        if path != self.path {
            return status_response(StatusCode::NOT_FOUND, "not found");
        }
        if *method != Method::POST {
            return status_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
        }
        if let Some(secret) = &self.secret {
            if let Err(e) = verify_signature(secret, signature, body) {
                tracing::warn!("Rejected webhook: {e}");
                return status_response(StatusCode::UNAUTHORIZED, &e.to_string());
            }
        }
        match self
            .scheduler
            .request_run(Trigger::new(TriggerSource::Webhook, actor(body)))
        {
            Admission::Started => status_response(StatusCode::ACCEPTED, "deployment started"),
            Admission::Queued => status_response(StatusCode::ACCEPTED, "deployment queued"),
        }
    }

    async fn handle(&self, req: Request<Incoming>) -> Response<String> {
        let (parts, body) = req.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                tracing::warn!("Failed to read webhook body: {e}");
                return status_response(StatusCode::BAD_REQUEST, "unreadable body");
            }
        };
        let signature = parts
            .headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok());
        self.respond(&parts.method, parts.uri.path(), signature, &body)
    }
}

fn status_response(status: StatusCode, message: &str) -> Response<String> {
    let mut resp = Response::new(message.to_string());
    *resp.status_mut() = status;
    resp
}

pub async fn serve(
    state: Arc<WebhookState>,
    listener: TcpListener,
) -> Result<(), std::io::Error> {
    tracing::info!("Listening for webhooks on http://{}{}", listener.local_addr()?, state.path);
    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                .serve_connection(
                    io,
                    service_fn(move |req| {
                        let state = state.clone();
                        async move { Ok::<_, std::convert::Infallible>(state.handle(req).await) }
                    }),
                )
                .await
            {
                tracing::error!("Error serving connection: {e}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use ctfdx_deployer::{NotificationSink, RunError, RunExecutor, RunReport, RunSummary, StatusHandle};

    use super::*;

    #[derive(Default)]
    struct CountingExecutor(AtomicUsize);

    #[async_trait]
    impl RunExecutor for CountingExecutor {
        async fn execute(&self, _status: &StatusHandle) -> Result<RunSummary, RunError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(RunSummary::default())
        }
    }

    struct NullSink;

    #[async_trait]
    impl NotificationSink for NullSink {
        async fn run_finished(&self, _report: &RunReport) {}
    }

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn state(secret: Option<&str>) -> (WebhookState, Arc<CountingExecutor>) {
        let executor = Arc::new(CountingExecutor::default());
        let scheduler = Scheduler::new(executor.clone(), Arc::new(NullSink));
        (
            WebhookState {
                scheduler,
                path: "/webhook".into(),
                secret: secret.map(str::to_string),
            },
            executor,
        )
    }

    #[test]
    fn test_verify_signature() {
        let body = br#"{"ref":"refs/heads/main"}"#;
        let header = sign("s3cret", body);
        assert_eq!(verify_signature("s3cret", Some(&header), body), Ok(()));
        assert_eq!(
            verify_signature("other", Some(&header), body),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify_signature("s3cret", Some("sha1=abcd"), body),
            Err(SignatureError::InvalidFormat)
        );
        assert_eq!(verify_signature("s3cret", None, body), Err(SignatureError::Missing));
    }

    #[test]
    fn test_actor_from_payload() {
        assert_eq!(actor(br#"{"sender":{"login":"octocat"}}"#).as_deref(), Some("octocat"));
        assert_eq!(actor(br#"{"pusher":{"name":"alice"}}"#).as_deref(), Some("alice"));
        assert_eq!(actor(b"not json"), None);
    }

    #[tokio::test]
    async fn test_routes() {
        let (state, _) = state(None);
        assert_eq!(state.respond(&Method::POST, "/other", None, b"").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            state.respond(&Method::GET, "/webhook", None, b"").status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
    }

    #[tokio::test]
    async fn test_signed_push_requests_run() {
        let (state, executor) = state(Some("s3cret"));
        let body = br#"{"sender":{"login":"octocat"}}"#;

        let rejected = state.respond(&Method::POST, "/webhook", Some("sha256=00"), body);
        assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);
        assert!(!state.scheduler.is_running());

        let accepted = state.respond(&Method::POST, "/webhook", Some(&sign("s3cret", body)), body);
        assert_eq!(accepted.status(), StatusCode::ACCEPTED);
        state.scheduler.wait_idle().await;
        assert_eq!(executor.0.load(Ordering::SeqCst), 1);
    }
}
