//! HTTP/JSON registry client.
//!
//! Every call opens a fresh HTTP/1 connection to the coordinator and is
//! bounded by the client's request timeout. Connecting means retrying
//! `GET /registry/ping` until the hub answers or the connect budget runs out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HOST, USER_AGENT};
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use tracing::{debug, info};

use crate::client::{OverlayInfo, RegistryClient, RegistryConnector, RegistryFuture, ShutdownTargets};
use crate::error::{RegistryError, RegistryResult};

const PING_PATH: &str = "/registry/ping";
const ENGINES_PATH: &str = "/registry/engines";
const SHUTDOWN_PATH: &str = "/registry/shutdown";
const OVERLAY_START_PATH: &str = "/overlay/start";
const OVERLAY_STOP_PATH: &str = "/overlay/stop";

#[derive(Debug, Deserialize)]
struct EnginesResponse {
    ids: Vec<u32>,
}

/// Opens [`HttpRegistryClient`]s.
#[derive(Debug, Clone)]
pub struct HttpRegistryConnector {
    request_timeout: Duration,
    retry_interval: Duration,
}

impl Default for HttpRegistryConnector {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            retry_interval: Duration::from_millis(250),
        }
    }
}

impl HttpRegistryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Connect to `endpoint`, retrying the ping until `timeout`.
    pub async fn connect_http(&self, endpoint: &str, timeout: Duration) -> RegistryResult<HttpRegistryClient> {
        let client = HttpRegistryClient::new(endpoint, self.request_timeout);
        let attempt = async {
            let mut attempts = 0u32;
            loop {
                attempts += 1;
                match client.call(Method::GET, PING_PATH, None).await {
                    Ok(_) => return attempts,
                    Err(e) => debug!(%endpoint, attempts, error = %e, "registry not reachable yet"),
                }
                tokio::time::sleep(self.retry_interval).await;
            }
        };

        match tokio::time::timeout(timeout, attempt).await {
            Ok(attempts) => {
                info!(%endpoint, attempts, "connected to registry");
                Ok(client)
            }
            Err(_) => Err(RegistryError::Timeout {
                endpoint: endpoint.to_string(),
                timeout,
            }),
        }
    }
}

impl RegistryConnector for HttpRegistryConnector {
    fn connect<'a>(
        &'a self,
        endpoint: &'a str,
        timeout: Duration,
    ) -> RegistryFuture<'a, Box<dyn RegistryClient>> {
        Box::pin(async move {
            let client = self.connect_http(endpoint, timeout).await?;
            Ok(Box::new(client) as Box<dyn RegistryClient>)
        })
    }
}

/// Registry client over HTTP/JSON.
#[derive(Debug)]
pub struct HttpRegistryClient {
    endpoint: String,
    request_timeout: Duration,
    closed: AtomicBool,
}

impl HttpRegistryClient {
    /// Build a client without checking reachability.
    pub fn new(endpoint: &str, request_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            request_timeout,
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> RegistryResult<Bytes> {
        if self.is_closed() {
            return Err(RegistryError::Closed);
        }
        tokio::time::timeout(self.request_timeout, send(&self.endpoint, method, path, body))
            .await
            .map_err(|_| RegistryError::Timeout {
                endpoint: self.endpoint.clone(),
                timeout: self.request_timeout,
            })?
    }
}

impl RegistryClient for HttpRegistryClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn engine_ids(&self) -> RegistryFuture<'_, Vec<u32>> {
        Box::pin(async move {
            let body = self.call(Method::GET, ENGINES_PATH, None).await?;
            let resp: EnginesResponse =
                serde_json::from_slice(&body).map_err(|e| RegistryError::Decode(e.to_string()))?;
            Ok(resp.ids)
        })
    }

    fn shutdown(&self, targets: ShutdownTargets, include_hub: bool) -> RegistryFuture<'_, ()> {
        Box::pin(async move {
            let body = serde_json::json!({
                "targets": targets.to_json(),
                "hub": include_hub,
            });
            self.call(Method::POST, SHUTDOWN_PATH, Some(body)).await?;
            info!(endpoint = %self.endpoint, ?targets, include_hub, "shutdown directive sent");
            Ok(())
        })
    }

    fn become_overlay(&self, nthreads: u32) -> RegistryFuture<'_, OverlayInfo> {
        Box::pin(async move {
            let body = serde_json::json!({ "nthreads": nthreads });
            let resp = match self.call(Method::POST, OVERLAY_START_PATH, Some(body)).await {
                Ok(resp) => resp,
                Err(RegistryError::Status { status, .. })
                    if status == StatusCode::NOT_FOUND.as_u16()
                        || status == StatusCode::NOT_IMPLEMENTED.as_u16() =>
                {
                    return Err(RegistryError::OverlayUnavailable(format!(
                        "coordinator at {} answered {status}",
                        self.endpoint
                    )));
                }
                Err(e) => return Err(e),
            };
            serde_json::from_slice(&resp).map_err(|e| RegistryError::Decode(e.to_string()))
        })
    }

    fn stop_overlay(&self) -> RegistryFuture<'_, ()> {
        Box::pin(async move {
            self.call(Method::POST, OVERLAY_STOP_PATH, None).await?;
            Ok(())
        })
    }

    fn close(&self) -> RegistryFuture<'_, ()> {
        Box::pin(async move {
            if !self.closed.swap(true, Ordering::SeqCst) {
                debug!(endpoint = %self.endpoint, "registry client closed");
            }
            Ok(())
        })
    }
}

/// One request over a fresh HTTP/1 connection.
async fn send(
    endpoint: &str,
    method: Method,
    path: &str,
    body: Option<serde_json::Value>,
) -> RegistryResult<Bytes> {
    let connect_err = |reason: String| RegistryError::Connect {
        endpoint: endpoint.to_string(),
        reason,
    };

    let stream = tokio::net::TcpStream::connect(endpoint)
        .await
        .map_err(|e| connect_err(e.to_string()))?;
    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| connect_err(e.to_string()))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let payload = match &body {
        Some(value) => Bytes::from(
            serde_json::to_vec(value).map_err(|e| RegistryError::Decode(e.to_string()))?,
        ),
        None => Bytes::new(),
    };

    let req = Request::builder()
        .method(method.clone())
        .uri(path)
        .header(HOST, endpoint)
        .header(USER_AGENT, "ipcluster/0.1")
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(payload))
        .map_err(|e| connect_err(e.to_string()))?;

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| connect_err(e.to_string()))?;
    let status = resp.status();
    let bytes = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| connect_err(e.to_string()))?
        .to_bytes();

    if !status.is_success() {
        debug!(%endpoint, %method, %path, %status, "registry call rejected");
        return Err(RegistryError::Status {
            method: method.to_string(),
            path: path.to_string(),
            status: status.as_u16(),
        });
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::{get, post};
    use axum::{Json, Router};

    #[derive(Default)]
    struct FakeHub {
        ids: Vec<u32>,
        shutdowns: Vec<serde_json::Value>,
        overlay_supported: bool,
        overlay_stops: u32,
    }

    type Shared = Arc<Mutex<FakeHub>>;

    async fn serve(hub: Shared) -> String {
        let router = Router::new()
            .route("/registry/ping", get(|| async { "pong" }))
            .route(
                "/registry/engines",
                get(|State(hub): State<Shared>| async move {
                    Json(serde_json::json!({ "ids": hub.lock().unwrap().ids.clone() }))
                }),
            )
            .route(
                "/registry/shutdown",
                post(
                    |State(hub): State<Shared>, Json(body): Json<serde_json::Value>| async move {
                        hub.lock().unwrap().shutdowns.push(body);
                        AxumStatus::OK
                    },
                ),
            )
            .route(
                "/overlay/start",
                post(|State(hub): State<Shared>| async move {
                    if hub.lock().unwrap().overlay_supported {
                        Ok(Json(serde_json::json!({
                            "scheduler_address": "tcp://127.0.0.1:8786",
                            "dashboard_address": "http://127.0.0.1:8787/status",
                        })))
                    } else {
                        Err(AxumStatus::NOT_IMPLEMENTED)
                    }
                }),
            )
            .route(
                "/overlay/stop",
                post(|State(hub): State<Shared>| async move {
                    hub.lock().unwrap().overlay_stops += 1;
                    AxumStatus::OK
                }),
            )
            .with_state(hub);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr.to_string()
    }

    async fn unused_endpoint() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().to_string()
    }

    #[tokio::test]
    async fn connect_and_list_engines() {
        let hub = Arc::new(Mutex::new(FakeHub {
            ids: vec![0, 1, 2],
            ..Default::default()
        }));
        let endpoint = serve(hub).await;

        let client = HttpRegistryConnector::new()
            .connect_http(&endpoint, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(client.endpoint(), endpoint);
        assert_eq!(client.engine_ids().await.unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn connect_times_out_when_nothing_listens() {
        let endpoint = unused_endpoint().await;
        let err = HttpRegistryConnector::new()
            .with_retry_interval(Duration::from_millis(20))
            .connect_http(&endpoint, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn shutdown_sends_targets_and_hub_flag() {
        let hub = Arc::new(Mutex::new(FakeHub::default()));
        let endpoint = serve(hub.clone()).await;
        let client = HttpRegistryClient::new(&endpoint, Duration::from_secs(5));

        client.shutdown(ShutdownTargets::All, true).await.unwrap();

        let shutdowns = hub.lock().unwrap().shutdowns.clone();
        assert_eq!(shutdowns, vec![serde_json::json!({"targets": "all", "hub": true})]);
    }

    #[tokio::test]
    async fn overlay_round_trip() {
        let hub = Arc::new(Mutex::new(FakeHub {
            overlay_supported: true,
            ..Default::default()
        }));
        let endpoint = serve(hub.clone()).await;
        let client = HttpRegistryClient::new(&endpoint, Duration::from_secs(5));

        let info = client.become_overlay(4).await.unwrap();
        assert_eq!(info.scheduler_address, "tcp://127.0.0.1:8786");
        assert!(info.dashboard_address.is_some());

        client.stop_overlay().await.unwrap();
        assert_eq!(hub.lock().unwrap().overlay_stops, 1);
    }

    #[tokio::test]
    async fn overlay_unsupported_is_reported() {
        let hub = Arc::new(Mutex::new(FakeHub::default()));
        let endpoint = serve(hub).await;
        let client = HttpRegistryClient::new(&endpoint, Duration::from_secs(5));

        let err = client.become_overlay(1).await.unwrap_err();
        assert!(matches!(err, RegistryError::OverlayUnavailable(_)));
    }

    #[tokio::test]
    async fn closed_client_rejects_calls() {
        let hub = Arc::new(Mutex::new(FakeHub::default()));
        let endpoint = serve(hub).await;
        let client = HttpRegistryClient::new(&endpoint, Duration::from_secs(5));

        client.close().await.unwrap();
        client.close().await.unwrap();
        assert!(client.is_closed());
        assert!(matches!(client.engine_ids().await, Err(RegistryError::Closed)));
    }

    #[tokio::test]
    async fn unknown_path_is_status_error() {
        let hub = Arc::new(Mutex::new(FakeHub::default()));
        let endpoint = serve(hub).await;
        let client = HttpRegistryClient::new(&endpoint, Duration::from_secs(5));

        let err = client.call(Method::GET, "/nope", None).await.unwrap_err();
        assert!(matches!(err, RegistryError::Status { status: 404, .. }));
    }
}
