use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use ipnet::IpNet;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tower::{service_fn, ServiceBuilder};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use crate::auth::{apply_auth_penalty, check_basic_auth, Allowlist, AuthOutcome, RpcCredentials};
use crate::methods::{dispatch, MethodError, RpcState};
use crate::types::{RpcRequest, RpcResponse};

/// Configuration for the RPC transport. Field names mirror the
/// `COVENANT_RPC_*` environment variables named in spec §6.
pub struct RpcConfig {
    pub bind_addr: SocketAddr,
    pub credentials: RpcCredentials,
    pub allow_cidrs: Vec<IpNet>,
    pub threads: usize,
    pub tls: Option<TlsFiles>,
}

pub struct TlsFiles {
    pub cert_path: std::path::PathBuf,
    pub key_path: std::path::PathBuf,
}

/// Owns the listener, the worker-pool semaphore, and the shared RPC state.
pub struct RpcServer {
    config: RpcConfig,
    state: Arc<RpcState>,
}

impl RpcServer {
    pub fn new(config: RpcConfig, state: Arc<RpcState>) -> Self {
        Self { config, state }
    }

    fn load_tls_acceptor(tls: &TlsFiles) -> anyhow::Result<TlsAcceptor> {
        let cert_bytes = std::fs::read(&tls.cert_path)?;
        let key_bytes = std::fs::read(&tls.key_path)?;

        let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_bytes.as_slice())
            .collect::<Result<_, _>>()?;
        let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut key_bytes.as_slice())?
            .ok_or_else(|| anyhow::anyhow!("no private key found in {}", tls.key_path.display()))?;

        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)?;
        Ok(TlsAcceptor::from(Arc::new(config)))
    }

    /// Run the accept loop until `shutdown` is signalled. Bails on listener
    /// setup failure, which the node treats as a startup abort.
    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        info!(addr = %self.config.bind_addr, "RPC server listening");

        let tls_acceptor = match &self.config.tls {
            Some(tls) => Some(Self::load_tls_acceptor(tls)?),
            None => None,
        };

        let semaphore = Arc::new(Semaphore::new(self.config.threads));
        let allowlist = Arc::new(Allowlist::new(self.config.allow_cidrs.clone()));
        let credentials = Arc::new(self.config.credentials.clone());
        let state = self.state.clone();
        let under_tls = tls_acceptor.is_some();

        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("RPC server shutting down");
                        return Ok(());
                    }
                    continue;
                }
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "RPC accept failed");
                        continue;
                    }
                },
            };

            if !allowlist.permits(peer_addr.ip()) {
                if under_tls {
                    // Under TLS, silently drop instead of responding, per spec.
                    drop(stream);
                } else {
                    debug!(peer = %peer_addr, "RPC connection rejected by allowlist");
                }
                continue;
            }

            let permit = semaphore.clone().acquire_owned().await;
            let Ok(permit) = permit else { continue };

            let credentials = credentials.clone();
            let state = state.clone();
            let tls_acceptor = tls_acceptor.clone();

            tokio::spawn(async move {
                let _permit = permit;
                let inner = service_fn(move |req| {
                    handle_request(req, credentials.clone(), state.clone())
                });
                let cors = CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any);
                let service =
                    TowerToHyperService::new(ServiceBuilder::new().layer(cors).service(inner));

                let result = match tls_acceptor {
                    Some(acceptor) => match acceptor.accept(stream).await {
                        Ok(tls_stream) => {
                            http1::Builder::new()
                                .serve_connection(TokioIo::new(tls_stream), service)
                                .await
                        }
                        Err(e) => {
                            debug!(error = %e, "TLS handshake failed");
                            return;
                        }
                    },
                    None => {
                        http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .await
                    }
                };

                if let Err(e) = result {
                    debug!(error = %e, "RPC connection error");
                }
            });
        }
    }
}

async fn handle_request(
    req: Request<Incoming>,
    credentials: Arc<RpcCredentials>,
    state: Arc<RpcState>,
) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
    let auth_header = req
        .headers()
        .get(hyper::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    match check_basic_auth(&credentials, auth_header.as_deref()) {
        AuthOutcome::Ok => {}
        AuthOutcome::Failed { penalize } => {
            if penalize {
                apply_auth_penalty().await;
            }
            return Ok(json_error_response(StatusCode::UNAUTHORIZED, -32001, "unauthorized"));
        }
    }

    let body_bytes = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => return Ok(json_error_response(StatusCode::BAD_REQUEST, -32700, "failed to read body")),
    };

    let parsed: Value = match serde_json::from_slice(&body_bytes) {
        Ok(v) => v,
        Err(e) => {
            return Ok(json_error_response(StatusCode::BAD_REQUEST, -32700, format!("parse error: {e}")));
        }
    };

    // Batching: a JSON array runs every entry independently and always
    // reports HTTP 200 with the per-entry results/errors concatenated.
    // A single (non-batch) request surfaces its own HTTP status.
    let (status, response_value) = if parsed.is_array() {
        let requests: Vec<RpcRequest> = match serde_json::from_value(parsed) {
            Ok(r) => r,
            Err(e) => {
                return Ok(json_error_response(StatusCode::BAD_REQUEST, -32600, format!("invalid batch: {e}")));
            }
        };
        let mut responses = Vec::with_capacity(requests.len());
        for request in requests {
            let (_, resp) = handle_one(&state, request).await;
            responses.push(serde_json::to_value(resp).unwrap());
        }
        (StatusCode::OK, Value::Array(responses))
    } else {
        let request: RpcRequest = match serde_json::from_value(parsed) {
            Ok(r) => r,
            Err(e) => {
                return Ok(json_error_response(StatusCode::BAD_REQUEST, -32600, format!("invalid request: {e}")));
            }
        };
        let (status, resp) = handle_one(&state, request).await;
        (status, serde_json::to_value(resp).unwrap())
    };

    let body = serde_json::to_vec(&response_value).unwrap_or_default();
    Ok(Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap())
}

async fn handle_one(state: &Arc<RpcState>, request: RpcRequest) -> (StatusCode, RpcResponse) {
    if request.method.is_empty() {
        return (StatusCode::BAD_REQUEST, RpcResponse::err(-32600, "missing method", request.id));
    }
    match dispatch(state, &request.method, &request.params).await {
        Ok(result) => (StatusCode::OK, RpcResponse::ok(result, request.id)),
        Err(MethodError::NotFound(m)) => (
            StatusCode::NOT_FOUND,
            RpcResponse::err(-32601, format!("method not found: {m}"), request.id),
        ),
        Err(MethodError::InvalidParams(m)) => (
            StatusCode::BAD_REQUEST,
            RpcResponse::err(-32602, m, request.id),
        ),
        Err(MethodError::Internal(m)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            RpcResponse::err(-32603, m, request.id),
        ),
    }
}

fn json_error_response(status: StatusCode, code: i32, message: impl Into<String>) -> Response<Full<Bytes>> {
    let body = RpcResponse::err(code, message, Value::Null);
    let bytes = serde_json::to_vec(&body).unwrap_or_default();
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(bytes)))
        .unwrap()
}
