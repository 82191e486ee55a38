//! Snapshot HTTP endpoint
//!
//! `GET /api/location` answers with the current snapshot as JSON and
//! `GET /health` with `ok`. Uses hyper for the HTTP server.

use crate::domain::time::epoch_secs;
use crate::services::snapshot::SnapshotBuilder;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

/// Handle HTTP requests
async fn handle_request<B>(
    req: Request<B>,
    builder: Arc<SnapshotBuilder>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/api/location") => {
            let encoded = builder
                .build(epoch_secs())
                .await
                .and_then(|snapshot| serde_json::to_vec(&snapshot).map_err(anyhow::Error::from));
            match encoded {
                Ok(body) => Ok(respond(StatusCode::OK, "application/json", body)),
                Err(e) => {
                    error!(error = %format!("{:#}", e), "snapshot_failed");
                    Ok(respond(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "application/json",
                        r#"{"error":"snapshot_unavailable"}"#,
                    ))
                }
            }
        }
        (&Method::GET, "/health") => Ok(respond(StatusCode::OK, "text/plain; charset=utf-8", "ok")),
        _ => Ok(respond(StatusCode::NOT_FOUND, "text/plain; charset=utf-8", "Not Found")),
    }
}

/// Start the snapshot HTTP server
pub async fn start_api_server(
    port: u16,
    builder: Arc<SnapshotBuilder>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(port = %port, "api_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let builder = builder.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let builder = builder.clone();
                                async move { handle_request(req, builder).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "api_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "api_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("api_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
