// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Local HTTP interface of the standalone agent.
//!
//! `POST /report` takes one JSON metric report. The response is `200` once the agent accepted
//! the report, or `500` with the error text in the body.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http_body_util::{BodyExt, Full, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{http, Method, Request, Response, StatusCode};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use metering_agent::Agent;

pub const REPORT_PATH: &str = "/report";
pub const DEFAULT_LOCAL_PORT: u16 = 3456;

const MAX_BODY_BYTES: usize = 1024 * 1024;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Binds the report listener on the loopback interface. Port 0 picks a free port.
pub async fn bind(port: u16) -> io::Result<TcpListener> {
    TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port))).await
}

/// Serves reports into `agent` until `cancel` fires. In-flight requests get a short grace period
/// to finish before their connections are dropped.
pub async fn serve(
    listener: TcpListener,
    agent: Arc<Agent>,
    cancel: CancellationToken,
) -> io::Result<()> {
    let service = service_fn(move |req: Request<Incoming>| {
        let agent = Arc::clone(&agent);
        async move { handle(req, &agent).await }
    });
    let server = hyper::server::conn::http1::Builder::new();
    let mut joinset = tokio::task::JoinSet::new();

    loop {
        let conn = tokio::select! {
            () = cancel.cancelled() => break,
            con_res = listener.accept() => match con_res {
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionAborted
                            | io::ErrorKind::ConnectionReset
                            | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    error!("Report server error: {e}");
                    return Err(e);
                }
                Ok((conn, _)) => conn,
            },
            finished = async {
                match joinset.join_next().await {
                    Some(finished) => finished,
                    None => std::future::pending().await,
                }
            } => match finished {
                Err(e) if e.is_panic() => {
                    error!("Connection handler panicked: {e:?}");
                    continue;
                }
                Ok(()) | Err(_) => continue,
            },
        };
        let conn = hyper_util::rt::TokioIo::new(conn);
        let server = server.clone();
        let service = service.clone();
        joinset.spawn(async move {
            if let Err(e) = server.serve_connection(conn, service).await {
                debug!("Connection error: {e}");
            }
        });
    }

    debug!("Report server stopping");
    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        while joinset.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        debug!("Dropping {} open connections", joinset.len());
    }
    Ok(())
}

async fn handle(req: Request<Incoming>, agent: &Agent) -> http::Result<Response<Full<Bytes>>> {
    if req.uri().path() != REPORT_PATH {
        return respond(StatusCode::NOT_FOUND, "not found");
    }
    if req.method() != Method::POST {
        return respond(StatusCode::METHOD_NOT_ALLOWED, "only POST is supported");
    }

    let body = match Limited::new(req.into_body(), MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => return respond(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    };
    let text = match std::str::from_utf8(&body) {
        Ok(text) => text,
        Err(e) => return respond(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    };

    match agent.add_report_json(text).await {
        Ok(()) => respond(StatusCode::OK, ""),
        Err(e) => {
            debug!("Rejected report: {e}");
            respond(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

fn respond(status: StatusCode, body: &str) -> http::Result<Response<Full<Bytes>>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_picks_free_port() {
        let listener = bind(0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
    }
}
