//! HTTP/1 front end for the plugin endpoint

use std::{convert::Infallible, net::SocketAddr, time::Instant};

use anyhow::{Context, Result};
use bytes::Bytes;
use http::{header, HeaderValue, Method, StatusCode};
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::{body::Incoming, service::service_fn, Request, Response};
use hyper_util::rt::TokioIo;
use tokio::{net::TcpListener, sync::watch};
use tracing::Instrument;

use crate::endpoint::{PluginEndpoint, PluginQuery, TextResponse, CONTENT_TYPE};

/// A bound listener serving one endpoint
pub struct Server {
    listener: TcpListener,
    endpoint: PluginEndpoint,
}

impl Server {
    pub async fn bind(addr: SocketAddr, endpoint: PluginEndpoint) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        Ok(Self { listener, endpoint })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until Ctrl+C
    pub async fn run(self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = tokio::spawn(self.serve(shutdown_rx));

        tokio::signal::ctrl_c()
            .await
            .context("failed to install ctrl-c handler")?;
        tracing::info!("shutdown signal received");
        shutdown_tx.send(true).ok();

        server.await.context("server task aborted")?
    }

    /// Serve until `shutdown` flips
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr = self.local_addr()?;
        tracing::info!(%addr, "listening");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    tracing::info!(%addr, "listener shutting down");
                    break;
                }
                accept = self.listener.accept() => {
                    let (stream, peer_addr) = accept?;
                    let endpoint = self.endpoint.clone();
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(endpoint, stream, peer_addr).await {
                            tracing::warn!(error = %err, "connection closed with error");
                        }
                    });
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection(
    endpoint: PluginEndpoint,
    stream: tokio::net::TcpStream,
    peer_addr: SocketAddr,
) -> Result<()> {
    let service = service_fn(move |req| {
        let endpoint = endpoint.clone();
        async move { Ok::<_, Infallible>(handle_request(endpoint, req).await) }
    });
    http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .await
        .with_context(|| format!("connection handling failed for {peer_addr}"))
}

async fn handle_request(endpoint: PluginEndpoint, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let start = Instant::now();
    let span = tracing::info_span!(
        "request",
        method = %req.method(),
        path = %req.uri().path(),
        status = tracing::field::Empty,
        duration_ms = tracing::field::Empty,
    );

    async move {
        let response = if req.method() != Method::GET {
            TextResponse {
                status: StatusCode::METHOD_NOT_ALLOWED,
                body: "method not allowed".to_string(),
            }
        } else {
            match PluginQuery::parse(req.uri().query()) {
                // Plugin calls and reload checks block
                Ok(query) => tokio::task::spawn_blocking(move || endpoint.handle(&query))
                    .await
                    .unwrap_or_else(|err| {
                        tracing::error!(error = %err, "request handling failed");
                        TextResponse::internal_error()
                    }),
                Err(err) => TextResponse::bad_request(err),
            }
        };

        let span = tracing::Span::current();
        span.record("status", response.status.as_u16());
        span.record("duration_ms", start.elapsed().as_millis() as u64);
        tracing::debug!("request complete");

        text_response(response)
    }
    .instrument(span)
    .await
}

fn text_response(response: TextResponse) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(Bytes::from(response.body)));
    *resp.status_mut() = response.status;
    resp.headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE));
    resp
}
