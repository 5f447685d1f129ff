// ABOUTME: HTTP health probe over a raw hyper HTTP/1.1 connection.
// ABOUTME: One connection per probe; transport errors become failed results.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use http_body_util::{BodyExt, Empty};
use hyper_util::rt::TokioIo;
use std::time::Instant;
use tokio::net::TcpStream;

use crate::deploy::{Probe, ProbeResult, ProbeTarget};

/// Probes plain `http://` endpoints.
#[derive(Debug, Clone, Default)]
pub struct HttpProbe;

impl HttpProbe {
    pub fn new() -> Self {
        Self
    }

    async fn get(&self, target: &ProbeTarget) -> Result<(u16, Option<String>), String> {
        let uri: hyper::Uri = target
            .url
            .parse()
            .map_err(|e| format!("invalid url {}: {}", target.url, e))?;
        if uri.scheme_str() != Some("http") {
            return Err(format!("unsupported url scheme: {}", target.url));
        }
        let host = uri
            .host()
            .ok_or_else(|| format!("url has no host: {}", target.url))?;
        let port = uri.port_u16().unwrap_or(80);

        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| format!("connect {}:{}: {}", host, port, e))?;
        let io = TokioIo::new(stream);

        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| format!("HTTP handshake failed: {}", e))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!("probe connection error: {}", e);
            }
        });

        let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
        let host_header = match (&target.host_header, uri.authority()) {
            (Some(h), _) => h.clone(),
            (None, Some(authority)) => authority.to_string(),
            (None, None) => host.to_string(),
        };

        let req = hyper::Request::builder()
            .method("GET")
            .uri(path)
            .header(hyper::header::HOST, host_header)
            .header(hyper::header::USER_AGENT, concat!("switchyard/", env!("CARGO_PKG_VERSION")))
            .body(Empty::<Bytes>::new())
            .map_err(|e| format!("failed to build request: {}", e))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        let status = resp.status().as_u16();
        let served_by = target.slot_header.as_ref().and_then(|name| {
            resp.headers()
                .get(name.as_str())
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
        });

        // Drain the body so the server sees a complete exchange.
        let _ = resp.into_body().collect().await;

        Ok((status, served_by))
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, target: &ProbeTarget) -> ProbeResult {
        let started = Instant::now();
        match self.get(target).await {
            Ok((status, served_by)) => ProbeResult {
                timestamp: Utc::now(),
                success: target.accepts(status, served_by.as_deref()),
                latency: started.elapsed(),
                raw_status: status.to_string(),
                served_by,
            },
            Err(e) => ProbeResult::transport_error(started.elapsed(), e),
        }
    }
}
