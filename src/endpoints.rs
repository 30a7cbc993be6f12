//! Endpoint server exposing metrics and health checks.

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::metrics::Metrics;

/// Serve `/metrics` (Prometheus text exposition) and `/health` on `port`.
///
/// Runs until the task is dropped. Connections are handled one request
/// each; scrapers and load balancer probes do not keep-alive here.
pub async fn endpoint_server(port: u16) -> Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    tracing::info!(addr = %addr, "Monitoring endpoint listening");

    loop {
        match listener.accept().await {
            Ok((socket, _peer)) => {
                tokio::spawn(handle_connection(socket));
            }
            Err(e) => {
                tracing::error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_connection(mut socket: TcpStream) {
    let mut buf = [0u8; 1024];
    match socket.read(&mut buf).await {
        Ok(n) => {
            let request = String::from_utf8_lossy(&buf[..n]);
            let response = route(request_path(&request));
            let _ = socket.write_all(response.as_bytes()).await;
        }
        Err(e) => {
            tracing::error!("Failed to read from socket: {}", e);
        }
    }
}

fn route(path: &str) -> String {
    match path {
        "/metrics" => http_response(
            "200 OK",
            "text/plain; version=0.0.4",
            &Metrics::global().render(),
        ),
        "/health" => http_response("200 OK", "application/json", "{\"status\":\"ok\"}"),
        _ => http_response("404 Not Found", "text/plain", "not found"),
    }
}

/// Path component of the request line, query string stripped.
fn request_path(request: &str) -> &str {
    request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .map(|target| target.split('?').next().unwrap_or(target))
        .unwrap_or("/")
}

fn http_response(status: &str, content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body
    )
}
