//! Administrative HTTP surface: metrics, health, and record inspection/reset.

use crate::config::PolicyCache;
use crate::errors::{Result, ThrottleError};
use crate::throttler::ThrottlerStorage;
use arc_swap::ArcSwap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Interface the admin server listens on unless `ADMIN_BIND` says otherwise
pub const DEFAULT_ADMIN_BIND: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Routes understood by the admin server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminRoute {
    Metrics,
    Health,
    Config,
    GetRecord(String),
    ResetRecord(String),
    NotFound,
}

/// Parse the request line of a raw HTTP request
pub fn parse_request(request: &str) -> AdminRoute {
    let mut parts = request.lines().next().unwrap_or_default().split_whitespace();
    let (method, path) = match (parts.next(), parts.next()) {
        (Some(method), Some(path)) => (method, path),
        _ => return AdminRoute::NotFound,
    };

    match (method, path) {
        ("GET", "/metrics") | ("GET", "/") => AdminRoute::Metrics,
        ("GET", "/health") => AdminRoute::Health,
        ("GET", "/config") => AdminRoute::Config,
        (method, path) => match path.strip_prefix("/records/") {
            Some(key) if !key.is_empty() => {
                let key = percent_decode(key);
                match method {
                    "GET" => AdminRoute::GetRecord(key),
                    "DELETE" => AdminRoute::ResetRecord(key),
                    _ => AdminRoute::NotFound,
                }
            }
            _ => AdminRoute::NotFound,
        },
    }
}

/// Resolve the listen address from an optional `ADMIN_BIND` value.
///
/// `DELETE /records/<key>` is unauthenticated, so the server stays on loopback
/// unless an interface is named explicitly.
pub fn admin_bind_addr(bind: Option<&str>, port: u16) -> Result<SocketAddr> {
    let ip = match bind.map(str::trim).filter(|b| !b.is_empty()) {
        Some(bind) => bind.parse::<IpAddr>().map_err(|e| {
            ThrottleError::ConfigurationError(format!("Invalid ADMIN_BIND '{}': {}", bind, e))
        })?,
        None => DEFAULT_ADMIN_BIND,
    };
    Ok(SocketAddr::new(ip, port))
}

/// Start the admin server; runs until the listener fails to bind
pub async fn start_admin_server<T: ThrottlerStorage + 'static>(
    addr: SocketAddr,
    throttler: Arc<T>,
    policies: Arc<ArcSwap<PolicyCache>>,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await
        .map_err(|e| ThrottleError::InternalError(
            format!("Failed to bind admin server: {}", e)
        ))?;

    if !addr.ip().is_loopback() {
        warn!("Admin server exposes unauthenticated record resets on {}", addr);
    }
    info!("Admin server listening on http://{}", addr);

    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                let throttler = Arc::clone(&throttler);
                let policies = Arc::clone(&policies);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(socket, throttler.as_ref(), &policies).await {
                        error!("Admin request from {} failed: {}", peer, e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_connection<T: ThrottlerStorage>(
    mut socket: TcpStream,
    throttler: &T,
    policies: &ArcSwap<PolicyCache>,
) -> std::io::Result<()> {
    let mut buffer = [0; 2048];
    let read = socket.read(&mut buffer).await?;
    let request = String::from_utf8_lossy(&buffer[..read]);

    let route = parse_request(&request);
    debug!("Admin request: {:?}", route);

    let response = route_response(route, throttler, policies).await;
    socket.write_all(response.as_bytes()).await
}

async fn route_response<T: ThrottlerStorage>(
    route: AdminRoute,
    throttler: &T,
    policies: &ArcSwap<PolicyCache>,
) -> String {
    match route {
        AdminRoute::Metrics => match crate::metrics::gather_text() {
            Ok(metrics) => http_response(200, "text/plain; version=0.0.4", &metrics),
            Err(e) => {
                error!("Failed to gather metrics: {}", e);
                http_response(500, "text/plain", "")
            }
        },
        AdminRoute::Health => match throttler.health_check().await {
            Ok(()) => http_response(200, "text/plain", "OK"),
            Err(e) => http_response(e.status_code(), "text/plain", &e.to_string()),
        },
        AdminRoute::Config => {
            let config = policies.load().get_full_config();
            match serde_json::to_string(config.as_ref()) {
                Ok(body) => http_response(200, "application/json", &body),
                Err(e) => http_response(500, "text/plain", &e.to_string()),
            }
        }
        AdminRoute::GetRecord(key) => match throttler.get_record(&key).await {
            Some(record) => match serde_json::to_string(&record) {
                Ok(body) => http_response(200, "application/json", &body),
                Err(e) => http_response(500, "text/plain", &e.to_string()),
            },
            None => http_response(404, "text/plain", "No live window for key"),
        },
        AdminRoute::ResetRecord(key) => {
            throttler.reset(&key).await;
            info!(key = %key, "Window counter reset through admin surface");
            http_response(204, "text/plain", "")
        }
        AdminRoute::NotFound => http_response(
            404,
            "text/plain",
            "Try GET /metrics, GET /health, GET /config, GET or DELETE /records/<key>",
        ),
    }
}

fn http_response(status: u16, content_type: &str, body: &str) -> String {
    let reason = match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        503 => "Service Unavailable",
        _ => "Internal Server Error",
    };
    format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        content_type,
        body.len(),
        body
    )
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                decoded.push(byte);
                i += 3;
                continue;
            }
        }
        decoded.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}
