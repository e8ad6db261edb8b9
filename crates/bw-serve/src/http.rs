// HTTP front end - minimal HTTP/1.1 over tokio TCP
// One request per connection, JSON in and out (Prometheus text on /metrics).

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, error};

use bw_types::BwError;

use crate::metrics;
use crate::service::PredictionService;

/// Largest request head or body accepted.
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Json(serde_json::Value),
    Metrics(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Body,
}

impl HttpResponse {
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Self {
            status,
            body: Body::Json(body),
        }
    }

    fn detail(status: u16, detail: impl Into<String>) -> Self {
        Self::json(status, json!({ "detail": detail.into() }))
    }

    fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            400 => "Bad Request",
            404 => "Not Found",
            405 => "Method Not Allowed",
            413 => "Payload Too Large",
            422 => "Unprocessable Entity",
            _ => "Internal Server Error",
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let (content_type, body) = match &self.body {
            Body::Json(value) => ("application/json", value.to_string()),
            Body::Metrics(text) => (metrics::CONTENT_TYPE, text.clone()),
        };
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.status,
            self.reason(),
            content_type,
            body.len(),
            body
        )
        .into_bytes()
    }
}

/// Dispatch one parsed request.
pub fn route(service: &PredictionService, method: &str, path: &str, body: &[u8]) -> HttpResponse {
    let path = path.split('?').next().unwrap_or(path);
    match (method, path) {
        ("GET", "/") => HttpResponse::json(
            200,
            json!({ "message": "Welcome to the Iris Classifier API!" }),
        ),
        ("GET", "/health") => HttpResponse::json(
            200,
            json!({
                "status": "ok",
                "service": "bw-serve",
                "model_version": service.model_version(),
            }),
        ),
        ("GET", "/metrics") => HttpResponse {
            status: 200,
            body: Body::Metrics(service.metrics().render(&service.model_version())),
        },
        ("POST", "/predict") => match service.predict_body(body) {
            Ok(prediction) => HttpResponse::json(200, json!({ "prediction": prediction.prediction })),
            Err(BwError::Data(e)) => HttpResponse::detail(422, e.to_string()),
            Err(e) => {
                error!("Prediction failed: {}", e);
                HttpResponse::detail(500, "prediction failed")
            }
        },
        (_, "/" | "/health" | "/predict" | "/metrics") => HttpResponse::detail(405, "Method Not Allowed"),
        _ => HttpResponse::detail(404, "Not Found"),
    }
}

struct Request {
    method: String,
    path: String,
    body: Vec<u8>,
}

/// Serve a single request on `stream` and close it.
pub async fn handle_connection<S>(mut stream: S, service: Arc<PredictionService>) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let response = match read_request(&mut stream).await? {
        Ok(request) => {
            debug!("{} {}", request.method, request.path);
            let started = Instant::now();
            let response = route(&service, &request.method, &request.path, &request.body);
            service.metrics().record_request(
                &request.method,
                &request.path,
                response.status,
                started.elapsed(),
            );
            response
        }
        Err(rejection) => {
            service
                .metrics()
                .record_request("", "", rejection.status, Duration::ZERO);
            rejection
        }
    };
    stream.write_all(&response.to_bytes()).await?;
    stream.shutdown().await
}

/// Accept connections forever, one task per connection.
pub async fn serve(listener: TcpListener, service: Arc<PredictionService>) -> io::Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, service).await {
                debug!("Connection from {} ended with error: {}", peer, e);
            }
        });
    }
}

async fn read_request<S>(stream: &mut S) -> io::Result<Result<Request, HttpResponse>>
where
    S: AsyncRead + Unpin,
{
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    let header_end = loop {
        if let Some(pos) = find_header_end(&buffer) {
            break pos;
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(Err(HttpResponse::detail(400, "incomplete request")));
        }
        if buffer.len() + n > MAX_REQUEST_BYTES {
            return Ok(Err(HttpResponse::detail(413, "request head too large")));
        }
        buffer.extend_from_slice(&chunk[..n]);
    };

    let Ok(head) = std::str::from_utf8(&buffer[..header_end]) else {
        return Ok(Err(HttpResponse::detail(400, "request head is not UTF-8")));
    };
    let (method, path, content_length) = match parse_head(head) {
        Ok(parts) => parts,
        Err(rejection) => return Ok(Err(rejection)),
    };
    if content_length > MAX_REQUEST_BYTES {
        return Ok(Err(HttpResponse::detail(413, "request body too large")));
    }

    let body_start = header_end + 4;
    while buffer.len() < body_start + content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(Err(HttpResponse::detail(400, "body shorter than Content-Length")));
        }
        buffer.extend_from_slice(&chunk[..n]);
    }

    Ok(Ok(Request {
        method,
        path,
        body: buffer[body_start..body_start + content_length].to_vec(),
    }))
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_head(head: &str) -> Result<(String, String, usize), HttpResponse> {
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let (Some(method), Some(path), Some(_version)) =
        (request_line.next(), request_line.next(), request_line.next())
    else {
        return Err(HttpResponse::detail(400, "malformed request line"));
    };

    let mut content_length = 0;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value
                    .trim()
                    .parse()
                    .map_err(|_| HttpResponse::detail(400, "invalid Content-Length"))?;
            }
        }
    }
    Ok((method.to_string(), path.to_string(), content_length))
}
