//! Local HTTP gateway.
//!
//! Exposes the published detection state and the message log as four
//! read-only GET endpoints. The accept loop runs on its own thread; each
//! accepted connection is served on a short-lived handler thread so image
//! responses never serialize behind JSON responses or the capture worker.
//!
//! Handlers receive an explicit `GatewayContext` captured at spawn time.
//! They read shared state once per request and never mutate it.

use std::fs::File;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;

use crate::state::{MessageLog, SharedState};

const MAX_REQUEST_BYTES: usize = 8192;
const INDEX_CHUNK_BYTES: usize = 1024;

const FALLBACK_INDEX_HTML: &str =
    "<html><body><h1>Pedestrian Sentinel</h1><p>Could not load index.html</p></body></html>";
const NO_FRAME_PLACEHOLDER: &str = "No detection image available yet";
const EMPTY_LOG_PLACEHOLDER: &str = "[System] No messages yet.";

const CORS_ANY: (&str, &str) = ("Access-Control-Allow-Origin", "*");
const NO_CACHE: [(&str, &str); 2] = [
    ("Cache-Control", "no-store, must-revalidate"),
    ("Pragma", "no-cache"),
];

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub addr: String,
    pub index_path: PathBuf,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
            index_path: PathBuf::from("assets/index.html"),
        }
    }
}

/// Everything a handler needs, captured explicitly at spawn time.
#[derive(Clone)]
pub struct GatewayContext {
    pub state: SharedState,
    pub messages: MessageLog,
    pub index_path: PathBuf,
}

#[derive(Debug)]
pub struct GatewayHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl GatewayHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("gateway thread panicked"))?;
        }
        Ok(())
    }
}

pub struct Gateway {
    cfg: GatewayConfig,
    ctx: GatewayContext,
}

impl Gateway {
    pub fn new(cfg: GatewayConfig, state: SharedState, messages: MessageLog) -> Self {
        let ctx = GatewayContext {
            state,
            messages,
            index_path: cfg.index_path.clone(),
        };
        Self { cfg, ctx }
    }

    pub fn spawn(self) -> Result<GatewayHandle> {
        let listener = TcpListener::bind(&self.cfg.addr)
            .with_context(|| format!("bind http gateway on {}", self.cfg.addr))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let ctx = Arc::new(self.ctx);
        let join = std::thread::spawn(move || {
            if let Err(err) = run_gateway(listener, ctx, shutdown_thread) {
                log::error!("http gateway stopped: {}", err);
            }
        });

        Ok(GatewayHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_gateway(
    listener: TcpListener,
    ctx: Arc<GatewayContext>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                let ctx = ctx.clone();
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &ctx) {
                        log::warn!("gateway request failed: {}", err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, ctx: &GatewayContext) -> Result<()> {
    // The listener is nonblocking; the per-request stream must not be.
    stream.set_nonblocking(false)?;
    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        return write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#);
    }
    match request.path.as_str() {
        "/" => serve_index(&mut stream, ctx),
        "/stream" => serve_stream(&mut stream, ctx),
        "/system-messages" => serve_system_messages(&mut stream, ctx),
        "/detection-data" => serve_detection_data(&mut stream, ctx),
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

/// `/` streams the index asset in chunks; a missing asset degrades to a
/// fixed fallback fragment rather than an error.
fn serve_index(stream: &mut TcpStream, ctx: &GatewayContext) -> Result<()> {
    log::debug!("serving index page");
    let mut file = match File::open(&ctx.index_path) {
        Ok(file) => file,
        Err(err) => {
            log::error!(
                "failed to open {}: {}",
                ctx.index_path.display(),
                err
            );
            return write_response(stream, 200, "text/html", &[], FALLBACK_INDEX_HTML.as_bytes());
        }
    };

    stream.write_all(
        b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nTransfer-Encoding: chunked\r\nCache-Control: no-store\r\n\r\n",
    )?;
    let mut buf = [0u8; INDEX_CHUNK_BYTES];
    loop {
        let read = file.read(&mut buf).context("read index asset")?;
        if read == 0 {
            break;
        }
        write!(stream, "{:x}\r\n", read)?;
        stream.write_all(&buf[..read])?;
        stream.write_all(b"\r\n")?;
    }
    stream.write_all(b"0\r\n\r\n")?;
    Ok(())
}

/// `/stream` answers the current published frame, or a plain-text
/// placeholder before the first publish. Never cached.
fn serve_stream(stream: &mut TcpStream, ctx: &GatewayContext) -> Result<()> {
    let image = ctx.state.read().and_then(|data| data.image.clone());
    match image {
        Some(image) => write_response(stream, 200, "image/jpeg", &NO_CACHE, &image.jpeg),
        None => write_response(
            stream,
            200,
            "text/plain",
            &NO_CACHE,
            NO_FRAME_PLACEHOLDER.as_bytes(),
        ),
    }
}

fn serve_system_messages(stream: &mut TcpStream, ctx: &GatewayContext) -> Result<()> {
    log::debug!("serving system messages");
    let mut messages = ctx.messages.snapshot();
    if messages.is_empty() {
        messages.push(EMPTY_LOG_PLACEHOLDER.to_string());
    }
    let payload = match serde_json::to_vec(&messages) {
        Ok(payload) => payload,
        Err(err) => {
            log::error!("failed to encode system messages: {}", err);
            return write_server_error(stream);
        }
    };
    write_response(stream, 200, "application/json", &[CORS_ANY], &payload)
}

fn serve_detection_data(stream: &mut TcpStream, ctx: &GatewayContext) -> Result<()> {
    let payload = match render_detection_data(&ctx.state) {
        Ok(payload) => payload,
        Err(err) => {
            log::error!("failed to render detection data: {}", err);
            return write_server_error(stream);
        }
    };
    write_response(stream, 200, "application/json", &[CORS_ANY], &payload)
}

#[derive(Serialize)]
struct DetectionDataBody {
    timestamp: u64,
    image: Option<ImageBody>,
    detections: Vec<DetectionBody>,
}

#[derive(Serialize)]
struct ImageBody {
    width: u32,
    height: u32,
    format: &'static str,
}

#[derive(Serialize)]
struct DetectionBody {
    class: String,
    score: f32,
    /// `[x1, y1, x2, y2]`, truncated to integers.
    bbox_absolute: [i64; 4],
}

fn render_detection_data(state: &SharedState) -> Result<Vec<u8>> {
    let body = match state.read() {
        Some(data) => DetectionDataBody {
            timestamp: data.timestamp_ms,
            image: data.image.as_ref().map(|image| ImageBody {
                width: image.width,
                height: image.height,
                format: "jpeg",
            }),
            detections: data
                .boxes
                .iter()
                .map(|b| DetectionBody {
                    class: b.label.as_str().to_string(),
                    score: b.score,
                    bbox_absolute: [b.x1 as i64, b.y1 as i64, b.x2 as i64, b.y2 as i64],
                })
                .collect(),
        },
        None => DetectionDataBody {
            timestamp: 0,
            image: None,
            detections: Vec::new(),
        },
    };
    serde_json::to_vec(&body).context("encode detection data")
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let request_line = text
        .split("\r\n")
        .next()
        .ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
    })
}

fn write_server_error(stream: &mut TcpStream) -> Result<()> {
    write_response(
        stream,
        500,
        "application/json",
        &[CORS_ANY],
        br#"{"error":"internal_server_error"}"#,
    )
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", &[], body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    extra_headers: &[(&str, &str)],
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let mut header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    for (name, value) in extra_headers {
        header.push_str(name);
        header.push_str(": ");
        header.push_str(value);
        header.push_str("\r\n");
    }
    header.push_str("\r\n");
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
}
