//! Viewing and browsing surface.
//!
//! Small hand-rolled HTTP server over `TcpListener`:
//!
//! - `GET /live`: the most recent frames as a continuous
//!   `multipart/x-mixed-replace` JPEG sequence;
//! - `GET /snapshots`: JSON listing of saved snapshots, newest first, with
//!   capture timestamps parsed from filenames;
//! - `GET /snapshots/<name>`: one saved snapshot by name;
//! - `GET /health`: liveness probe.
//!
//! The surface is unauthenticated by design and keeps serving frames even
//! while a recording session is failing in the background. Each connection
//! runs on its own thread so a long-lived stream never stalls the accept
//! loop.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::codec;
use crate::frame::LiveFrameSlot;
use crate::storage;

const MAX_REQUEST_BYTES: usize = 8192;
const STREAM_BOUNDARY: &str = "frame";

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    /// Frame rate of the live stream.
    pub stream_fps: u32,
    pub jpeg_quality: u8,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:5000".to_string(),
            stream_fps: 20,
            jpeg_quality: 80,
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

struct ApiContext {
    config: ApiConfig,
    slot: Arc<LiveFrameSlot>,
    image_dir: PathBuf,
    shutdown: Arc<AtomicBool>,
}

pub struct ApiServer {
    config: ApiConfig,
    slot: Arc<LiveFrameSlot>,
    image_dir: PathBuf,
}

impl ApiServer {
    pub fn new(config: ApiConfig, slot: Arc<LiveFrameSlot>, image_dir: PathBuf) -> Self {
        Self {
            config,
            slot,
            image_dir,
        }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.config.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let ctx = Arc::new(ApiContext {
            config: self.config,
            slot: self.slot,
            image_dir: self.image_dir,
            shutdown: Arc::clone(&shutdown),
        });
        let join = std::thread::spawn(move || run_api(listener, ctx));

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(listener: TcpListener, ctx: Arc<ApiContext>) {
    loop {
        if ctx.shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                let ctx = Arc::clone(&ctx);
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &ctx) {
                        log::debug!("viewer connection closed: {err:#}");
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => {
                log::error!("viewer accept failed: {err}");
                break;
            }
        }
    }
}

fn handle_connection(mut stream: TcpStream, ctx: &ApiContext) -> Result<()> {
    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        return write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#);
    }

    match request.path.as_str() {
        "/health" => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        "/live" => stream_live(stream, ctx),
        "/snapshots" => {
            let listing = storage::list_snapshots(&ctx.image_dir)?;
            let payload = serde_json::to_vec(&listing)?;
            write_response(&mut stream, 200, "application/json", &payload)
        }
        path => match path.strip_prefix("/snapshots/") {
            Some(name) => serve_snapshot(&mut stream, ctx, name),
            None => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
        },
    }
}

/// Push the live slot as a multipart JPEG sequence until the client drops or
/// the server stops.
fn stream_live(mut stream: TcpStream, ctx: &ApiContext) -> Result<()> {
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary={STREAM_BOUNDARY}\r\nCache-Control: no-store\r\n\r\n"
    );
    stream.write_all(header.as_bytes())?;

    let interval = if ctx.config.stream_fps == 0 {
        Duration::from_millis(50)
    } else {
        Duration::from_millis((1000 / ctx.config.stream_fps).max(1) as u64)
    };

    loop {
        if ctx.shutdown.load(Ordering::SeqCst) {
            break;
        }
        if let Some(frame) = ctx.slot.latest() {
            let jpeg = codec::encode_jpeg(&frame, ctx.config.jpeg_quality)?;
            let part = format!(
                "--{STREAM_BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
                jpeg.len()
            );
            stream.write_all(part.as_bytes())?;
            stream.write_all(&jpeg)?;
            stream.write_all(b"\r\n")?;
        }
        std::thread::sleep(interval);
    }
    Ok(())
}

fn serve_snapshot(stream: &mut TcpStream, ctx: &ApiContext, name: &str) -> Result<()> {
    if !is_safe_filename(name) {
        return write_json_response(stream, 400, r#"{"error":"bad_filename"}"#);
    }
    let path = ctx.image_dir.join(name);
    match std::fs::read(&path) {
        Ok(bytes) => {
            let content_type = if name.ends_with(".jpg") || name.ends_with(".jpeg") {
                "image/jpeg"
            } else {
                "application/octet-stream"
            };
            write_response(stream, 200, content_type, &bytes)
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            write_json_response(stream, 404, r#"{"error":"not_found"}"#)
        }
        Err(err) => Err(err.into()),
    }
}

/// Plain file names only; no separators, no parent traversal.
fn is_safe_filename(name: &str) -> bool {
    !name.is_empty()
        && !name.contains(['/', '\\'])
        && !name.contains("..")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
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

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\n\r\n",
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
