//! HTTP endpoint for identity reconciliation.

use anyhow::Result;
use serde::{Deserialize, Deserializer, Serialize};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::identify::IdentifyResponse;
use crate::config::Config;
use crate::models::Observation;
use crate::reconcile::{ErrorKind, IdentifyError, Reconciler};

/// Requests with larger bodies are refused.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Body of `POST /identify`. `phoneNumber` may arrive as a JSON number.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub phone_number: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "phoneNumber must be a string or number, got {}",
            other
        ))),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub contacts: u32,
    pub uptime_secs: u64,
}

/// A response ready to be written to the socket.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    fn json<T: Serialize>(status: u16, body: &T) -> Self {
        match serde_json::to_string(body) {
            Ok(body) => Self { status, body },
            Err(e) => Self::error(500, format!("serialization failed: {}", e)),
        }
    }

    fn error(status: u16, message: impl Into<String>) -> Self {
        let body = serde_json::json!({ "error": message.into() }).to_string();
        Self { status, body }
    }
}

pub struct IdentifyServer {
    config: Config,
    reconciler: Reconciler,
    start_time: Instant,
}

impl IdentifyServer {
    pub fn new(config: Config) -> Result<Self> {
        // Fail early if the database cannot be opened
        let db = config.open_database()?;
        let count = db.count_contacts()?;
        info!(path = %config.db_path.display(), contacts = count, "contact store ready");

        Ok(Self {
            reconciler: config.reconciler(),
            config,
            start_time: Instant::now(),
        })
    }

    /// Accept connections until `shutdown` is set. Each connection is served
    /// on its own thread with its own database connection.
    pub fn start(self: Arc<Self>, shutdown: Arc<AtomicBool>) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.config.port))?;
        listener.set_nonblocking(true)?;

        info!(port = self.config.port, "identify server listening");

        while !shutdown.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, peer_addr)) => {
                    let server = Arc::clone(&self);
                    std::thread::spawn(move || {
                        if let Err(e) = server.handle_connection(stream, peer_addr) {
                            warn!(peer = %peer_addr, error = %e, "request error");
                        }
                    });
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(e) => {
                    error!(error = %e, "accept error");
                }
            }
        }

        info!("identify server stopped");
        Ok(())
    }

    fn handle_connection(&self, mut stream: TcpStream, peer_addr: SocketAddr) -> Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(Duration::from_secs(30)))?;
        stream.set_write_timeout(Some(Duration::from_secs(30)))?;

        let mut reader = BufReader::new(stream.try_clone()?);
        let mut request_line = String::new();
        reader.read_line(&mut request_line)?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() < 2 {
            return self.send_response(&mut stream, HttpResponse::error(400, "Bad Request"));
        }
        let (method, path) = (parts[0], parts[1]);

        let mut content_length = 0usize;
        loop {
            let mut header_line = String::new();
            reader.read_line(&mut header_line)?;
            let header_line = header_line.trim();
            if header_line.is_empty() {
                break;
            }
            if let Some((key, value)) = header_line.split_once(':') {
                if key.trim().eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
            }
        }

        if content_length > MAX_BODY_BYTES {
            return self.send_response(&mut stream, HttpResponse::error(413, "Payload Too Large"));
        }

        let mut body = vec![0u8; content_length];
        if content_length > 0 {
            reader.read_exact(&mut body)?;
        }

        let started = Instant::now();
        let response = self.handle_request(method, path, &body);
        debug!(
            peer = %peer_addr,
            method,
            path,
            status = response.status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "handled request"
        );
        self.send_response(&mut stream, response)
    }

    /// Route one parsed request.
    pub fn handle_request(&self, method: &str, path: &str, body: &[u8]) -> HttpResponse {
        match (method, path) {
            ("POST", "/identify") => self.handle_identify(body),
            ("GET", "/health") => self.handle_health(),
            _ => HttpResponse::error(404, "Not Found"),
        }
    }

    fn handle_identify(&self, body: &[u8]) -> HttpResponse {
        let request: IdentifyRequest = match serde_json::from_slice(body) {
            Ok(request) => request,
            Err(e) => return HttpResponse::error(400, format!("invalid request body: {}", e)),
        };
        let observation = Observation::new(request.email, request.phone_number);
        if observation.is_empty() {
            return HttpResponse::error(400, IdentifyError::InvalidInput.to_string());
        }

        let mut db = match self.config.open_database() {
            Ok(db) => db,
            Err(e) => {
                error!(error = %e, "could not open contact store");
                return HttpResponse::error(500, "contact store unavailable");
            }
        };

        match self.reconciler.reconcile(&mut db, &observation) {
            Ok(view) => HttpResponse::json(200, &IdentifyResponse { contact: &view }),
            Err(e) => match e.kind() {
                ErrorKind::InvalidInput => HttpResponse::error(400, e.to_string()),
                ErrorKind::StoreFailure => {
                    error!(error = %e, "identify failed");
                    HttpResponse::error(500, "internal error")
                }
            },
        }
    }

    fn handle_health(&self) -> HttpResponse {
        let contacts = match self
            .config
            .open_database()
            .and_then(|db| Ok(db.count_contacts()?))
        {
            Ok(count) => count,
            Err(e) => {
                error!(error = %e, "health check failed");
                return HttpResponse::error(500, "contact store unavailable");
            }
        };

        HttpResponse::json(
            200,
            &HealthResponse {
                status: "ok".to_string(),
                contacts,
                uptime_secs: self.start_time.elapsed().as_secs(),
            },
        )
    }

    fn send_response(&self, stream: &mut TcpStream, response: HttpResponse) -> Result<()> {
        let status_text = match response.status {
            200 => "OK",
            400 => "Bad Request",
            404 => "Not Found",
            413 => "Payload Too Large",
            500 => "Internal Server Error",
            _ => "Unknown",
        };

        let raw = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            response.status,
            status_text,
            response.body.len(),
            response.body
        );

        stream.write_all(raw.as_bytes())?;
        stream.flush()?;
        Ok(())
    }
}

/// Run the server in the foreground until Ctrl-C.
pub fn run_serve(config: Config) -> Result<()> {
    let server = Arc::new(IdentifyServer::new(config)?);
    let shutdown = Arc::new(AtomicBool::new(false));
    ctrlc_handler(Arc::clone(&shutdown));
    server.start(shutdown)
}

fn ctrlc_handler(shutdown: Arc<AtomicBool>) {
    if let Err(e) = ctrlc::set_handler(move || {
        shutdown.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "could not install Ctrl-C handler");
    }
}
