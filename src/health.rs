//! HTTP sidecar for liveness, readiness, and Prometheus exposition.
//!
//! Runs on its own OS thread with plain blocking I/O so a wedged async
//! runtime cannot take the health endpoints down with it.

use crate::config::MetricsConfig;
use crate::metrics::Metrics;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct HealthServer {
    metrics: Arc<Metrics>,
    ready: AtomicBool,
    running: AtomicBool,
}

enum Reply<'a> {
    Health,
    Ready(bool),
    Metrics(String),
    NotFound,
    BadRequest(&'a str),
}

impl HealthServer {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            metrics,
            ready: AtomicBool::new(false),
            running: AtomicBool::new(true),
        }
    }

    /// Flip readiness; the cache server sets this once it is accepting
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Serve until stopped. Blocking; spawn on a dedicated thread.
    pub fn run(self: Arc<Self>, config: &MetricsConfig) -> std::io::Result<()> {
        let listener = TcpListener::bind(&config.listen_addr)?;
        listener.set_nonblocking(true)?;
        info!("Health endpoint listening on {}", config.listen_addr);

        while self.running.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, _)) => {
                    if let Err(e) = self.serve_one(stream) {
                        warn!("Health request failed: {}", e);
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => warn!("Health accept error: {}", e),
            }
        }

        info!("Health endpoint stopped");
        Ok(())
    }

    fn serve_one(&self, mut stream: TcpStream) -> std::io::Result<()> {
        stream.set_nonblocking(false)?;

        let mut request_line = String::new();
        BufReader::new(&stream).read_line(&mut request_line)?;
        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or("");
        let path = parts.next().unwrap_or("");

        let reply = if method != "GET" {
            Reply::BadRequest("only GET is served here")
        } else {
            match path {
                "/health" | "/healthz" => Reply::Health,
                "/ready" | "/readyz" => Reply::Ready(self.is_ready()),
                "/metrics" => Reply::Metrics(self.metrics.gather()),
                _ => Reply::NotFound,
            }
        };
        write_reply(&mut stream, &reply)
    }
}

fn write_reply(stream: &mut TcpStream, reply: &Reply<'_>) -> std::io::Result<()> {
    let (status, content_type, body): (&str, &str, &str) = match reply {
        Reply::Health => ("200 OK", "application/json", r#"{"status":"healthy"}"#),
        Reply::Ready(true) => ("200 OK", "application/json", r#"{"status":"ready"}"#),
        Reply::Ready(false) => (
            "503 Service Unavailable",
            "application/json",
            r#"{"status":"not ready"}"#,
        ),
        Reply::Metrics(text) => ("200 OK", "text/plain; version=0.0.4", text.as_str()),
        Reply::NotFound => ("404 Not Found", "text/plain", "not found"),
        Reply::BadRequest(reason) => ("405 Method Not Allowed", "text/plain", reason),
    };

    write!(
        stream,
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )?;
    stream.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readiness_toggles() {
        let server = HealthServer::new(Arc::new(Metrics::new()));
        assert!(!server.is_ready());
        server.set_ready(true);
        assert!(server.is_ready());
        server.set_ready(false);
        assert!(!server.is_ready());
    }

    #[test]
    fn test_serves_and_stops() {
        let server = Arc::new(HealthServer::new(Arc::new(Metrics::new())));
        server.set_ready(true);
        let config = MetricsConfig {
            enabled: true,
            listen_addr: "127.0.0.1:0".to_string(),
        };
        // Port 0 binds; stop before run to exercise the shutdown path
        server.stop();
        Arc::clone(&server).run(&config).unwrap();
    }
}
