//! Thread-per-connection HTTP listener for the bridge.

use serde_json::Value;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::http::{self, classify_endpoint, write_json_response, Endpoint, Method};
use super::{error_body, Bridge};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// A running listener. Dropping it stops the accept loop.
pub struct BridgeServer {
    addr: SocketAddr,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl BridgeServer {
    /// Bind `bind_addr` (port 0 picks a free port) and serve requests on a background thread.
    pub fn start(bridge: Arc<Bridge>, bind_addr: &str) -> io::Result<Self> {
        let listener = TcpListener::bind(bind_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;
        let running = Arc::new(AtomicBool::new(true));
        let running_cl = running.clone();

        let handle = std::thread::Builder::new()
            .name("bridge-accept".to_string())
            .spawn(move || accept_loop(listener, bridge, running_cl))?;
        info!("bridge listening on http://{}", addr);

        Ok(BridgeServer {
            addr,
            running,
            handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stop accepting new connections. In-flight requests run to completion.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Block until the accept loop exits.
    pub fn join(mut self) {
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for BridgeServer {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

fn accept_loop(listener: TcpListener, bridge: Arc<Bridge>, running: Arc<AtomicBool>) {
    loop {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let (stream, peer) = match listener.accept() {
            Ok(pair) => pair,
            Err(e) => {
                if e.kind() != io::ErrorKind::WouldBlock {
                    warn!("accept error: {}", e);
                }
                std::thread::sleep(ACCEPT_BACKOFF);
                continue;
            }
        };
        let _ = stream.set_nonblocking(false);
        let _ = stream.set_read_timeout(Some(REQUEST_READ_TIMEOUT));
        let _ = stream.set_write_timeout(None);

        let bridge_cl = bridge.clone();
        let spawned = std::thread::Builder::new()
            .name("bridge-conn".to_string())
            .spawn(move || serve_tcp(stream, peer, &bridge_cl));
        if let Err(e) = spawned {
            warn!("failed to spawn connection thread for {}: {}", peer, e);
        }
    }
    debug!("bridge accept loop stopped");
}

fn serve_tcp(mut stream: TcpStream, peer: SocketAddr, bridge: &Bridge) {
    if let Err(e) = handle_connection(&mut stream, bridge) {
        debug!("connection {} ended with error: {}", peer, e);
    }
}

/// Read one request from `conn`, dispatch it and write one JSON response.
pub fn handle_connection<S: Read + Write>(conn: &mut S, bridge: &Bridge) -> io::Result<()> {
    let req = match http::read_http_request(conn) {
        Ok(r) => r,
        Err(e) => {
            warn!("bad request: {}", e);
            return write_json_response(conn, e.status(), &error_body(&e.to_string()));
        }
    };

    let (status, payload): (u16, Value) = match (classify_endpoint(&req.path_lc), &req.method) {
        (Some(Endpoint::Health), Method::Get) => (200, bridge.health()),
        (Some(Endpoint::Run), Method::Post) => bridge.handle_run(&req.body),
        (Some(_), _) => (405, error_body("method not allowed")),
        (None, _) => (404, error_body("not found")),
    };
    info!("{:?} {} -> {}", req.method, req.path_lc, status);
    write_json_response(conn, status, &payload)
}
