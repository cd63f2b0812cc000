//! HTTP servers
//!
//! # Purpose
//!
//! - [`FrameServer`] - serves a directory of images as task frames, the
//!   counterpart of `HttpFrameSource`
//! - [`ApiServer`] - remote control of a running session: intents in,
//!   player/cache snapshots out
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐   GET /get/task/1/frame/N   ┌────────────────────┐
//! │  FrameServer         │ ◀────────────────────────── │  Workers (ureq)    │
//! │  (rouille threads)   │                             └────────────────────┘
//! └──────────────────────┘                                       │ FetchResult
//!                                                                ▼
//! ┌──────────────────────┐     crossbeam::Sender<Intent>  ┌────────────────┐
//! │  ApiServer           │  ───────────────────────────▶  │  Session loop  │
//! │  (rouille threads)   │ ◀── Arc<SharedApiState> ─────  │  (main thread) │
//! └──────────────────────┘        snapshots               └────────────────┘
//! ```
//!
//! Both run on rouille's own threads; neither touches session state directly.

mod api;
mod frames;

pub use api::{ApiServer, CacheSnapshot, SharedApiState};
pub use frames::FrameServer;

use std::net::SocketAddr;
use std::sync::mpsc;
use std::thread::JoinHandle;

use anyhow::{Result, anyhow};
use rouille::{Request, Response};

/// A rouille server running on a background thread. Stops on drop.
pub struct RunningServer {
    addr: SocketAddr,
    handle: Option<JoinHandle<()>>,
    stop: mpsc::Sender<()>,
}

impl RunningServer {
    /// Bind `addr` (port 0 picks a free port) and serve on a background thread
    fn spawn<F>(addr: &str, handler: F) -> Result<Self>
    where
        F: Send + Sync + 'static + Fn(&Request) -> Response,
    {
        let server = rouille::Server::new(addr, handler).map_err(|e| anyhow!("Failed to bind {}: {}", addr, e))?;
        let addr = server.server_addr();
        let (handle, stop) = server.stoppable();
        Ok(Self {
            addr,
            handle: Some(handle),
            stop,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `http://host:port` of the bound socket
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Block until the server thread exits
    pub fn wait(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.stop.send(());
            let _ = handle.join();
            log::debug!("Server on {} stopped", self.addr);
        }
    }
}

/// Add the CORS header every response carries
fn with_cors(response: Response) -> Response {
    response.with_additional_header("Access-Control-Allow-Origin", "*")
}

/// Preflight answer
fn preflight() -> Response {
    with_cors(Response::empty_204())
        .with_additional_header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
        .with_additional_header("Access-Control-Allow-Headers", "Content-Type")
}
