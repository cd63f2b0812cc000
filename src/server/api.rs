//! REST API for remote control of a running session.
//!
//! # Purpose
//!
//! Lets scripts and web pages drive the player: every POST becomes an
//! [`Intent`] delivered to the session loop, every GET reads snapshots the
//! session loop publishes into [`SharedApiState`].
//!
//! # Thread safety
//!
//! - `SharedApiState` uses `RwLock` per field - session writes, handlers read
//! - Intents go through a `crossbeam_channel::Sender` so the session can
//!   `select!` on them together with fetch completions
//! - CORS headers on all responses for browser access
//!
//! # Endpoints
//!
//! | Method | Path                           | Description                     |
//! |--------|--------------------------------|---------------------------------|
//! | GET    | `/api/status`                  | Player and cache                |
//! | GET    | `/api/player`                  | Player snapshot                 |
//! | GET    | `/api/cache`                   | Cache stats                     |
//! | GET    | `/api/health`                  | Health check                    |
//! | POST   | `/api/player/{action}`         | play, pause, toggle, next, previous, first, last, forward, backward, fit, retry |
//! | POST   | `/api/player/frame/{n}`        | Seek (integers only)            |
//! | POST   | `/api/player/fps/{index}`      | Speed selector 1..=6            |
//! | POST   | `/api/player/step/{n}`         | Forward/backward step           |
//! | POST   | `/api/player/rewind/{fraction}`| Progress bar position 0..1      |
//! | POST   | `/api/player/reset-zoom/{bool}`| Fit every frame on/off          |
//! | POST   | `/api/intent`                  | Any intent as JSON              |

use std::sync::{Arc, RwLock};

use anyhow::Result;
use crossbeam_channel::{Receiver, Sender};
use log::{info, trace};
use rouille::{Request, Response};
use serde::{Deserialize, Serialize};

use crate::core::controller::Intent;
use crate::core::player_events::PlayerSnapshot;
use crate::core::provider::FrameProvider;

use super::{RunningServer, preflight, with_cors};

/// Cache stats for API responses
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub cached_frames: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    /// Frame currently being fetched (or waiting for a retry)
    pub in_flight: Option<i32>,
}

impl CacheSnapshot {
    pub fn from_provider(provider: &FrameProvider) -> Self {
        let stats = provider.stats();
        Self {
            cached_frames: provider.cached_count(),
            hits: stats.hits(),
            misses: stats.misses(),
            hit_rate: stats.hit_rate(),
            in_flight: provider.in_flight(),
        }
    }
}

/// Full status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub player: Option<PlayerSnapshot>,
    pub cache: CacheSnapshot,
}

/// Shared state readable by API handlers (updated by the session loop)
#[derive(Default)]
pub struct SharedApiState {
    pub player: RwLock<Option<PlayerSnapshot>>,
    pub cache: RwLock<CacheSnapshot>,
}

impl SharedApiState {
    pub fn set_player(&self, snapshot: PlayerSnapshot) {
        *self.player.write().unwrap_or_else(|e| e.into_inner()) = Some(snapshot);
    }

    pub fn set_cache(&self, snapshot: CacheSnapshot) {
        *self.cache.write().unwrap_or_else(|e| e.into_inner()) = snapshot;
    }

    fn player(&self) -> Option<PlayerSnapshot> {
        self.player.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn cache(&self) -> CacheSnapshot {
        self.cache.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Generic API response
#[derive(Serialize)]
struct ApiResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ApiResponse {
    fn ok() -> Self {
        Self { success: true, message: None, error: None }
    }

    fn ok_msg(msg: &str) -> Self {
        Self { success: true, message: Some(msg.to_string()), error: None }
    }

    fn err(msg: &str) -> Self {
        Self { success: false, message: None, error: Some(msg.to_string()) }
    }
}

fn bad_request(msg: &str) -> Response {
    Response::json(&ApiResponse::err(msg)).with_status_code(400)
}

/// REST API server
pub struct ApiServer {
    state: Arc<SharedApiState>,
    intent_tx: Sender<Intent>,
}

impl ApiServer {
    /// Start the API server in a background thread.
    /// Returns the running server and the intent receiver for the session loop.
    pub fn start(addr: &str, state: Arc<SharedApiState>) -> Result<(RunningServer, Receiver<Intent>)> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let server = ApiServer { state, intent_tx: tx };
        let running = RunningServer::spawn(addr, move |request| server.handle_request(request))?;
        info!("API server listening on {}", running.base_url());
        Ok((running, rx))
    }

    fn handle_request(&self, request: &Request) -> Response {
        if request.method() == "OPTIONS" {
            return preflight();
        }

        let path = request.url();
        if request.method() == "POST"
            && let Some(rest) = path.strip_prefix("/api/player/")
            && let Some((name, arg)) = rest.split_once('/')
        {
            return with_cors(self.parametrized(name, arg));
        }

        let response = rouille::router!(request,
            (GET) ["/api/status"] => {
                Response::json(&StatusResponse {
                    player: self.state.player(),
                    cache: self.state.cache(),
                })
            },
            (GET) ["/api/player"] => {
                match self.state.player() {
                    Some(player) => Response::json(&player),
                    None => Response::json(&ApiResponse::err("No session yet")).with_status_code(503),
                }
            },
            (GET) ["/api/cache"] => {
                Response::json(&self.state.cache())
            },
            (GET) ["/api/health"] => {
                Response::json(&ApiResponse::ok_msg("frameplay API server"))
            },

            (POST) ["/api/player/play"] => { self.send(Intent::Play) },
            (POST) ["/api/player/pause"] => { self.send(Intent::Pause) },
            (POST) ["/api/player/toggle"] => { self.send(Intent::TogglePlay) },
            (POST) ["/api/player/next"] => { self.send(Intent::Next) },
            (POST) ["/api/player/previous"] => { self.send(Intent::Previous) },
            (POST) ["/api/player/first"] => { self.send(Intent::First) },
            (POST) ["/api/player/last"] => { self.send(Intent::Last) },
            (POST) ["/api/player/forward"] => { self.send(Intent::Forward) },
            (POST) ["/api/player/backward"] => { self.send(Intent::Backward) },
            (POST) ["/api/player/fit"] => { self.send(Intent::Fit) },
            (POST) ["/api/player/retry"] => { self.send(Intent::Retry) },

            (POST) ["/api/intent"] => {
                match rouille::input::json_input::<Intent>(request) {
                    Ok(intent) => self.send(intent),
                    Err(e) => bad_request(&format!("Invalid JSON: {}", e)),
                }
            },

            _ => {
                Response::json(&ApiResponse::err("Not found")).with_status_code(404)
            }
        );

        with_cors(response)
    }

    /// `/api/player/{name}/{arg}` routes
    fn parametrized(&self, name: &str, arg: &str) -> Response {
        let intent = match name {
            "frame" => arg.parse().ok().map(Intent::Seek),
            "fps" => arg.parse().ok().map(Intent::ChangeFps),
            "step" => arg.parse().ok().map(Intent::ChangeStep),
            "rewind" => arg.parse().ok().map(Intent::Rewind),
            "reset-zoom" => arg.parse().ok().map(Intent::ChangeResetZoom),
            _ => return Response::json(&ApiResponse::err("Not found")).with_status_code(404),
        };
        match intent {
            Some(intent) => self.send(intent),
            None => bad_request(&format!("Invalid {} value: {}", name, arg)),
        }
    }

    fn send(&self, intent: Intent) -> Response {
        trace!("API intent {:?}", intent);
        match self.intent_tx.send(intent) {
            Ok(()) => Response::json(&ApiResponse::ok()),
            Err(e) => Response::json(&ApiResponse::err(&format!("Session is gone: {}", e))).with_status_code(500),
        }
    }
}
