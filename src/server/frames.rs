//! Frame server: a directory of images as `/get/task/{task}/frame/{frame}`
//!
//! # Endpoints
//!
//! | Method | Path                              | Description                 |
//! |--------|-----------------------------------|-----------------------------|
//! | GET    | `/get/task/{task}/frame/{frame}`  | Encoded image bytes         |
//! | GET    | `/api/frames`                     | `{ "task": .., "count": .. }` |
//! | GET    | `/api/health`                     | Health check                |

use std::sync::Arc;

use anyhow::Result;
use log::{debug, info};
use rouille::{Request, Response};
use serde::Serialize;

use crate::core::frame::FetchError;
use crate::core::source::{DirFrameSource, TaskId};

use super::{RunningServer, preflight, with_cors};

#[derive(Serialize)]
struct FramesInfo {
    task: Option<TaskId>,
    count: usize,
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

impl ErrorBody {
    fn response(msg: &str, status: u16) -> Response {
        Response::json(&ErrorBody {
            success: false,
            error: msg.to_string(),
        })
        .with_status_code(status)
    }
}

/// Serves frames of one directory. With `task` set, other task ids get 404.
#[derive(Clone)]
pub struct FrameServer {
    source: Arc<DirFrameSource>,
    task: Option<TaskId>,
}

impl FrameServer {
    pub fn new(source: DirFrameSource, task: Option<TaskId>) -> Self {
        Self {
            source: Arc::new(source),
            task,
        }
    }

    /// Serve on a background thread
    pub fn spawn(self, addr: &str) -> Result<RunningServer> {
        let count = self.source.len();
        let server = RunningServer::spawn(addr, move |request| self.handle(request))?;
        info!("Frame server: {} frames on {}", count, server.base_url());
        Ok(server)
    }

    pub fn handle(&self, request: &Request) -> Response {
        if request.method() == "OPTIONS" {
            return preflight();
        }
        if request.method() != "GET" {
            return with_cors(ErrorBody::response("Method not allowed", 405));
        }

        let url = request.url();
        let response = if let Some((task, frame)) = parse_frame_path(&url) {
            self.frame(task, frame)
        } else {
            match url.as_str() {
                "/api/frames" => Response::json(&FramesInfo {
                    task: self.task,
                    count: self.source.len(),
                }),
                "/api/health" => Response::text("frameplay frame server"),
                _ => ErrorBody::response("Not found", 404),
            }
        };
        with_cors(response)
    }

    fn frame(&self, task: TaskId, frame: i32) -> Response {
        if self.task.is_some_and(|t| t != task) {
            return ErrorBody::response("Unknown task", 404);
        }
        let content_type = self
            .source
            .path(frame)
            .and_then(|p| p.extension())
            .and_then(|e| e.to_str())
            .map(mime_for)
            .unwrap_or("application/octet-stream");

        match self.source.read_bytes(frame) {
            Ok(bytes) => {
                debug!("Serving task {} frame {} ({} bytes)", task, frame, bytes.len());
                Response::from_data(content_type, bytes)
            }
            Err(FetchError::NotFound(_)) => ErrorBody::response(&format!("No frame {}", frame), 404),
            Err(e) => ErrorBody::response(&e.to_string(), 500),
        }
    }
}

/// `/get/task/{task}/frame/{frame}` -> `(task, frame)`
fn parse_frame_path(url: &str) -> Option<(TaskId, i32)> {
    let rest = url.strip_prefix("/get/task/")?;
    let (task, rest) = rest.split_once('/')?;
    let frame = rest.strip_prefix("frame/")?;
    Some((task.parse().ok()?, frame.parse().ok()?))
}

fn mime_for(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "tif" | "tiff" => "image/tiff",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::source::{DEFAULT_FRAME_PATH, FrameSource, HttpFrameSource};
    use image::RgbaImage;
    use std::time::Duration;

    fn frames_dir(count: u32) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..count {
            RgbaImage::from_pixel(4 + i, 3, image::Rgba([9, 9, 9, 255]))
                .save(dir.path().join(format!("frame_{:04}.png", i)))
                .unwrap();
        }
        dir
    }

    #[test]
    fn test_parse_frame_path() {
        assert_eq!(parse_frame_path("/get/task/3/frame/17"), Some((3, 17)));
        assert_eq!(parse_frame_path("/get/task/x/frame/17"), None);
        assert_eq!(parse_frame_path("/get/task/3/image/17"), None);
        assert_eq!(parse_frame_path("/api/health"), None);
    }

    #[test]
    fn test_http_source_round_trip() {
        let dir = frames_dir(3);
        let source = DirFrameSource::open(dir.path()).unwrap();
        let server = FrameServer::new(source, Some(5)).spawn("127.0.0.1:0").unwrap();

        let http = HttpFrameSource::new(&server.base_url(), DEFAULT_FRAME_PATH, Duration::from_secs(5));
        let frame = http.fetch(5, 2).unwrap();
        assert_eq!((frame.width(), frame.height()), (6, 3));
        assert_eq!(frame.index(), 2);

        assert_eq!(http.fetch(5, 3).unwrap_err(), FetchError::NotFound(3));
        assert_eq!(http.fetch(6, 0).unwrap_err(), FetchError::NotFound(0));
    }

    #[test]
    fn test_frames_info() {
        let dir = frames_dir(2);
        let source = DirFrameSource::open(dir.path()).unwrap();
        let server = FrameServer::new(source, None).spawn("127.0.0.1:0").unwrap();

        let body = ureq::get(&format!("{}/api/frames", server.base_url()))
            .call()
            .unwrap()
            .into_string()
            .unwrap();
        let info: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(info["count"], 2);
        assert!(info["task"].is_null());
    }
}
