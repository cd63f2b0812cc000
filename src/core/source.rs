//! Frame sources - where decoded frames come from
//!
//! `FrameSource` is a blocking "fetch frame N of task T" call. It always runs
//! on a worker thread (see `core::workers`), never on the session thread.
//!
//! - [`HttpFrameSource`] - GET `{base}{frame_path}` via ureq, decode with `image`
//! - [`DirFrameSource`] - N-th image file of a sorted directory listing

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, trace};

use super::frame::{FetchError, Frame};

/// Task identifier on the frame server
pub type TaskId = u64;

/// Default server path for a single frame
pub const DEFAULT_FRAME_PATH: &str = "/get/task/{task}/frame/{frame}";

/// Largest accepted frame payload (64 MB)
const MAX_FRAME_BYTES: u64 = 64 * 1024 * 1024;

/// File extensions served/loaded as frames
pub const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff", "bmp"];

/// Blocking frame fetch
pub trait FrameSource: Send + Sync + 'static {
    fn fetch(&self, task: TaskId, frame: i32) -> Result<Frame, FetchError>;
}

/// Fetches frames from an HTTP frame server
pub struct HttpFrameSource {
    agent: ureq::Agent,
    base_url: String,
    frame_path: String,
}

impl HttpFrameSource {
    /// # Arguments
    /// * `base_url` - server root, e.g. `http://localhost:8080`
    /// * `frame_path` - path template with `{task}` and `{frame}` placeholders
    /// * `timeout` - whole-request timeout (connect + read)
    pub fn new(base_url: &str, frame_path: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
            frame_path: frame_path.to_string(),
        }
    }

    /// Resolved URL for one frame
    pub fn url(&self, task: TaskId, frame: i32) -> String {
        let path = self
            .frame_path
            .replace("{task}", &task.to_string())
            .replace("{frame}", &frame.to_string());
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

impl FrameSource for HttpFrameSource {
    fn fetch(&self, task: TaskId, frame: i32) -> Result<Frame, FetchError> {
        let url = self.url(task, frame);
        trace!("GET {}", url);

        let response = match self.agent.get(&url).call() {
            Ok(resp) => resp,
            Err(ureq::Error::Status(404, _)) => return Err(FetchError::NotFound(frame)),
            Err(ureq::Error::Status(code, _)) => return Err(FetchError::Status(code)),
            Err(e) => return Err(FetchError::Transport(e.to_string())),
        };

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_FRAME_BYTES)
            .read_to_end(&mut bytes)
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        debug!("Fetched frame {} ({} bytes)", frame, bytes.len());
        Frame::decode(frame, &bytes)
    }
}

/// Serves frames from image files in one directory, sorted by file name.
///
/// Frame `N` is the N-th file; the task id is ignored.
#[derive(Debug, Clone)]
pub struct DirFrameSource {
    files: Vec<PathBuf>,
}

impl DirFrameSource {
    /// Scan `dir` for supported image files
    pub fn open(dir: &Path) -> std::io::Result<Self> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && is_frame_file(p))
            .collect();
        files.sort();
        debug!("DirFrameSource: {} frames in {}", files.len(), dir.display());
        Ok(Self { files })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// File backing frame `frame`, if any
    pub fn path(&self, frame: i32) -> Option<&Path> {
        usize::try_from(frame)
            .ok()
            .and_then(|idx| self.files.get(idx))
            .map(PathBuf::as_path)
    }

    /// Encoded bytes of frame `frame`
    pub fn read_bytes(&self, frame: i32) -> Result<Vec<u8>, FetchError> {
        let path = self.path(frame).ok_or(FetchError::NotFound(frame))?;
        std::fs::read(path).map_err(|e| FetchError::Transport(format!("{}: {}", path.display(), e)))
    }
}

impl FrameSource for DirFrameSource {
    fn fetch(&self, _task: TaskId, frame: i32) -> Result<Frame, FetchError> {
        let bytes = self.read_bytes(frame)?;
        Frame::decode(frame, &bytes)
    }
}

/// True if the path has a supported image extension
pub fn is_frame_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;

    fn write_png(dir: &Path, name: &str, w: u32, h: u32) {
        RgbaImage::from_pixel(w, h, image::Rgba([1, 2, 3, 255]))
            .save(dir.join(name))
            .unwrap();
    }

    #[test]
    fn test_url_template() {
        let src = HttpFrameSource::new("http://host:8080/", DEFAULT_FRAME_PATH, Duration::from_secs(1));
        assert_eq!(src.url(3, 42), "http://host:8080/get/task/3/frame/42");

        let rel = HttpFrameSource::new("http://host", "data/{task}/{frame}.png", Duration::from_secs(1));
        assert_eq!(rel.url(1, 0), "http://host/data/1/0.png");
    }

    #[test]
    fn test_dir_source_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "b_001.png", 3, 2);
        write_png(dir.path(), "a_000.png", 5, 4);
        std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

        let src = DirFrameSource::open(dir.path()).unwrap();
        assert_eq!(src.len(), 2);

        let first = src.fetch(0, 0).unwrap();
        assert_eq!((first.width(), first.height()), (5, 4));
        let second = src.fetch(0, 1).unwrap();
        assert_eq!((second.width(), second.height()), (3, 2));
        assert_eq!(second.index(), 1);
    }

    #[test]
    fn test_dir_source_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "only.png", 1, 1);
        let src = DirFrameSource::open(dir.path()).unwrap();

        assert_eq!(src.fetch(0, 1).unwrap_err(), FetchError::NotFound(1));
        assert_eq!(src.fetch(0, -1).unwrap_err(), FetchError::NotFound(-1));
    }
}
