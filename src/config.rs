//! Player settings persisted as `frameplay.json`
//!
//! Every field has a default, so partial or older files load fine. Out of
//! range values are clamped by `validated()` rather than rejected.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::core::source::DEFAULT_FRAME_PATH;

pub use crate::paths::{PathConfig, config_file, data_file, ensure_dirs};

/// Settings file name inside the config dir
pub const SETTINGS_FILE: &str = "frameplay.json";

/// Step bounds for forward/backward
pub const MIN_STEP: i32 = 2;
pub const MAX_STEP: i32 = 100;

/// Speed selector: UI index 1..=6 -> frames per second
pub const FPS_TABLE: [f64; 6] = [1.0, 5.0, 12.0, 25.0, 50.0, 100.0];

/// Tunables of the frame provider
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProviderConfig {
    /// Max sequential loads one urgent require or prefetch run may trigger
    pub budget: i32,
    pub pump_interval: Duration,
    /// Total tries per frame, first attempt included
    pub max_fetch_attempts: u32,
    /// Delay before the second attempt; doubles on each further one
    pub retry_backoff: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        PlayerSettings::default().provider_config()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerSettings {
    pub prefetch_budget: i32,
    pub pump_interval_ms: u64,
    /// Wait after the wanted frame arrives before resuming stalled playback
    pub continue_delay_ms: u64,
    pub fetch_timeout_ms: u64,
    pub max_fetch_attempts: u32,
    pub retry_backoff_ms: u64,
    pub fetch_workers: usize,
    pub multiple_step: i32,
    pub fps: f64,
    pub display_width: f64,
    pub display_height: f64,
    /// Server path template with `{task}` and `{frame}`
    pub frame_path: String,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            prefetch_budget: 500,
            pump_interval_ms: 25,
            continue_delay_ms: 5000,
            fetch_timeout_ms: 10_000,
            max_fetch_attempts: 3,
            retry_backoff_ms: 250,
            fetch_workers: 1,
            multiple_step: 10,
            fps: 25.0,
            display_width: 800.0,
            display_height: 600.0,
            frame_path: DEFAULT_FRAME_PATH.to_string(),
        }
    }
}

impl PlayerSettings {
    /// Load from `path`, falling back to defaults if missing or malformed
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            info!("No settings at {}, using defaults", path.display());
            return Self::default();
        }
        match Self::load(path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Ignoring settings file: {:#}", e);
                Self::default()
            }
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings: {}", path.display()))?;
        let settings: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse settings: {}", path.display()))?;
        Ok(settings.validated())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw).with_context(|| format!("Failed to write settings: {}", path.display()))?;
        info!("Settings saved to {}", path.display());
        Ok(())
    }

    /// Clamp every field into its usable range
    pub fn validated(mut self) -> Self {
        self.prefetch_budget = self.prefetch_budget.max(1);
        self.pump_interval_ms = self.pump_interval_ms.max(1);
        self.max_fetch_attempts = self.max_fetch_attempts.max(1);
        self.fetch_workers = self.fetch_workers.max(1);
        self.multiple_step = self.multiple_step.clamp(MIN_STEP, MAX_STEP);
        self.fps = clamp_fps(self.fps);
        if !(self.display_width > 0.0) {
            self.display_width = 800.0;
        }
        if !(self.display_height > 0.0) {
            self.display_height = 600.0;
        }
        self
    }

    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            budget: self.prefetch_budget,
            pump_interval: Duration::from_millis(self.pump_interval_ms),
            max_fetch_attempts: self.max_fetch_attempts,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    pub fn continue_delay(&self) -> Duration {
        Duration::from_millis(self.continue_delay_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

/// Playback rate limited to the speed table range; NaN or non-positive
/// falls back to 25 fps
pub fn clamp_fps(fps: f64) -> f64 {
    if fps.is_nan() || fps <= 0.0 {
        return 25.0;
    }
    fps.clamp(FPS_TABLE[0], FPS_TABLE[FPS_TABLE.len() - 1])
}

/// Map a speed selector index to fps, clamping the index to 1..=6
pub fn fps_for_index(index: i64) -> f64 {
    let idx = index.clamp(1, FPS_TABLE.len() as i64) as usize;
    FPS_TABLE[idx - 1]
}
