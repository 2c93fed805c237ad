//! Node configuration – reads `~/.detect3d/config.toml`.
//!
//! Every field has a default, so a missing file or a partial file is fine.
//!
//! ```toml
//! bus_capacity = 64
//!
//! [sync]
//! queue_size = 10
//! max_interval_ms = 100
//!
//! [depth]
//! mono16_scale = 0.001
//!
//! [topics]
//! camera_info = "/camera/depth/camera_info"
//! depth_image = "/camera/depth/image_raw"
//! detections_2d = "/yolo/detections"
//! detections_3d = "/yolo/detections_3d"
//!
//! [bridge]
//! enabled = true
//! bind_address = "0.0.0.0"
//! ws_port = 9090
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use detect3d_middleware::TopicNames;
use detect3d_perception::depth::DEFAULT_MONO16_SCALE;
use detect3d_perception::sync::{DEFAULT_MAX_INTERVAL, DEFAULT_QUEUE_SIZE};
use detect3d_perception::{BackProjector, DepthSampler, SyncConfig};
use detect3d_types::FusionError;
use serde::{Deserialize, Serialize};

/// Approximate-time matching parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    /// Pending messages kept per input stream.
    pub queue_size: usize,
    /// Largest stamp difference between a depth frame and its detections.
    pub max_interval_ms: u64,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            queue_size: DEFAULT_QUEUE_SIZE,
            max_interval_ms: DEFAULT_MAX_INTERVAL.as_millis() as u64,
        }
    }
}

impl SyncSection {
    pub fn to_sync_config(&self) -> SyncConfig {
        SyncConfig {
            queue_size: self.queue_size,
            max_interval: Duration::from_millis(self.max_interval_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthSection {
    /// Metres per unit of a `16UC1` depth sample.
    pub mono16_scale: f32,
}

impl Default for DepthSection {
    fn default() -> Self {
        Self {
            mono16_scale: DEFAULT_MONO16_SCALE,
        }
    }
}

/// WebSocket bridge settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSection {
    pub enabled: bool,
    pub bind_address: String,
    pub ws_port: u16,
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0".to_string(),
            ws_port: 9090,
        }
    }
}

/// Complete node configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Per-topic buffer of the internal bus.
    pub bus_capacity: usize,
    pub sync: SyncSection,
    pub depth: DepthSection,
    pub topics: TopicNames,
    pub bridge: BridgeSection,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            bus_capacity: 64,
            sync: SyncSection::default(),
            depth: DepthSection::default(),
            topics: TopicNames::default(),
            bridge: BridgeSection::default(),
        }
    }
}

impl FusionConfig {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), FusionError> {
        if self.bus_capacity == 0 {
            return Err(FusionError::Config("bus_capacity must be at least 1".to_string()));
        }
        if self.sync.queue_size == 0 {
            return Err(FusionError::Config("sync.queue_size must be at least 1".to_string()));
        }
        if !(self.depth.mono16_scale.is_finite() && self.depth.mono16_scale > 0.0) {
            return Err(FusionError::Config(format!(
                "depth.mono16_scale must be a positive number, got {}",
                self.depth.mono16_scale
            )));
        }
        Ok(())
    }

    pub fn back_projector(&self) -> BackProjector {
        BackProjector::new(DepthSampler::new(self.depth.mono16_scale))
    }
}

/// Path of the configuration file: `$DETECT3D_CONFIG`, or
/// `~/.detect3d/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("DETECT3D_CONFIG") {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".detect3d").join("config.toml")
}

/// Load, apply environment overrides and validate.  A missing file yields the
/// defaults.
pub fn load() -> Result<FusionConfig, FusionError> {
    let mut cfg = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

/// Parse the file at `path`.  Returns `None` if it does not exist.
pub fn load_from(path: &Path) -> Result<Option<FusionConfig>, FusionError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| FusionError::Config(format!("failed to read {}: {e}", path.display())))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| FusionError::Config(format!("failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Apply `DETECT3D_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `DETECT3D_WS_PORT` | `bridge.ws_port` |
/// | `DETECT3D_QUEUE_SIZE` | `sync.queue_size` |
/// | `DETECT3D_MAX_INTERVAL_MS` | `sync.max_interval_ms` |
///
/// Unparsable values are ignored.
pub fn apply_env_overrides(cfg: &mut FusionConfig) {
    if let Ok(v) = std::env::var("DETECT3D_WS_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.bridge.ws_port = port;
    }
    if let Ok(v) = std::env::var("DETECT3D_QUEUE_SIZE")
        && let Ok(size) = v.parse::<usize>()
    {
        cfg.sync.queue_size = size;
    }
    if let Ok(v) = std::env::var("DETECT3D_MAX_INTERVAL_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.sync.max_interval_ms = ms;
    }
}
