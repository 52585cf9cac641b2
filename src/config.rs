use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::detect::DEFAULT_CONFIDENCE_THRESHOLD;
use crate::state::DEFAULT_MESSAGE_CAPACITY;
use crate::wifi::DEFAULT_MAX_RETRIES;

const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_INDEX_PATH: &str = "assets/index.html";
const DEFAULT_CAMERA_SOURCE: &str = "stub://camera";
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_POOL_FRAMES: usize = 3;

#[derive(Debug, Deserialize, Default)]
struct SentineldConfigFile {
    wifi: Option<WifiConfigFile>,
    http: Option<HttpConfigFile>,
    detector: Option<DetectorConfigFile>,
    messages: Option<MessagesConfigFile>,
    camera: Option<CameraConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct WifiConfigFile {
    ssid: Option<String>,
    passphrase: Option<String>,
    max_retries: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct HttpConfigFile {
    addr: Option<String>,
    index_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    confidence_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct MessagesConfigFile {
    capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    source: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    pool_frames: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct SentineldConfig {
    pub wifi: WifiSettings,
    pub http: HttpSettings,
    pub detector: DetectorSettings,
    pub messages: MessageSettings,
    pub camera: CameraSettings,
}

#[derive(Debug, Clone)]
pub struct WifiSettings {
    pub ssid: String,
    pub passphrase: String,
    pub max_retries: u32,
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub addr: String,
    pub index_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub confidence_threshold: f32,
}

#[derive(Debug, Clone)]
pub struct MessageSettings {
    pub capacity: usize,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub source: String,
    pub width: u32,
    pub height: u32,
    pub pool_frames: usize,
}

impl SentineldConfig {
    /// Load from the file named by `SENTINEL_CONFIG` (if set), then apply
    /// environment overrides, then validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SENTINEL_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Like `load`, with an explicit config path (CLI flag).
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SentineldConfigFile) -> Self {
        let wifi = WifiSettings {
            ssid: file
                .wifi
                .as_ref()
                .and_then(|wifi| wifi.ssid.clone())
                .unwrap_or_default(),
            passphrase: file
                .wifi
                .as_ref()
                .and_then(|wifi| wifi.passphrase.clone())
                .unwrap_or_default(),
            max_retries: file
                .wifi
                .as_ref()
                .and_then(|wifi| wifi.max_retries)
                .unwrap_or(DEFAULT_MAX_RETRIES),
        };
        let http = HttpSettings {
            addr: file
                .http
                .as_ref()
                .and_then(|http| http.addr.clone())
                .unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string()),
            index_path: file
                .http
                .and_then(|http| http.index_path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_INDEX_PATH)),
        };
        let detector = DetectorSettings {
            confidence_threshold: file
                .detector
                .and_then(|detector| detector.confidence_threshold)
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
        };
        let messages = MessageSettings {
            capacity: file
                .messages
                .and_then(|messages| messages.capacity)
                .unwrap_or(DEFAULT_MESSAGE_CAPACITY),
        };
        let camera = CameraSettings {
            source: file
                .camera
                .as_ref()
                .and_then(|camera| camera.source.clone())
                .unwrap_or_else(|| DEFAULT_CAMERA_SOURCE.to_string()),
            width: file
                .camera
                .as_ref()
                .and_then(|camera| camera.width)
                .unwrap_or(DEFAULT_CAMERA_WIDTH),
            height: file
                .camera
                .as_ref()
                .and_then(|camera| camera.height)
                .unwrap_or(DEFAULT_CAMERA_HEIGHT),
            pool_frames: file
                .camera
                .and_then(|camera| camera.pool_frames)
                .unwrap_or(DEFAULT_POOL_FRAMES),
        };
        Self {
            wifi,
            http,
            detector,
            messages,
            camera,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(ssid) = std::env::var("SENTINEL_WIFI_SSID") {
            if !ssid.trim().is_empty() {
                self.wifi.ssid = ssid;
            }
        }
        if let Ok(passphrase) = std::env::var("SENTINEL_WIFI_PASSPHRASE") {
            if !passphrase.is_empty() {
                self.wifi.passphrase = passphrase;
            }
        }
        if let Ok(addr) = std::env::var("SENTINEL_HTTP_ADDR") {
            if !addr.trim().is_empty() {
                self.http.addr = addr;
            }
        }
        if let Ok(path) = std::env::var("SENTINEL_INDEX_PATH") {
            if !path.trim().is_empty() {
                self.http.index_path = PathBuf::from(path);
            }
        }
        if let Ok(threshold) = std::env::var("SENTINEL_CONFIDENCE_THRESHOLD") {
            let parsed: f32 = threshold.parse().map_err(|_| {
                anyhow!("SENTINEL_CONFIDENCE_THRESHOLD must be a number in (0, 1)")
            })?;
            self.detector.confidence_threshold = parsed;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.wifi.ssid.trim().is_empty() {
            return Err(anyhow!("wifi.ssid must be set"));
        }
        let threshold = self.detector.confidence_threshold;
        if !(threshold > 0.0 && threshold < 1.0) {
            return Err(anyhow!(
                "detector.confidence_threshold must lie in (0, 1), got {}",
                threshold
            ));
        }
        if self.messages.capacity == 0 {
            return Err(anyhow!("messages.capacity must be greater than zero"));
        }
        if self.camera.pool_frames == 0 {
            return Err(anyhow!("camera.pool_frames must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<SentineldConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
