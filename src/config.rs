use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::media::duplicate::RetentionPolicy;
use crate::media::hash::HashAlgorithm;
use crate::media::recommend::SelectionWeights;

/// Environment variable that relocates the per-installation data directory.
pub const INSTANCE_ENV: &str = "TIKLOCAL_INSTANCE";

const DATA_DIR_NAME: &str = ".tiklocal";
const CONFIG_FILE_NAME: &str = "config.toml";
const THUMBNAILS_DIR_NAME: &str = "thumbnails";
const THUMBS_MAP_FILE_NAME: &str = "thumbs.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThumbnailSettings {
    /// Output height in pixels; width follows the source aspect ratio.
    pub height: u32,
    /// ffmpeg `-q:v` value (2 is best, 31 worst).
    pub quality: u8,
    pub capture_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub fallback_offsets: Vec<f64>,
    /// Upper bound on simultaneous captures.
    pub workers: usize,
    pub ffmpeg: String,
    pub ffprobe: String,
}

impl ThumbnailSettings {
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_secs(self.capture_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl Default for ThumbnailSettings {
    fn default() -> Self {
        Self {
            height: 360,
            quality: 3,
            capture_timeout_secs: 30,
            probe_timeout_secs: 10,
            fallback_offsets: vec![5.0, 1.0, 0.1],
            workers: 4,
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DedupeSettings {
    pub chunk_size: usize,
    pub algorithm: HashAlgorithm,
    pub keep: RetentionPolicy,
}

impl Default for DedupeSettings {
    fn default() -> Self {
        Self {
            chunk_size: 8192,
            algorithm: HashAlgorithm::Sha256,
            keep: RetentionPolicy::Oldest,
        }
    }
}

/// Shape of `config.toml`. Every section is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub selection: SelectionWeights,
    pub thumbnails: ThumbnailSettings,
    pub dedupe: DedupeSettings,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub selection: SelectionWeights,
    pub thumbnails: ThumbnailSettings,
    pub dedupe: DedupeSettings,
}

impl Settings {
    /// Resolve the data directory from the environment and apply
    /// `<data_dir>/config.toml` when present.
    pub fn load() -> Result<Self, ConfigError> {
        let instance = std::env::var(INSTANCE_ENV).ok();
        let data_dir = resolve_data_dir(instance.as_deref());
        Self::load_from(data_dir)
    }

    pub fn load_from(data_dir: PathBuf) -> Result<Self, ConfigError> {
        let config_path = data_dir.join(CONFIG_FILE_NAME);
        let file = if config_path.exists() {
            let cfg = load_config(&config_path)?;
            log::debug!("Loaded config from {}", config_path.display());
            cfg
        } else {
            FileConfig::default()
        };

        Ok(Self {
            data_dir,
            selection: file.selection,
            thumbnails: file.thumbnails,
            dedupe: file.dedupe,
        })
    }

    /// Defaults rooted at an explicit data directory, no config file.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let file = FileConfig::default();
        Self {
            data_dir: data_dir.into(),
            selection: file.selection,
            thumbnails: file.thumbnails,
            dedupe: file.dedupe,
        }
    }

    pub fn thumbnails_dir(&self) -> PathBuf {
        self.data_dir.join(THUMBNAILS_DIR_NAME)
    }

    pub fn thumbs_map_path(&self) -> PathBuf {
        self.data_dir.join(THUMBS_MAP_FILE_NAME)
    }
}

pub fn load_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: FileConfig = toml::from_str(&content)?;
    Ok(config)
}

/// `instance` (normally `$TIKLOCAL_INSTANCE`) wins when set; otherwise
/// `~/.tiklocal`.
pub fn resolve_data_dir(instance: Option<&str>) -> PathBuf {
    let home = dirs::home_dir();

    match instance.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => match (raw.strip_prefix("~"), &home) {
            (Some(rest), Some(home)) => home.join(rest.trim_start_matches(['/', '\\'])),
            _ => PathBuf::from(raw),
        },
        None => home
            .map(|h| h.join(DATA_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from(DATA_DIR_NAME)),
    }
}
