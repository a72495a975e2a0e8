//! Viewer configuration
//!
//! Defaults, overridden by a TOML file, overridden by `FLIPBOOK_*`
//! environment variables.

use crate::presenter::FlipBookConfig;
use crate::thumbnails::ThumbnailConfig;
use flipbook_render::{PageFormat, RasterConfig};
use flipbook_scheduler::PagePool;
use flipbook_storage::{ResolveStrategy, MAGAZINES_BUCKET};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_NAME: &str = "flipbook";
const CONFIG_FILENAME: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue { key: String, value: String, reason: &'static str },

    #[error("missing required setting {0}")]
    Missing(&'static str),
}

/// Bitmap encoding named in configuration files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Jpeg,
    Png,
}

/// Rasterization backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderBackend {
    /// PDFium when it can be loaded, otherwise the built-in renderer
    #[default]
    Auto,
    /// `lopdf` parsing with `tiny-skia` painting; text is not drawn
    Builtin,
    /// PDFium only; needs the `pdfium` feature and the PDFium library
    Pdfium,
}

impl RenderBackend {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "builtin" => Some(Self::Builtin),
            "pdfium" => Some(Self::Pdfium),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Builtin => "builtin",
            Self::Pdfium => "pdfium",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// Points-to-pixels scale
    pub scale: f32,

    /// JPEG quality, 1-100
    pub jpeg_quality: u8,

    pub format: ImageFormat,

    /// Pages rendered concurrently; 1 renders sequentially
    pub workers: usize,

    pub backend: RenderBackend,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            scale: 1.5,
            jpeg_quality: 70,
            format: ImageFormat::Jpeg,
            workers: 1,
            backend: RenderBackend::Auto,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Project URL of the hosted storage service
    pub base_url: Option<String>,

    pub bucket: String,

    pub api_key: Option<String>,

    pub signed_url_ttl_secs: u64,

    pub strategy: ResolveStrategy,

    /// Overall HTTP timeout; none when unset
    pub timeout_secs: Option<u64>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            bucket: MAGAZINES_BUCKET.to_string(),
            api_key: None,
            signed_url_ttl_secs: 3600,
            strategy: ResolveStrategy::Download,
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenterSettings {
    pub flipping_time_ms: u64,
    pub swipe_distance: f32,
    pub show_cover: bool,
    pub sound: bool,
}

impl Default for PresenterSettings {
    fn default() -> Self {
        Self { flipping_time_ms: 1000, swipe_distance: 30.0, show_cover: true, sound: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailSettings {
    pub width: f32,
    pub height: f32,
    pub spacing: f32,
}

impl Default for ThumbnailSettings {
    fn default() -> Self {
        Self { width: 96.0, height: 128.0, spacing: 16.0 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Soft budget for cached page bytes; exceeding it is only logged
    pub memory_limit_mb: Option<u64>,
}

/// Complete viewer configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub render: RenderSettings,
    pub storage: StorageSettings,
    pub presenter: PresenterSettings,
    pub thumbnails: ThumbnailSettings,
    pub cache: CacheSettings,
}

impl ViewerConfig {
    /// Platform config file location, e.g. `~/.config/flipbook/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_NAME).join(CONFIG_FILENAME))
    }

    /// Load configuration.
    ///
    /// An explicit `path` must exist. Without one, the default path is used
    /// when present. Environment variables are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|path| path.exists()) {
                Some(path) => {
                    log::debug!("loading config from {}", path.display());
                    Self::from_file(&path)?
                }
                None => Self::default(),
            },
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply `FLIPBOOK_*` overrides from the process environment.
    ///
    /// - `FLIPBOOK_STORAGE_URL`, `FLIPBOOK_STORAGE_KEY`, `FLIPBOOK_BUCKET`
    /// - `FLIPBOOK_RENDER_SCALE`, `FLIPBOOK_JPEG_QUALITY`, `FLIPBOOK_WORKERS`
    /// - `FLIPBOOK_RENDER_BACKEND` (`auto`, `builtin` or `pdfium`)
    /// - `FLIPBOOK_SIGNED_URL_TTL` (seconds)
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(url) = lookup("FLIPBOOK_STORAGE_URL") {
            self.storage.base_url = Some(url);
        }
        if let Some(key) = lookup("FLIPBOOK_STORAGE_KEY") {
            self.storage.api_key = Some(key);
        }
        if let Some(bucket) = lookup("FLIPBOOK_BUCKET") {
            self.storage.bucket = bucket;
        }
        if let Some(value) = lookup("FLIPBOOK_RENDER_SCALE") {
            self.render.scale = parse_env("FLIPBOOK_RENDER_SCALE", &value)?;
        }
        if let Some(value) = lookup("FLIPBOOK_JPEG_QUALITY") {
            self.render.jpeg_quality = parse_env("FLIPBOOK_JPEG_QUALITY", &value)?;
        }
        if let Some(value) = lookup("FLIPBOOK_WORKERS") {
            self.render.workers = parse_env("FLIPBOOK_WORKERS", &value)?;
        }
        if let Some(value) = lookup("FLIPBOOK_RENDER_BACKEND") {
            self.render.backend = RenderBackend::from_name(value.trim()).ok_or_else(|| {
                ConfigError::InvalidValue {
                    key: "FLIPBOOK_RENDER_BACKEND".to_string(),
                    value: value.clone(),
                    reason: "expected auto, builtin or pdfium",
                }
            })?;
        }
        if let Some(value) = lookup("FLIPBOOK_SIGNED_URL_TTL") {
            self.storage.signed_url_ttl_secs = parse_env("FLIPBOOK_SIGNED_URL_TTL", &value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, value: String, reason| {
            Err(ConfigError::InvalidValue { key: key.to_string(), value, reason })
        };

        if !(self.render.scale > 0.0 && self.render.scale <= 8.0) {
            return invalid("render.scale", self.render.scale.to_string(), "must be in (0, 8]");
        }
        if !(1..=100).contains(&self.render.jpeg_quality) {
            return invalid("render.jpeg_quality", self.render.jpeg_quality.to_string(), "must be 1-100");
        }
        if self.render.workers == 0 {
            return invalid("render.workers", "0".to_string(), "must be at least 1");
        }
        if self.render.backend == RenderBackend::Pdfium && !cfg!(feature = "pdfium") {
            return invalid("render.backend", "pdfium".to_string(), "built without the pdfium feature");
        }
        if self.storage.bucket.trim().is_empty() {
            return invalid("storage.bucket", self.storage.bucket.clone(), "must not be empty");
        }
        if self.storage.signed_url_ttl_secs == 0 {
            return invalid("storage.signed_url_ttl_secs", "0".to_string(), "must be positive");
        }
        let swipe = self.presenter.swipe_distance;
        if swipe.is_nan() || swipe < 0.0 {
            return invalid("presenter.swipe_distance", swipe.to_string(), "must not be negative");
        }
        Ok(())
    }

    pub fn raster_config(&self) -> RasterConfig {
        let format = match self.render.format {
            ImageFormat::Jpeg => PageFormat::Jpeg { quality: self.render.jpeg_quality },
            ImageFormat::Png => PageFormat::Png,
        };
        RasterConfig { scale: self.render.scale, format }
    }

    /// Worker pool for parallel rendering, when more than one worker is set.
    pub fn page_pool(&self) -> Option<PagePool> {
        (self.render.workers > 1).then(|| PagePool::new(self.render.workers))
    }

    pub fn flip_book_config(&self) -> FlipBookConfig {
        FlipBookConfig {
            flipping_time: Duration::from_millis(self.presenter.flipping_time_ms),
            swipe_distance: self.presenter.swipe_distance,
            show_cover: self.presenter.show_cover,
            sound_enabled: self.presenter.sound,
        }
    }

    pub fn thumbnail_config(&self) -> ThumbnailConfig {
        ThumbnailConfig {
            thumbnail_width: self.thumbnails.width,
            thumbnail_height: self.thumbnails.height,
            spacing: self.thumbnails.spacing,
        }
    }

    pub fn signed_url_ttl(&self) -> Duration {
        Duration::from_secs(self.storage.signed_url_ttl_secs)
    }

    pub fn http_timeout(&self) -> Option<Duration> {
        self.storage.timeout_secs.map(Duration::from_secs)
    }

    pub fn memory_limit_bytes(&self) -> Option<usize> {
        self.cache.memory_limit_mb.map(|mb| (mb as usize).saturating_mul(1024 * 1024))
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: "not a valid number",
    })
}
