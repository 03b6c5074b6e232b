use anyhow::Context;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, RwLock};

use crate::pdf::RenderTarget;

const APP_NAME: &str = "pageview";
const SETTINGS_FILENAME: &str = "config.yaml";
const CURRENT_VERSION: u32 = 1;

pub const DEFAULT_MEMORY_CACHE_BYTES: usize = 100 * 1024 * 1024;
pub const DEFAULT_MIN_PAGE_WIDTH: u32 = 1080;
pub const DEFAULT_MAX_PAGE_WIDTH: u32 = 1440;
pub const DEFAULT_MAX_ZOOM: f32 = 3.0;
pub const DEFAULT_PREFETCH_RADIUS: usize = 1;

/// Tunables of the viewing engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewerSettings {
    #[serde(default = "default_version")]
    pub version: u32,

    /// Capacity of the rendered page cache in bytes
    #[serde(default = "default_memory_cache_byte_count")]
    pub memory_cache_byte_count: usize,

    #[serde(default = "default_min_page_width")]
    pub min_page_width: u32,

    #[serde(default = "default_max_page_width")]
    pub max_page_width: u32,

    /// Page height divided by page width
    #[serde(default = "default_page_aspect_ratio")]
    pub page_aspect_ratio: f32,

    #[serde(default = "default_max_zoom")]
    pub max_zoom: f32,

    #[serde(default = "default_true")]
    pub download_cache_enabled: bool,

    /// Directory for downloaded documents; platform cache dir when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Pages beyond each end of the visible range rendered ahead of time
    #[serde(default = "default_prefetch_radius")]
    pub prefetch_radius: usize,
}

fn default_true() -> bool {
    true
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_memory_cache_byte_count() -> usize {
    DEFAULT_MEMORY_CACHE_BYTES
}

fn default_min_page_width() -> u32 {
    DEFAULT_MIN_PAGE_WIDTH
}

fn default_max_page_width() -> u32 {
    DEFAULT_MAX_PAGE_WIDTH
}

fn default_page_aspect_ratio() -> f32 {
    std::f32::consts::SQRT_2
}

fn default_max_zoom() -> f32 {
    DEFAULT_MAX_ZOOM
}

fn default_prefetch_radius() -> usize {
    DEFAULT_PREFETCH_RADIUS
}

impl Default for ViewerSettings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            memory_cache_byte_count: default_memory_cache_byte_count(),
            min_page_width: default_min_page_width(),
            max_page_width: default_max_page_width(),
            page_aspect_ratio: default_page_aspect_ratio(),
            max_zoom: default_max_zoom(),
            download_cache_enabled: true,
            cache_dir: None,
            prefetch_radius: default_prefetch_radius(),
        }
    }
}

impl ViewerSettings {
    /// Copy with out-of-range values replaced by usable ones
    #[must_use]
    pub fn sanitized(&self) -> Self {
        let mut fixed = self.clone();

        if fixed.min_page_width > fixed.max_page_width {
            std::mem::swap(&mut fixed.min_page_width, &mut fixed.max_page_width);
        }
        if fixed.max_page_width == 0 {
            fixed.min_page_width = DEFAULT_MIN_PAGE_WIDTH;
            fixed.max_page_width = DEFAULT_MAX_PAGE_WIDTH;
        }
        fixed.min_page_width = fixed.min_page_width.max(1);
        if !fixed.page_aspect_ratio.is_finite() || fixed.page_aspect_ratio <= 0.0 {
            fixed.page_aspect_ratio = default_page_aspect_ratio();
        }
        if !fixed.max_zoom.is_finite() {
            fixed.max_zoom = DEFAULT_MAX_ZOOM;
        }
        fixed.max_zoom = fixed.max_zoom.max(1.0);
        if fixed.memory_cache_byte_count == 0 {
            fixed.memory_cache_byte_count = DEFAULT_MEMORY_CACHE_BYTES;
        }

        if fixed != *self {
            warn!("Adjusted invalid viewer settings: {self:?} -> {fixed:?}");
        }
        fixed
    }

    /// Render size for pages shown in a viewport `viewport_width` pixels wide
    #[must_use]
    pub fn render_target(&self, viewport_width: f32) -> RenderTarget {
        RenderTarget::for_viewport(
            viewport_width,
            self.min_page_width,
            self.max_page_width,
            self.page_aspect_ratio,
        )
    }

    /// Configured cache directory, falling back to the platform cache dir
    #[must_use]
    pub fn download_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(APP_NAME)
        })
    }
}

static SETTINGS: LazyLock<RwLock<ViewerSettings>> =
    LazyLock::new(|| RwLock::new(ViewerSettings::default()));

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

/// Load the settings file from the config dir, writing defaults if it is
/// missing. Failures are logged and leave the current settings in place.
pub fn load_settings() {
    let Some(path) = config_path() else {
        warn!("Could not determine config directory, using default settings");
        return;
    };

    if path.exists() {
        if let Err(e) = load_settings_from_path(&path) {
            error!("{e:#}");
        }
    } else {
        info!("Settings file not found, creating with defaults at {path:?}");
        if let Err(e) = save_settings_to_file(&get_settings(), &path) {
            error!("{e:#}");
        }
    }
}

/// Parse `path` and make it the active settings
pub fn load_settings_from_path(path: &Path) -> anyhow::Result<()> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file {path:?}"))?;
    let mut settings = parse_settings(&content)
        .with_context(|| format!("Failed to parse settings file {path:?}"))?;
    debug!("Loaded settings from {path:?}");

    if settings.version < CURRENT_VERSION {
        migrate_settings(&mut settings);
        save_settings_to_file(&settings, path)?;
    }

    set_settings(settings);
    Ok(())
}

/// Deserialize and sanitize settings YAML
pub fn parse_settings(content: &str) -> anyhow::Result<ViewerSettings> {
    if content.trim().is_empty() {
        return Ok(ViewerSettings::default());
    }
    let settings: ViewerSettings = serde_yaml::from_str(content)?;
    Ok(settings.sanitized())
}

fn migrate_settings(settings: &mut ViewerSettings) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );
    settings.version = CURRENT_VERSION;
}

pub fn save_settings_to_file(settings: &ViewerSettings, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {parent:?}"))?;
        }
    }

    let mut content = String::from(SETTINGS_HEADER);
    content.push_str(&serde_yaml::to_string(settings)?);

    fs::write(path, content).with_context(|| format!("Failed to save settings to {path:?}"))?;
    debug!("Saved settings to {path:?}");
    Ok(())
}

const SETTINGS_HEADER: &str = "\
# pageview settings
#
# memory_cache_byte_count: rendered page cache capacity in bytes
# min_page_width / max_page_width: render width bounds in pixels
# page_aspect_ratio: page height / width (1.4142 = ISO A series)
# max_zoom: largest zoom factor reachable by pinch or double tap
# download_cache_enabled: reuse downloaded documents across loads
# cache_dir: where downloads are kept (optional)
# prefetch_radius: pages rendered ahead beyond each end of the view

";

#[must_use]
pub fn get_settings() -> ViewerSettings {
    SETTINGS
        .read()
        .map(|s| s.clone())
        .unwrap_or_else(|_| ViewerSettings::default())
}

pub fn set_settings(settings: ViewerSettings) {
    if let Ok(mut global) = SETTINGS.write() {
        *global = settings.sanitized();
    }
}
