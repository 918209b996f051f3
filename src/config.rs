// =============================================================================
// CONFIGURATION - Built-in constants with optional config.toml overrides
// =============================================================================
//
// The renderer core only sees immutable values: a `Config` loaded once at
// startup and the `DeviceConfig` derived from it. Nothing here is mutated
// after `main` hands it over.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::ffi::CStr;
use std::path::Path;

/// Number of frame slots the scheduler cycles through.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

pub const DEFAULT_WIDTH: u32 = 800;
pub const DEFAULT_HEIGHT: u32 = 600;

pub const VERTEX_SHADER_PATH: &str = "shaders/triangle.vert.spv";
pub const FRAGMENT_SHADER_PATH: &str = "shaders/triangle.frag.spv";

const VALIDATION_LAYERS: &[&CStr] = &[c"VK_LAYER_KHRONOS_validation"];

const DEVICE_EXTENSIONS: &[&CStr] = &[
    ash::khr::swapchain::NAME,
    #[cfg(target_os = "macos")]
    ash::khr::portability_subset::NAME,
];

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Hello Triangle".to_string(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub clear_color: [f32; 4],
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Only honored in debug builds.
    pub validation_layers: bool,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            show_fps: false,
        }
    }
}

/// Everything device setup needs to know, fixed for the lifetime of the program.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub app_name: String,
    pub enable_validation: bool,
    pub validation_layers: &'static [&'static CStr],
    pub device_extensions: &'static [&'static CStr],
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn device_config(&self) -> DeviceConfig {
        DeviceConfig {
            app_name: self.window.title.clone(),
            enable_validation: cfg!(debug_assertions) && self.debug.validation_layers,
            validation_layers: VALIDATION_LAYERS,
            device_extensions: DEVICE_EXTENSIONS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.window.width, DEFAULT_WIDTH);
        assert_eq!(config.window.height, DEFAULT_HEIGHT);
        assert_eq!(config.graphics.clear_color, [0.0, 0.0, 0.0, 1.0]);
        assert!(config.debug.validation_layers);
    }

    #[test]
    fn partial_tables_keep_remaining_defaults() {
        let config = Config::parse(
            r#"
            [window]
            width = 1024

            [graphics]
            clear_color = [0.1, 0.2, 0.3, 1.0]
            "#,
        )
        .unwrap();

        assert_eq!(config.window.width, 1024);
        assert_eq!(config.window.height, DEFAULT_HEIGHT);
        assert_eq!(config.window.title, "Hello Triangle");
        assert_eq!(config.graphics.clear_color, [0.1, 0.2, 0.3, 1.0]);
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(Config::parse("[window\nwidth = ").is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::load_from_path("does/not/exist/config.toml").unwrap();
        assert_eq!(config.window.title, "Hello Triangle");
    }

    #[test]
    fn validation_disabled_when_config_says_so() {
        let mut config = Config::default();
        config.debug.validation_layers = false;
        assert!(!config.device_config().enable_validation);
    }

    #[test]
    fn device_config_requires_swapchain_extension() {
        let device_config = Config::default().device_config();
        assert!(device_config.device_extensions.contains(&ash::khr::swapchain::NAME));
        assert_eq!(device_config.validation_layers, VALIDATION_LAYERS);
    }
}
