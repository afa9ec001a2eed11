// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Every field has a default matching the demo's built-in constants, so the
// file is optional.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub logic: LogicConfig,
    pub assets: AssetConfig,
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
            title: "RHI Triangle Demo".to_string(),
            width: 640,
            height: 480,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub max_frames_in_flight: usize,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "fifo".to_string(),
            clear_color: [0.2, 0.3, 0.4, 0.0],
            max_frames_in_flight: 2,
        }
    }
}

/// Fixed-rate logic thread settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogicConfig {
    pub tick_rate: u32,
}

impl Default for LogicConfig {
    fn default() -> Self {
        Self { tick_rate: 120 }
    }
}

/// Where the demo finds its shaders and texture
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    /// Empty means the crate directory
    pub root: String,
    pub vertex_shader: String,
    pub fragment_shader: String,
    pub texture: String,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            root: String::new(),
            vertex_shader: "Shader/Demo1.vert.spv".to_string(),
            fragment_shader: "Shader/Demo2.frag.spv".to_string(),
            texture: "checker512.png".to_string(),
        }
    }
}

impl AssetConfig {
    pub fn root_dir(&self) -> PathBuf {
        if self.root.is_empty() {
            PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        } else {
            PathBuf::from(&self.root)
        }
    }

    pub fn vertex_shader_path(&self) -> PathBuf {
        self.root_dir().join(&self.vertex_shader)
    }

    pub fn fragment_shader_path(&self) -> PathBuf {
        self.root_dir().join(&self.fragment_shader)
    }

    pub fn texture_path(&self) -> PathBuf {
        self.root_dir().join(&self.texture)
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_to_file: false,
            log_file: "rhi_demo.log".to_string(),
            show_fps: true,
        }
    }
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

    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        if config.graphics.max_frames_in_flight == 0 {
            log::warn!("max_frames_in_flight = 0 is not usable, using 1");
            config.graphics.max_frames_in_flight = 1;
        }
        if config.logic.tick_rate == 0 {
            log::warn!("tick_rate = 0 is not usable, using 120");
            config.logic.tick_rate = LogicConfig::default().tick_rate;
        }
        Ok(config)
    }

    /// Get present mode as Vulkan enum
    pub fn get_present_mode(&self) -> ash::vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => ash::vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => ash::vk::PresentModeKHR::MAILBOX,
            "fifo" => ash::vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => ash::vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.graphics.present_mode
                );
                ash::vk::PresentModeKHR::FIFO
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_demo_constants() {
        let config = Config::default();
        assert_eq!(config.window.title, "RHI Triangle Demo");
        assert_eq!((config.window.width, config.window.height), (640, 480));
        assert_eq!(config.graphics.clear_color, [0.2, 0.3, 0.4, 0.0]);
        assert_eq!(config.logic.tick_rate, 120);
        assert!(config
            .assets
            .vertex_shader_path()
            .ends_with("Shader/Demo1.vert.spv"));
        assert!(config.assets.texture_path().ends_with("checker512.png"));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = Config::parse(
            r#"
            [window]
            width = 1024

            [logic]
            tick_rate = 60
            "#,
        )
        .unwrap();
        assert_eq!(config.window.width, 1024);
        assert_eq!(config.window.height, 480);
        assert_eq!(config.logic.tick_rate, 60);
        assert_eq!(config.graphics.max_frames_in_flight, 2);
    }

    #[test]
    fn unusable_values_are_clamped() {
        let config = Config::parse(
            r#"
            [graphics]
            max_frames_in_flight = 0
            [logic]
            tick_rate = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.graphics.max_frames_in_flight, 1);
        assert_eq!(config.logic.tick_rate, 120);
    }

    #[test]
    fn explicit_asset_root_is_used() {
        let config = Config::parse(
            r#"
            [assets]
            root = "/opt/demo"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.assets.fragment_shader_path(),
            PathBuf::from("/opt/demo/Shader/Demo2.frag.spv")
        );
    }

    #[test]
    fn unknown_present_mode_falls_back_to_fifo() {
        let mut config = Config::default();
        config.graphics.present_mode = "vsync-please".to_string();
        assert_eq!(config.get_present_mode(), ash::vk::PresentModeKHR::FIFO);
        config.graphics.present_mode = "Mailbox".to_string();
        assert_eq!(config.get_present_mode(), ash::vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load_from_path("/definitely/not/here/config.toml").unwrap();
        assert_eq!(config.window.width, 640);
    }
}
