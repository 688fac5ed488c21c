// Configuration - Load settings from config.toml
//
// Provides sensible defaults if the config file is missing or has errors.

use crate::scene::SceneKind;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub scene: SceneConfig,
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
            title: "frameloop".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    /// Ring depth: swapchain images, command buffers, and fences all share it.
    pub slot_count: usize,
    /// How many frames to render before shutting down.
    pub frame_count: u32,
    pub clear_color: [f32; 4],
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            slot_count: 3,
            frame_count: 512,
            clear_color: [0.042, 0.042, 0.042, 1.0],
        }
    }
}

/// Scene selection
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub provider: String,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            provider: "quad".to_string(),
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: false,
            log_to_file: false,
            log_file: "frameloop.log".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {}. Using defaults.", e);
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

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);

        Ok(config)
    }

    /// Get the configured scene provider
    pub fn scene_kind(&self) -> SceneKind {
        match self.scene.provider.to_lowercase().as_str() {
            "quad" => SceneKind::Quad,
            "textured-quad" | "textured_quad" => SceneKind::TexturedQuad,
            _ => {
                log::warn!(
                    "Unknown scene provider '{}', defaulting to quad",
                    self.scene.provider
                );
                SceneKind::Quad
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let config: Config = toml::from_str(
            r#"
            [window]
            title = "test"
            width = 640
            height = 480

            [graphics]
            slot_count = 2
            frame_count = 16
            clear_color = [0.0, 0.5, 1.0, 1.0]

            [scene]
            provider = "textured-quad"

            [debug]
            validation_layers = true
            "#,
        )
        .unwrap();

        assert_eq!(config.window.width, 640);
        assert_eq!(config.graphics.slot_count, 2);
        assert_eq!(config.graphics.frame_count, 16);
        assert_eq!(config.scene_kind(), SceneKind::TexturedQuad);
        assert!(config.debug.validation_layers);
    }

    #[test]
    fn missing_sections_use_defaults() {
        let config: Config = toml::from_str("[window]\ntitle = \"t\"\n").unwrap();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.graphics.slot_count, 3);
        assert_eq!(config.graphics.frame_count, 512);
        assert_eq!(config.scene_kind(), SceneKind::Quad);
        assert!(!config.debug.validation_layers);
    }

    #[test]
    fn unknown_provider_falls_back_to_quad() {
        let config: Config = toml::from_str("[scene]\nprovider = \"teapot\"\n").unwrap();
        assert_eq!(config.scene_kind(), SceneKind::Quad);
    }
}
