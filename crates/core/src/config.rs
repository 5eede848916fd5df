//! Engine configuration loaded from TOML.
//!
//! Every field has a default, so an empty or partial file is valid:
//!
//! ```toml
//! [window]
//! width = 1600
//! height = 900
//!
//! [render]
//! present_mode = "fifo"
//! msaa_samples = 4
//!
//! [post]
//! chain = ["tonemap", "bloom"]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Top-level engine configuration.
///
/// Every section and key is optional; missing ones take their defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub window: WindowConfig,
    pub render: RenderConfig,
    pub post: PostConfig,
    pub logging: LoggingConfig,
    pub assets: AssetConfig,
}

impl EngineConfig {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        debug!("Parsed config: {:?}", config);
        Ok(config)
    }

    /// Reject a zero window size, a bad sample count, a zero fence timeout and
    /// duplicate post chain entries.
    pub fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(Error::Config(format!(
                "window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }

        let samples = self.render.msaa_samples;
        if !samples.is_power_of_two() || samples > 64 {
            return Err(Error::Config(format!(
                "msaa_samples must be a power of two in 1..=64, got {}",
                samples
            )));
        }

        if self.render.fence_timeout_ms == 0 {
            return Err(Error::Config("fence_timeout_ms must be > 0".to_string()));
        }

        self.post.validated_chain()?;
        Ok(())
    }
}

/// `[window]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            title: "Ember".to_string(),
        }
    }
}

/// Present mode the swapchain tries first. FIFO is the fallback for all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentModePreference {
    #[default]
    Mailbox,
    Fifo,
    Immediate,
}

/// `[render]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub validation: bool,
    pub present_mode: PresentModePreference,
    /// Requested MSAA sample count, clamped to what the device supports.
    pub msaa_samples: u32,
    pub clear_color: [f32; 4],
    /// Upper bound on a frame fence wait before the device is considered lost.
    pub fence_timeout_ms: u64,
}

impl RenderConfig {
    /// Bound on every fence wait.
    #[inline]
    pub fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_timeout_ms)
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            validation: cfg!(debug_assertions),
            present_mode: PresentModePreference::Mailbox,
            msaa_samples: 4,
            clear_color: [0.02, 0.02, 0.04, 1.0],
            fence_timeout_ms: 5_000,
        }
    }
}

/// Post-process filters that can appear in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    Grayscale,
    Tonemap,
    Bloom,
}

impl FilterKind {
    pub fn name(self) -> &'static str {
        match self {
            FilterKind::Grayscale => "grayscale",
            FilterKind::Tonemap => "tonemap",
            FilterKind::Bloom => "bloom",
        }
    }
}

/// `[post]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PostConfig {
    /// Filters in execution order.
    pub chain: Vec<FilterKind>,
    pub lighting: bool,
    pub exposure: f32,
    pub bloom_filter_radius: f32,
    pub bloom_intensity: f32,
}

impl PostConfig {
    /// The filter chain with duplicates rejected.
    pub fn validated_chain(&self) -> Result<Vec<FilterKind>> {
        let mut seen = Vec::with_capacity(self.chain.len());
        for &kind in &self.chain {
            if seen.contains(&kind) {
                return Err(Error::Config(format!(
                    "filter '{}' appears more than once in post.chain",
                    kind.name()
                )));
            }
            seen.push(kind);
        }
        Ok(seen)
    }
}

impl Default for PostConfig {
    fn default() -> Self {
        Self {
            chain: vec![FilterKind::Tonemap, FilterKind::Bloom],
            lighting: true,
            exposure: 1.0,
            bloom_filter_radius: 0.005,
            bloom_intensity: 0.04,
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    pub thread_ids: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,ember=debug".to_string(),
            thread_ids: true,
        }
    }
}

/// `[assets]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    /// Directory holding compiled SPIR-V blobs.
    pub shader_dir: PathBuf,
}

impl AssetConfig {
    /// Path of compiled shader `name` under the shader directory.
    pub fn shader_path(&self, name: &str) -> PathBuf {
        self.shader_dir.join(name)
    }
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            shader_dir: PathBuf::from("shaders/spirv"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.render.present_mode, PresentModePreference::Mailbox);
        assert_eq!(
            config.post.chain,
            vec![FilterKind::Tonemap, FilterKind::Bloom]
        );
    }

    #[test]
    fn test_partial_sections() {
        let config = EngineConfig::from_toml_str(
            r#"
            [window]
            width = 800
            [render]
            present_mode = "fifo"
            msaa_samples = 1
            [post]
            chain = ["grayscale"]
            "#,
        )
        .unwrap();

        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.render.present_mode, PresentModePreference::Fifo);
        assert_eq!(config.render.msaa_samples, 1);
        assert_eq!(config.post.chain, vec![FilterKind::Grayscale]);
    }

    #[test]
    fn test_rejects_duplicate_filters() {
        let result = EngineConfig::from_toml_str(
            r#"
            [post]
            chain = ["bloom", "tonemap", "bloom"]
            "#,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_bad_sample_count() {
        let result = EngineConfig::from_toml_str("[render]\nmsaa_samples = 3\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_zero_window() {
        let result = EngineConfig::from_toml_str("[window]\nwidth = 0\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_unknown_present_mode_is_parse_error() {
        let result = EngineConfig::from_toml_str("[render]\npresent_mode = \"vsync\"\n");
        assert!(matches!(result, Err(Error::Toml(_))));
    }

    #[test]
    fn test_fence_timeout_duration() {
        let config = RenderConfig {
            fence_timeout_ms: 250,
            ..Default::default()
        };
        assert_eq!(config.fence_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = EngineConfig::load(Path::new("definitely/not/here.toml")).unwrap();
        assert_eq!(config.window.title, "Ember");
    }

    #[test]
    fn test_shader_path_joins_dir() {
        let assets = AssetConfig::default();
        assert_eq!(
            assets.shader_path("mesh.vert.spv"),
            PathBuf::from("shaders/spirv/mesh.vert.spv")
        );
    }
}
