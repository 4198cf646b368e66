//! Configuration system
//!
//! Every configuration struct implements [`Config`], which loads and saves
//! TOML or RON depending on the file extension. [`EngineConfig`] is the root
//! document an application reads at startup.

use std::path::{Path, PathBuf};

pub use serde::{Serialize, Deserialize};

use crate::render::technique::TechniqueKind;

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        match extension(path) {
            Some("toml") => toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string())),
            Some("ron") => ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string())),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = match extension(path) {
            Some("toml") => {
                toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
            }
            Some("ron") => ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?,
            _ => return Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        };

        std::fs::write(path, contents)?;
        Ok(())
    }
}

fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|ext| ext.to_str())
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A value is outside its valid range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Upper bound for the descriptor pool growth cap
pub const DEFAULT_MAX_SETS_PER_POOL: u32 = 4092;

/// # Renderer Configuration
///
/// Tuning for the frame ring, the transient descriptor pools and the
/// rendering techniques.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Number of frame slots in the ring (1..=4)
    pub frames_in_flight: usize,
    /// How long to wait on a slot's fence before declaring the device lost
    pub fence_timeout_ms: u64,
    /// Set capacity of the first descriptor pool of each slot
    pub initial_sets_per_pool: u32,
    /// Growth cap for descriptor pool capacity
    pub max_sets_per_pool: u32,
    /// Technique that is active after startup
    pub technique: TechniqueKind,
    /// Shadow map edge length in texels
    pub shadow_map_size: u32,
    /// Constant depth bias applied while rendering the shadow map
    pub shadow_depth_bias: f32,
    /// Slope-scaled depth bias applied while rendering the shadow map
    pub shadow_slope_bias: f32,
    /// Directory containing compiled `.spv` shader modules
    pub shader_directory: PathBuf,
    /// Whether to enable Vulkan validation layers
    pub enable_validation: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            fence_timeout_ms: 1000,
            initial_sets_per_pool: 16,
            max_sets_per_pool: DEFAULT_MAX_SETS_PER_POOL,
            technique: TechniqueKind::BasicForward,
            shadow_map_size: 2048,
            shadow_depth_bias: 1.25,
            shadow_slope_bias: 1.75,
            shader_directory: PathBuf::from("target/shaders"),
            enable_validation: cfg!(debug_assertions),
        }
    }
}

impl RendererConfig {
    /// Set the number of frames in flight
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Set the startup technique
    pub fn with_technique(mut self, technique: TechniqueKind) -> Self {
        self.technique = technique;
        self
    }

    /// Set the initial and maximum descriptor pool capacities
    pub fn with_pool_sizes(mut self, initial: u32, max: u32) -> Self {
        self.initial_sets_per_pool = initial;
        self.max_sets_per_pool = max;
        self
    }

    /// Set the shadow map edge length in texels
    pub fn with_shadow_map_size(mut self, size: u32) -> Self {
        self.shadow_map_size = size;
        self
    }

    /// Set the fence wait timeout
    pub fn with_fence_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.fence_timeout_ms = timeout_ms;
        self
    }

    /// Set the shader directory
    pub fn with_shader_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shader_directory = dir.into();
        self
    }

    /// Enable or disable validation layers
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = enabled;
        self
    }

    /// Fence timeout in nanoseconds, as the device API expects it
    pub fn fence_timeout_ns(&self) -> u64 {
        self.fence_timeout_ms.saturating_mul(1_000_000)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=4).contains(&self.frames_in_flight) {
            return Err(ConfigError::Invalid(format!(
                "frames_in_flight must be between 1 and 4, got {}",
                self.frames_in_flight
            )));
        }
        if self.fence_timeout_ms == 0 {
            return Err(ConfigError::Invalid("fence_timeout_ms must be non-zero".to_string()));
        }
        if self.initial_sets_per_pool == 0 {
            return Err(ConfigError::Invalid("initial_sets_per_pool must be non-zero".to_string()));
        }
        if self.max_sets_per_pool < self.initial_sets_per_pool {
            return Err(ConfigError::Invalid(format!(
                "max_sets_per_pool ({}) is smaller than initial_sets_per_pool ({})",
                self.max_sets_per_pool, self.initial_sets_per_pool
            )));
        }
        if !self.shadow_map_size.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "shadow_map_size must be a power of two, got {}",
                self.shadow_map_size
            )));
        }
        Ok(())
    }
}

impl Config for RendererConfig {}

/// Window settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Window title
    pub title: String,
    /// Initial width in pixels
    pub width: u32,
    /// Initial height in pixels
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Scene Viewer".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

/// # Engine Configuration
///
/// Root configuration document for an application built on the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Window settings
    pub window: WindowConfig,
    /// Renderer settings
    pub renderer: RendererConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Validate every section
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid("window dimensions must be non-zero".to_string()));
        }
        self.renderer.validate()
    }
}

impl Config for EngineConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.renderer.frames_in_flight, 2);
        assert_eq!(config.renderer.max_sets_per_pool, DEFAULT_MAX_SETS_PER_POOL);
        assert_eq!(config.renderer.fence_timeout_ns(), 1_000_000_000);
    }

    #[test]
    fn test_invalid_ring_size_rejected() {
        let config = RendererConfig::default().with_frames_in_flight(0);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = RendererConfig::default().with_frames_in_flight(5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pool_cap_below_initial_rejected() {
        let config = RendererConfig::default().with_pool_sizes(64, 32);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip_on_disk() {
        let dir = std::env::temp_dir().join(format!("render_engine_cfg_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("engine.toml");

        let mut config = EngineConfig::default();
        config.renderer = config
            .renderer
            .with_technique(TechniqueKind::Deferred)
            .with_frames_in_flight(3);
        config.window.title = "round trip".to_string();

        config.save_to_file(&path).unwrap();
        let loaded = EngineConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [renderer]
            technique = "ShadowMappedForward"
            "#,
        )
        .unwrap();

        assert_eq!(config.renderer.technique, TechniqueKind::ShadowMappedForward);
        assert_eq!(config.window, WindowConfig::default());
    }

    #[test]
    fn test_unsupported_extension() {
        let result = EngineConfig::load_from_file("engine.yaml");
        // The read fails first when the file is missing, either way it is an error.
        assert!(result.is_err());
        let err = EngineConfig::default().save_to_file("engine.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(_)));
    }
}
