//! Bridge configuration.
//!
//! Loaded from a TOML file named by `PRESENT_BRIDGE_CONFIG`, or from
//! `present-bridge.toml` in the working directory. Missing files fall back to
//! defaults; the bridge never writes a config file on its own.
//!
//! ```toml
//! band_count = 3
//! default_scale_factor = 3.0
//! strategy = "gpu"
//! pixel_format = "bgra8"
//! shader_library = "shaders/default.spv"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "PRESENT_BRIDGE_CONFIG";

/// Config file looked up in the working directory when `CONFIG_ENV` is unset.
pub const CONFIG_FILE_NAME: &str = "present-bridge.toml";

/// Upper bound on the band replication factor.
pub const MAX_BAND_COUNT: u32 = 16;

/// How pixels reach the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresentStrategy {
    /// Composite the visible band on the CPU, then hand the frame to the window.
    Cpu,
    /// Import the caller's buffer into the GPU and copy straight into the swap target.
    Gpu,
}

impl Default for PresentStrategy {
    fn default() -> Self {
        if cfg!(feature = "gpu-present") {
            PresentStrategy::Gpu
        } else {
            PresentStrategy::Cpu
        }
    }
}

/// Byte order agreed with the CPU-side renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Blue, green, red, alpha (matches the swap target, bytes copied unchanged)
    #[default]
    Bgra8,
    /// Red, green, blue, alpha
    Rgba8,
}

impl PixelFormat {
    /// Bytes per packed pixel. Fixed at 4 for every supported format.
    pub const BYTES_PER_PIXEL: usize = 4;

    /// Packs an opaque color into this format's byte order.
    pub fn pack(self, r: u8, g: u8, b: u8, a: u8) -> [u8; 4] {
        match self {
            PixelFormat::Bgra8 => [b, g, r, a],
            PixelFormat::Rgba8 => [r, g, b, a],
        }
    }
}

/// Complete bridge configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Number of stacked bands in the tall presentation texture (K).
    pub band_count: u32,
    /// Scale factor reported for unknown window handles.
    pub default_scale_factor: f32,
    /// Presentation strategy for new windows.
    pub strategy: PresentStrategy,
    /// Pixel byte order of caller buffers.
    pub pixel_format: PixelFormat,
    /// SPIR-V module loaded by the device bridge's default-library call.
    pub shader_library: PathBuf,
    /// Enable Vulkan validation layers.
    pub validation: bool,
    /// Upper bound on any single GPU wait, in milliseconds.
    pub fence_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            band_count: 3,
            default_scale_factor: 3.0,
            strategy: PresentStrategy::default(),
            pixel_format: PixelFormat::default(),
            shader_library: PathBuf::from("default.spv"),
            validation: cfg!(debug_assertions),
            fence_timeout_ms: 1000,
        }
    }
}

impl BridgeConfig {
    /// Loads configuration from the environment-selected file, the working
    /// directory file, or defaults, in that order.
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) => Self::from_file(&path),
            None => {
                debug!("No bridge config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Loads and validates configuration from a specific file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        info!("Bridge configuration loaded from {:?}", path);
        Ok(config)
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: BridgeConfig =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.band_count == 0 || self.band_count > MAX_BAND_COUNT {
            return Err(Error::Config(format!(
                "band_count must be in 1..={}, got {}",
                MAX_BAND_COUNT, self.band_count
            )));
        }
        if !self.default_scale_factor.is_finite() || self.default_scale_factor <= 0.0 {
            return Err(Error::Config(format!(
                "default_scale_factor must be positive, got {}",
                self.default_scale_factor
            )));
        }
        if self.fence_timeout_ms == 0 {
            return Err(Error::Config("fence_timeout_ms must be non-zero".to_string()));
        }
        Ok(())
    }

    /// GPU wait bound in nanoseconds, as Vulkan expects it.
    pub fn fence_timeout_ns(&self) -> u64 {
        self.fence_timeout_ms.saturating_mul(1_000_000)
    }

    fn config_path() -> Option<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }
        let local = PathBuf::from(CONFIG_FILE_NAME);
        local.exists().then_some(local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = BridgeConfig::default();
        assert_eq!(config.band_count, 3);
        assert_eq!(config.default_scale_factor, 3.0);
        assert_eq!(config.pixel_format, PixelFormat::Bgra8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = BridgeConfig::from_toml("band_count = 2\nstrategy = \"cpu\"\n").unwrap();
        assert_eq!(config.band_count, 2);
        assert_eq!(config.strategy, PresentStrategy::Cpu);
        assert_eq!(config.default_scale_factor, 3.0);
        assert_eq!(config.fence_timeout_ms, 1000);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let result = BridgeConfig::from_toml("bands = 3\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        assert!(BridgeConfig::from_toml("band_count = 0\n").is_err());
        assert!(BridgeConfig::from_toml("band_count = 17\n").is_err());
        assert!(BridgeConfig::from_toml("default_scale_factor = 0.0\n").is_err());
        assert!(BridgeConfig::from_toml("default_scale_factor = -2.0\n").is_err());
        assert!(BridgeConfig::from_toml("fence_timeout_ms = 0\n").is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "pixel_format = \"rgba8\"").unwrap();
        writeln!(file, "shader_library = \"shaders/quad.spv\"").unwrap();

        let config = BridgeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.pixel_format, PixelFormat::Rgba8);
        assert_eq!(config.shader_library, PathBuf::from("shaders/quad.spv"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = BridgeConfig::from_file(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_pack_byte_order() {
        assert_eq!(PixelFormat::Bgra8.pack(0xFF, 0x10, 0x20, 0xFF), [0x20, 0x10, 0xFF, 0xFF]);
        assert_eq!(PixelFormat::Rgba8.pack(0xFF, 0x10, 0x20, 0xFF), [0xFF, 0x10, 0x20, 0xFF]);
    }

    #[test]
    fn test_fence_timeout_ns() {
        let config = BridgeConfig {
            fence_timeout_ms: 5,
            ..Default::default()
        };
        assert_eq!(config.fence_timeout_ns(), 5_000_000);
    }
}
