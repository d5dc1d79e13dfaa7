use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ConfigError, Result},
    plugin::DEFAULT_PLUGIN,
    source::wav::DEFAULT_HEADER_SCAN_LIMIT,
};

/// Smallest scan limit that still covers the RIFF/WAVE preamble
const MIN_HEADER_SCAN_LIMIT: u64 = 12;

/// Configuration for opening media sources
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Input plugin host settings
    #[serde(default)]
    pub plugin: PluginConfig,

    /// AviSynth engine settings
    #[serde(default)]
    pub avisynth: AviSynthConfig,

    /// VapourSynth engine settings
    #[serde(default)]
    pub vapoursynth: VapourSynthConfig,

    /// WAV reader settings
    #[serde(default)]
    pub wav: WavConfig,
}

impl SourceConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound { path: path.display().to_string() })?;

        let config: SourceConfig = toml::from_str(&content)
            .map_err(|_| ConfigError::ParseFailed { path: path.display().to_string() })?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::InvalidValue {
                key: "config".to_string(),
                value: e.to_string()
            })?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.plugin.validate()?;
        validate_library("avisynth.library", &self.avisynth.library)?;
        validate_library("vapoursynth.library", &self.vapoursynth.library)?;
        self.wav.validate()?;
        Ok(())
    }
}

fn validate_library(key: &str, library: &Path) -> Result<()> {
    if library.as_os_str().is_empty() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: String::new()
        }.into());
    }
    Ok(())
}

/// Input plugin host configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Plugin used when a specifier does not name one
    pub default_name: String,

    /// Directory searched for plugin modules given by relative name
    pub search_dir: Option<PathBuf>,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            default_name: DEFAULT_PLUGIN.to_string(),
            search_dir: None,
        }
    }
}

impl PluginConfig {
    fn validate(&self) -> Result<()> {
        if self.default_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "plugin.default_name".to_string(),
                value: self.default_name.clone()
            }.into());
        }

        if let Some(dir) = &self.search_dir {
            if dir.as_os_str().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "plugin.search_dir".to_string(),
                    value: String::new()
                }.into());
            }
        }

        Ok(())
    }
}

/// AviSynth engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AviSynthConfig {
    /// Shared library providing the AviSynth C API
    pub library: PathBuf,
}

impl Default for AviSynthConfig {
    fn default() -> Self {
        let library = if cfg!(windows) {
            "AviSynth.dll"
        } else if cfg!(target_os = "macos") {
            "libavisynth.dylib"
        } else {
            "libavisynth.so"
        };
        Self { library: PathBuf::from(library) }
    }
}

/// VapourSynth engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VapourSynthConfig {
    /// Shared library providing VSScript
    pub library: PathBuf,
}

impl Default for VapourSynthConfig {
    fn default() -> Self {
        let library = if cfg!(windows) {
            "VSScript.dll"
        } else if cfg!(target_os = "macos") {
            "libvapoursynth-script.dylib"
        } else {
            "libvapoursynth-script.so"
        };
        Self { library: PathBuf::from(library) }
    }
}

/// WAV reader configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WavConfig {
    /// Bytes of header searched for the data chunk before giving up
    pub header_scan_limit: u64,
}

impl Default for WavConfig {
    fn default() -> Self {
        Self {
            header_scan_limit: DEFAULT_HEADER_SCAN_LIMIT,
        }
    }
}

impl WavConfig {
    fn validate(&self) -> Result<()> {
        if self.header_scan_limit <= MIN_HEADER_SCAN_LIMIT {
            return Err(ConfigError::InvalidValue {
                key: "wav.header_scan_limit".to_string(),
                value: self.header_scan_limit.to_string()
            }.into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = SourceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.plugin.default_name, "avsinp.aui");
        assert_eq!(config.wav.header_scan_limit, 1_000_000);
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("sources.toml");

        let mut original_config = SourceConfig::default();
        original_config.plugin.search_dir = Some(dir.path().join("plugins"));
        original_config.avisynth.library = PathBuf::from("/opt/avs/libavisynth.so");

        original_config.save_to_file(&file_path).unwrap();
        let loaded_config = SourceConfig::from_file(&file_path).unwrap();

        assert_eq!(original_config, loaded_config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("partial.toml");
        std::fs::write(&file_path, "[wav]\nheader_scan_limit = 4096\n").unwrap();

        let config = SourceConfig::from_file(&file_path).unwrap();
        assert_eq!(config.wav.header_scan_limit, 4096);
        assert_eq!(config.plugin, PluginConfig::default());
        assert_eq!(config.vapoursynth, VapourSynthConfig::default());
    }

    #[test]
    fn test_missing_and_malformed_files() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            SourceConfig::from_file(dir.path().join("absent.toml")),
            Err(SourceError::Config(ConfigError::FileNotFound { .. }))
        ));

        let file_path = dir.path().join("broken.toml");
        std::fs::write(&file_path, "[wav\nheader_scan_limit = ").unwrap();
        assert!(matches!(
            SourceConfig::from_file(&file_path),
            Err(SourceError::Config(ConfigError::ParseFailed { .. }))
        ));
    }

    #[test]
    fn test_invalid_scan_limit() {
        let mut config = SourceConfig::default();
        config.wav.header_scan_limit = 12;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_plugin_name() {
        let mut config = SourceConfig::default();
        config.plugin.default_name = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_engine_library() {
        let mut config = SourceConfig::default();
        config.vapoursynth.library = PathBuf::new();
        assert!(config.validate().is_err());
    }
}
