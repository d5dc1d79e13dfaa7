use std::path::Path;
use std::str::FromStr;

use tracing::debug;

use crate::config::SourceConfig;
use crate::engine::{AviSynth, VapourSynth};
use crate::error::{ConfigError, Result};
use crate::plugin::SPECIFIER_SEPARATOR;
use crate::source::{PluginSource, ScriptSource, Source, WavSource};

/// Backend family a specifier is served by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Wav,
    AviSynth,
    VapourSynth,
    Plugin,
}

impl SourceKind {
    pub const ALL: [SourceKind; 4] = [Self::Wav, Self::AviSynth, Self::VapourSynth, Self::Plugin];

    /// Pick the backend for `specifier`
    ///
    /// `name://file` always goes to a plugin. Otherwise the file extension
    /// decides, and anything unrecognized goes to the default plugin.
    pub fn detect(specifier: &str) -> Self {
        if specifier.contains(SPECIFIER_SEPARATOR) {
            return Self::Plugin;
        }

        let extension = Path::new(specifier)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("wav") => Self::Wav,
            Some("avs") => Self::AviSynth,
            Some("vpy") => Self::VapourSynth,
            _ => Self::Plugin,
        }
    }

    /// Short name accepted by [`FromStr`]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::AviSynth => "avs",
            Self::VapourSynth => "vpy",
            Self::Plugin => "plugin",
        }
    }

    /// Construct an uninitialized source of this kind
    ///
    /// Script engines are loaded here, so a missing engine library fails
    /// before any script is evaluated.
    pub fn create(&self, config: &SourceConfig) -> Result<Box<dyn Source>> {
        let source: Box<dyn Source> = match self {
            Self::Wav => Box::new(WavSource::with_scan_limit(config.wav.header_scan_limit)),
            Self::AviSynth => Box::new(ScriptSource::new(AviSynth::load(&config.avisynth.library)?)),
            Self::VapourSynth => {
                Box::new(ScriptSource::new(VapourSynth::load(&config.vapoursynth.library)?))
            }
            Self::Plugin => Box::new(PluginSource::new(&config.plugin)),
        };
        Ok(source)
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SourceKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wav" => Ok(Self::Wav),
            "avs" | "avisynth" => Ok(Self::AviSynth),
            "vpy" | "vapoursynth" => Ok(Self::VapourSynth),
            "plugin" | "aui" => Ok(Self::Plugin),
            _ => Err(ConfigError::InvalidValue {
                key: "kind".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Open `specifier` with the backend its name selects
pub fn open_source(specifier: &str, config: &SourceConfig) -> Result<Box<dyn Source>> {
    open_source_as(SourceKind::detect(specifier), specifier, config)
}

/// Open `specifier` with an explicitly chosen backend
pub fn open_source_as(
    kind: SourceKind,
    specifier: &str,
    config: &SourceConfig,
) -> Result<Box<dyn Source>> {
    debug!("Opening {} as {}", specifier, kind);
    let mut source = kind.create(config)?;
    source.init(specifier)?;
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{HandshakeStage, SourceError};
    use std::path::PathBuf;

    #[test]
    fn test_detect_by_extension() {
        assert_eq!(SourceKind::detect("song.wav"), SourceKind::Wav);
        assert_eq!(SourceKind::detect("SONG.WAV"), SourceKind::Wav);
        assert_eq!(SourceKind::detect("clips/edit.avs"), SourceKind::AviSynth);
        assert_eq!(SourceKind::detect("edit.vpy"), SourceKind::VapourSynth);
        assert_eq!(SourceKind::detect("movie.mp4"), SourceKind::Plugin);
        assert_eq!(SourceKind::detect("no_extension"), SourceKind::Plugin);
    }

    #[test]
    fn test_separator_wins_over_extension() {
        assert_eq!(SourceKind::detect("lwinput.aui://song.wav"), SourceKind::Plugin);
    }

    #[test]
    fn test_names_parse_back() {
        for kind in SourceKind::ALL {
            assert_eq!(kind.name().parse::<SourceKind>().unwrap(), kind);
        }
        assert_eq!("AviSynth".parse::<SourceKind>().unwrap(), SourceKind::AviSynth);
        assert!("mkv".parse::<SourceKind>().is_err());
    }

    #[test]
    fn test_missing_engine_library() {
        let mut config = SourceConfig::default();
        config.avisynth.library = PathBuf::from("/nonexistent/libavisynth.so");

        let err = open_source("edit.avs", &config).err().unwrap();
        assert!(matches!(
            err,
            SourceError::Handshake {
                stage: HandshakeStage::LoadLibrary,
                ..
            }
        ));
    }

    #[test]
    fn test_missing_plugin_module() {
        let mut config = SourceConfig::default();
        config.plugin.search_dir = Some(PathBuf::from("/nonexistent/plugins"));

        let err = open_source("movie.mp4", &config).err().unwrap();
        match err {
            SourceError::Handshake { stage, path, .. } => {
                assert_eq!(stage, HandshakeStage::LoadLibrary);
                assert!(path.ends_with("avsinp.aui"));
            }
            other => panic!("Expected Handshake error, got {:?}", other),
        }
    }

    #[test]
    fn test_open_missing_wav() {
        let err = open_source("/nonexistent/song.wav", &SourceConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, SourceError::Open { backend: "wav", .. }));
    }
}
