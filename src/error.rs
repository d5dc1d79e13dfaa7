use std::path::PathBuf;

use thiserror::Error;

/// Main error type for media sources
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("{backend}: cannot open '{path}': {reason}")]
    Open {
        backend: &'static str,
        path: String,
        reason: String,
    },

    #[error("Unsupported format: {details}")]
    FormatUnsupported { details: String },

    #[error("{backend}: {stage} failed for '{path}': {reason}")]
    Handshake {
        backend: &'static str,
        stage: HandshakeStage,
        path: String,
        reason: String,
    },

    #[error("Failed to parse '{path}': {reason}")]
    Parse { path: String, reason: String },

    #[error("Decoding failed: {reason}")]
    Decode { reason: String },

    #[error("Operation not supported by this source: {operation}")]
    Unsupported { operation: &'static str },

    #[error(
        "{engine} error: {message} (check the engine library {} and the script {})",
        library.display(),
        script.display()
    )]
    Script {
        engine: &'static str,
        library: PathBuf,
        script: PathBuf,
        message: String,
    },

    #[error("Output buffer too small: need {needed} bytes, got {actual}")]
    BufferTooSmall { needed: usize, actual: usize },

    #[error("Invalid frame rate {rate}/{scale}")]
    InvalidRate { rate: u32, scale: u32 },

    #[error("Source is already initialized")]
    AlreadyInitialized,

    #[error("Source is not initialized")]
    NotInitialized,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stage of a backend handshake that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStage {
    LoadLibrary,
    Symbol,
    Environment,
    Table,
    PluginInit,
    InfoGet,
}

impl std::fmt::Display for HandshakeStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stage = match self {
            Self::LoadLibrary => "library loading",
            Self::Symbol => "symbol lookup",
            Self::Environment => "environment setup",
            Self::Table => "plugin table",
            Self::PluginInit => "func_init()",
            Self::InfoGet => "func_info_get()",
        };
        f.write_str(stage)
    }
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration file: {path}")]
    ParseFailed { path: String },

    #[error("Invalid configuration value: {key} = {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },
}

/// Convenience type alias for Results using SourceError
pub type Result<T> = std::result::Result<T, SourceError>;

impl SourceError {
    pub(crate) fn decode<S: Into<String>>(reason: S) -> Self {
        Self::Decode {
            reason: reason.into(),
        }
    }

    pub(crate) fn parse<P: Into<String>, S: Into<String>>(path: P, reason: S) -> Self {
        Self::Parse {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unsupported_format<S: Into<String>>(details: S) -> Self {
        Self::FormatUnsupported {
            details: details.into(),
        }
    }

    /// Check if this error makes the source unusable
    ///
    /// Initialization failures are fatal to the instance. Read failures only
    /// concern the frame that was asked for; another frame may still succeed.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::Decode { .. }
                | Self::Unsupported { .. }
                | Self::BufferTooSmall { .. }
                | Self::InvalidRate { .. }
        )
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Open { path, .. } => {
                format!("Could not open '{}'. Please check the file exists and is readable.", path)
            }
            Self::Handshake {
                backend,
                stage: HandshakeStage::LoadLibrary,
                ..
            } => {
                format!("Could not load the {} module. Please check it is installed and on the search path.", backend)
            }
            Self::Script {
                engine,
                library,
                script,
                message,
            } => {
                format!(
                    "{}\nCheck the {} installation: {}\nAnd the script file: {}",
                    message,
                    engine,
                    library.display(),
                    script.display()
                )
            }
            Self::InvalidRate { .. } => {
                "No frame rate is set for this source. Call set_rate before reading audio.".to_string()
            }
            _ => self.to_string(),
        }
    }
}
