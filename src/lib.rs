//! # Media Source
//!
//! Frame-indexed video and frame-aligned audio from script engines, input
//! plugins and WAV files behind one interface.
//!
//! Every backend implements [`Source`]: it is initialized once with a
//! specifier, reports a [`MediaInfo`], and then serves two reads:
//!
//! - `read_video_y8(frame)` writes the 16-aligned 8-bit luma plane of a frame
//! - `read_audio(frame)` writes the PCM samples of that frame's time window
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use media_source::{open_source, SourceConfig};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = SourceConfig::default();
//! let mut source = open_source("edit.avs", &config)?;
//!
//! let mut luma = vec![0u8; source.info().luma_len()];
//! source.read_video_y8(0, &mut luma)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`source`] - The [`Source`] trait, its adapters and backend selection
//! - [`engine`] - AviSynth and VapourSynth runtimes loaded at run time
//! - [`plugin`] - Input plugin modules and their function table
//! - [`config`] - Configuration management
//!
//! ## Custom Backends
//!
//! Any type implementing [`Source`] can be used wherever a `Box<dyn Source>` is expected:
//!
//! ```rust
//! use media_source::{MediaInfo, Result, Source};
//!
//! struct Silence {
//!     info: MediaInfo,
//! }
//!
//! impl Source for Silence {
//!     fn backend(&self) -> &'static str {
//!         "silence"
//!     }
//!
//!     fn init(&mut self, _specifier: &str) -> Result<()> {
//!         Ok(())
//!     }
//!
//!     fn info(&self) -> &MediaInfo {
//!         &self.info
//!     }
//!
//!     fn info_mut(&mut self) -> &mut MediaInfo {
//!         &mut self.info
//!     }
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod plugin;
pub mod source;

// Re-export commonly used types for convenience
pub use crate::{
    config::SourceConfig,
    error::{Result, SourceError},
    source::{open_source, MediaInfo, NullSource, Source, SourceKind, TimeWindow},
};
