//! # Media Sources
//!
//! One interface over several ways of getting decoded media: random access
//! to video frames as 8-bit luma, and the audio samples aligned to each frame.
//!
//! ## Backends
//!
//! - **WAV**: PCM read straight from a RIFF/WAVE file, audio only
//! - **Script engines**: AviSynth and VapourSynth scripts, frames pulled lazily
//! - **Input plugins**: AviUtl style `*.aui` modules, selected with `name://file`
//!
//! ## Usage
//!
//! ```rust,no_run
//! use media_source::{config::SourceConfig, source::open_source};
//!
//! # fn main() -> media_source::Result<()> {
//! let mut source = open_source("song.wav", &SourceConfig::default())?;
//! source.set_rate(30000, 1001);
//!
//! let mut pcm = vec![0u8; source.info().audio_buffer_len().unwrap_or(0)];
//! let samples = source.read_audio(0, &mut pcm)?;
//! println!("Frame 0 covers {} sample frames", samples);
//! # Ok(())
//! # }
//! ```

pub mod plugin;
pub mod registry;
pub mod script;
pub mod traits;
pub mod types;
pub mod wav;
pub mod window;

pub use plugin::{deinterleave_luma, PluginLoader, PluginSource};
pub use registry::{open_source, open_source_as, SourceKind};
pub use script::ScriptSource;
pub use traits::{NullSource, Source};
pub use types::{AudioFormat, FrameRate, InputFlags, MediaInfo};
pub use wav::WavSource;
pub use window::TimeWindow;
