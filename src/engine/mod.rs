//! # Script Engine Bindings
//!
//! Video processing engines that evaluate a user script into a lazy clip.
//! Both engines are loaded from their shared libraries at runtime, so the
//! crate builds and runs on machines that have neither installed.
//!
//! - [`avisynth`] - AviSynth+ through its C API
//! - [`vapoursynth`] - VapourSynth through VSScript, video only
//!
//! [`ScriptSource`](crate::source::ScriptSource) drives any [`ScriptEngine`].

use std::path::Path;

pub mod avisynth;
pub mod vapoursynth;

pub use avisynth::AviSynth;
pub use vapoursynth::VapourSynth;

/// Sample representation of a clip's audio track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    Int8,
    Int16,
    Int24,
    Int32,
    Float,
}

/// Pixel layout of a clip's video
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoFormat {
    pub bits_per_component: u8,
    pub planar: bool,
    /// Gray or YUV family, where plane 0 is luma
    pub yuv: bool,
}

impl VideoFormat {
    /// Whether plane 0 already holds 8-bit luma that can be copied as is
    pub fn has_luma8_plane(&self) -> bool {
        self.bits_per_component == 8 && self.planar && self.yuv
    }
}

/// What an engine reports about a clip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipInfo {
    pub width: u32,
    pub height: u32,
    pub fps_numerator: u32,
    pub fps_denominator: u32,
    pub frame_count: u32,
    pub format: VideoFormat,
    pub audio_sample_rate: u32,
    pub audio_channels: u16,
    pub audio_sample_type: SampleType,
    pub audio_sample_count: u64,
}

impl ClipInfo {
    pub fn has_audio(&self) -> bool {
        self.audio_sample_count > 0
    }
}

/// Borrowed view of a decoded luma plane
#[derive(Debug, Clone, Copy)]
pub struct LumaPlane<'a> {
    /// Plane bytes, `stride` bytes per row
    pub data: &'a [u8],
    pub stride: usize,
    pub width: usize,
    pub height: usize,
}

impl LumaPlane<'_> {
    /// Copy the top-left `width` x `height` region into a tightly packed buffer
    pub fn copy_region(&self, dst: &mut [u8], width: usize, height: usize) -> Result<(), String> {
        if width > self.width || height > self.height {
            return Err(format!(
                "requested {}x{} region from a {}x{} plane",
                width, height, self.width, self.height
            ));
        }
        if height > 0 && self.data.len() < (height - 1) * self.stride + width {
            return Err("plane data shorter than its stride implies".to_string());
        }

        for (row, out) in dst.chunks_exact_mut(width.max(1)).take(height).enumerate() {
            let src = &self.data[row * self.stride..row * self.stride + width];
            out[..width].copy_from_slice(src);
        }
        Ok(())
    }
}

/// A loaded script engine runtime
///
/// Errors are plain messages; the adapter wraps them together with the
/// library location and script path.
pub trait ScriptEngine {
    /// Handle to an evaluated clip, released when dropped
    type Clip;

    /// Engine name used in logs and diagnostics
    fn name(&self) -> &'static str;

    /// Location of the engine library this runtime was loaded from
    fn library_path(&self) -> &Path;

    /// Whether clips from this engine can carry audio
    fn supports_audio(&self) -> bool;

    /// Evaluate a script file into its output clip
    fn evaluate(&mut self, script: &Path) -> Result<Self::Clip, String>;

    fn clip_info(&self, clip: &Self::Clip) -> ClipInfo;

    /// Convert the clip to a single 8-bit luma plane with the engine's own filter
    fn convert_to_luma8(&mut self, clip: Self::Clip) -> Result<Self::Clip, String>;

    /// Convert the clip's audio to signed 16-bit samples with the engine's own filter
    fn convert_audio_to_i16(&mut self, clip: Self::Clip) -> Result<Self::Clip, String>;

    /// Request `frame` from the clip and hand its luma plane to `f`
    fn with_luma_plane<R>(
        &mut self,
        clip: &Self::Clip,
        frame: u32,
        f: impl FnOnce(LumaPlane<'_>) -> R,
    ) -> Result<R, String>;

    /// Fill `buf` with `count` interleaved sample frames starting at `start`
    fn read_audio(
        &mut self,
        clip: &Self::Clip,
        start: u64,
        count: u64,
        buf: &mut [u8],
    ) -> Result<(), String>;
}
