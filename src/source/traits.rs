use crate::{
    error::{Result, SourceError},
    source::types::{InputFlags, MediaInfo},
};

/// Core trait that every media source backend implements
///
/// A source is constructed empty, initialized once with [`Source::init`],
/// queried and read any number of times, then dropped. Dropping releases the
/// backend (file, plugin module, script engine).
///
/// Every read takes `&mut self`: backends mutate their handle on each call
/// (seek position, frame cache), so one instance serves one caller at a time.
pub trait Source {
    /// Short backend identity used in logs and error messages
    fn backend(&self) -> &'static str;

    /// Open the backend for `specifier`
    ///
    /// On failure no backend resource stays alive and the source cannot be
    /// used. Calling `init` a second time fails with
    /// [`SourceError::AlreadyInitialized`].
    fn init(&mut self, specifier: &str) -> Result<()>;

    /// Media description reported by the backend
    fn info(&self) -> &MediaInfo;

    #[doc(hidden)]
    fn info_mut(&mut self) -> &mut MediaInfo;

    /// Whether video frames can be read
    fn has_video(&self) -> bool {
        self.info().flags.contains(InputFlags::VIDEO)
    }

    /// Whether audio samples can be read
    fn has_audio(&self) -> bool {
        self.info().flags.contains(InputFlags::AUDIO)
    }

    /// Override the frame rate used by every later audio window
    ///
    /// Windows already read are not affected.
    fn set_rate(&mut self, rate: u32, scale: u32) {
        let info = self.info_mut();
        info.rate = rate;
        info.scale = scale;
    }

    /// Decode `frame` and write its 16-aligned 8-bit luma plane into `luma`
    ///
    /// Exactly [`MediaInfo::luma_len`] bytes are written, rows of
    /// [`MediaInfo::aligned_width`] bytes with no padding.
    fn read_video_y8(&mut self, frame: u32, luma: &mut [u8]) -> Result<()> {
        let _ = (frame, luma);
        Err(SourceError::Unsupported {
            operation: "read_video_y8",
        })
    }

    /// Write the PCM samples of `frame`'s time window into `buf`
    ///
    /// Returns the number of sample frames written; zero is a valid empty window.
    fn read_audio(&mut self, frame: u32, buf: &mut [u8]) -> Result<usize> {
        let _ = (frame, buf);
        Err(SourceError::Unsupported {
            operation: "read_audio",
        })
    }
}

/// Check that `buf` can hold `needed` bytes
pub(crate) fn ensure_capacity(buf: &[u8], needed: usize) -> Result<()> {
    if buf.len() < needed {
        return Err(SourceError::BufferTooSmall {
            needed,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// Source without a backend
///
/// Reports no capabilities and refuses every read.
#[derive(Debug, Default)]
pub struct NullSource {
    info: MediaInfo,
}

impl NullSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Source for NullSource {
    fn backend(&self) -> &'static str {
        "null"
    }

    fn init(&mut self, _specifier: &str) -> Result<()> {
        Ok(())
    }

    fn info(&self) -> &MediaInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut MediaInfo {
        &mut self.info
    }
}
