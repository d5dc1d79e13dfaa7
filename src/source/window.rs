use crate::error::{Result, SourceError};
use crate::source::types::{FrameRate, MediaInfo};

/// Half-open range `[start, end)` of audio sample frames covered by one video frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: u64,
    pub end: u64,
}

impl TimeWindow {
    /// Map video frame `frame` onto the audio stream sampled at `sample_rate`
    ///
    /// Both bounds use the same expression, evaluated left to right in f64
    /// and truncated, so `for_frame(f).end == for_frame(f + 1).start`.
    /// Backends truncate the same way; the operation order must not change.
    pub fn for_frame(frame: u32, sample_rate: u32, rate: FrameRate) -> Self {
        Self {
            start: Self::boundary(frame as u64, sample_rate, rate),
            end: Self::boundary(frame as u64 + 1, sample_rate, rate),
        }
    }

    /// Window for `frame` using the rate and audio format currently held by `info`
    pub fn from_info(frame: u32, info: &MediaInfo) -> Result<Self> {
        let rate = info.frame_rate().ok_or(SourceError::InvalidRate {
            rate: info.rate,
            scale: info.scale,
        })?;
        let audio = info.audio.as_ref().ok_or(SourceError::Unsupported {
            operation: "read_audio",
        })?;
        Ok(Self::for_frame(frame, audio.samples_per_sec, rate))
    }

    fn boundary(frame: u64, sample_rate: u32, rate: FrameRate) -> u64 {
        (frame as f64 * sample_rate as f64 / rate.rate as f64 * rate.scale as f64) as u64
    }

    /// Number of sample frames in the window
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}
