use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Format tag of uncompressed linear PCM
pub const WAVE_FORMAT_PCM: u16 = 0x0001;

/// Size in bytes of the on-disk PCM format record
pub const FORMAT_STRUCT_SIZE: usize = 18;

bitflags! {
    /// Capability bits of a source
    ///
    /// The bit values are the ones input plugins report, so plugin flags can be
    /// taken over unchanged.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct InputFlags: u32 {
        const VIDEO = 0x1;
        const AUDIO = 0x2;
        const VIDEO_RANDOM_ACCESS = 0x8;
    }
}

impl Default for InputFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Video frame rate expressed as `rate / scale` frames per second
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRate {
    pub rate: u32,
    pub scale: u32,
}

impl FrameRate {
    /// Create a frame rate, rejecting a zero numerator or denominator
    pub fn new(rate: u32, scale: u32) -> Option<Self> {
        (rate > 0 && scale > 0).then_some(Self { rate, scale })
    }

    /// Frames per second as a float, for display
    pub fn fps(&self) -> f64 {
        self.rate as f64 / self.scale as f64
    }
}

impl std::fmt::Display for FrameRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} ({:.3} fps)", self.rate, self.scale, self.fps())
    }
}

/// PCM audio format record
///
/// Mirrors the little-endian layout found in `fmt ` chunks and in the
/// `WAVEFORMATEX` structure input plugins hand out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub format_tag: u16,
    pub channels: u16,
    pub samples_per_sec: u32,
    pub avg_bytes_per_sec: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    pub extra_size: u16,
}

impl AudioFormat {
    /// Interleaved signed 16-bit PCM with the derived block alignment
    pub fn pcm16(channels: u16, samples_per_sec: u32) -> Self {
        let block_align = channels.saturating_mul(2);
        Self {
            format_tag: WAVE_FORMAT_PCM,
            channels,
            samples_per_sec,
            avg_bytes_per_sec: samples_per_sec.saturating_mul(block_align as u32),
            block_align,
            bits_per_sample: 16,
            extra_size: 0,
        }
    }

    /// Decode a format record from its little-endian bytes
    ///
    /// Accepts a truncated record; fields past the end of `bytes` stay zero.
    pub fn from_le_bytes(bytes: &[u8]) -> Self {
        let mut record = [0u8; FORMAT_STRUCT_SIZE];
        let len = bytes.len().min(FORMAT_STRUCT_SIZE);
        record[..len].copy_from_slice(&bytes[..len]);

        let u16_at = |at: usize| u16::from_le_bytes([record[at], record[at + 1]]);
        let u32_at = |at: usize| {
            u32::from_le_bytes([record[at], record[at + 1], record[at + 2], record[at + 3]])
        };

        Self {
            format_tag: u16_at(0),
            channels: u16_at(2),
            samples_per_sec: u32_at(4),
            avg_bytes_per_sec: u32_at(8),
            block_align: u16_at(12),
            bits_per_sample: u16_at(14),
            extra_size: u16_at(16),
        }
    }

    pub fn is_pcm(&self) -> bool {
        self.format_tag == WAVE_FORMAT_PCM
    }
}

/// Description of the media a source serves
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Capability bits
    pub flags: InputFlags,

    /// Frame rate numerator
    pub rate: u32,

    /// Frame rate denominator
    pub scale: u32,

    /// Number of addressable video frames, if known
    pub frame_count: Option<u32>,

    /// Luma plane width in pixels
    pub width: u32,

    /// Luma plane height in pixels
    pub height: u32,

    /// Audio format, present when the source carries audio
    pub audio: Option<AudioFormat>,

    /// Total number of audio sample frames, if known
    pub audio_sample_count: Option<u64>,
}

impl MediaInfo {
    /// Current frame rate, or `None` while no usable rate is set
    pub fn frame_rate(&self) -> Option<FrameRate> {
        FrameRate::new(self.rate, self.scale)
    }

    /// Width of the region video reads cover (multiple of 16)
    pub fn aligned_width(&self) -> u32 {
        self.width & !0xF
    }

    /// Height of the region video reads cover (multiple of 16)
    pub fn aligned_height(&self) -> u32 {
        self.height & !0xF
    }

    /// Number of bytes one `read_video_y8` call writes
    pub fn luma_len(&self) -> usize {
        self.aligned_width() as usize * self.aligned_height() as usize
    }

    /// Upper bound of a single frame's audio window, in sample frames
    pub fn max_audio_window(&self) -> Option<usize> {
        let audio = self.audio.as_ref()?;
        let rate = self.frame_rate()?;
        let per_frame = audio.samples_per_sec as u64 * rate.scale as u64;
        Some((per_frame.div_ceil(rate.rate as u64) + 1) as usize)
    }

    /// Byte size of a buffer that holds any single frame's audio window
    pub fn audio_buffer_len(&self) -> Option<usize> {
        let block_align = self.audio.as_ref()?.block_align as usize;
        Some(self.max_audio_window()? * block_align)
    }
}

impl std::fmt::Display for MediaInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.flags.contains(InputFlags::VIDEO) {
            write!(f, "video {}x{}", self.width, self.height)?;
            match self.frame_rate() {
                Some(rate) => write!(f, " @ {}", rate)?,
                None => write!(f, " @ unknown rate")?,
            }
            match self.frame_count {
                Some(n) => write!(f, ", {} frames", n)?,
                None => write!(f, ", unknown length")?,
            }
        } else {
            write!(f, "no video")?;
        }

        match &self.audio {
            Some(audio) if self.flags.contains(InputFlags::AUDIO) => write!(
                f,
                "; audio {} Hz, {} ch, {} bit",
                audio.samples_per_sec, audio.channels, audio.bits_per_sample
            ),
            _ => write!(f, "; no audio"),
        }
    }
}
