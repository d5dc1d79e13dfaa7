use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

use crate::engine::{SampleType, ScriptEngine};
use crate::error::{Result, SourceError};
use crate::source::traits::{ensure_capacity, Source};
use crate::source::types::{AudioFormat, InputFlags, MediaInfo};
use crate::source::window::TimeWindow;

/// Source serving frames and audio of a script evaluated by a [`ScriptEngine`]
///
/// On `init` the script's output clip is normalized with the engine's own
/// filters: video is converted to 8-bit luma unless plane 0 already is, and
/// audio is converted to signed 16-bit. Frames are requested lazily by index.
pub struct ScriptSource<E: ScriptEngine> {
    info: MediaInfo,
    script: PathBuf,
    // declared before `engine` so the clip is released first
    clip: Option<E::Clip>,
    engine: E,
}

impl<E: ScriptEngine> ScriptSource<E> {
    /// Wrap a loaded engine runtime; the script is evaluated by `init`
    pub fn new(engine: E) -> Self {
        Self {
            info: MediaInfo::default(),
            script: PathBuf::new(),
            clip: None,
            engine,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    fn script_error(&self, script: &Path, message: String) -> SourceError {
        error!("{}", message);
        error!("Check the {}: {}", self.engine.name(), self.engine.library_path().display());
        error!("And the script file: {}", script.display());

        SourceError::Script {
            engine: self.engine.name(),
            library: self.engine.library_path().to_path_buf(),
            script: script.to_path_buf(),
            message,
        }
    }

    /// Evaluate and normalize the script's output clip
    fn prepare(&mut self, script: &Path) -> std::result::Result<E::Clip, String> {
        let mut clip = self.engine.evaluate(script)?;
        let mut clip_info = self.engine.clip_info(&clip);

        if !clip_info.format.has_luma8_plane() {
            debug!(
                "Converting {}-bit clip to 8-bit luma",
                clip_info.format.bits_per_component
            );
            clip = self.engine.convert_to_luma8(clip)?;
            clip_info = self.engine.clip_info(&clip);
        }

        if self.engine.supports_audio()
            && clip_info.has_audio()
            && clip_info.audio_sample_type != SampleType::Int16
        {
            debug!("Converting {:?} audio to 16 bit", clip_info.audio_sample_type);
            clip = self.engine.convert_audio_to_i16(clip)?;
        }

        Ok(clip)
    }
}

impl<E: ScriptEngine> Source for ScriptSource<E> {
    fn backend(&self) -> &'static str {
        self.engine.name()
    }

    fn init(&mut self, specifier: &str) -> Result<()> {
        if self.clip.is_some() {
            return Err(SourceError::AlreadyInitialized);
        }

        let script = PathBuf::from(specifier);
        let clip = self
            .prepare(&script)
            .map_err(|message| self.script_error(&script, message))?;
        let clip_info = self.engine.clip_info(&clip);

        let mut flags = InputFlags::VIDEO | InputFlags::VIDEO_RANDOM_ACCESS;
        let has_audio = self.engine.supports_audio() && clip_info.has_audio();
        if has_audio {
            flags.insert(InputFlags::AUDIO);
        }

        self.info = MediaInfo {
            flags,
            rate: clip_info.fps_numerator,
            scale: clip_info.fps_denominator,
            frame_count: Some(clip_info.frame_count),
            width: clip_info.width,
            height: clip_info.height,
            audio: has_audio
                .then(|| AudioFormat::pcm16(clip_info.audio_channels, clip_info.audio_sample_rate)),
            audio_sample_count: has_audio.then_some(clip_info.audio_sample_count),
        };
        self.script = script;
        self.clip = Some(clip);

        info!("Opened {} script {}: {}", self.engine.name(), specifier, self.info);
        Ok(())
    }

    fn info(&self) -> &MediaInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut MediaInfo {
        &mut self.info
    }

    fn read_video_y8(&mut self, frame: u32, luma: &mut [u8]) -> Result<()> {
        let clip = self.clip.as_ref().ok_or(SourceError::NotInitialized)?;
        if self.info.frame_count.is_some_and(|count| frame >= count) {
            return Err(SourceError::decode(format!(
                "frame {} past the end of {}",
                frame,
                self.script.display()
            )));
        }

        let needed = self.info.luma_len();
        ensure_capacity(luma, needed)?;
        let width = self.info.aligned_width() as usize;
        let height = self.info.aligned_height() as usize;

        self.engine
            .with_luma_plane(clip, frame, |plane| {
                plane.copy_region(&mut luma[..needed], width, height)
            })
            .and_then(|copied| copied)
            .map_err(|reason| SourceError::decode(format!("frame {}: {}", frame, reason)))
    }

    fn read_audio(&mut self, frame: u32, buf: &mut [u8]) -> Result<usize> {
        let clip = self.clip.as_ref().ok_or(SourceError::NotInitialized)?;
        if !self.info.flags.contains(InputFlags::AUDIO) {
            return Err(SourceError::Unsupported {
                operation: "read_audio",
            });
        }

        let window = TimeWindow::from_info(frame, &self.info)?;
        let block_align = self
            .info
            .audio
            .as_ref()
            .map_or(0, |audio| audio.block_align as usize);
        let needed = window.len() as usize * block_align;
        ensure_capacity(buf, needed)?;

        self.engine
            .read_audio(clip, window.start, window.len(), &mut buf[..needed])
            .map_err(|reason| SourceError::decode(format!("audio {}: {}", window, reason)))?;
        Ok(window.len() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ClipInfo, LumaPlane, VideoFormat};
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Engine double producing a synthetic clip
    ///
    /// Luma of pixel (x, y) in frame n is `(n + x + 3y) % 256`; rows are
    /// padded to a 64-byte stride filled with 0xEE. Audio sample frame s
    /// holds the little-endian i16 value `s % 30000` in every channel.
    struct FakeEngine {
        info: ClipInfo,
        fail_evaluate: Option<String>,
        calls: Rc<RefCell<Vec<String>>>,
    }

    struct FakeClip {
        info: ClipInfo,
    }

    impl FakeEngine {
        fn new(info: ClipInfo) -> Self {
            Self {
                info,
                fail_evaluate: None,
                calls: Rc::new(RefCell::new(Vec::new())),
            }
        }
    }

    fn clip_info(width: u32, height: u32) -> ClipInfo {
        ClipInfo {
            width,
            height,
            fps_numerator: 30000,
            fps_denominator: 1001,
            frame_count: 10,
            format: VideoFormat {
                bits_per_component: 8,
                planar: true,
                yuv: true,
            },
            audio_sample_rate: 48000,
            audio_channels: 2,
            audio_sample_type: SampleType::Int16,
            audio_sample_count: 48000 * 10,
        }
    }

    impl ScriptEngine for FakeEngine {
        type Clip = FakeClip;

        fn name(&self) -> &'static str {
            "FakeSynth"
        }

        fn library_path(&self) -> &Path {
            Path::new("/usr/lib/libfakesynth.so")
        }

        fn supports_audio(&self) -> bool {
            true
        }

        fn evaluate(&mut self, script: &Path) -> std::result::Result<FakeClip, String> {
            self.calls.borrow_mut().push(format!("evaluate {}", script.display()));
            match &self.fail_evaluate {
                Some(message) => Err(message.clone()),
                None => Ok(FakeClip { info: self.info }),
            }
        }

        fn clip_info(&self, clip: &FakeClip) -> ClipInfo {
            clip.info
        }

        fn convert_to_luma8(&mut self, clip: FakeClip) -> std::result::Result<FakeClip, String> {
            self.calls.borrow_mut().push("convert_to_luma8".to_string());
            if clip.info.format.bits_per_component != 8 {
                return Err("8-bit clip only allowed!".to_string());
            }
            let mut info = clip.info;
            info.format.planar = true;
            info.format.yuv = true;
            Ok(FakeClip { info })
        }

        fn convert_audio_to_i16(&mut self, clip: FakeClip) -> std::result::Result<FakeClip, String> {
            self.calls.borrow_mut().push("convert_audio_to_i16".to_string());
            let mut info = clip.info;
            info.audio_sample_type = SampleType::Int16;
            Ok(FakeClip { info })
        }

        fn with_luma_plane<R>(
            &mut self,
            clip: &FakeClip,
            frame: u32,
            f: impl FnOnce(LumaPlane<'_>) -> R,
        ) -> std::result::Result<R, String> {
            let (width, height) = (clip.info.width as usize, clip.info.height as usize);
            let stride = 64;
            let mut data = vec![0xEEu8; stride * height];
            for y in 0..height {
                for x in 0..width {
                    data[y * stride + x] = ((frame as usize + x + 3 * y) % 256) as u8;
                }
            }
            Ok(f(LumaPlane {
                data: &data,
                stride,
                width,
                height,
            }))
        }

        fn read_audio(
            &mut self,
            clip: &FakeClip,
            start: u64,
            count: u64,
            buf: &mut [u8],
        ) -> std::result::Result<(), String> {
            let channels = clip.info.audio_channels as usize;
            for (i, sample) in (start..start + count).enumerate() {
                let value = ((sample % 30000) as i16).to_le_bytes();
                for ch in 0..channels {
                    let at = (i * channels + ch) * 2;
                    buf[at..at + 2].copy_from_slice(&value);
                }
            }
            Ok(())
        }
    }

    #[test]
    fn test_init_populates_info() {
        let mut source = ScriptSource::new(FakeEngine::new(clip_info(40, 36)));
        source.init("clip.avs").unwrap();

        assert!(source.has_video());
        assert!(source.has_audio());
        let info = source.info();
        assert_eq!((info.rate, info.scale), (30000, 1001));
        assert_eq!(info.frame_count, Some(10));
        assert_eq!(info.luma_len(), 32 * 32);
        assert_eq!(info.audio, Some(AudioFormat::pcm16(2, 48000)));
        assert_eq!(info.audio_sample_count, Some(480_000));
        assert!(info.flags.contains(InputFlags::VIDEO_RANDOM_ACCESS));

        assert!(matches!(source.init("clip.avs"), Err(SourceError::AlreadyInitialized)));
    }

    #[test]
    fn test_normalization_invokes_engine_filters() {
        let mut info = clip_info(32, 32);
        info.format.planar = false;
        info.audio_sample_type = SampleType::Float;
        let engine = FakeEngine::new(info);
        let calls = Rc::clone(&engine.calls);

        let mut source = ScriptSource::new(engine);
        source.init("packed.avs").unwrap();

        assert_eq!(
            *calls.borrow(),
            vec![
                "evaluate packed.avs".to_string(),
                "convert_to_luma8".to_string(),
                "convert_audio_to_i16".to_string(),
            ]
        );
    }

    #[test]
    fn test_ready_clip_is_not_converted() {
        let engine = FakeEngine::new(clip_info(32, 32));
        let calls = Rc::clone(&engine.calls);
        let mut source = ScriptSource::new(engine);
        source.init("ready.avs").unwrap();
        assert_eq!(calls.borrow().len(), 1);
    }

    #[test]
    fn test_failures_name_library_and_script() {
        let mut info = clip_info(32, 32);
        info.format.bits_per_component = 16;
        let mut source = ScriptSource::new(FakeEngine::new(info));

        let err = source.init("deep.vpy").unwrap_err();
        match &err {
            SourceError::Script {
                engine,
                library,
                script,
                message,
            } => {
                assert_eq!(*engine, "FakeSynth");
                assert_eq!(library, Path::new("/usr/lib/libfakesynth.so"));
                assert_eq!(script, Path::new("deep.vpy"));
                assert_eq!(message, "8-bit clip only allowed!");
            }
            other => panic!("Expected Script error, got {:?}", other),
        }
        assert!(err.is_fatal());
        assert!(!source.has_video());

        let mut engine = FakeEngine::new(clip_info(32, 32));
        engine.fail_evaluate = Some("Import: couldn't open \"missing.avs\"".to_string());
        let mut source = ScriptSource::new(engine);
        assert!(matches!(source.init("missing.avs"), Err(SourceError::Script { .. })));
    }

    #[test]
    fn test_read_video_crops_to_aligned_region() {
        let mut source = ScriptSource::new(FakeEngine::new(clip_info(40, 36)));
        source.init("clip.avs").unwrap();

        // one byte of slack past the aligned region must stay untouched
        let mut luma = vec![0x55u8; 32 * 32 + 1];
        source.read_video_y8(2, &mut luma).unwrap();

        for y in 0..32 {
            for x in 0..32 {
                assert_eq!(luma[y * 32 + x], ((2 + x + 3 * y) % 256) as u8);
            }
        }
        assert_eq!(luma[32 * 32], 0x55);

        let mut again = vec![0x55u8; 32 * 32 + 1];
        source.read_video_y8(2, &mut again).unwrap();
        assert_eq!(luma, again);
    }

    #[test]
    fn test_read_video_bounds() {
        let mut source = ScriptSource::new(FakeEngine::new(clip_info(32, 32)));
        source.init("clip.avs").unwrap();

        let mut small = vec![0u8; 100];
        assert!(matches!(
            source.read_video_y8(0, &mut small),
            Err(SourceError::BufferTooSmall { needed: 1024, actual: 100 })
        ));

        let mut luma = vec![0u8; 1024];
        let err = source.read_video_y8(10, &mut luma).unwrap_err();
        assert!(matches!(err, SourceError::Decode { .. }));
        assert!(!err.is_fatal());
        assert!(source.read_video_y8(9, &mut luma).is_ok());
    }

    #[test]
    fn test_read_audio_window_and_rate_override() {
        let mut source = ScriptSource::new(FakeEngine::new(clip_info(32, 32)));
        source.init("clip.avs").unwrap();

        let mut buf = vec![0u8; source.info().audio_buffer_len().unwrap()];
        let count = source.read_audio(1, &mut buf).unwrap();
        assert_eq!(count, 3203 - 1601);
        assert_eq!(i16::from_le_bytes([buf[0], buf[1]]), 1601);
        assert_eq!(i16::from_le_bytes([buf[2], buf[3]]), 1601);

        source.set_rate(25, 1);
        let mut buf = vec![0u8; 1920 * 4];
        let count = source.read_audio(1, &mut buf).unwrap();
        assert_eq!(count, 1920);
        assert_eq!(i16::from_le_bytes([buf[0], buf[1]]), 1920);
    }

    #[test]
    fn test_clip_without_audio() {
        let mut info = clip_info(32, 32);
        info.audio_sample_count = 0;
        let mut source = ScriptSource::new(FakeEngine::new(info));
        source.init("silent.avs").unwrap();

        assert!(source.has_video());
        assert!(!source.has_audio());
        assert_eq!(source.info().audio, None);
        assert!(matches!(
            source.read_audio(0, &mut [0u8; 16]),
            Err(SourceError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_reads_before_init() {
        let mut source = ScriptSource::new(FakeEngine::new(clip_info(32, 32)));
        assert!(matches!(
            source.read_video_y8(0, &mut [0u8; 1024]),
            Err(SourceError::NotInitialized)
        ));
    }
}
