//! AviSynth+ runtime loaded through the AviSynth C API.

use std::ffi::{c_char, c_float, c_int, c_short, c_uint, c_void, CStr, CString};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use libloading::Library;
use tracing::debug;

use crate::engine::{ClipInfo, LumaPlane, SampleType, ScriptEngine, VideoFormat};
use crate::error::{HandshakeStage, Result, SourceError};

const BACKEND: &str = "AviSynth";

/// Interface version requested from the environment (AviSynth 2.6 / AviSynth+)
const INTERFACE_VERSION: c_int = 6;

const CS_BGR: c_int = 1 << 28;
const CS_YUV: c_int = 1 << 29;
const CS_PLANAR: c_int = 1 << 31;
const CS_SAMPLE_BITS_MASK: c_int = 7 << 16;

const SAMPLE_INT8: c_int = 1;
const SAMPLE_INT16: c_int = 2;
const SAMPLE_INT24: c_int = 4;
const SAMPLE_INT32: c_int = 8;

const PLANAR_Y: c_int = 1;

enum AvsEnv {}
enum AvsClip {}
enum AvsFrame {}

#[allow(dead_code)]
#[repr(C)]
struct AvsVideoInfo {
    width: c_int,
    height: c_int,
    fps_numerator: c_uint,
    fps_denominator: c_uint,
    num_frames: c_int,
    pixel_type: c_int,
    audio_samples_per_second: c_int,
    sample_type: c_int,
    num_audio_samples: i64,
    nchannels: c_int,
    image_type: c_int,
}

#[allow(dead_code)]
#[repr(C)]
#[derive(Clone, Copy)]
union AvsValueData {
    clip: *mut c_void,
    boolean: c_char,
    integer: c_int,
    floating_pt: c_float,
    string: *const c_char,
    array: *const AvsValue,
    longlong: i64,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct AvsValue {
    kind: c_short,
    array_size: c_short,
    d: AvsValueData,
}

impl AvsValue {
    const VOID: Self = Self {
        kind: b'v' as c_short,
        array_size: 0,
        d: AvsValueData { integer: 0 },
    };

    fn string(s: &CStr) -> Self {
        Self {
            kind: b's' as c_short,
            array_size: 0,
            d: AvsValueData { string: s.as_ptr() },
        }
    }

    fn is(&self, kind: u8) -> bool {
        self.kind == kind as c_short
    }
}

type CreateEnvFn = unsafe extern "system" fn(c_int) -> *mut AvsEnv;
type DeleteEnvFn = unsafe extern "system" fn(*mut AvsEnv);
type GetErrorFn = unsafe extern "system" fn(*mut AvsEnv) -> *const c_char;
type InvokeFn =
    unsafe extern "system" fn(*mut AvsEnv, *const c_char, AvsValue, *const *const c_char) -> AvsValue;
type TakeClipFn = unsafe extern "system" fn(AvsValue, *mut AvsEnv) -> *mut AvsClip;
type SetToClipFn = unsafe extern "system" fn(*mut AvsValue, *mut AvsClip);
type ReleaseValueFn = unsafe extern "system" fn(AvsValue);
type ReleaseClipFn = unsafe extern "system" fn(*mut AvsClip);
type ClipGetErrorFn = unsafe extern "system" fn(*mut AvsClip) -> *const c_char;
type GetVideoInfoFn = unsafe extern "system" fn(*mut AvsClip) -> *const AvsVideoInfo;
type GetFrameFn = unsafe extern "system" fn(*mut AvsClip, c_int) -> *mut AvsFrame;
type ReleaseFrameFn = unsafe extern "system" fn(*mut AvsFrame);
type GetPitchFn = unsafe extern "system" fn(*const AvsFrame, c_int) -> c_int;
type GetReadPtrFn = unsafe extern "system" fn(*const AvsFrame, c_int) -> *const u8;
type GetAudioFn = unsafe extern "system" fn(*mut AvsClip, *mut c_void, i64, i64) -> c_int;

/// Entry points of the C API this crate uses
#[derive(Clone, Copy)]
struct Api {
    create_script_environment: CreateEnvFn,
    delete_script_environment: DeleteEnvFn,
    get_error: GetErrorFn,
    invoke: InvokeFn,
    take_clip: TakeClipFn,
    set_to_clip: SetToClipFn,
    release_value: ReleaseValueFn,
    release_clip: ReleaseClipFn,
    clip_get_error: ClipGetErrorFn,
    get_video_info: GetVideoInfoFn,
    get_frame: GetFrameFn,
    release_video_frame: ReleaseFrameFn,
    get_pitch_p: GetPitchFn,
    get_read_ptr_p: GetReadPtrFn,
    get_audio: GetAudioFn,
}

impl Api {
    /// # Safety
    ///
    /// `library` must be an AviSynth build exporting the C API with these signatures.
    unsafe fn resolve(library: &Library) -> std::result::Result<Self, libloading::Error> {
        Ok(Self {
            create_script_environment: *library.get(b"avs_create_script_environment\0")?,
            delete_script_environment: *library.get(b"avs_delete_script_environment\0")?,
            get_error: *library.get(b"avs_get_error\0")?,
            invoke: *library.get(b"avs_invoke\0")?,
            take_clip: *library.get(b"avs_take_clip\0")?,
            set_to_clip: *library.get(b"avs_set_to_clip\0")?,
            release_value: *library.get(b"avs_release_value\0")?,
            release_clip: *library.get(b"avs_release_clip\0")?,
            clip_get_error: *library.get(b"avs_clip_get_error\0")?,
            get_video_info: *library.get(b"avs_get_video_info\0")?,
            get_frame: *library.get(b"avs_get_frame\0")?,
            release_video_frame: *library.get(b"avs_release_video_frame\0")?,
            get_pitch_p: *library.get(b"avs_get_pitch_p\0")?,
            get_read_ptr_p: *library.get(b"avs_get_read_ptr_p\0")?,
            get_audio: *library.get(b"avs_get_audio\0")?,
        })
    }
}

/// Clip handle owned by the caller, released on drop
pub struct AviSynthClip {
    ptr: NonNull<AvsClip>,
    release: ReleaseClipFn,
}

impl Drop for AviSynthClip {
    fn drop(&mut self) {
        unsafe { (self.release)(self.ptr.as_ptr()) }
    }
}

/// An AviSynth script environment
///
/// The environment is created when the library is loaded and deleted on drop.
/// Clips must be dropped before the environment that produced them.
pub struct AviSynth {
    env: NonNull<AvsEnv>,
    api: Api,
    path: PathBuf,
    _library: Library,
}

impl AviSynth {
    /// Load the AviSynth library at `path` and create a script environment
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let handshake = |stage, reason: String| SourceError::Handshake {
            backend: BACKEND,
            stage,
            path: path.display().to_string(),
            reason,
        };

        let library = unsafe { Library::new(path) }
            .map_err(|e| handshake(HandshakeStage::LoadLibrary, e.to_string()))?;
        let api = unsafe { Api::resolve(&library) }
            .map_err(|e| handshake(HandshakeStage::Symbol, e.to_string()))?;

        let env = unsafe { (api.create_script_environment)(INTERFACE_VERSION) };
        let env = NonNull::new(env).ok_or_else(|| {
            handshake(
                HandshakeStage::Environment,
                format!("interface version {} not available", INTERFACE_VERSION),
            )
        })?;

        debug!("Created AviSynth environment from {}", path.display());
        Ok(Self {
            env,
            api,
            path: path.to_path_buf(),
            _library: library,
        })
    }

    fn env_error(&self) -> Option<String> {
        let message = unsafe { (self.api.get_error)(self.env.as_ptr()) };
        (!message.is_null()).then(|| unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned())
    }

    fn clip_error(&self, clip: &AviSynthClip) -> Option<String> {
        let message = unsafe { (self.api.clip_get_error)(clip.ptr.as_ptr()) };
        (!message.is_null()).then(|| unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned())
    }

    /// Call the filter `name` with a single argument and take the resulting clip
    fn invoke(&mut self, name: &str, arg: AvsValue) -> std::result::Result<AviSynthClip, String> {
        debug!("Invoking AviSynth filter {}", name);
        let filter = CString::new(name).map_err(|e| e.to_string())?;
        let result = unsafe {
            (self.api.invoke)(self.env.as_ptr(), filter.as_ptr(), arg, std::ptr::null())
        };

        if let Some(message) = self.env_error() {
            unsafe { (self.api.release_value)(result) };
            return Err(message);
        }
        if result.is(b'e') {
            let message = unsafe { CStr::from_ptr(result.d.string) }
                .to_string_lossy()
                .into_owned();
            unsafe { (self.api.release_value)(result) };
            return Err(message);
        }
        if !result.is(b'c') {
            unsafe { (self.api.release_value)(result) };
            return Err(format!("{} did not return a clip", name));
        }

        let clip = unsafe { (self.api.take_clip)(result, self.env.as_ptr()) };
        unsafe { (self.api.release_value)(result) };

        NonNull::new(clip)
            .map(|ptr| AviSynthClip {
                ptr,
                release: self.api.release_clip,
            })
            .ok_or_else(|| format!("{} returned an empty clip", name))
    }

    fn invoke_on_clip(
        &mut self,
        name: &str,
        clip: AviSynthClip,
    ) -> std::result::Result<AviSynthClip, String> {
        let mut arg = AvsValue::VOID;
        unsafe { (self.api.set_to_clip)(&mut arg, clip.ptr.as_ptr()) };
        let converted = self.invoke(name, arg);
        unsafe { (self.api.release_value)(arg) };
        converted
    }

    fn video_info(&self, clip: &AviSynthClip) -> &AvsVideoInfo {
        unsafe { &*(self.api.get_video_info)(clip.ptr.as_ptr()) }
    }
}

impl Drop for AviSynth {
    fn drop(&mut self) {
        unsafe { (self.api.delete_script_environment)(self.env.as_ptr()) }
    }
}

fn bits_per_component(pixel_type: c_int) -> u8 {
    match (pixel_type & CS_SAMPLE_BITS_MASK) >> 16 {
        0 => 8,
        1 => 16,
        2 => 32,
        5 => 10,
        6 => 12,
        7 => 14,
        _ => 0,
    }
}

fn sample_type(avs: c_int) -> SampleType {
    match avs {
        SAMPLE_INT8 => SampleType::Int8,
        SAMPLE_INT16 => SampleType::Int16,
        SAMPLE_INT24 => SampleType::Int24,
        SAMPLE_INT32 => SampleType::Int32,
        _ => SampleType::Float,
    }
}

impl ScriptEngine for AviSynth {
    type Clip = AviSynthClip;

    fn name(&self) -> &'static str {
        BACKEND
    }

    fn library_path(&self) -> &Path {
        &self.path
    }

    fn supports_audio(&self) -> bool {
        true
    }

    fn evaluate(&mut self, script: &Path) -> std::result::Result<AviSynthClip, String> {
        let script = script
            .to_str()
            .ok_or_else(|| format!("script path {} is not valid UTF-8", script.display()))?;
        let script = CString::new(script).map_err(|e| e.to_string())?;
        self.invoke("Import", AvsValue::string(&script))
    }

    fn clip_info(&self, clip: &AviSynthClip) -> ClipInfo {
        let vi = self.video_info(clip);
        ClipInfo {
            width: vi.width.max(0) as u32,
            height: vi.height.max(0) as u32,
            fps_numerator: vi.fps_numerator,
            fps_denominator: vi.fps_denominator,
            frame_count: vi.num_frames.max(0) as u32,
            format: VideoFormat {
                bits_per_component: bits_per_component(vi.pixel_type),
                planar: vi.pixel_type & CS_PLANAR != 0,
                yuv: vi.pixel_type & CS_YUV != 0 && vi.pixel_type & CS_BGR == 0,
            },
            audio_sample_rate: vi.audio_samples_per_second.max(0) as u32,
            audio_channels: vi.nchannels.clamp(0, u16::MAX as c_int) as u16,
            audio_sample_type: sample_type(vi.sample_type),
            audio_sample_count: vi.num_audio_samples.max(0) as u64,
        }
    }

    fn convert_to_luma8(&mut self, clip: AviSynthClip) -> std::result::Result<AviSynthClip, String> {
        self.invoke_on_clip("ConvertToY8", clip)
    }

    fn convert_audio_to_i16(
        &mut self,
        clip: AviSynthClip,
    ) -> std::result::Result<AviSynthClip, String> {
        self.invoke_on_clip("ConvertAudioTo16bit", clip)
    }

    fn with_luma_plane<R>(
        &mut self,
        clip: &AviSynthClip,
        frame: u32,
        f: impl FnOnce(LumaPlane<'_>) -> R,
    ) -> std::result::Result<R, String> {
        let index = c_int::try_from(frame).map_err(|_| format!("frame {} out of range", frame))?;
        let raw = unsafe { (self.api.get_frame)(clip.ptr.as_ptr(), index) };
        if let Some(message) = self.clip_error(clip) {
            if !raw.is_null() {
                unsafe { (self.api.release_video_frame)(raw) };
            }
            return Err(message);
        }
        let raw = NonNull::new(raw).ok_or_else(|| format!("no frame {}", frame))?;
        let guard = FrameGuard {
            frame: raw,
            release: self.api.release_video_frame,
        };

        let vi = self.video_info(clip);
        let (width, height) = (vi.width.max(0) as usize, vi.height.max(0) as usize);
        let pitch = unsafe { (self.api.get_pitch_p)(guard.frame.as_ptr(), PLANAR_Y) }.max(0) as usize;
        let data = unsafe { (self.api.get_read_ptr_p)(guard.frame.as_ptr(), PLANAR_Y) };
        if data.is_null() {
            return Err(format!("frame {} has no luma plane", frame));
        }

        let len = if height == 0 { 0 } else { (height - 1) * pitch + width };
        let plane = LumaPlane {
            data: unsafe { std::slice::from_raw_parts(data, len) },
            stride: pitch,
            width,
            height,
        };
        Ok(f(plane))
    }

    fn read_audio(
        &mut self,
        clip: &AviSynthClip,
        start: u64,
        count: u64,
        buf: &mut [u8],
    ) -> std::result::Result<(), String> {
        let channels = self.video_info(clip).nchannels.max(0) as u64;
        let needed = count * channels * 2;
        if (buf.len() as u64) < needed {
            return Err(format!("audio buffer holds {} bytes, {} needed", buf.len(), needed));
        }

        unsafe {
            (self.api.get_audio)(
                clip.ptr.as_ptr(),
                buf.as_mut_ptr().cast(),
                start as i64,
                count as i64,
            )
        };
        match self.clip_error(clip) {
            Some(message) => Err(message),
            None => Ok(()),
        }
    }
}

/// Releases a video frame when it goes out of scope
struct FrameGuard {
    frame: NonNull<AvsFrame>,
    release: ReleaseFrameFn,
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        unsafe { (self.release)(self.frame.as_ptr()) }
    }
}
