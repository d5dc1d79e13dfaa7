//! VapourSynth runtime loaded through the VSScript API (API 3).
//!
//! VSScript keeps one process-wide runtime, initialized by `vsscript_init`
//! and released by the matching `vsscript_finalize`. Each [`VapourSynth`]
//! value holds one such reference. Running two VapourSynth sources in the
//! same process is not supported.

use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use libloading::Library;
use tracing::debug;

use crate::engine::{ClipInfo, LumaPlane, SampleType, ScriptEngine, VideoFormat};
use crate::error::{HandshakeStage, Result, SourceError};

const BACKEND: &str = "VapourSynth";

const API_VERSION: c_int = 3 << 16;
const EF_SET_WORKING_DIR: c_int = 1;
const PA_REPLACE: c_int = 0;

const CM_GRAY: c_int = 1_000_000;
const CM_YUV: c_int = 3_000_000;
const CM_COMPAT: c_int = 9_000_000;
const PF_GRAY8: i64 = CM_GRAY as i64 + 10;

const RESIZE_PLUGIN: &CStr = c"com.vapoursynth.resize";

enum VsScript {}
enum VsCore {}
enum VsNode {}
enum VsFrame {}
enum VsMap {}
enum VsPlugin {}

#[allow(dead_code)]
#[repr(C)]
struct VsFormat {
    name: [c_char; 32],
    id: c_int,
    color_family: c_int,
    sample_type: c_int,
    bits_per_sample: c_int,
    bytes_per_sample: c_int,
    sub_sampling_w: c_int,
    sub_sampling_h: c_int,
    num_planes: c_int,
}

#[allow(dead_code)]
#[repr(C)]
struct VsVideoInfo {
    format: *const VsFormat,
    fps_num: i64,
    fps_den: i64,
    width: c_int,
    height: c_int,
    num_frames: c_int,
    flags: c_int,
}

/// Table slot this crate never calls
type Unused = *const c_void;

/// Prefix of the `VSAPI` function table, up to `propSetNode`
#[allow(dead_code)]
#[repr(C)]
struct VsApi {
    create_core: Unused,
    free_core: Unused,
    get_core_info: Unused,
    clone_frame_ref: Unused,
    clone_node_ref: Unused,
    clone_func_ref: Unused,
    free_frame: unsafe extern "system" fn(*const VsFrame),
    free_node: unsafe extern "system" fn(*mut VsNode),
    free_func: Unused,
    new_video_frame: Unused,
    copy_frame: Unused,
    copy_frame_props: Unused,
    register_function: Unused,
    get_plugin_by_id: unsafe extern "system" fn(*const c_char, *mut VsCore) -> *mut VsPlugin,
    get_plugin_by_ns: Unused,
    get_plugins: Unused,
    get_functions: Unused,
    create_filter: Unused,
    set_error: Unused,
    get_error: unsafe extern "system" fn(*const VsMap) -> *const c_char,
    set_filter_error: Unused,
    invoke: unsafe extern "system" fn(*mut VsPlugin, *const c_char, *const VsMap) -> *mut VsMap,
    get_format_preset: Unused,
    register_format: Unused,
    get_frame: unsafe extern "system" fn(c_int, *mut VsNode, *mut c_char, c_int) -> *const VsFrame,
    get_frame_async: Unused,
    get_frame_filter: Unused,
    request_frame_filter: Unused,
    query_completed_frame: Unused,
    release_frame_early: Unused,
    get_stride: unsafe extern "system" fn(*const VsFrame, c_int) -> c_int,
    get_read_ptr: unsafe extern "system" fn(*const VsFrame, c_int) -> *const u8,
    get_write_ptr: Unused,
    create_func: Unused,
    call_func: Unused,
    create_map: unsafe extern "system" fn() -> *mut VsMap,
    free_map: unsafe extern "system" fn(*mut VsMap),
    clear_map: Unused,
    get_video_info: unsafe extern "system" fn(*mut VsNode) -> *const VsVideoInfo,
    set_video_info: Unused,
    get_frame_format: Unused,
    get_frame_width: Unused,
    get_frame_height: Unused,
    get_frame_props_ro: Unused,
    get_frame_props_rw: Unused,
    prop_num_keys: Unused,
    prop_get_key: Unused,
    prop_num_elements: Unused,
    prop_get_type: Unused,
    prop_get_int: Unused,
    prop_get_float: Unused,
    prop_get_data: Unused,
    prop_get_data_size: Unused,
    prop_get_node:
        unsafe extern "system" fn(*const VsMap, *const c_char, c_int, *mut c_int) -> *mut VsNode,
    prop_get_frame: Unused,
    prop_get_func: Unused,
    prop_delete_key: Unused,
    prop_set_int: unsafe extern "system" fn(*mut VsMap, *const c_char, i64, c_int) -> c_int,
    prop_set_float: Unused,
    prop_set_data: Unused,
    prop_set_node: unsafe extern "system" fn(*mut VsMap, *const c_char, *mut VsNode, c_int) -> c_int,
}

type InitFn = unsafe extern "system" fn() -> c_int;
type FinalizeFn = unsafe extern "system" fn() -> c_int;
type GetApiFn = unsafe extern "system" fn(c_int) -> *const VsApi;
type EvaluateFileFn = unsafe extern "system" fn(*mut *mut VsScript, *const c_char, c_int) -> c_int;
type GetScriptErrorFn = unsafe extern "system" fn(*mut VsScript) -> *const c_char;
type GetCoreFn = unsafe extern "system" fn(*mut VsScript) -> *mut VsCore;
type GetOutputFn = unsafe extern "system" fn(*mut VsScript, c_int) -> *mut VsNode;
type FreeScriptFn = unsafe extern "system" fn(*mut VsScript);

/// VSScript entry points
#[derive(Clone, Copy)]
struct ScriptApi {
    init: InitFn,
    finalize: FinalizeFn,
    get_vsapi: GetApiFn,
    evaluate_file: EvaluateFileFn,
    get_error: GetScriptErrorFn,
    get_core: GetCoreFn,
    get_output: GetOutputFn,
    free_script: FreeScriptFn,
}

impl ScriptApi {
    /// # Safety
    ///
    /// `library` must be a VSScript build exporting API 3 with these signatures.
    unsafe fn resolve(library: &Library) -> std::result::Result<Self, libloading::Error> {
        Ok(Self {
            init: *library.get(b"vsscript_init\0")?,
            finalize: *library.get(b"vsscript_finalize\0")?,
            get_vsapi: *library.get(b"vsscript_getVSApi2\0")?,
            evaluate_file: *library.get(b"vsscript_evaluateFile\0")?,
            get_error: *library.get(b"vsscript_getError\0")?,
            get_core: *library.get(b"vsscript_getCore\0")?,
            get_output: *library.get(b"vsscript_getOutput\0")?,
            free_script: *library.get(b"vsscript_freeScript\0")?,
        })
    }
}

/// Output node of an evaluated script, freed on drop
pub struct VapourSynthClip {
    node: NonNull<VsNode>,
    core: NonNull<VsCore>,
    free_node: unsafe extern "system" fn(*mut VsNode),
}

impl Drop for VapourSynthClip {
    fn drop(&mut self) {
        unsafe { (self.free_node)(self.node.as_ptr()) }
    }
}

/// A VSScript runtime reference and the scripts evaluated through it
///
/// Clips must be dropped before the runtime; scripts are freed and the
/// runtime finalized when this value is dropped.
pub struct VapourSynth {
    script_api: ScriptApi,
    vsapi: NonNull<VsApi>,
    scripts: Vec<NonNull<VsScript>>,
    path: PathBuf,
    _library: Library,
}

impl VapourSynth {
    /// Load the VSScript library at `path` and initialize the runtime
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
        let script_api = unsafe { ScriptApi::resolve(&library) }
            .map_err(|e| handshake(HandshakeStage::Symbol, e.to_string()))?;

        if unsafe { (script_api.init)() } == 0 {
            return Err(handshake(
                HandshakeStage::Environment,
                "vsscript_init() failed".to_string(),
            ));
        }
        let vsapi = unsafe { (script_api.get_vsapi)(API_VERSION) };
        let Some(vsapi) = NonNull::new(vsapi as *mut VsApi) else {
            unsafe { (script_api.finalize)() };
            return Err(handshake(
                HandshakeStage::Environment,
                format!("API version {}.{} not available", API_VERSION >> 16, API_VERSION & 0xFFFF),
            ));
        };

        debug!("Initialized VSScript from {}", path.display());
        Ok(Self {
            script_api,
            vsapi,
            scripts: Vec::new(),
            path: path.to_path_buf(),
            _library: library,
        })
    }

    fn api(&self) -> &VsApi {
        unsafe { self.vsapi.as_ref() }
    }

    fn video_info(&self, clip: &VapourSynthClip) -> &VsVideoInfo {
        unsafe { &*(self.api().get_video_info)(clip.node.as_ptr()) }
    }

    fn format(&self, clip: &VapourSynthClip) -> Option<&VsFormat> {
        unsafe { self.video_info(clip).format.as_ref() }
    }
}

impl Drop for VapourSynth {
    fn drop(&mut self) {
        for script in self.scripts.drain(..) {
            unsafe { (self.script_api.free_script)(script.as_ptr()) };
        }
        unsafe { (self.script_api.finalize)() };
    }
}

impl ScriptEngine for VapourSynth {
    type Clip = VapourSynthClip;

    fn name(&self) -> &'static str {
        BACKEND
    }

    fn library_path(&self) -> &Path {
        &self.path
    }

    fn supports_audio(&self) -> bool {
        false
    }

    fn evaluate(&mut self, script: &Path) -> std::result::Result<VapourSynthClip, String> {
        let script = script
            .to_str()
            .ok_or_else(|| format!("script path {} is not valid UTF-8", script.display()))?;
        let script = CString::new(script).map_err(|e| e.to_string())?;

        let mut handle: *mut VsScript = std::ptr::null_mut();
        let status = unsafe {
            (self.script_api.evaluate_file)(&mut handle, script.as_ptr(), EF_SET_WORKING_DIR)
        };
        // the handle is allocated even when evaluation fails
        let handle = NonNull::new(handle).ok_or("failed to open file")?;
        self.scripts.push(handle);

        if status != 0 {
            let message = unsafe { (self.script_api.get_error)(handle.as_ptr()) };
            return Err(if message.is_null() {
                "failed to evaluate script".to_string()
            } else {
                unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned()
            });
        }

        let core = unsafe { (self.script_api.get_core)(handle.as_ptr()) };
        let node = unsafe { (self.script_api.get_output)(handle.as_ptr(), 0) };
        match (NonNull::new(node), NonNull::new(core)) {
            (Some(node), Some(core)) => Ok(VapourSynthClip {
                node,
                core,
                free_node: self.api().free_node,
            }),
            _ => Err("script did not set an output clip".to_string()),
        }
    }

    fn clip_info(&self, clip: &VapourSynthClip) -> ClipInfo {
        let vi = self.video_info(clip);
        let format = match self.format(clip) {
            Some(format) => VideoFormat {
                bits_per_component: format.bits_per_sample.clamp(0, u8::MAX as c_int) as u8,
                planar: format.color_family != CM_COMPAT,
                yuv: format.color_family == CM_GRAY || format.color_family == CM_YUV,
            },
            None => VideoFormat {
                bits_per_component: 0,
                planar: false,
                yuv: false,
            },
        };

        ClipInfo {
            width: vi.width.max(0) as u32,
            height: vi.height.max(0) as u32,
            fps_numerator: u32::try_from(vi.fps_num).unwrap_or(0),
            fps_denominator: u32::try_from(vi.fps_den).unwrap_or(0),
            frame_count: vi.num_frames.max(0) as u32,
            format,
            audio_sample_rate: 0,
            audio_channels: 0,
            audio_sample_type: SampleType::Int16,
            audio_sample_count: 0,
        }
    }

    fn convert_to_luma8(
        &mut self,
        clip: VapourSynthClip,
    ) -> std::result::Result<VapourSynthClip, String> {
        match self.format(&clip) {
            None => return Err("clip has no constant format".to_string()),
            Some(format) if format.bits_per_sample != 8 => {
                return Err("8-bit clip only allowed!".to_string())
            }
            Some(_) => {}
        }

        debug!("Converting clip to Gray8 with resize.Bilinear");
        let api = self.api();
        unsafe {
            let plugin = (api.get_plugin_by_id)(RESIZE_PLUGIN.as_ptr(), clip.core.as_ptr());
            if plugin.is_null() {
                return Err("resize plugin not available".to_string());
            }

            let args = (api.create_map)();
            (api.prop_set_node)(args, c"clip".as_ptr(), clip.node.as_ptr(), PA_REPLACE);
            (api.prop_set_int)(args, c"format".as_ptr(), PF_GRAY8, PA_REPLACE);
            let ret = (api.invoke)(plugin, c"Bilinear".as_ptr(), args);
            (api.free_map)(args);

            let error = (api.get_error)(ret);
            if !error.is_null() {
                let message = CStr::from_ptr(error).to_string_lossy().into_owned();
                (api.free_map)(ret);
                return Err(message);
            }

            let node = (api.prop_get_node)(ret, c"clip".as_ptr(), 0, std::ptr::null_mut());
            (api.free_map)(ret);
            let node = NonNull::new(node).ok_or("resize.Bilinear returned no clip")?;

            Ok(VapourSynthClip {
                node,
                core: clip.core,
                free_node: api.free_node,
            })
        }
    }

    fn convert_audio_to_i16(
        &mut self,
        _clip: VapourSynthClip,
    ) -> std::result::Result<VapourSynthClip, String> {
        Err("audio is not supported".to_string())
    }

    fn with_luma_plane<R>(
        &mut self,
        clip: &VapourSynthClip,
        frame: u32,
        f: impl FnOnce(LumaPlane<'_>) -> R,
    ) -> std::result::Result<R, String> {
        let index = c_int::try_from(frame).map_err(|_| format!("frame {} out of range", frame))?;
        let api = self.api();

        let mut message = [0 as c_char; 1024];
        let raw = unsafe {
            (api.get_frame)(index, clip.node.as_ptr(), message.as_mut_ptr(), message.len() as c_int)
        };
        let Some(raw) = NonNull::new(raw as *mut VsFrame) else {
            let message = unsafe { CStr::from_ptr(message.as_ptr()) };
            return Err(message.to_string_lossy().into_owned());
        };
        let guard = FrameGuard {
            frame: raw,
            free: api.free_frame,
        };

        let vi = self.video_info(clip);
        let (width, height) = (vi.width.max(0) as usize, vi.height.max(0) as usize);
        let stride = unsafe { (api.get_stride)(guard.frame.as_ptr(), 0) }.max(0) as usize;
        let data = unsafe { (api.get_read_ptr)(guard.frame.as_ptr(), 0) };
        if data.is_null() {
            return Err(format!("frame {} has no plane 0", frame));
        }

        let len = if height == 0 { 0 } else { (height - 1) * stride + width };
        let plane = LumaPlane {
            data: unsafe { std::slice::from_raw_parts(data, len) },
            stride,
            width,
            height,
        };
        Ok(f(plane))
    }

    fn read_audio(
        &mut self,
        _clip: &VapourSynthClip,
        _start: u64,
        _count: u64,
        _buf: &mut [u8],
    ) -> std::result::Result<(), String> {
        Err("audio is not supported".to_string())
    }
}

/// Frees a frame reference when it goes out of scope
struct FrameGuard {
    frame: NonNull<VsFrame>,
    free: unsafe extern "system" fn(*const VsFrame),
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        unsafe { (self.free)(self.frame.as_ptr()) }
    }
}
