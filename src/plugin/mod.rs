//! # Input Plugin Host
//!
//! Loads AviUtl style input plugin modules (`*.aui`) and drives them through
//! the function table they export. [`PluginModule`] is the seam between the
//! raw table and [`PluginSource`](crate::source::PluginSource).

use std::ffi::{c_int, c_void, CStr, CString};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use libloading::Library;
use tracing::{debug, warn};

use crate::error::{HandshakeStage, Result, SourceError};
use crate::source::types::{AudioFormat, InputFlags};

pub mod ffi;

use ffi::{InputInfo, InputPluginTable, FALSE};

pub(crate) const BACKEND: &str = "input plugin";

/// Plugin used when a specifier does not name one
pub const DEFAULT_PLUGIN: &str = "avsinp.aui";

/// Separator between plugin name and target in a specifier
pub const SPECIFIER_SEPARATOR: &str = "://";

/// A specifier split into plugin module and target file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSpec {
    pub plugin: String,
    pub target: String,
}

impl PluginSpec {
    /// Split `"name://file"`; a bare path uses `default_plugin`
    pub fn parse(specifier: &str, default_plugin: &str) -> Self {
        match specifier.split_once(SPECIFIER_SEPARATOR) {
            Some((plugin, target)) if !plugin.is_empty() => Self {
                plugin: plugin.to_string(),
                target: target.to_string(),
            },
            Some((_, target)) => Self {
                plugin: default_plugin.to_string(),
                target: target.to_string(),
            },
            None => Self {
                plugin: default_plugin.to_string(),
                target: specifier.to_string(),
            },
        }
    }

    /// Location of the plugin module, relative names resolved against `search_dir`
    pub fn module_path(&self, search_dir: Option<&Path>) -> PathBuf {
        let plugin = Path::new(&self.plugin);
        match search_dir {
            Some(dir) if plugin.is_relative() => dir.join(plugin),
            _ => plugin.to_path_buf(),
        }
    }
}

/// Stream description returned by `func_info_get`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PluginInfo {
    pub flags: InputFlags,
    pub rate: u32,
    pub scale: u32,
    /// `None` when the plugin reports a negative (unknown) length
    pub frame_count: Option<u32>,
    pub width: u32,
    pub height: u32,
    pub audio_sample_count: Option<u64>,
    pub audio: Option<AudioFormat>,
}

/// An input plugin module with its function table resolved
///
/// Loading a module must not call any of its functions; the host drives
/// `init`, `open`, `close` and `exit` in that order.
pub trait PluginModule {
    /// Opaque handle of one opened file
    type Handle: Copy;

    /// Name the plugin reports about itself
    fn name(&self) -> String;

    /// `func_init`; a plugin without one counts as initialized
    fn init(&mut self) -> bool;

    /// `func_exit`, if the plugin has one
    fn exit(&mut self);

    /// `func_open`; `None` when the plugin cannot open `target`
    fn open(&mut self, target: &str) -> Option<Self::Handle>;

    /// `func_close`
    fn close(&mut self, handle: Self::Handle);

    /// `func_info_get`
    fn info_get(&mut self, handle: Self::Handle) -> std::result::Result<PluginInfo, String>;

    /// `func_read_video`; returns the number of bytes written, 0 on failure
    fn read_video(&mut self, handle: Self::Handle, frame: i32, buf: &mut [u8]) -> i32;

    /// `func_read_audio`; returns the number of sample frames written
    fn read_audio(&mut self, handle: Self::Handle, start: i32, length: i32, buf: &mut [u8]) -> i32;
}

/// A plugin module loaded from disk
///
/// The library stays loaded as long as this value lives, so the table pointer
/// remains valid.
pub struct DynamicPlugin {
    table: NonNull<InputPluginTable>,
    path: PathBuf,
    _library: Library,
}

impl DynamicPlugin {
    /// Load the module at `path` and fetch its plugin table
    pub fn load(path: &Path) -> Result<Self> {
        let handshake = |stage, reason: String| SourceError::Handshake {
            backend: BACKEND,
            stage,
            path: path.display().to_string(),
            reason,
        };

        let library = unsafe { Library::new(path) }
            .map_err(|e| handshake(HandshakeStage::LoadLibrary, e.to_string()))?;
        debug!("Loaded plugin module {}", path.display());

        let table = unsafe {
            let get_table = library
                .get::<ffi::GetInputPluginTableFn>(b"GetInputPluginTable\0")
                .map_err(|e| handshake(HandshakeStage::Symbol, e.to_string()))?;
            get_table()
        };
        let table = NonNull::new(table).ok_or_else(|| {
            handshake(
                HandshakeStage::Table,
                "GetInputPluginTable returned NULL".to_string(),
            )
        })?;

        let plugin = Self {
            table,
            path: path.to_path_buf(),
            _library: library,
        };
        if plugin.table().func_open.is_none() || plugin.table().func_info_get.is_none() {
            return Err(handshake(
                HandshakeStage::Table,
                "table lacks func_open or func_info_get".to_string(),
            ));
        }
        Ok(plugin)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn table(&self) -> &InputPluginTable {
        // valid while `_library` is loaded
        unsafe { self.table.as_ref() }
    }
}

impl PluginModule for DynamicPlugin {
    type Handle = NonNull<c_void>;

    fn name(&self) -> String {
        let name = self.table().name;
        if name.is_null() {
            return self.path.display().to_string();
        }
        unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned()
    }

    fn init(&mut self) -> bool {
        match self.table().func_init {
            Some(init) => unsafe { init() != FALSE },
            None => true,
        }
    }

    fn exit(&mut self) {
        if let Some(exit) = self.table().func_exit {
            if unsafe { exit() } == FALSE {
                warn!("{}: func_exit() reported failure", self.path.display());
            }
        }
    }

    fn open(&mut self, target: &str) -> Option<Self::Handle> {
        let open = self.table().func_open?;
        let file = CString::new(target).ok()?;
        NonNull::new(unsafe { open(file.as_ptr()) })
    }

    fn close(&mut self, handle: Self::Handle) {
        if let Some(close) = self.table().func_close {
            unsafe { close(handle.as_ptr()) };
        }
    }

    fn info_get(&mut self, handle: Self::Handle) -> std::result::Result<PluginInfo, String> {
        let info_get = self
            .table()
            .func_info_get
            .ok_or_else(|| "no func_info_get".to_string())?;

        let mut raw = InputInfo::default();
        if unsafe { info_get(handle.as_ptr(), &mut raw) } == FALSE {
            return Err("plugin returned FALSE".to_string());
        }
        unsafe { convert_info(&raw) }
    }

    fn read_video(&mut self, handle: Self::Handle, frame: i32, buf: &mut [u8]) -> i32 {
        match self.table().func_read_video {
            Some(read) => unsafe { read(handle.as_ptr(), frame, buf.as_mut_ptr().cast()) },
            None => 0,
        }
    }

    fn read_audio(&mut self, handle: Self::Handle, start: i32, length: i32, buf: &mut [u8]) -> i32 {
        match self.table().func_read_audio {
            Some(read) => unsafe { read(handle.as_ptr(), start, length, buf.as_mut_ptr().cast()) },
            None => 0,
        }
    }
}

/// Translate a filled `INPUT_INFO`
///
/// # Safety
///
/// `format` and `audio_format` must be null or point at records of at least
/// `format_size` and `audio_format_size` bytes.
unsafe fn convert_info(raw: &InputInfo) -> std::result::Result<PluginInfo, String> {
    let flags = InputFlags::from_bits_retain(raw.flag as u32);
    let non_negative = |value: c_int, what: &str| {
        u32::try_from(value).map_err(|_| format!("negative {} ({})", what, value))
    };

    let mut info = PluginInfo {
        flags,
        rate: non_negative(raw.rate, "rate")?,
        scale: non_negative(raw.scale, "scale")?,
        frame_count: u32::try_from(raw.n).ok(),
        ..Default::default()
    };

    if flags.contains(InputFlags::VIDEO) {
        if raw.format.is_null() {
            return Err("video stream without a BITMAPINFOHEADER".to_string());
        }
        let header = raw.format.read_unaligned();
        if header.bit_count != 16 {
            return Err(format!(
                "unsupported video format: {} bpp, only packed 16-bit YUY2 is read",
                header.bit_count
            ));
        }
        info.width = header.width.unsigned_abs();
        info.height = header.height.unsigned_abs();
        debug!(
            "Plugin video {}x{}, {} bpp, compression {:#010x}",
            info.width, info.height, header.bit_count, header.compression
        );
    }

    if flags.contains(InputFlags::AUDIO) {
        if raw.audio_format.is_null() {
            return Err("audio stream without a WAVEFORMATEX".to_string());
        }
        let len = usize::try_from(raw.audio_format_size).unwrap_or(0);
        let record = std::slice::from_raw_parts(raw.audio_format, len);
        let audio = AudioFormat::from_le_bytes(record);
        if audio.block_align == 0 {
            return Err("audio format with zero block alignment".to_string());
        }
        info.audio = Some(audio);
        info.audio_sample_count = u64::try_from(raw.audio_n).ok();
    }

    Ok(info)
}
