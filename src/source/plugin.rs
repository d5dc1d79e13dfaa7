use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::PluginConfig;
use crate::error::{HandshakeStage, Result, SourceError};
use crate::plugin::{DynamicPlugin, PluginModule, PluginSpec, BACKEND, SPECIFIER_SEPARATOR};
use crate::source::traits::{ensure_capacity, Source};
use crate::source::types::{InputFlags, MediaInfo};
use crate::source::window::TimeWindow;

/// Loads the plugin module found at a path
pub type PluginLoader<M> = Box<dyn Fn(&Path) -> Result<M>>;

/// An initialized module together with the file it opened
///
/// Dropping closes the file, calls `func_exit` and then unloads the module.
struct Session<M: PluginModule> {
    handle: Option<M::Handle>,
    module: M,
}

impl<M: PluginModule> Session<M> {
    fn handle(&self) -> Result<M::Handle> {
        self.handle.ok_or(SourceError::NotInitialized)
    }
}

impl<M: PluginModule> Drop for Session<M> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.module.close(handle);
        }
        self.module.exit();
    }
}

/// Source reading through an input plugin module
///
/// Plugins decode to packed YUY2; the luma bytes are picked out of each row.
pub struct PluginSource<M: PluginModule> {
    info: MediaInfo,
    default_plugin: String,
    search_dir: Option<PathBuf>,
    loader: PluginLoader<M>,
    session: Option<Session<M>>,
    /// Packed frame as the plugin wrote it, reused across reads
    scratch: Vec<u8>,
}

impl PluginSource<DynamicPlugin> {
    /// Host loading plugin modules from disk
    pub fn new(config: &PluginConfig) -> Self {
        Self::with_loader(config, Box::new(DynamicPlugin::load))
    }
}

impl<M: PluginModule> PluginSource<M> {
    pub fn with_loader(config: &PluginConfig, loader: PluginLoader<M>) -> Self {
        Self {
            info: MediaInfo::default(),
            default_plugin: config.default_name.clone(),
            search_dir: config.search_dir.clone(),
            loader,
            session: None,
            scratch: Vec::new(),
        }
    }
}

impl<M: PluginModule> Source for PluginSource<M> {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn init(&mut self, specifier: &str) -> Result<()> {
        if self.session.is_some() {
            return Err(SourceError::AlreadyInitialized);
        }

        let spec = PluginSpec::parse(specifier, &self.default_plugin);
        let module_path = spec.module_path(self.search_dir.as_deref());
        let described = format!("{}{}{}", spec.plugin, SPECIFIER_SEPARATOR, spec.target);
        let handshake = |stage, reason: String| SourceError::Handshake {
            backend: BACKEND,
            stage,
            path: described.clone(),
            reason,
        };

        let mut module = (self.loader)(&module_path)?;
        let name = module.name();
        debug!("Plugin table resolved: {}", name);

        if !module.init() {
            return Err(handshake(
                HandshakeStage::PluginInit,
                format!("{} returned FALSE", name),
            ));
        }
        debug!("{} initialized", name);

        let mut session = Session {
            handle: None,
            module,
        };
        let handle = session
            .module
            .open(&spec.target)
            .ok_or_else(|| SourceError::Open {
                backend: BACKEND,
                path: spec.target.clone(),
                reason: format!("{} could not open the file", spec.plugin),
            })?;
        session.handle = Some(handle);

        let plugin_info = session
            .module
            .info_get(handle)
            .map_err(|reason| handshake(HandshakeStage::InfoGet, reason))?;

        let has_audio = plugin_info.flags.contains(InputFlags::AUDIO);
        self.info = MediaInfo {
            flags: plugin_info.flags,
            rate: plugin_info.rate,
            scale: plugin_info.scale,
            frame_count: plugin_info.frame_count,
            width: plugin_info.width,
            height: plugin_info.height,
            audio: plugin_info.audio.filter(|_| has_audio),
            audio_sample_count: plugin_info.audio_sample_count.filter(|_| has_audio),
        };
        self.session = Some(session);

        info!("Opened {} with {}: {}", spec.target, name, self.info);
        Ok(())
    }

    fn info(&self) -> &MediaInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut MediaInfo {
        &mut self.info
    }

    fn read_video_y8(&mut self, frame: u32, luma: &mut [u8]) -> Result<()> {
        let session = self.session.as_mut().ok_or(SourceError::NotInitialized)?;
        if !self.info.flags.contains(InputFlags::VIDEO) {
            return Err(SourceError::Unsupported {
                operation: "read_video_y8",
            });
        }
        if self.info.frame_count.is_some_and(|count| frame >= count) {
            return Err(SourceError::decode(format!("frame {} past the end", frame)));
        }
        ensure_capacity(luma, self.info.luma_len())?;

        let plugin_frame = i32::try_from(frame)
            .map_err(|_| SourceError::decode(format!("frame {} out of plugin range", frame)))?;
        let width = self.info.width as usize;
        let height = self.info.height as usize;
        self.scratch.resize(2 * width * height, 0);

        let handle = session.handle()?;
        let written = session
            .module
            .read_video(handle, plugin_frame, &mut self.scratch);
        if written <= 0 {
            return Err(SourceError::decode(format!(
                "func_read_video() returned {} for frame {}",
                written, frame
            )));
        }

        deinterleave_luma(&self.scratch, width, height, luma);
        Ok(())
    }

    fn read_audio(&mut self, frame: u32, buf: &mut [u8]) -> Result<usize> {
        let session = self.session.as_mut().ok_or(SourceError::NotInitialized)?;
        if !self.info.flags.contains(InputFlags::AUDIO) {
            return Err(SourceError::Unsupported {
                operation: "read_audio",
            });
        }

        let window = TimeWindow::from_info(frame, &self.info)?;
        if window.is_empty() {
            return Ok(0);
        }
        let block_align = self
            .info
            .audio
            .as_ref()
            .map_or(0, |audio| audio.block_align as usize);
        let needed = window.len() as usize * block_align;
        ensure_capacity(buf, needed)?;

        let out_of_range = |_| SourceError::decode(format!("audio {} out of plugin range", window));
        let start = i32::try_from(window.start).map_err(out_of_range)?;
        let length = i32::try_from(window.len()).map_err(out_of_range)?;

        let handle = session.handle()?;
        let count = session
            .module
            .read_audio(handle, start, length, &mut buf[..needed]);
        usize::try_from(count).map_err(|_| {
            SourceError::decode(format!("func_read_audio() returned {} for {}", count, window))
        })
    }
}

/// Copy the luma bytes of a packed YUY2 frame into a tight Y8 plane
///
/// `src` holds `height` rows of `2 * width` bytes. Only the 16-aligned region
/// is copied, so `dst` receives `(width & !15) * (height & !15)` bytes and the
/// trailing pixels of every row are skipped.
pub fn deinterleave_luma(src: &[u8], width: usize, height: usize, dst: &mut [u8]) {
    let aligned_width = width & !0xF;
    let aligned_height = height & !0xF;
    if aligned_width == 0 || aligned_height == 0 {
        return;
    }

    for (out_row, in_row) in dst
        .chunks_exact_mut(aligned_width)
        .zip(src.chunks_exact(2 * width))
        .take(aligned_height)
    {
        for (out, pair) in out_row.iter_mut().zip(in_row.chunks_exact(2)) {
            *out = pair[0];
        }
    }
}
