//! C layout of the input plugin interface
//!
//! Plugins are 32-bit style DLLs exporting `GetInputPluginTable`. Every entry
//! point uses the C calling convention.

#![allow(dead_code)]

use std::ffi::{c_char, c_int, c_void};

pub type Bool = c_int;
pub type InputHandle = *mut c_void;

pub const FALSE: Bool = 0;

pub type GetInputPluginTableFn = unsafe extern "C" fn() -> *mut InputPluginTable;

pub type InitFn = unsafe extern "C" fn() -> Bool;
pub type ExitFn = unsafe extern "C" fn() -> Bool;
pub type OpenFn = unsafe extern "C" fn(file: *const c_char) -> InputHandle;
pub type CloseFn = unsafe extern "C" fn(ih: InputHandle) -> Bool;
pub type InfoGetFn = unsafe extern "C" fn(ih: InputHandle, iip: *mut InputInfo) -> Bool;
pub type ReadVideoFn = unsafe extern "C" fn(ih: InputHandle, frame: c_int, buf: *mut c_void) -> c_int;
pub type ReadAudioFn =
    unsafe extern "C" fn(ih: InputHandle, start: c_int, length: c_int, buf: *mut c_void) -> c_int;
pub type IsKeyframeFn = unsafe extern "C" fn(ih: InputHandle, frame: c_int) -> Bool;
pub type ConfigFn = unsafe extern "C" fn(hwnd: *mut c_void, dll_hinst: *mut c_void) -> Bool;

/// `INPUT_PLUGIN_TABLE`
#[repr(C)]
pub struct InputPluginTable {
    pub flag: c_int,
    pub name: *const c_char,
    pub filefilter: *const c_char,
    pub information: *const c_char,
    pub func_init: Option<InitFn>,
    pub func_exit: Option<ExitFn>,
    pub func_open: Option<OpenFn>,
    pub func_close: Option<CloseFn>,
    pub func_info_get: Option<InfoGetFn>,
    pub func_read_video: Option<ReadVideoFn>,
    pub func_read_audio: Option<ReadAudioFn>,
    pub func_is_keyframe: Option<IsKeyframeFn>,
    pub func_config: Option<ConfigFn>,
    pub reserve: [c_int; 16],
}

/// `INPUT_INFO`, filled by `func_info_get`
#[repr(C)]
pub struct InputInfo {
    pub flag: c_int,
    pub rate: c_int,
    pub scale: c_int,
    pub n: c_int,
    pub format: *const BitmapInfoHeader,
    pub format_size: c_int,
    pub audio_n: c_int,
    /// Points at a `WAVEFORMATEX`, which is byte packed
    pub audio_format: *const u8,
    pub audio_format_size: c_int,
    pub handler: u32,
    pub reserve: [c_int; 7],
}

impl Default for InputInfo {
    fn default() -> Self {
        Self {
            flag: 0,
            rate: 0,
            scale: 0,
            n: 0,
            format: std::ptr::null(),
            format_size: 0,
            audio_n: 0,
            audio_format: std::ptr::null(),
            audio_format_size: 0,
            handler: 0,
            reserve: [0; 7],
        }
    }
}

/// `BITMAPINFOHEADER`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BitmapInfoHeader {
    pub size: u32,
    pub width: i32,
    /// Negative for top-down bitmaps
    pub height: i32,
    pub planes: u16,
    pub bit_count: u16,
    pub compression: u32,
    pub size_image: u32,
    pub x_pels_per_meter: i32,
    pub y_pels_per_meter: i32,
    pub clr_used: u32,
    pub clr_important: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn test_bitmap_header_size() {
        assert_eq!(size_of::<BitmapInfoHeader>(), 40);
    }

    #[test]
    fn test_table_layout() {
        // four header words, nine entry points, sixteen reserved ints
        let ptr = size_of::<*const c_void>();
        let header = 4 * ptr;
        let expected = header + 9 * ptr + 16 * size_of::<c_int>();
        assert_eq!(size_of::<InputPluginTable>(), expected);
    }
}
