use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::error::{Result, SourceError};
use crate::source::traits::{ensure_capacity, Source};
use crate::source::types::{AudioFormat, InputFlags, MediaInfo, FORMAT_STRUCT_SIZE};
use crate::source::window::TimeWindow;

/// Default number of header bytes searched for the `data` chunk
pub const DEFAULT_HEADER_SCAN_LIMIT: u64 = 1_000_000;

/// Where the PCM payload of a RIFF/WAVE file lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerLayout {
    pub format: AudioFormat,
    /// Byte offset of the first sample frame
    pub data_start: u64,
    /// Declared size of the `data` chunk
    pub data_size: u32,
}

impl ContainerLayout {
    /// Walk the chunk list of a RIFF/WAVE stream up to the `data` chunk
    ///
    /// The payload itself is not read. Scanning gives up once the stream
    /// position passes `scan_limit` bytes.
    pub fn scan<R: Read + Seek>(reader: &mut R, path: &str, scan_limit: u64) -> Result<Self> {
        let mut tag = [0u8; 4];

        if read_full(reader, &mut tag)? != 4 || &tag != b"RIFF" {
            return Err(SourceError::parse(path, "no RIFF header"));
        }
        reader.seek(SeekFrom::Current(4))?;
        if read_full(reader, &mut tag)? != 4 || &tag != b"WAVE" {
            return Err(SourceError::parse(path, "no WAVE header"));
        }

        let mut format: Option<AudioFormat> = None;
        let mut data: Option<(u64, u32)> = None;

        while read_full(reader, &mut tag)? == 4 {
            if reader.stream_position()? > scan_limit {
                debug!("Giving up chunk scan of {} after {} bytes", path, scan_limit);
                break;
            }

            let mut size_bytes = [0u8; 4];
            if read_full(reader, &mut size_bytes)? != 4 {
                break;
            }
            let size = u32::from_le_bytes(size_bytes);
            debug!("Chunk '{}' ({} bytes)", String::from_utf8_lossy(&tag), size);

            match &tag {
                b"fmt " => {
                    let take = (size as usize).min(FORMAT_STRUCT_SIZE);
                    let mut record = [0u8; FORMAT_STRUCT_SIZE];
                    reader
                        .read_exact(&mut record[..take])
                        .map_err(|_| SourceError::parse(path, "illegal WAVE file"))?;

                    let fmt = AudioFormat::from_le_bytes(&record[..take]);
                    if !fmt.is_pcm() {
                        return Err(SourceError::unsupported_format(format!(
                            "only PCM supported, '{}' has format tag 0x{:04X}",
                            path, fmt.format_tag
                        )));
                    }

                    let remaining = size as u64 - take as u64 + (size as u64 & 1);
                    if remaining > 0 {
                        reader.seek(SeekFrom::Current(remaining as i64))?;
                    }
                    format = Some(fmt);
                }
                b"data" => {
                    data = Some((reader.stream_position()?, size));
                    break;
                }
                _ => {
                    if size & 1 == 1 {
                        warn!("Odd-sized chunk '{}' in {}", String::from_utf8_lossy(&tag), path);
                    }
                    reader.seek(SeekFrom::Current(size as i64 + (size as i64 & 1)))?;
                }
            }
        }

        let (data_start, data_size) =
            data.ok_or_else(|| SourceError::parse(path, "not a valid container, no data chunk"))?;
        let format =
            format.ok_or_else(|| SourceError::parse(path, "data chunk before fmt chunk"))?;
        if format.block_align == 0 {
            return Err(SourceError::unsupported_format(format!(
                "'{}' declares a block alignment of zero",
                path
            )));
        }

        Ok(Self {
            format,
            data_start,
            data_size,
        })
    }

    /// Number of sample frames in the payload, when the header declares it
    pub fn sample_count(&self) -> Option<u64> {
        match self.data_size {
            0 | u32::MAX => None,
            size => Some(size as u64 / self.format.block_align as u64),
        }
    }

    /// Byte offset just past the payload, when the header declares its size
    pub fn data_end(&self) -> Option<u64> {
        self.sample_count()
            .map(|_| self.data_start + self.data_size as u64)
    }
}

/// Fill `buf` as far as the stream allows, returning the bytes read
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Audio-only source reading PCM straight out of a RIFF/WAVE file
///
/// Samples are never buffered; each `read_audio` seeks to its window.
#[derive(Debug)]
pub struct WavSource {
    info: MediaInfo,
    reader: Option<BufReader<File>>,
    path: PathBuf,
    data_start: u64,
    /// Reads stop here so trailing chunks are never served as samples
    data_end: Option<u64>,
    scan_limit: u64,
}

impl WavSource {
    pub fn new() -> Self {
        Self::with_scan_limit(DEFAULT_HEADER_SCAN_LIMIT)
    }

    pub fn with_scan_limit(scan_limit: u64) -> Self {
        Self {
            info: MediaInfo::default(),
            reader: None,
            path: PathBuf::new(),
            data_start: 0,
            data_end: None,
            scan_limit,
        }
    }

    /// Byte offset of the first sample frame
    pub fn data_start(&self) -> u64 {
        self.data_start
    }
}

impl Default for WavSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Source for WavSource {
    fn backend(&self) -> &'static str {
        "wav"
    }

    fn init(&mut self, specifier: &str) -> Result<()> {
        if self.reader.is_some() {
            return Err(SourceError::AlreadyInitialized);
        }

        let file = File::open(specifier).map_err(|e| SourceError::Open {
            backend: "wav",
            path: specifier.to_string(),
            reason: e.to_string(),
        })?;
        let mut reader = BufReader::new(file);
        let layout = ContainerLayout::scan(&mut reader, specifier, self.scan_limit)?;

        let sample_count = layout.sample_count();
        if sample_count.is_none() {
            warn!("{} does not declare its data size", specifier);
        }

        self.info = MediaInfo {
            flags: InputFlags::AUDIO,
            audio: Some(layout.format),
            audio_sample_count: sample_count,
            ..MediaInfo::default()
        };
        self.data_start = layout.data_start;
        self.data_end = layout.data_end();
        self.path = PathBuf::from(specifier);
        self.reader = Some(reader);

        info!(
            "Opened WAV {}: {} Hz, {} ch, {} bit, data at byte {}",
            specifier,
            layout.format.samples_per_sec,
            layout.format.channels,
            layout.format.bits_per_sample,
            layout.data_start
        );
        Ok(())
    }

    fn info(&self) -> &MediaInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut MediaInfo {
        &mut self.info
    }

    fn read_audio(&mut self, frame: u32, buf: &mut [u8]) -> Result<usize> {
        let reader = self.reader.as_mut().ok_or(SourceError::NotInitialized)?;
        let window = TimeWindow::from_info(frame, &self.info)?;
        let block_align = self
            .info
            .audio
            .as_ref()
            .map_or(0, |audio| audio.block_align as usize);

        let needed = window.len() as usize * block_align;
        ensure_capacity(buf, needed)?;

        let position = self.data_start + window.start * block_align as u64;
        let wanted = match self.data_end {
            Some(end) => (needed as u64).min(end.saturating_sub(position)) as usize,
            None => needed,
        };
        if wanted == 0 {
            return Ok(0);
        }

        reader.seek(SeekFrom::Start(position))?;
        let read = read_full(reader, &mut buf[..wanted])?;

        Ok(read / block_align)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use tempfile::tempdir;

    fn chunk(tag: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut bytes = tag.to_vec();
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(payload);
        if payload.len() % 2 == 1 {
            bytes.push(0);
        }
        bytes
    }

    fn fmt_payload(tag: u16, channels: u16, rate: u32, bits: u16) -> Vec<u8> {
        let block_align = channels * bits / 8;
        let mut payload = Vec::new();
        payload.extend_from_slice(&tag.to_le_bytes());
        payload.extend_from_slice(&channels.to_le_bytes());
        payload.extend_from_slice(&rate.to_le_bytes());
        payload.extend_from_slice(&(rate * block_align as u32).to_le_bytes());
        payload.extend_from_slice(&block_align.to_le_bytes());
        payload.extend_from_slice(&bits.to_le_bytes());
        payload
    }

    fn riff(chunks: &[Vec<u8>]) -> Vec<u8> {
        let body: Vec<u8> = chunks.concat();
        let mut bytes = b"RIFF".to_vec();
        bytes.extend_from_slice(&(body.len() as u32 + 4).to_le_bytes());
        bytes.extend_from_slice(b"WAVE");
        bytes.extend_from_slice(&body);
        bytes
    }

    #[test]
    fn test_scan_finds_data_after_unknown_chunks() {
        let bytes = riff(&[
            chunk(b"fmt ", &fmt_payload(1, 2, 44100, 16)),
            chunk(b"LIST", b"INFOISFT\x05\x00\x00\x00test\x00"),
            chunk(b"data", &[1, 2, 3, 4, 5, 6, 7, 8]),
        ]);

        let layout = ContainerLayout::scan(&mut Cursor::new(&bytes), "mem.wav", 1_000_000).unwrap();
        assert_eq!(layout.format, AudioFormat::pcm16(2, 44100));
        assert_eq!(&bytes[layout.data_start as usize..], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(layout.sample_count(), Some(2));
    }

    #[test]
    fn test_scan_skips_extended_fmt_bytes() {
        let mut payload = fmt_payload(1, 1, 8000, 8);
        payload.extend_from_slice(&[0, 0, 0xAA, 0xBB]);
        let bytes = riff(&[chunk(b"fmt ", &payload), chunk(b"data", &[9, 8, 7])]);

        let layout = ContainerLayout::scan(&mut Cursor::new(&bytes), "mem.wav", 1_000_000).unwrap();
        assert_eq!(layout.format.extra_size, 0);
        assert_eq!(layout.format.block_align, 1);
        assert_eq!(bytes[layout.data_start as usize], 9);
    }

    #[test]
    fn test_scan_rejects_missing_magic() {
        let mut bytes = riff(&[chunk(b"fmt ", &fmt_payload(1, 1, 8000, 16))]);
        bytes[0..4].copy_from_slice(b"RIFX");
        let err = ContainerLayout::scan(&mut Cursor::new(&bytes), "a.wav", 1_000_000).unwrap_err();
        assert!(matches!(err, SourceError::Parse { ref reason, .. } if reason == "no RIFF header"));

        let mut bytes = riff(&[chunk(b"fmt ", &fmt_payload(1, 1, 8000, 16))]);
        bytes[8..12].copy_from_slice(b"AVI ");
        let err = ContainerLayout::scan(&mut Cursor::new(&bytes), "a.wav", 1_000_000).unwrap_err();
        assert!(matches!(err, SourceError::Parse { ref reason, .. } if reason == "no WAVE header"));

        let err = ContainerLayout::scan(&mut Cursor::new(b"RI"), "a.wav", 1_000_000).unwrap_err();
        assert!(matches!(err, SourceError::Parse { .. }));
    }

    #[test]
    fn test_scan_rejects_non_pcm() {
        // IEEE float
        let bytes = riff(&[
            chunk(b"fmt ", &fmt_payload(3, 2, 48000, 32)),
            chunk(b"data", &[0; 8]),
        ]);
        let err = ContainerLayout::scan(&mut Cursor::new(&bytes), "f.wav", 1_000_000).unwrap_err();
        assert!(matches!(err, SourceError::FormatUnsupported { .. }));
        assert!(err.to_string().contains("only PCM supported"));
    }

    #[test]
    fn test_scan_requires_data_chunk() {
        let bytes = riff(&[chunk(b"fmt ", &fmt_payload(1, 2, 48000, 16))]);
        let err = ContainerLayout::scan(&mut Cursor::new(&bytes), "n.wav", 1_000_000).unwrap_err();
        assert!(matches!(err, SourceError::Parse { .. }));
    }

    #[test]
    fn test_scan_gives_up_past_limit() {
        let bytes = riff(&[
            chunk(b"fmt ", &fmt_payload(1, 2, 48000, 16)),
            chunk(b"junk", &vec![0u8; 4096]),
            chunk(b"data", &[0; 4]),
        ]);

        let err = ContainerLayout::scan(&mut Cursor::new(&bytes), "big.wav", 1024).unwrap_err();
        assert!(matches!(err, SourceError::Parse { .. }));

        assert!(ContainerLayout::scan(&mut Cursor::new(&bytes), "big.wav", 1_000_000).is_ok());
    }

    #[test]
    fn test_unknown_data_size() {
        let mut bytes = riff(&[
            chunk(b"fmt ", &fmt_payload(1, 2, 48000, 16)),
            chunk(b"data", &[0; 8]),
        ]);
        let size_at = bytes.len() - 12;
        bytes[size_at..size_at + 4].copy_from_slice(&u32::MAX.to_le_bytes());

        let layout = ContainerLayout::scan(&mut Cursor::new(&bytes), "s.wav", 1_000_000).unwrap();
        assert_eq!(layout.sample_count(), None);
    }

    #[test]
    fn test_read_audio_uses_current_rate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ramp.wav");

        // mono 8-bit, 1000 Hz, sample n holds n % 256
        let pcm: Vec<u8> = (0..1000u32).map(|n| (n % 256) as u8).collect();
        let bytes = riff(&[chunk(b"fmt ", &fmt_payload(1, 1, 1000, 8)), chunk(b"data", &pcm)]);
        File::create(&path).unwrap().write_all(&bytes).unwrap();

        let mut source = WavSource::new();
        source.init(path.to_str().unwrap()).unwrap();
        assert!(source.has_audio());
        assert!(!source.has_video());

        let mut buf = vec![0u8; 1000];
        assert!(matches!(
            source.read_audio(0, &mut buf),
            Err(SourceError::InvalidRate { .. })
        ));

        source.set_rate(10, 1);
        assert_eq!(source.read_audio(3, &mut buf).unwrap(), 100);
        assert_eq!(&buf[..100], &pcm[300..400]);

        source.set_rate(25, 1);
        assert_eq!(source.read_audio(3, &mut buf).unwrap(), 40);
        assert_eq!(&buf[..40], &pcm[120..160]);

        // past the end of the payload
        assert_eq!(source.read_audio(30, &mut buf).unwrap(), 0);

        // double init is refused
        assert!(matches!(
            source.init(path.to_str().unwrap()),
            Err(SourceError::AlreadyInitialized)
        ));
    }

    #[test]
    fn test_read_audio_stops_at_data_chunk_end() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tagged.wav");

        // metadata chunk after the samples must not be read as audio
        let bytes = riff(&[
            chunk(b"fmt ", &fmt_payload(1, 1, 10, 8)),
            chunk(b"data", &[7; 10]),
            chunk(b"LIST", b"INFOxxxx"),
        ]);
        File::create(&path).unwrap().write_all(&bytes).unwrap();

        let mut source = WavSource::new();
        source.init(path.to_str().unwrap()).unwrap();
        source.set_rate(5, 1);

        let mut buf = vec![0u8; 32];
        assert_eq!(source.read_audio(0, &mut buf).unwrap(), 2);
        assert_eq!(source.read_audio(4, &mut buf).unwrap(), 2);
        assert_eq!(source.read_audio(5, &mut buf).unwrap(), 0);

        // windows of 3 samples: frame 3 straddles the chunk end
        source.set_rate(10, 3);
        buf.fill(0);
        assert_eq!(source.read_audio(3, &mut buf).unwrap(), 1);
        assert_eq!(&buf[..3], &[7, 0, 0]);
        assert_eq!(source.read_audio(4, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_open_missing_file() {
        let mut source = WavSource::new();
        let err = source.init("/definitely/not/here.wav").unwrap_err();
        assert!(matches!(err, SourceError::Open { backend: "wav", .. }));
        assert!(matches!(source.read_audio(0, &mut [0u8; 4]), Err(SourceError::NotInitialized)));
    }
}
