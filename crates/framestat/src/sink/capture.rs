//! Binary capture files.
//!
//! A capture is the magic bytes followed by length-prefixed bincode records:
//! one header, then description blocks and frames in the order they were
//! produced. A later description block extends the earlier ones.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use framestat_core::{Error, GroupId, Result, StatId, StatKind};
use serde::{Deserialize, Serialize};

use super::protocol::{
    CycleSample, DescriptionBlock, FrameRecord, GroupDescription, StatDescription, StatSample,
    MAX_MESSAGE_LEN,
};
use super::{RecordBuilder, StatSink};

/// File magic.
pub const CAPTURE_MAGIC: [u8; 4] = *b"FSTC";

/// Current capture format version.
pub const CAPTURE_FORMAT_VERSION: u32 = 1;

/// First record of every capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureHeader {
    pub format_version: u32,
    pub engine_version: u32,
    pub changelist: u32,
}

/// One record of a capture file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CaptureRecord {
    Header(CaptureHeader),
    Descriptions(DescriptionBlock),
    Frame(FrameRecord),
}

/// Sink writing a capture file.
pub struct CaptureSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    builder: RecordBuilder,
    frames: u32,
}

impl std::fmt::Debug for CaptureSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSink")
            .field("path", &self.path)
            .field("frames", &self.frames)
            .field("open", &self.writer.is_some())
            .finish()
    }
}

impl CaptureSink {
    /// Sink name used by the manager.
    pub const NAME: &'static str = "capture";

    /// Create the file and write the header.
    pub fn create(path: &Path, header: CaptureHeader) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(&CAPTURE_MAGIC)?;
        write_record(&mut writer, &CaptureRecord::Header(header))?;
        tracing::info!("Stats capture started: {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(writer),
            builder: RecordBuilder::default(),
            frames: 0,
        })
    }

    /// Path of the capture file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&mut self, record: &CaptureRecord) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        if let Err(e) = write_record(writer, record) {
            tracing::warn!("Stats capture {} failed: {}", self.path.display(), e);
            self.writer = None;
        }
    }
}

fn write_record(writer: &mut impl Write, record: &CaptureRecord) -> Result<()> {
    let data = bincode::serialize(record).map_err(|e| Error::Serialization(e.to_string()))?;
    let len = u32::try_from(data.len())
        .map_err(|_| Error::Serialization("capture record too large".into()))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&data)?;
    Ok(())
}

impl StatSink for CaptureSink {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn is_active(&self) -> bool {
        self.writer.is_some()
    }

    fn start_descriptions(&mut self) {
        self.builder.start_descriptions();
    }

    fn add_group_description(&mut self, group: GroupId, name: &str) {
        self.builder.add_group(group, name);
    }

    fn add_stat_description(&mut self, stat: StatId, name: &str, kind: StatKind, group: GroupId) {
        self.builder.add_stat(stat, name, kind, group);
    }

    fn end_descriptions(&mut self) {
        let block = self.builder.take_descriptions();
        self.write(&CaptureRecord::Descriptions(block));
    }

    fn set_frame_number(&mut self, frame: u32) {
        self.builder.start_frame(frame);
    }

    fn write_cycle(&mut self, sample: &CycleSample) {
        self.builder.push(StatSample::Cycle(*sample));
    }

    fn write_float(&mut self, stat: StatId, group: GroupId, value: f32) {
        self.builder.push(StatSample::Float { stat, group, value });
    }

    fn write_dword(&mut self, stat: StatId, group: GroupId, value: u32) {
        self.builder.push(StatSample::Dword { stat, group, value });
    }

    fn end_frame(&mut self) {
        let record = self.builder.take_frame();
        self.write(&CaptureRecord::Frame(record));
        self.frames += 1;
    }

    fn shutdown(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                tracing::warn!("Stats capture {} failed: {}", self.path.display(), e);
            }
        }
        tracing::info!(
            "Stats capture stopped: {} ({} frames)",
            self.path.display(),
            self.frames
        );
    }
}

/// A capture read back from disk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Capture {
    pub header: Option<CaptureHeader>,
    pub groups: BTreeMap<GroupId, GroupDescription>,
    pub stats: BTreeMap<StatId, StatDescription>,
    pub frames: Vec<FrameRecord>,
}

impl Capture {
    fn merge(&mut self, block: DescriptionBlock) {
        for group in block.groups {
            self.groups.insert(group.id, group);
        }
        for stat in block.stats {
            self.stats.insert(stat.id, stat);
        }
    }

    /// Name of a described stat.
    #[must_use]
    pub fn stat_name(&self, stat: StatId) -> Option<&str> {
        self.stats.get(&stat).map(|desc| desc.name.as_str())
    }
}

/// Reads capture files.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureReader;

impl CaptureReader {
    /// Read a whole capture file.
    pub fn open(path: &Path) -> Result<Capture> {
        Self::read_from(BufReader::new(File::open(path)?))
    }

    /// Read a capture from any byte stream.
    pub fn read_from(mut reader: impl Read) -> Result<Capture> {
        let mut magic = [0u8; 4];
        reader
            .read_exact(&mut magic)
            .map_err(|_| Error::MalformedCapture("missing file magic".into()))?;
        if magic != CAPTURE_MAGIC {
            return Err(Error::MalformedCapture("bad file magic".into()));
        }

        let mut capture = Capture::default();
        while let Some(record) = read_record(&mut reader)? {
            match record {
                CaptureRecord::Header(header) => {
                    if capture.header.is_some() {
                        return Err(Error::MalformedCapture("second header".into()));
                    }
                    if header.format_version > CAPTURE_FORMAT_VERSION {
                        return Err(Error::MalformedCapture(format!(
                            "unsupported format version {}",
                            header.format_version
                        )));
                    }
                    capture.header = Some(header);
                }
                _ if capture.header.is_none() => {
                    return Err(Error::MalformedCapture("record before header".into()));
                }
                CaptureRecord::Descriptions(block) => capture.merge(block),
                CaptureRecord::Frame(frame) => capture.frames.push(frame),
            }
        }
        if capture.header.is_none() {
            return Err(Error::MalformedCapture("missing header".into()));
        }
        Ok(capture)
    }
}

/// Next record, or `None` at a clean end of stream.
fn read_record(reader: &mut impl Read) -> Result<Option<CaptureRecord>> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        match reader.read(&mut len_buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(Error::MalformedCapture("truncated record length".into())),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_LEN {
        return Err(Error::MalformedCapture(format!("record of {len} bytes")));
    }
    let mut data = vec![0u8; len];
    reader
        .read_exact(&mut data)
        .map_err(|_| Error::MalformedCapture("truncated record".into()))?;
    bincode::deserialize(&data)
        .map(Some)
        .map_err(|e| Error::MalformedCapture(e.to_string()))
}
