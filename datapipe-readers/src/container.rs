//! Length-framed record container reader and writer
//!
//! A container file is the magic `DPRC` followed by zero or more
//! records, each framed as a little-endian `u32` length and the record
//! bytes. The reader memory-maps the file and serves each record as a
//! zero-copy byte view pinning the map.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;

use datapipe_core::error::{Error, Result};
use datapipe_core::memory::ByteBuffer;
use datapipe_core::pipeline::DataPipelineBuilder;
use datapipe_core::source::DataSource;
use datapipe_core::tape::Tape;
use datapipe_core::value::Value;

const MAGIC: &[u8; 4] = b"DPRC";

const LENGTH_SIZE: usize = std::mem::size_of::<u32>();

/// Writes records into a container file
pub struct RecordContainerWriter {
    writer: BufWriter<File>,
}

impl RecordContainerWriter {
    /// Create a container file at `path`, truncating any existing one
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;

        let mut writer = BufWriter::new(file);
        writer.write_all(MAGIC)?;

        Ok(Self { writer })
    }

    /// Append one record
    pub fn write_record(&mut self, record: &[u8]) -> Result<()> {
        let len = u32::try_from(record.len()).map_err(|_| {
            Error::InvalidArgument(format!(
                "The record of {} byte(s) exceeds the maximum record size.",
                record.len()
            ))
        })?;

        self.writer.write_all(&len.to_le_bytes())?;
        self.writer.write_all(record)?;

        Ok(())
    }

    /// Flush and close the container
    pub fn finish(mut self) -> Result<()> {
        self.writer.flush()?;

        Ok(())
    }
}

/// Leaf source over a memory-mapped record container
struct RecordContainerSource {
    path: PathBuf,
    map: Arc<Mmap>,
    // (offset, length) of each record payload within the map.
    frames: Vec<(usize, usize)>,
    pos: usize,
}

impl RecordContainerSource {
    fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;

        // Safety: the map is read-only and the container format is
        // write-once; mutating the file while it is mapped is outside
        // the reader's contract.
        #[allow(unsafe_code)]
        let map = unsafe { Mmap::map(&file)? };

        let frames = scan_frames(&map, path)?;

        tracing::debug!(path = %path.display(), records = frames.len(), "opened record container");

        Ok(Self {
            path: path.to_path_buf(),
            map: Arc::new(map),
            frames,
            pos: 0,
        })
    }
}

/// Validate the container framing and index the record payloads
fn scan_frames(bytes: &[u8], path: &Path) -> Result<Vec<(usize, usize)>> {
    if bytes.len() < MAGIC.len() || &bytes[..MAGIC.len()] != MAGIC {
        return Err(Error::Record(format!(
            "'{}' is not a record container file.",
            path.display()
        )));
    }

    let mut frames = Vec::new();
    let mut offset = MAGIC.len();

    while offset < bytes.len() {
        if bytes.len() - offset < LENGTH_SIZE {
            return Err(Error::Record(format!(
                "The record frame at offset {offset} of '{}' is truncated.",
                path.display()
            )));
        }

        let mut len_bytes = [0u8; LENGTH_SIZE];
        len_bytes.copy_from_slice(&bytes[offset..offset + LENGTH_SIZE]);

        let len = u32::from_le_bytes(len_bytes) as usize;

        offset += LENGTH_SIZE;

        if bytes.len() - offset < len {
            return Err(Error::Record(format!(
                "The record at offset {offset} of '{}' extends past the end of the file.",
                path.display()
            )));
        }

        frames.push((offset, len));

        offset += len;
    }

    Ok(frames)
}

impl DataSource for RecordContainerSource {
    fn next(&mut self) -> Result<Option<Value>> {
        let Some(&(offset, len)) = self.frames.get(self.pos) else {
            return Ok(None);
        };

        self.pos += 1;

        let map = Arc::clone(&self.map);

        // Safety: the view stays within the map and the release callback
        // keeps the map alive until the last view drops.
        #[allow(unsafe_code)]
        let bytes = unsafe {
            ByteBuffer::borrowed(
                self.map.as_ptr().add(offset),
                len,
                Box::new(move |_, _| drop(map)),
            )
        };

        Ok(Some(Value::Bytes(bytes)))
    }

    fn reset(&mut self) -> Result<()> {
        self.pos = 0;

        Ok(())
    }

    fn record_position(&mut self, tape: &mut Tape) -> Result<()> {
        tape.record_usize(self.pos);

        Ok(())
    }

    fn reload_position(&mut self, tape: &mut Tape) -> Result<()> {
        let pos = tape.read_usize()?;
        if pos > self.frames.len() {
            return Err(Error::InvalidArgument(format!(
                "The position {pos} is out of range for '{}' with {} record(s).",
                self.path.display(),
                self.frames.len()
            )));
        }

        self.pos = pos;

        Ok(())
    }
}

/// Create a pipeline builder over the records of a container file
///
/// Records are yielded as byte values viewing the memory-mapped file
/// without copying. The framing is validated up front; a malformed
/// container fails here as a record fault.
pub fn read_record_container<P: AsRef<Path>>(path: P) -> Result<DataPipelineBuilder> {
    let source = RecordContainerSource::open(path.as_ref())?;

    Ok(DataPipelineBuilder::from_source(Box::new(source)))
}
