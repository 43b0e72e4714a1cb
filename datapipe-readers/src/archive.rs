//! Framed record archives
//!
//! An archive is a flat file of length-prefixed records, each guarded by
//! masked CRC32 checksums over the length bytes and the payload. The
//! reader positions itself by byte offset, which makes the checkpoint a
//! single integer.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use datapipe_core::{Data, DataPipelineBuilder, DataSource, Error, Result, Tape};

const STATE_TAG: u8 = 13;

/// Frame overhead: length prefix, length CRC, payload CRC.
const FRAME_OVERHEAD: u64 = 8 + 4 + 4;

/// Returns a builder over a pipeline that streams the records of the
/// archive at `pathname` as byte records.
pub fn read_zipped_records(pathname: impl Into<PathBuf>) -> DataPipelineBuilder {
    let pathname = pathname.into();

    DataPipelineBuilder::new(move || {
        Ok(Box::new(RecordArchiveDataSource::open(pathname)?) as Box<dyn DataSource>)
    })
}

struct RecordArchiveDataSource {
    reader: BufReader<File>,

    /// Byte offset of the next unread frame.
    position: u64,

    file_size: u64,
}

impl RecordArchiveDataSource {
    fn open(pathname: PathBuf) -> Result<Self> {
        let file = File::open(&pathname)?;

        let file_size = file.metadata()?.len();

        Ok(Self {
            reader: BufReader::new(file),
            position: 0,
            file_size,
        })
    }

    fn corrupt_frame(&self, detail: &str) -> Error {
        Error::operator(format!(
            "corrupt record frame at byte offset {}: {detail}",
            self.position
        ))
    }
}

impl DataSource for RecordArchiveDataSource {
    fn next(&mut self) -> Result<Option<Data>> {
        if self.position >= self.file_size {
            return Ok(None);
        }

        let mut length_bytes = [0u8; 8];

        self.reader
            .read_exact(&mut length_bytes)
            .map_err(|err| self.corrupt_frame(&format!("truncated length prefix: {err}")))?;

        let mut length_crc_bytes = [0u8; 4];

        self.reader
            .read_exact(&mut length_crc_bytes)
            .map_err(|err| self.corrupt_frame(&format!("truncated length checksum: {err}")))?;

        let length_crc = u32::from_le_bytes(length_crc_bytes);

        if mask_crc(crc32fast::hash(&length_bytes)) != length_crc {
            return Err(self.corrupt_frame("length checksum mismatch"));
        }

        let length = u64::from_le_bytes(length_bytes);

        let available = (self.file_size - self.position).saturating_sub(FRAME_OVERHEAD);

        if length > available {
            return Err(self.corrupt_frame("frame extends past the end of the file"));
        }

        let mut payload = vec![0u8; length as usize];

        self.reader
            .read_exact(&mut payload)
            .map_err(|err| self.corrupt_frame(&format!("truncated payload: {err}")))?;

        let mut payload_crc_bytes = [0u8; 4];

        self.reader
            .read_exact(&mut payload_crc_bytes)
            .map_err(|err| self.corrupt_frame(&format!("truncated payload checksum: {err}")))?;

        let payload_crc = u32::from_le_bytes(payload_crc_bytes);

        if mask_crc(crc32fast::hash(&payload)) != payload_crc {
            return Err(self.corrupt_frame("payload checksum mismatch"));
        }

        self.position += FRAME_OVERHEAD + length;

        Ok(Some(Data::Bytes(payload)))
    }

    fn reset(&mut self) -> Result<()> {
        self.reader.seek(SeekFrom::Start(0))?;

        self.position = 0;

        Ok(())
    }

    fn record_position(&mut self, tape: &mut Tape) -> Result<()> {
        tape.write_tag(STATE_TAG);
        tape.write_size(self.position as usize);

        Ok(())
    }

    fn reload_position(&mut self, tape: &mut Tape) -> Result<()> {
        tape.expect_tag(STATE_TAG, "read_zipped_records")?;

        let position = tape.read_size()? as u64;

        if position > self.file_size {
            return Err(Error::CorruptedCheckpoint(format!(
                "the recorded offset ({position}) exceeds the archive size ({})",
                self.file_size
            )));
        }

        self.reader.seek(SeekFrom::Start(position))?;

        self.position = position;

        Ok(())
    }
}

/// Writes framed record archives readable by [`read_zipped_records`].
pub struct RecordArchiveWriter {
    writer: BufWriter<File>,
}

impl RecordArchiveWriter {
    /// Creates (or truncates) the archive at `pathname`.
    pub fn create(pathname: impl Into<PathBuf>) -> Result<Self> {
        let file = File::create(pathname.into())?;

        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    /// Appends one record payload.
    pub fn write(&mut self, payload: &[u8]) -> Result<()> {
        let length_bytes = (payload.len() as u64).to_le_bytes();

        self.writer.write_all(&length_bytes)?;
        self.writer
            .write_all(&mask_crc(crc32fast::hash(&length_bytes)).to_le_bytes())?;
        self.writer.write_all(payload)?;
        self.writer
            .write_all(&mask_crc(crc32fast::hash(payload)).to_le_bytes())?;

        Ok(())
    }

    /// Flushes and closes the archive.
    pub fn finish(mut self) -> Result<()> {
        self.writer.flush()?;

        Ok(())
    }
}

/// Rotates the checksum right by 15 bits and adds a constant.
fn mask_crc(crc: u32) -> u32 {
    ((crc >> 15) | (crc << 17)).wrapping_add(0xa282_ead8)
}
