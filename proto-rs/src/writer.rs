use crate::CacheRecord;
use bincode::Options;
use std::io::{self, Write};

// File format constants
pub const SWCG_MAGIC: [u8; 4] = [0x53, 0x57, 0x43, 0x47]; // "SWCG"
pub const SWCG_VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 32;
/// Largest encoded record a generation file may hold
pub const MAX_RECORD_SIZE: usize = 256 * 1024 * 1024;

/// Header of a cache generation file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationHeader {
    pub magic: [u8; 4],
    pub version: u32,
    pub created_at: u64, // Unix timestamp in milliseconds
    pub reserved: [u8; 16],
}

impl GenerationHeader {
    /// Create a new header stamped with the current time
    pub fn new() -> Self {
        Self::with_timestamp(chrono::Utc::now().timestamp_millis().max(0) as u64)
    }

    /// Create a new header with a specific timestamp
    pub fn with_timestamp(created_at: u64) -> Self {
        Self {
            magic: SWCG_MAGIC,
            version: SWCG_VERSION,
            created_at,
            reserved: [0; 16],
        }
    }
}

impl Default for GenerationHeader {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_big_endian()
        .with_fixint_encoding()
}

/// Writer for cache generation files
pub struct RecordWriter<W: Write> {
    writer: W,
    header_written: bool,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            header_written: false,
        }
    }

    /// Write the file header; must come before any record
    pub fn write_header(&mut self, header: &GenerationHeader) -> io::Result<()> {
        if self.header_written {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Header already written",
            ));
        }

        self.writer.write_all(&header.magic)?;
        self.writer.write_all(&header.version.to_be_bytes())?;
        self.writer.write_all(&header.created_at.to_be_bytes())?;
        self.writer.write_all(&header.reserved)?;

        self.header_written = true;
        Ok(())
    }

    /// Write one length-prefixed record
    pub fn write_record(&mut self, record: &CacheRecord) -> io::Result<()> {
        if !self.header_written {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Header must be written before records",
            ));
        }

        let encoded = codec()
            .serialize(record)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        if encoded.len() > MAX_RECORD_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Record of {} bytes exceeds {} byte limit", encoded.len(), MAX_RECORD_SIZE),
            ));
        }
        let len = encoded.len() as u32;
        self.writer.write_all(&len.to_be_bytes())?;
        self.writer.write_all(&encoded)?;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}
