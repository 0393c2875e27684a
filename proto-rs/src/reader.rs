use crate::CacheRecord;
use crate::writer::{GenerationHeader, HEADER_SIZE, MAX_RECORD_SIZE, SWCG_MAGIC, SWCG_VERSION, codec};
use bincode::Options;
use std::io::{self, BufRead, BufReader, Read};

/// Reader for cache generation files
pub struct RecordReader<R: Read> {
    reader: BufReader<R>,
    header: Option<GenerationHeader>,
    position: usize,
}

impl<R: Read> RecordReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            header: None,
            position: 0,
        }
    }

    /// Read and validate the file header
    pub fn read_header(&mut self) -> io::Result<GenerationHeader> {
        if let Some(ref header) = self.header {
            return Ok(header.clone());
        }

        let mut buf = [0u8; HEADER_SIZE];
        self.reader.read_exact(&mut buf)?;

        if buf[0..4] != SWCG_MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Invalid SWCG magic bytes - not a cache generation file",
            ));
        }

        let version = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        if version != SWCG_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unsupported SWCG version: {} (expected {})", version, SWCG_VERSION),
            ));
        }

        let mut created_at = [0u8; 8];
        created_at.copy_from_slice(&buf[8..16]);
        let mut reserved = [0u8; 16];
        reserved.copy_from_slice(&buf[16..32]);

        let header = GenerationHeader {
            magic: SWCG_MAGIC,
            version,
            created_at: u64::from_be_bytes(created_at),
            reserved,
        };

        self.header = Some(header.clone());
        self.position += HEADER_SIZE;
        Ok(header)
    }

    /// Read the next record
    ///
    /// Returns `Ok(None)` at a clean end of stream. A stream that ends inside
    /// a record is `UnexpectedEof`.
    pub fn read_record(&mut self) -> io::Result<Option<CacheRecord>> {
        if self.header.is_none() {
            self.read_header()?;
        }

        if self.reader.fill_buf()?.is_empty() {
            return Ok(None);
        }

        let mut len_buf = [0u8; 4];
        self.reader.read_exact(&mut len_buf)?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_RECORD_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Record at byte {} claims {} bytes (limit {})", self.position, len, MAX_RECORD_SIZE),
            ));
        }

        // Grow with the bytes actually present instead of trusting the prefix
        let mut payload = Vec::new();
        (&mut self.reader).take(len as u64).read_to_end(&mut payload)?;
        if payload.len() != len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("Record at byte {} truncated: {} of {} bytes", self.position, payload.len(), len),
            ));
        }

        let record = codec().deserialize(&payload).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Failed to decode record at byte {}: {}", self.position, e),
            )
        })?;

        self.position += 4 + len;
        Ok(Some(record))
    }

    /// Read all remaining records
    pub fn read_all(&mut self) -> io::Result<Vec<CacheRecord>> {
        let mut records = Vec::new();
        while let Some(record) = self.read_record()? {
            records.push(record);
        }
        Ok(records)
    }

    pub fn header(&self) -> Option<&GenerationHeader> {
        self.header.as_ref()
    }

    /// Bytes consumed so far
    pub fn position(&self) -> usize {
        self.position
    }
}
