//! ### Image I/O
//!
//! Presents a byte-addressable, seekable view of the disk image file, plus
//! sector-aligned helpers.  All offsets are absolute from the start of the
//! image.  No buffering is performed beyond what the OS page cache gives us
//! for free; writes are flushed at least at `Volume::unmount`.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::Error;
use crate::DYNERR;

/// A sector-addressable backing store for a mounted image.
///
/// Implementations need only support seek/read/write over a flat byte range;
/// `Image` derives the sector helpers from `bytes_per_sector`.
pub struct Image<T> {
    backing: T,
    bytes_per_sector: usize,
}

impl<T: Read + Write + Seek> Image<T> {
    /// Wrap an already-open backing store.  `bytes_per_sector` is whatever the
    /// caller currently believes the geometry to be; it is updated after the
    /// BPB is parsed (see `Volume::mount`).
    pub fn new(backing: T, bytes_per_sector: usize) -> Self {
        Self { backing, bytes_per_sector }
    }
    pub fn set_sector_size(&mut self, bytes_per_sector: usize) {
        self.bytes_per_sector = bytes_per_sector;
    }
    pub fn sector_size(&self) -> usize {
        self.bytes_per_sector
    }
    /// Total length of the underlying byte stream, in bytes.
    pub fn len(&mut self) -> Result<u64, DYNERR> {
        let pos = self.backing.stream_position()?;
        let end = self.backing.seek(SeekFrom::End(0))?;
        self.backing.seek(SeekFrom::Start(pos))?;
        Ok(end)
    }
    pub fn seek(&mut self, offset: u64) -> Result<(), DYNERR> {
        self.backing.seek(SeekFrom::Start(offset))?;
        Ok(())
    }
    /// Read exactly `n` bytes from the current position.
    pub fn read(&mut self, n: usize) -> Result<Vec<u8>, DYNERR> {
        let mut buf = vec![0u8; n];
        self.backing.read_exact(&mut buf)?;
        Ok(buf)
    }
    /// Write bytes at the current position.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), DYNERR> {
        self.backing.write_all(bytes)?;
        Ok(())
    }
    pub fn read_at(&mut self, offset: u64, n: usize) -> Result<Vec<u8>, DYNERR> {
        self.seek(offset)?;
        self.read(n)
    }
    pub fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<(), DYNERR> {
        self.seek(offset)?;
        self.write(bytes)
    }
    /// Read logical sector `lba` (0-based).
    pub fn read_sector(&mut self, lba: u64) -> Result<Vec<u8>, DYNERR> {
        self.read_at(lba * self.bytes_per_sector as u64, self.bytes_per_sector)
    }
    /// Write logical sector `lba` (0-based).  `data` must be exactly one sector.
    pub fn write_sector(&mut self, lba: u64, data: &[u8]) -> Result<(), DYNERR> {
        if data.len() != self.bytes_per_sector {
            log::error!("write_sector got {} bytes, expected {}", data.len(), self.bytes_per_sector);
            return Err(Box::new(Error::ImageIO));
        }
        self.write_at(lba * self.bytes_per_sector as u64, data)
    }
    pub fn flush(&mut self) -> Result<(), DYNERR> {
        self.backing.flush()?;
        Ok(())
    }
}

impl Image<File> {
    /// Open an existing image file for read/write, without assuming any geometry yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DYNERR> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self::new(file, 512))
    }
}
