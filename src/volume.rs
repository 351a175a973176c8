//! ### Volume Operations
//!
//! `Volume` is the public entry point: mount an existing image, format a new
//! one, and perform directory/file CRUD against whichever directory is
//! currently current.  Every mutating call loads the directory it touches,
//! applies the change, and flushes the directory, the FAT, and the image
//! before returning — no operation leaves a half-written change for the next
//! call to observe.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, Write};
use std::path::Path;

use crate::bpb::BootSector;
use crate::directory::{self, Location, NewEntry, RawDirectory, ATTR_ARCHIVE, ATTR_DIRECTORY};
use crate::error::Error;
use crate::fat::Table;
use crate::geometry::{Geometry, GeometryRegistry};
use crate::image::Image;
use crate::DYNERR;

const MAX_FAT12_CLUSTERS: u32 = 4085;

/// A listing row as seen by callers: a resolved name plus enough metadata to
/// act on the entry again (rename, delete, read).
#[derive(Debug, Clone)]
pub struct DirEntryView {
    pub name: String,
    pub is_dir: bool,
    pub size: u32,
    pub created: Option<chrono::NaiveDateTime>,
    pub modified: Option<chrono::NaiveDateTime>,
}

impl From<&directory::Listing> for DirEntryView {
    fn from(l: &directory::Listing) -> Self {
        Self { name: l.name.clone(), is_dir: l.is_dir(), size: l.size, created: l.created, modified: l.modified }
    }
}

/// An open FAT12 volume.
pub struct Volume<T> {
    image: Image<T>,
    boot: BootSector,
    fat: Table,
    cwd: Location,
}

impl Volume<File> {
    /// Mount an existing image file, validating the BPB and confirming the
    /// volume is in fact FAT12 (this crate does not speak FAT16/32).
    pub fn mount(path: impl AsRef<Path>) -> Result<Self, DYNERR> {
        let mut image = Image::open(path)?;
        let header = image.read_at(0, 512)?;
        let boot = BootSector::from_bytes(&header)?;
        image.set_sector_size(boot.bytes_per_sector as usize);
        if boot.cluster_count() >= MAX_FAT12_CLUSTERS {
            log::error!("volume has {} clusters, not a FAT12 layout", boot.cluster_count());
            return Err(Box::new(Error::CorruptFilesystem));
        }
        let fat = Table::load(&mut image, &boot)?;
        Ok(Self { image, boot, fat, cwd: Location::Root })
    }

    /// Create a brand-new image file of the named geometry, format it, and
    /// mount it.  `path` must not already exist.
    pub fn format(path: impl AsRef<Path>, geometry: &Geometry, volume_label: &str) -> Result<Self, DYNERR> {
        let file = OpenOptions::new().read(true).write(true).create_new(true).open(path.as_ref())?;
        let mut image = Image::new(file, geometry.bytes_per_sector as usize);
        let size = geometry.image_size();
        image.write_at(size.saturating_sub(1), &[0u8])?;
        let volume_id = format_serial(volume_label);
        let boot = BootSector::from_geometry(geometry, volume_id, volume_label);
        image.write_at(0, &boot.to_bytes())?;
        let fat = Table::format(&boot);
        fat.flush(&mut image)?;
        let zero_sector = vec![0u8; boot.bytes_per_sector as usize];
        for s in 0..boot.root_dir_sectors() {
            image.write_sector((boot.root_dir_start_sector() + s) as u64, &zero_sector)?;
        }
        image.flush()?;
        log::info!("formatted {} ({} bytes)", path.as_ref().display(), size);
        Self::mount(path)
    }
}

fn format_serial(label: &str) -> u32 {
    // Deterministic stand-in for "generate from a timestamp" (see pack.rs
    // precedent): derived from the label so repeated formats of the same
    // name are reproducible, which is convenient for tests.
    let mut acc: u32 = 0x1234_5678;
    for b in label.bytes() {
        acc = acc.rotate_left(5) ^ b as u32;
    }
    acc
}

impl<T: Read + Write + Seek> Volume<T> {
    fn raw_cwd(&mut self) -> Result<RawDirectory, DYNERR> {
        RawDirectory::load(&mut self.image, &self.boot, &self.fat, self.cwd)
    }

    fn flush_all(&mut self, raw: &RawDirectory) -> Result<(), DYNERR> {
        raw.flush(&mut self.image, &self.boot, &self.fat)?;
        self.fat.flush(&mut self.image)?;
        self.image.flush()
    }

    fn find(&mut self, name: &str) -> Result<Option<directory::Listing>, DYNERR> {
        let raw = self.raw_cwd()?;
        Ok(directory::list(&raw).into_iter().find(|l| l.name.eq_ignore_ascii_case(name) || l.short_name.eq_ignore_ascii_case(name)))
    }

    /// List every non-label entry of the current directory.
    pub fn list_dir(&mut self) -> Result<Vec<DirEntryView>, DYNERR> {
        let raw = self.raw_cwd()?;
        Ok(directory::list(&raw).iter().map(DirEntryView::from).collect())
    }

    /// Change the current directory.  `".."` and `"."` are handled specially;
    /// any other name must resolve to a subdirectory of the current one.
    pub fn change_dir(&mut self, name: &str) -> Result<(), DYNERR> {
        if name == "." {
            return Ok(());
        }
        if name == ".." && self.cwd == Location::Root {
            return Ok(());
        }
        let listing = self.find(name)?.ok_or(Error::FileDoesNotExist)?;
        if !listing.is_dir() {
            return Err(Box::new(Error::NotFile));
        }
        self.cwd = if listing.first_cluster == 0 { Location::Root } else { Location::Chained(listing.first_cluster) };
        Ok(())
    }

    /// Create a subdirectory in the current directory.
    pub fn make_dir(&mut self, name: &str) -> Result<(), DYNERR> {
        if self.find(name)?.is_some() {
            return Err(Box::new(Error::FileExists));
        }
        let cluster = self.fat.allocate(1)?[0];
        self.fat.flush(&mut self.image)?;
        let parent_cluster1 = match self.cwd {
            Location::Root => 0,
            Location::Chained(c) => c,
        };
        directory::init_subdirectory(&mut self.image, &self.boot, &self.fat, cluster, parent_cluster1)?;
        let mut raw = self.raw_cwd()?;
        directory::new_entry(
            &mut raw,
            &mut self.image,
            &self.boot,
            &mut self.fat,
            NewEntry { name, attr: ATTR_DIRECTORY, cluster1: cluster, size: 0, timestamp: None },
        )?;
        self.flush_all(&raw)
    }

    /// Read a file's full contents.
    pub fn read_file(&mut self, name: &str) -> Result<Vec<u8>, DYNERR> {
        let listing = self.find(name)?.ok_or(Error::FileDoesNotExist)?;
        if listing.is_dir() {
            return Err(Box::new(Error::NotFile));
        }
        if listing.size == 0 || listing.first_cluster == 0 {
            return Ok(Vec::new());
        }
        let mut out = Vec::with_capacity(listing.size as usize);
        for cluster in self.fat.chain(listing.first_cluster)? {
            let base = self.boot.cluster_to_sector(cluster);
            for s in 0..self.boot.sectors_per_cluster as u32 {
                out.extend_from_slice(&self.image.read_sector((base + s) as u64)?);
            }
        }
        out.truncate(listing.size as usize);
        Ok(out)
    }

    /// Write a file's contents, replacing it if it already exists.
    /// Overwrite is implemented as delete-then-create: the old chain is
    /// always freed before the new one is allocated, so a write never
    /// reuses a partially-overlapping chain.
    pub fn write_file(&mut self, name: &str, data: &[u8]) -> Result<(), DYNERR> {
        if let Some(existing) = self.find(name)? {
            if existing.is_dir() {
                return Err(Box::new(Error::NotFile));
            }
            self.delete_entry(&existing)?;
        }
        let bytes_per_cluster = self.boot.bytes_per_cluster() as usize;
        let clusters_needed = data.len().div_ceil(bytes_per_cluster.max(1));
        let chain = if clusters_needed > 0 { self.fat.allocate(clusters_needed)? } else { Vec::new() };
        self.fat.flush(&mut self.image)?;
        for (i, &cluster) in chain.iter().enumerate() {
            let base = self.boot.cluster_to_sector(cluster);
            let start = i * bytes_per_cluster;
            let end = (start + bytes_per_cluster).min(data.len());
            let mut buf = data[start..end].to_vec();
            buf.resize(bytes_per_cluster, 0);
            for s in 0..self.boot.sectors_per_cluster as u32 {
                let sec_start = s as usize * self.boot.bytes_per_sector as usize;
                let sec_end = sec_start + self.boot.bytes_per_sector as usize;
                self.image.write_sector((base + s) as u64, &buf[sec_start..sec_end])?;
            }
        }
        let first_cluster = chain.first().copied().unwrap_or(0);
        let mut raw = self.raw_cwd()?;
        directory::new_entry(
            &mut raw,
            &mut self.image,
            &self.boot,
            &mut self.fat,
            NewEntry { name, attr: ATTR_ARCHIVE, cluster1: first_cluster, size: data.len() as u32, timestamp: None },
        )?;
        self.flush_all(&raw)
    }

    fn delete_entry(&mut self, listing: &directory::Listing) -> Result<(), DYNERR> {
        if listing.first_cluster != 0 {
            self.fat.free_chain(listing.first_cluster)?;
        }
        self.fat.flush(&mut self.image)?;
        let mut raw = self.raw_cwd()?;
        directory::remove_entry(&mut raw, listing);
        self.flush_all(&raw)
    }

    /// Delete a file (not a directory) by name.
    pub fn delete_file(&mut self, name: &str) -> Result<(), DYNERR> {
        let listing = self.find(name)?.ok_or(Error::FileDoesNotExist)?;
        if listing.is_dir() {
            return Err(Box::new(Error::NotFile));
        }
        self.delete_entry(&listing)
    }

    /// Rename a file or directory in place.  The destination name must not
    /// already be taken.
    pub fn rename_file(&mut self, old: &str, new: &str) -> Result<(), DYNERR> {
        let listing = self.find(old)?.ok_or(Error::FileDoesNotExist)?;
        if self.find(new)?.is_some() {
            return Err(Box::new(Error::FileExists));
        }
        let mut raw = self.raw_cwd()?;
        directory::remove_entry(&mut raw, &listing);
        directory::new_entry(
            &mut raw,
            &mut self.image,
            &self.boot,
            &mut self.fat,
            NewEntry { name: new, attr: listing.attr, cluster1: listing.first_cluster, size: listing.size, timestamp: listing.modified },
        )?;
        self.flush_all(&raw)
    }

    /// Write a bootloader image starting at offset 0, padded to a whole
    /// sector with zeros.  No BPB re-injection: a caller who cares about the
    /// BPB fields must pre-merge them into `code` before calling this.
    pub fn install_bootloader(&mut self, code: &[u8]) -> Result<(), DYNERR> {
        let sector_len = self.boot.bytes_per_sector as usize;
        let mut sector = code.to_vec();
        if sector.len() > sector_len {
            log::warn!("bootloader code ({} bytes) exceeds one sector ({}), truncating", sector.len(), sector_len);
            sector.truncate(sector_len);
        } else {
            sector.resize(sector_len, 0);
        }
        self.image.write_at(0, &sector)?;
        self.image.flush()
    }

    pub fn free_cluster_count(&self) -> u32 {
        self.fat.free_cluster_count()
    }

    pub fn unmount(mut self) -> Result<(), DYNERR> {
        self.image.flush()
    }
}

/// The registry of named formats usable with `Volume::format`.
pub fn geometries() -> Result<GeometryRegistry, DYNERR> {
    GeometryRegistry::builtin()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn formatted_volume() -> Volume<Cursor<Vec<u8>>> {
        let reg = GeometryRegistry::builtin().unwrap();
        let geometry = reg.get("IBM PC 3.5IN 1.44MB").unwrap().clone();
        let mut image = Image::new(Cursor::new(vec![0u8; geometry.image_size() as usize]), geometry.bytes_per_sector as usize);
        let boot = BootSector::from_geometry(&geometry, 42, "TESTVOL");
        image.write_at(0, &boot.to_bytes()).unwrap();
        let fat = Table::format(&boot);
        fat.flush(&mut image).unwrap();
        Volume { image, boot, fat, cwd: Location::Root }
    }

    #[test]
    fn freshly_formatted_volume_lists_empty() {
        let mut vol = formatted_volume();
        assert!(vol.list_dir().unwrap().is_empty());
    }

    #[test]
    fn write_then_read_short_name_file() {
        let mut vol = formatted_volume();
        vol.write_file("HELLO.TXT", b"hello, world").unwrap();
        let data = vol.read_file("HELLO.TXT").unwrap();
        assert_eq!(data, b"hello, world");
        let listing = vol.list_dir().unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name, "HELLO.TXT");
        assert_eq!(listing[0].size, 12);
    }

    #[test]
    fn write_then_read_long_name_file() {
        let mut vol = formatted_volume();
        let long = "a much longer file name than 8.3 allows.txt";
        vol.write_file(long, b"payload").unwrap();
        assert_eq!(vol.read_file(long).unwrap(), b"payload");
        let listing = vol.list_dir().unwrap();
        assert_eq!(listing[0].name, long);
    }

    #[test]
    fn delete_frees_clusters() {
        let mut vol = formatted_volume();
        let before = vol.free_cluster_count();
        vol.write_file("BIG.BIN", &vec![7u8; 20_000]).unwrap();
        assert!(vol.free_cluster_count() < before);
        vol.delete_file("BIG.BIN").unwrap();
        assert_eq!(vol.free_cluster_count(), before);
    }

    #[test]
    fn write_overwrites_existing_file() {
        let mut vol = formatted_volume();
        vol.write_file("A.TXT", b"first").unwrap();
        vol.write_file("A.TXT", b"second, and longer").unwrap();
        assert_eq!(vol.read_file("A.TXT").unwrap(), b"second, and longer");
        assert_eq!(vol.list_dir().unwrap().len(), 1);
    }

    #[test]
    fn rename_to_existing_name_fails() {
        let mut vol = formatted_volume();
        vol.write_file("A.TXT", b"a").unwrap();
        vol.write_file("B.TXT", b"b").unwrap();
        assert!(vol.rename_file("A.TXT", "B.TXT").is_err());
    }

    #[test]
    fn rename_then_read_under_new_name() {
        let mut vol = formatted_volume();
        vol.write_file("OLD.TXT", b"content").unwrap();
        vol.rename_file("OLD.TXT", "NEW.TXT").unwrap();
        assert!(vol.read_file("OLD.TXT").is_err());
        assert_eq!(vol.read_file("NEW.TXT").unwrap(), b"content");
    }

    #[test]
    fn delete_missing_file_is_an_error() {
        let mut vol = formatted_volume();
        assert!(vol.delete_file("NOPE.TXT").is_err());
    }

    #[test]
    fn make_dir_then_change_into_it_and_back() {
        let mut vol = formatted_volume();
        vol.make_dir("SUBDIR").unwrap();
        vol.change_dir("SUBDIR").unwrap();
        let listing = vol.list_dir().unwrap();
        let names: Vec<&str> = listing.iter().map(|l| l.name.as_str()).collect();
        assert!(names.contains(&"."));
        assert!(names.contains(&".."));
        vol.change_dir("..").unwrap();
        assert!(vol.list_dir().unwrap().iter().any(|l| l.name == "SUBDIR"));
    }

    #[test]
    fn boundary_fill_reports_no_free_clusters() {
        let mut vol = formatted_volume();
        let free = vol.free_cluster_count();
        let bytes_per_cluster = vol.boot.bytes_per_cluster();
        let data = vec![1u8; (free as usize) * bytes_per_cluster as usize];
        vol.write_file("FILLER.BIN", &data).unwrap();
        assert_eq!(vol.free_cluster_count(), 0);
        assert!(vol.write_file("OVERFLOW.BIN", b"one more byte").is_err());
    }
}
