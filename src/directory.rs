//! ### Directory Engine
//!
//! A directory is a flat sequence of 32-byte slots.  Two kinds of slot
//! appear: classic 8.3 short-name entries (`Entry`), and VFAT long-name
//! side-entries (`LfnEntry`) that precede the short-name entry they
//! describe, stored highest-sequence-number first.
//!
//! The root directory lives in a fixed region computed from the BPB and can
//! never grow; every other directory is an ordinary cluster chain and grows
//! by appending a zeroed cluster when it runs out of slots.

use std::collections::BTreeSet;
use std::io::{Read, Seek, Write};

use crate::bpb::BootSector;
use crate::error::Error;
use crate::fat::Table;
use crate::image::Image;
use crate::name;
use crate::DYNERR;

pub const ATTR_READ_ONLY: u8 = 0x01;
pub const ATTR_HIDDEN: u8 = 0x02;
pub const ATTR_SYSTEM: u8 = 0x04;
pub const ATTR_VOLUME_ID: u8 = 0x08;
pub const ATTR_DIRECTORY: u8 = 0x10;
pub const ATTR_ARCHIVE: u8 = 0x20;
pub const ATTR_LFN: u8 = ATTR_READ_ONLY | ATTR_HIDDEN | ATTR_SYSTEM | ATTR_VOLUME_ID;

const FREE_MARK: u8 = 0xe5;
const END_MARK: u8 = 0x00;

/// A decoded 32-byte short-name directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: [u8; 8],
    pub ext: [u8; 3],
    pub attr: u8,
    pub create_tenth: u8,
    pub create_time: [u8; 2],
    pub create_date: [u8; 2],
    pub access_date: [u8; 2],
    pub write_time: [u8; 2],
    pub write_date: [u8; 2],
    pub cluster1: u32,
    pub size: u32,
}

impl Entry {
    pub fn to_bytes(&self) -> [u8; 32] {
        let mut b = [0u8; 32];
        b[0..8].copy_from_slice(&self.name);
        b[8..11].copy_from_slice(&self.ext);
        b[11] = self.attr;
        b[12] = 0;
        b[13] = self.create_tenth;
        b[14..16].copy_from_slice(&self.create_time);
        b[16..18].copy_from_slice(&self.create_date);
        b[18..20].copy_from_slice(&self.access_date);
        b[20..22].copy_from_slice(&((self.cluster1 >> 16) as u16).to_le_bytes());
        b[22..24].copy_from_slice(&self.write_time);
        b[24..26].copy_from_slice(&self.write_date);
        b[26..28].copy_from_slice(&(self.cluster1 as u16).to_le_bytes());
        b[28..32].copy_from_slice(&self.size.to_le_bytes());
        b
    }

    pub fn from_bytes(b: &[u8; 32]) -> Self {
        let cluster_hi = u16::from_le_bytes([b[20], b[21]]) as u32;
        let cluster_lo = u16::from_le_bytes([b[26], b[27]]) as u32;
        Self {
            name: b[0..8].try_into().unwrap(),
            ext: b[8..11].try_into().unwrap(),
            attr: b[11],
            create_tenth: b[13],
            create_time: [b[14], b[15]],
            create_date: [b[16], b[17]],
            access_date: [b[18], b[19]],
            write_time: [b[22], b[23]],
            write_date: [b[24], b[25]],
            cluster1: (cluster_hi << 16) | cluster_lo,
            size: u32::from_le_bytes([b[28], b[29], b[30], b[31]]),
        }
    }

    pub fn is_free(b: &[u8; 32]) -> bool {
        b[0] == FREE_MARK
    }
    pub fn is_end(b: &[u8; 32]) -> bool {
        b[0] == END_MARK
    }
    pub fn is_lfn(b: &[u8; 32]) -> bool {
        b[11] & ATTR_LFN == ATTR_LFN
    }
    pub fn is_volume_label(&self) -> bool {
        self.attr & ATTR_VOLUME_ID != 0 && self.attr & ATTR_DIRECTORY == 0
    }
    pub fn is_dir(&self) -> bool {
        self.attr & ATTR_DIRECTORY != 0
    }
}

/// A decoded VFAT long-name side entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LfnEntry {
    pub order: u8,
    pub checksum: u8,
    pub chars: [u16; 13],
}

impl LfnEntry {
    pub fn is_last(&self) -> bool {
        self.order & 0x40 != 0
    }
    pub fn sequence(&self) -> u8 {
        self.order & 0x1f
    }
    pub fn to_bytes(&self) -> [u8; 32] {
        let mut b = [0u8; 32];
        b[0] = self.order;
        for i in 0..5 {
            b[1 + i * 2..3 + i * 2].copy_from_slice(&self.chars[i].to_le_bytes());
        }
        b[11] = ATTR_LFN;
        b[12] = 0;
        b[13] = self.checksum;
        for i in 0..6 {
            b[14 + i * 2..16 + i * 2].copy_from_slice(&self.chars[5 + i].to_le_bytes());
        }
        b[26..28].copy_from_slice(&0u16.to_le_bytes());
        for i in 0..2 {
            b[28 + i * 2..30 + i * 2].copy_from_slice(&self.chars[11 + i].to_le_bytes());
        }
        b
    }

    pub fn from_bytes(b: &[u8; 32]) -> Self {
        let mut chars = [0u16; 13];
        for i in 0..5 {
            chars[i] = u16::from_le_bytes([b[1 + i * 2], b[2 + i * 2]]);
        }
        for i in 0..6 {
            chars[5 + i] = u16::from_le_bytes([b[14 + i * 2], b[15 + i * 2]]);
        }
        for i in 0..2 {
            chars[11 + i] = u16::from_le_bytes([b[28 + i * 2], b[29 + i * 2]]);
        }
        Self { order: b[0], checksum: b[13], chars }
    }
}

/// Where a directory's slots live on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Root,
    Chained(u32),
}

/// The flat, in-memory slot buffer for one directory.
pub struct RawDirectory {
    pub location: Location,
    slots: Vec<[u8; 32]>,
}

impl RawDirectory {
    pub fn load<T: Read + Write + Seek>(
        img: &mut Image<T>,
        boot: &BootSector,
        fat: &Table,
        location: Location,
    ) -> Result<Self, DYNERR> {
        let mut slots = Vec::new();
        match location {
            Location::Root => {
                let start = boot.root_dir_start_sector();
                for s in 0..boot.root_dir_sectors() {
                    let data = img.read_sector((start + s) as u64)?;
                    for chunk in data.chunks(32) {
                        slots.push(chunk.try_into().unwrap());
                    }
                }
            }
            Location::Chained(first) => {
                for cluster in fat.chain(first)? {
                    let base = boot.cluster_to_sector(cluster);
                    for s in 0..boot.sectors_per_cluster as u32 {
                        let data = img.read_sector((base + s) as u64)?;
                        for chunk in data.chunks(32) {
                            slots.push(chunk.try_into().unwrap());
                        }
                    }
                }
            }
        }
        Ok(Self { location, slots })
    }

    pub fn flush<T: Read + Write + Seek>(&self, img: &mut Image<T>, boot: &BootSector, fat: &Table) -> Result<(), DYNERR> {
        let per_sector = boot.bytes_per_sector as usize / 32;
        let sectors: Vec<u32> = match self.location {
            Location::Root => {
                let start = boot.root_dir_start_sector();
                (0..boot.root_dir_sectors()).map(|s| start + s).collect()
            }
            Location::Chained(first) => {
                let mut out = Vec::new();
                for cluster in fat.chain(first)? {
                    let base = boot.cluster_to_sector(cluster);
                    for s in 0..boot.sectors_per_cluster as u32 {
                        out.push(base + s);
                    }
                }
                out
            }
        };
        for (i, &sector) in sectors.iter().enumerate() {
            let mut data = Vec::with_capacity(boot.bytes_per_sector as usize);
            for slot in &self.slots[i * per_sector..(i + 1) * per_sector] {
                data.extend_from_slice(slot);
            }
            img.write_sector(sector as u64, &data)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
    pub fn get(&self, i: usize) -> [u8; 32] {
        self.slots[i]
    }
    pub fn set(&mut self, i: usize, b: [u8; 32]) {
        self.slots[i] = b;
    }

    /// Append one zeroed cluster's worth of slots.  Only valid for `Chained`
    /// directories; the root directory has a fixed size.
    pub fn expand<T: Read + Write + Seek>(&mut self, img: &mut Image<T>, boot: &BootSector, fat: &mut Table) -> Result<(), DYNERR> {
        let Location::Chained(first) = self.location else {
            log::warn!("attempted to expand the root directory");
            return Err(Box::new(Error::NoFreeEntries));
        };
        let chain = fat.chain(first)?;
        let last = *chain.last().unwrap();
        let new_cluster = fat.allocate(1)?[0];
        fat.set(last, new_cluster);
        fat.flush(img)?;
        let base = boot.cluster_to_sector(new_cluster);
        let zero_sector = vec![0u8; boot.bytes_per_sector as usize];
        for s in 0..boot.sectors_per_cluster as u32 {
            img.write_sector((base + s) as u64, &zero_sector)?;
        }
        for _ in 0..(boot.bytes_per_cluster() as usize / 32) {
            self.slots.push([0u8; 32]);
        }
        Ok(())
    }
}

/// One resolved directory listing row: a short name, possibly long-named,
/// plus the slot indices it occupies so callers can remove or edit it.
#[derive(Debug, Clone)]
pub struct Listing {
    pub name: String,
    pub short_name: String,
    pub attr: u8,
    pub size: u32,
    pub first_cluster: u32,
    pub sfn_index: usize,
    pub lfn_indices: Vec<usize>,
    pub created: Option<chrono::NaiveDateTime>,
    pub modified: Option<chrono::NaiveDateTime>,
}

impl Listing {
    pub fn is_dir(&self) -> bool {
        self.attr & ATTR_DIRECTORY != 0
    }
}

enum ScanState {
    SeekNext,
    InLfnRun { chunks: Vec<[u16; 13]>, indices: Vec<usize>, checksum: u8 },
}

/// Walk every slot, reassembling short-name entries with any preceding
/// long-name run.  A run whose checksum does not match the short name it
/// precedes is discarded and the short name is used verbatim; this is the
/// only recovery path for a directory corrupted by a non-VFAT-aware tool.
pub fn list(raw: &RawDirectory) -> Vec<Listing> {
    let mut out = Vec::new();
    let mut state = ScanState::SeekNext;
    for idx in 0..raw.len() {
        let bytes = raw.get(idx);
        if Entry::is_end(&bytes) {
            break;
        }
        if Entry::is_free(&bytes) {
            state = ScanState::SeekNext;
            continue;
        }
        if Entry::is_lfn(&bytes) {
            let lfn = LfnEntry::from_bytes(&bytes);
            state = match state {
                ScanState::SeekNext => ScanState::InLfnRun { chunks: vec![lfn.chars], indices: vec![idx], checksum: lfn.checksum },
                ScanState::InLfnRun { mut chunks, mut indices, checksum } => {
                    if lfn.checksum == checksum {
                        chunks.push(lfn.chars);
                        indices.push(idx);
                        ScanState::InLfnRun { chunks, indices, checksum }
                    } else {
                        ScanState::InLfnRun { chunks: vec![lfn.chars], indices: vec![idx], checksum: lfn.checksum }
                    }
                }
            };
            continue;
        }
        // EMIT_SFN: bytes is a short-name entry, with `state` holding any run that precedes it.
        let entry = Entry::from_bytes(&bytes);
        if entry.is_volume_label() {
            state = ScanState::SeekNext;
            continue;
        }
        let short_name = name::decode_sfn(entry.name, entry.ext);
        let (display_name, lfn_indices) = match state {
            ScanState::InLfnRun { chunks, indices, checksum } if checksum == name::sfn_checksum(entry.name, entry.ext) => {
                (name::lfn_join(&chunks), indices)
            }
            ScanState::InLfnRun { .. } => {
                log::warn!("discarding LFN run with checksum mismatch before '{}'", short_name);
                (short_name.clone(), Vec::new())
            }
            ScanState::SeekNext => (short_name.clone(), Vec::new()),
        };
        out.push(Listing {
            name: display_name,
            short_name,
            attr: entry.attr,
            size: entry.size,
            first_cluster: entry.cluster1,
            sfn_index: idx,
            lfn_indices,
            created: name::unpack_date(entry.create_date).map(|d| {
                chrono::NaiveDateTime::new(d, name::unpack_time(entry.create_time, entry.create_tenth).unwrap_or_default())
            }),
            modified: name::unpack_date(entry.write_date).map(|d| {
                chrono::NaiveDateTime::new(d, name::unpack_time(entry.write_time, 0).unwrap_or_default())
            }),
        });
        state = ScanState::SeekNext;
    }
    out
}

fn existing_short_names(raw: &RawDirectory) -> BTreeSet<String> {
    list(raw).into_iter().map(|l| l.short_name).collect()
}

/// Find `count` consecutive free-or-end slots, expanding a chained directory
/// if necessary.  Returns the starting index.
pub fn find_free<T: Read + Write + Seek>(
    raw: &mut RawDirectory,
    img: &mut Image<T>,
    boot: &BootSector,
    fat: &mut Table,
    count: usize,
) -> Result<usize, DYNERR> {
    loop {
        let mut run_start = None;
        let mut run_len = 0;
        for idx in 0..raw.len() {
            let bytes = raw.get(idx);
            if Entry::is_free(&bytes) || Entry::is_end(&bytes) {
                if run_start.is_none() {
                    run_start = Some(idx);
                }
                run_len += 1;
                if run_len == count {
                    return Ok(run_start.unwrap());
                }
                if Entry::is_end(&bytes) {
                    // Everything past the end marker is unused; it is safe to
                    // keep counting past it as long as we stay in-bounds.
                    continue;
                }
            } else {
                run_start = None;
                run_len = 0;
            }
        }
        match raw.location {
            Location::Root => {
                log::warn!("root directory has no room for {} entries", count);
                return Err(Box::new(Error::NoFreeEntries));
            }
            Location::Chained(_) => raw.expand(img, boot, fat)?,
        }
    }
}

/// Parameters for writing a new directory entry.
pub struct NewEntry<'a> {
    pub name: &'a str,
    pub attr: u8,
    pub cluster1: u32,
    pub size: u32,
    pub timestamp: Option<chrono::NaiveDateTime>,
}

/// Write a new entry (plus any LFN run it needs) into the first available
/// run of slots, expanding the directory if it is chained.  Returns the
/// index of the short-name slot.
pub fn new_entry<T: Read + Write + Seek>(
    raw: &mut RawDirectory,
    img: &mut Image<T>,
    boot: &BootSector,
    fat: &mut Table,
    params: NewEntry,
) -> Result<usize, DYNERR> {
    if params.name != "." && params.name != ".." {
        if params.name.is_empty() || params.name.len() > 255 {
            return Err(Box::new(Error::InvalidName));
        }
    }
    let canonical_sfn = params.name == "." || params.name == ".." || (name::is_valid_sfn(params.name) && params.name == params.name.to_uppercase());
    let existing = existing_short_names(raw);
    let (sfn_name, sfn_ext) = if canonical_sfn {
        name::encode_sfn(params.name)
    } else {
        name::derive_sfn_from_lfn(params.name, &existing)
    };
    let lfn_chunks = if canonical_sfn { Vec::new() } else { name::lfn_chunks(params.name) };
    let total = lfn_chunks.len() + 1;
    let start = find_free(raw, img, boot, fat, total)?;
    let checksum = name::sfn_checksum(sfn_name, sfn_ext);
    let n = lfn_chunks.len();
    for (i, chunk) in lfn_chunks.iter().enumerate() {
        let sequence = (n - i) as u8;
        let order = if i == 0 { sequence | 0x40 } else { sequence };
        let lfn = LfnEntry { order, checksum, chars: *chunk };
        raw.set(start + i, lfn.to_bytes());
    }
    let date = name::pack_date(params.timestamp);
    let time = name::pack_time(params.timestamp);
    let tenth = name::pack_tenths(params.timestamp);
    let entry = Entry {
        name: sfn_name,
        ext: sfn_ext,
        attr: params.attr,
        create_tenth: tenth,
        create_time: time,
        create_date: date,
        access_date: date,
        write_time: time,
        write_date: date,
        cluster1: params.cluster1,
        size: params.size,
    };
    let sfn_index = start + n;
    raw.set(sfn_index, entry.to_bytes());
    Ok(sfn_index)
}

/// Free the short-name slot and its LFN run by marking them `0xe5` and
/// zeroing the remainder of each slot.
pub fn remove_entry(raw: &mut RawDirectory, listing: &Listing) {
    let mut blank = [0u8; 32];
    blank[0] = FREE_MARK;
    for &idx in &listing.lfn_indices {
        raw.set(idx, blank);
    }
    raw.set(listing.sfn_index, blank);
}

/// Mutate the decoded short-name entry at `sfn_index` in place.
pub fn edit_entry(raw: &mut RawDirectory, sfn_index: usize, f: impl FnOnce(&mut Entry)) {
    let mut entry = Entry::from_bytes(&raw.get(sfn_index));
    f(&mut entry);
    raw.set(sfn_index, entry.to_bytes());
}

/// Initialize a freshly allocated subdirectory cluster with `.` and `..`.
pub fn init_subdirectory<T: Read + Write + Seek>(
    img: &mut Image<T>,
    boot: &BootSector,
    fat: &Table,
    cluster: u32,
    parent_cluster1: u32,
) -> Result<(), DYNERR> {
    let mut raw = RawDirectory::load(img, boot, fat, Location::Chained(cluster))?;
    let now = Some(chrono::Local::now().naive_local());
    let (dot_name, dot_ext) = name::encode_sfn(".");
    raw.set(0, Entry { name: dot_name, ext: dot_ext, attr: ATTR_DIRECTORY, create_tenth: name::pack_tenths(now), create_time: name::pack_time(now), create_date: name::pack_date(now), access_date: name::pack_date(now), write_time: name::pack_time(now), write_date: name::pack_date(now), cluster1: cluster, size: 0 }.to_bytes());
    let (dotdot_name, dotdot_ext) = name::encode_sfn("..");
    raw.set(1, Entry { name: dotdot_name, ext: dotdot_ext, attr: ATTR_DIRECTORY, create_tenth: name::pack_tenths(now), create_time: name::pack_time(now), create_date: name::pack_date(now), access_date: name::pack_date(now), write_time: name::pack_time(now), write_date: name::pack_date(now), cluster1: parent_cluster1, size: 0 }.to_bytes());
    raw.flush(img, boot, fat)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, attr: u8, cluster1: u32, size: u32) -> [u8; 32] {
        let (n, e) = name::encode_sfn(name);
        Entry { name: n, ext: e, attr, create_tenth: 0, create_time: [0, 0], create_date: [0x21, 0x00], access_date: [0, 0], write_time: [0, 0], write_date: [0x21, 0x00], cluster1, size }.to_bytes()
    }

    #[test]
    fn sfn_entry_round_trips() {
        let bytes = entry("README.TXT", ATTR_ARCHIVE, 5, 1234);
        let back = Entry::from_bytes(&bytes);
        assert_eq!(name::decode_sfn(back.name, back.ext), "README.TXT");
        assert_eq!(back.cluster1, 5);
        assert_eq!(back.size, 1234);
    }

    #[test]
    fn lfn_entry_round_trips() {
        let chunks = name::lfn_chunks("a long name.txt");
        let checksum = 0x42;
        for (i, chunk) in chunks.iter().enumerate() {
            let seq = (chunks.len() - i) as u8;
            let order = if i == 0 { seq | 0x40 } else { seq };
            let lfn = LfnEntry { order, checksum, chars: *chunk };
            let back = LfnEntry::from_bytes(&lfn.to_bytes());
            assert_eq!(back, lfn);
        }
    }

    #[test]
    fn list_joins_lfn_run_with_matching_checksum() {
        let bytes = entry("LONGNA~1.TXT", ATTR_ARCHIVE, 0, 0);
        let short = Entry::from_bytes(&bytes);
        let checksum = name::sfn_checksum(short.name, short.ext);
        let chunks = name::lfn_chunks("a really long name.txt");
        let mut slots = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let seq = (chunks.len() - i) as u8;
            let order = if i == 0 { seq | 0x40 } else { seq };
            slots.push(LfnEntry { order, checksum, chars: *chunk }.to_bytes());
        }
        slots.push(bytes);
        let raw = RawDirectory { location: Location::Root, slots };
        let listing = list(&raw);
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name, "a really long name.txt");
        assert_eq!(listing[0].short_name, "LONGNA~1.TXT");
    }

    #[test]
    fn list_falls_back_to_short_name_on_checksum_mismatch() {
        let bytes = entry("LONGNA~1.TXT", ATTR_ARCHIVE, 0, 0);
        let chunks = name::lfn_chunks("mismatched.txt");
        let mut slots = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let seq = (chunks.len() - i) as u8;
            let order = if i == 0 { seq | 0x40 } else { seq };
            slots.push(LfnEntry { order, checksum: 0xff, chars: *chunk }.to_bytes());
        }
        slots.push(bytes);
        let raw = RawDirectory { location: Location::Root, slots };
        let listing = list(&raw);
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name, "LONGNA~1.TXT");
    }

    #[test]
    fn list_stops_at_end_marker() {
        let mut slots = vec![entry("A.TXT", ATTR_ARCHIVE, 0, 0)];
        slots.push([0u8; 32]);
        slots.push(entry("B.TXT", ATTR_ARCHIVE, 0, 0));
        let raw = RawDirectory { location: Location::Root, slots };
        let listing = list(&raw);
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].short_name, "A.TXT");
    }
}
