//! ### FAT12 Codec
//!
//! Packed 12-bit cluster arithmetic: two cluster entries share three bytes,
//! so reading or writing cluster `n` touches a byte pair at offset
//! `n + n/2` and keeps the nibble belonging to its odd/even neighbor intact.
//!
//! The table is kept fully buffered in memory (typical floppy FATs are a few
//! kilobytes) and every mutation is mirrored out to all `fat_count` on-disk
//! copies, never just the first.

use crate::error::Error;
use crate::image::Image;
use crate::DYNERR;
use std::io::{Read, Seek, Write};

pub const FIRST_DATA_CLUSTER: u32 = 2;
const EOC_MIN: u32 = 0xff8;
const EOC_SET: u32 = 0xfff;
const BAD_CLUSTER: u32 = 0xff7;
const FREE_CLUSTER: u32 = 0x000;

/// Value of cluster `n` packed into a 12-bit-per-entry buffer.
pub fn get_cluster(n: u32, buf: &[u8]) -> u32 {
    let n = n as usize;
    let offset = n + n / 2;
    let val16 = u16::from_le_bytes([buf[offset], buf[offset + 1]]);
    if n & 1 == 1 {
        (val16 >> 4) as u32
    } else {
        (val16 & 0x0fff) as u32
    }
}

/// Set the value of cluster `n`, preserving the neighboring nibble.
pub fn set_cluster(n: u32, val: u32, buf: &mut [u8]) {
    let n = n as usize;
    let offset = n + n / 2;
    if n & 1 == 1 {
        let val12 = (val as u16) << 4;
        let low4 = 0x000f & u16::from_le_bytes([buf[offset], buf[offset + 1]]);
        let packed = u16::to_le_bytes(val12 | low4);
        buf[offset] = packed[0];
        buf[offset + 1] = packed[1];
    } else {
        let val12 = (val as u16) & 0x0fff;
        let high4 = 0xf000 & u16::from_le_bytes([buf[offset], buf[offset + 1]]);
        let packed = u16::to_le_bytes(val12 | high4);
        buf[offset] = packed[0];
        buf[offset + 1] = packed[1];
    }
}

pub fn is_free(n: u32, buf: &[u8]) -> bool {
    get_cluster(n, buf) == FREE_CLUSTER
}

pub fn is_last(n: u32, buf: &[u8]) -> bool {
    get_cluster(n, buf) >= EOC_MIN
}

pub fn is_damaged(n: u32, buf: &[u8]) -> bool {
    get_cluster(n, buf) == BAD_CLUSTER
}

/// An in-memory FAT buffer, mirrored out to every on-disk copy on flush.
pub struct Table {
    buf: Vec<u8>,
    fat_count: u32,
    bytes_per_fat: u32,
    first_fat_sector: u32,
    bytes_per_sector: u32,
    cluster_count: u32,
}

impl Table {
    /// Load copy 0 of the FAT into memory.
    pub fn load<T: Read + Write + Seek>(
        img: &mut Image<T>,
        boot: &crate::bpb::BootSector,
    ) -> Result<Self, DYNERR> {
        let bytes_per_fat = boot.sectors_per_fat as u32 * boot.bytes_per_sector as u32;
        let first_fat_sector = boot.fat_start_sector(0);
        let buf = img.read_at(
            first_fat_sector as u64 * boot.bytes_per_sector as u64,
            bytes_per_fat as usize,
        )?;
        Ok(Self {
            buf,
            fat_count: boot.fat_count as u32,
            bytes_per_fat,
            first_fat_sector,
            bytes_per_sector: boot.bytes_per_sector as u32,
            cluster_count: boot.cluster_count(),
        })
    }

    /// Build a freshly formatted FAT: cluster 0 carries the media id in its
    /// low byte, cluster 1 is marked end-of-chain, everything else is free.
    pub fn format(boot: &crate::bpb::BootSector) -> Self {
        let bytes_per_fat = boot.sectors_per_fat as u32 * boot.bytes_per_sector as u32;
        let mut buf = vec![0u8; bytes_per_fat as usize];
        set_cluster(0, 0xf00 | boot.media_id as u32, &mut buf);
        set_cluster(1, EOC_SET, &mut buf);
        Self {
            buf,
            fat_count: boot.fat_count as u32,
            bytes_per_fat,
            first_fat_sector: boot.fat_start_sector(0),
            bytes_per_sector: boot.bytes_per_sector as u32,
            cluster_count: boot.cluster_count(),
        }
    }

    pub fn get(&self, cluster: u32) -> u32 {
        get_cluster(cluster, &self.buf)
    }

    pub fn set(&mut self, cluster: u32, value: u32) {
        set_cluster(cluster, value, &mut self.buf);
    }

    pub fn is_free(&self, cluster: u32) -> bool {
        is_free(cluster, &self.buf)
    }

    pub fn is_last(&self, cluster: u32) -> bool {
        is_last(cluster, &self.buf)
    }

    pub fn mark_last(&mut self, cluster: u32) {
        self.set(cluster, EOC_SET);
    }

    pub fn deallocate(&mut self, cluster: u32) {
        self.set(cluster, FREE_CLUSTER);
    }

    /// Walk a cluster chain starting at `first`, returning every cluster
    /// number visited in order.  Stops at the first end-of-chain marker.
    pub fn chain(&self, first: u32) -> Result<Vec<u32>, DYNERR> {
        let mut out = Vec::new();
        let mut cur = first;
        let mut steps = 0u32;
        loop {
            if cur < FIRST_DATA_CLUSTER || cur >= self.cluster_count + FIRST_DATA_CLUSTER {
                log::error!("cluster chain left the data region at {}", cur);
                return Err(Box::new(Error::CorruptFilesystem));
            }
            out.push(cur);
            if self.is_last(cur) {
                return Ok(out);
            }
            if is_damaged(cur, &self.buf) {
                log::error!("cluster chain hit a damaged cluster at {}", cur);
                return Err(Box::new(Error::CorruptFilesystem));
            }
            cur = self.get(cur);
            steps += 1;
            if steps > self.cluster_count + 1 {
                log::error!("cluster chain exceeded cluster count, probable cycle");
                return Err(Box::new(Error::CorruptFilesystem));
            }
        }
    }

    /// Allocate `count` free clusters, chain them together, and mark the
    /// last one end-of-chain.  Returns the clusters in chain order.
    pub fn allocate(&mut self, count: usize) -> Result<Vec<u32>, DYNERR> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut free = Vec::with_capacity(count);
        for n in FIRST_DATA_CLUSTER..self.cluster_count + FIRST_DATA_CLUSTER {
            if self.is_free(n) {
                free.push(n);
                if free.len() == count {
                    break;
                }
            }
        }
        if free.len() < count {
            log::warn!("requested {} clusters, only {} free", count, free.len());
            return Err(Box::new(Error::NoFreeClusters));
        }
        for pair in free.windows(2) {
            self.set(pair[0], pair[1]);
        }
        self.mark_last(*free.last().unwrap());
        Ok(free)
    }

    /// Free every cluster in a chain, in one pass.
    pub fn free_chain(&mut self, first: u32) -> Result<(), DYNERR> {
        let chain = self.chain(first)?;
        for cluster in chain {
            self.deallocate(cluster);
        }
        Ok(())
    }

    pub fn free_cluster_count(&self) -> u32 {
        (FIRST_DATA_CLUSTER..self.cluster_count + FIRST_DATA_CLUSTER)
            .filter(|&n| self.is_free(n))
            .count() as u32
    }

    /// Write the buffered table out to every on-disk FAT copy.
    pub fn flush<T: Read + Write + Seek>(&self, img: &mut Image<T>) -> Result<(), DYNERR> {
        for copy in 0..self.fat_count {
            let sector = self.first_fat_sector + copy * (self.bytes_per_fat / self.bytes_per_sector);
            img.write_at(sector as u64 * self.bytes_per_sector as u64, &self.buf)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_and_unpacks_even_and_odd_entries() {
        let mut buf = vec![0u8; 9];
        set_cluster(2, 0x345, &mut buf);
        set_cluster(3, 0x678, &mut buf);
        set_cluster(4, 0xabc, &mut buf);
        assert_eq!(get_cluster(2, &buf), 0x345);
        assert_eq!(get_cluster(3, &buf), 0x678);
        assert_eq!(get_cluster(4, &buf), 0xabc);
    }

    #[test]
    fn setting_one_entry_does_not_disturb_its_neighbor() {
        let mut buf = vec![0u8; 6];
        set_cluster(0, 0xfff, &mut buf);
        set_cluster(1, 0x000, &mut buf);
        assert_eq!(get_cluster(0, &buf), 0xfff);
        assert_eq!(get_cluster(1, &buf), 0x000);
        set_cluster(1, 0xabc, &mut buf);
        assert_eq!(get_cluster(0, &buf), 0xfff);
        assert_eq!(get_cluster(1, &buf), 0xabc);
    }

    fn test_boot() -> crate::bpb::BootSector {
        let reg = crate::geometry::GeometryRegistry::builtin().unwrap();
        let geometry = reg.get("IBM PC 3.5IN 1.44MB").unwrap();
        crate::bpb::BootSector::from_geometry(geometry, 0, "NO NAME")
    }

    #[test]
    fn freshly_formatted_table_reserves_first_two_clusters() {
        let boot = test_boot();
        let table = Table::format(&boot);
        assert!(!table.is_free(0));
        assert!(table.is_last(1));
        assert!(table.is_free(2));
    }

    #[test]
    fn allocate_then_free_round_trips_free_count() {
        let boot = test_boot();
        let mut table = Table::format(&boot);
        let before = table.free_cluster_count();
        let chain = table.allocate(5).unwrap();
        assert_eq!(chain.len(), 5);
        assert!(table.is_last(*chain.last().unwrap()));
        assert_eq!(table.free_cluster_count(), before - 5);
        table.free_chain(chain[0]).unwrap();
        assert_eq!(table.free_cluster_count(), before);
    }

    #[test]
    fn allocate_more_than_available_fails() {
        let boot = test_boot();
        let mut table = Table::format(&boot);
        let total = table.free_cluster_count();
        assert!(table.allocate(total as usize + 1).is_err());
    }

    #[test]
    fn chain_detects_cycle() {
        let boot = test_boot();
        let mut table = Table::format(&boot);
        table.set(2, 3);
        table.set(3, 2); // cycle, never reaches EOC
        assert!(table.chain(2).is_err());
    }
}
