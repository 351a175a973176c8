//! ### BPB/EBPB Codec
//!
//! Packs and unpacks the reserved-sector header of a FAT12 volume: the jump
//! instruction, OEM label, BIOS Parameter Block, Extended BPB tail, and the
//! boot-sector signature.  FAT32's extended BPB fields are out of scope; this
//! crate only ever emits and parses the FAT12 layout.
//!
//! Reference: Microsoft Hardware White Paper, "FAT: General Overview of
//! On-Disk Format," Dec. 6, 2000.

use crate::error::Error;
use crate::geometry::Geometry;
use crate::DYNERR;

const JMP_BOOT: [u8; 3] = [0xeb, 0x3c, 0x90];
const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xaa];
const EBPB_SIGNATURE: u8 = 0x29;
const HEADER_LEN: usize = 62;

/// The BPB plus Extended BPB tail, decoded into native integers.  Everything
/// after the tail (remainder bytes and the trailing `0x55 0xaa` signature) is
/// preserved verbatim across a read-modify-write cycle but not interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootSector {
    pub oem_label: [u8; 8],
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub fat_count: u8,
    pub root_dir_entries: u16,
    pub total_sectors: u32,
    pub media_id: u8,
    pub sectors_per_fat: u16,
    pub sectors_per_track: u16,
    pub sides: u16,
    pub hidden_sectors: u32,
    pub drive_number: u8,
    pub nt_flag: u8,
    pub signature: u8,
    pub volume_id: u32,
    pub volume_label: [u8; 11],
    pub fs_identifier: [u8; 8],
    remainder: Vec<u8>,
}

fn pad(s: &str, len: usize) -> Vec<u8> {
    let mut v = s.as_bytes().to_vec();
    v.resize(len, b' ');
    v.truncate(len);
    v
}

impl BootSector {
    /// Build a fresh boot sector from a named geometry.  `volume_id` and
    /// `volume_label` are supplied separately since they are assigned at
    /// format time, not drawn from the static geometry table.
    pub fn from_geometry(geometry: &Geometry, volume_id: u32, volume_label: &str) -> Self {
        let mut oem_label = [0u8; 8];
        oem_label.copy_from_slice(&pad(&geometry.oem_label, 8));
        let mut fs_identifier = [0u8; 8];
        fs_identifier.copy_from_slice(&pad(&geometry.fs_identifier, 8));
        let mut vol_lab = [0u8; 11];
        vol_lab.copy_from_slice(&pad(volume_label, 11));
        Self {
            oem_label,
            bytes_per_sector: geometry.bytes_per_sector,
            sectors_per_cluster: geometry.sectors_per_cluster,
            reserved_sectors: geometry.reserved_sectors,
            fat_count: geometry.fat_count,
            root_dir_entries: geometry.root_dir_entries,
            total_sectors: if geometry.logical_sectors != 0 {
                geometry.logical_sectors as u32
            } else {
                geometry.lba_sectors
            },
            media_id: geometry.media_id,
            sectors_per_fat: geometry.sectors_per_fat,
            sectors_per_track: geometry.sectors_per_track,
            sides: geometry.sides,
            hidden_sectors: geometry.hidden_sectors,
            drive_number: geometry.drive_number,
            nt_flag: geometry.nt_flag,
            signature: EBPB_SIGNATURE,
            volume_id,
            volume_label: vol_lab,
            fs_identifier,
            remainder: vec![0u8; geometry.bytes_per_sector as usize - HEADER_LEN - 2],
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.bytes_per_sector as usize);
        out.extend_from_slice(&JMP_BOOT);
        out.extend_from_slice(&self.oem_label);
        out.extend_from_slice(&self.bytes_per_sector.to_le_bytes());
        out.push(self.sectors_per_cluster);
        out.extend_from_slice(&self.reserved_sectors.to_le_bytes());
        out.push(self.fat_count);
        out.extend_from_slice(&self.root_dir_entries.to_le_bytes());
        if self.total_sectors <= u16::MAX as u32 {
            out.extend_from_slice(&(self.total_sectors as u16).to_le_bytes());
        } else {
            out.extend_from_slice(&0u16.to_le_bytes());
        }
        out.push(self.media_id);
        out.extend_from_slice(&self.sectors_per_fat.to_le_bytes());
        out.extend_from_slice(&self.sectors_per_track.to_le_bytes());
        out.extend_from_slice(&self.sides.to_le_bytes());
        out.extend_from_slice(&self.hidden_sectors.to_le_bytes());
        if self.total_sectors > u16::MAX as u32 {
            out.extend_from_slice(&self.total_sectors.to_le_bytes());
        } else {
            out.extend_from_slice(&0u32.to_le_bytes());
        }
        out.push(self.drive_number);
        out.push(self.nt_flag);
        out.push(self.signature);
        out.extend_from_slice(&self.volume_id.to_le_bytes());
        out.extend_from_slice(&self.volume_label);
        out.extend_from_slice(&self.fs_identifier);
        out.extend_from_slice(&self.remainder);
        let used = out.len();
        out.resize(self.bytes_per_sector as usize, 0);
        let sig_at = self.bytes_per_sector as usize - 2;
        if used <= sig_at {
            out[sig_at] = BOOT_SIGNATURE[0];
            out[sig_at + 1] = BOOT_SIGNATURE[1];
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DYNERR> {
        if bytes.len() < 512 {
            log::error!("boot sector shorter than 512 bytes");
            return Err(Box::new(Error::CorruptFilesystem));
        }
        let bytes_per_sector = u16::from_le_bytes([bytes[11], bytes[12]]);
        if bytes_per_sector as usize > bytes.len() || bytes_per_sector < 512 {
            log::error!("implausible bytes_per_sector {}", bytes_per_sector);
            return Err(Box::new(Error::CorruptFilesystem));
        }
        let sig_at = bytes_per_sector as usize - 2;
        if [bytes[sig_at], bytes[sig_at + 1]] != BOOT_SIGNATURE {
            log::error!("boot sector signature mismatch");
            return Err(Box::new(Error::CorruptFilesystem));
        }
        let tot_sec_16 = u16::from_le_bytes([bytes[19], bytes[20]]);
        let tot_sec_32 = u32::from_le_bytes([bytes[32], bytes[33], bytes[34], bytes[35]]);
        let total_sectors = if tot_sec_16 != 0 { tot_sec_16 as u32 } else { tot_sec_32 };
        let mut oem_label = [0u8; 8];
        oem_label.copy_from_slice(&bytes[3..11]);
        let mut volume_label = [0u8; 11];
        volume_label.copy_from_slice(&bytes[43..54]);
        let mut fs_identifier = [0u8; 8];
        fs_identifier.copy_from_slice(&bytes[54..62]);
        let sectors_per_cluster = bytes[13];
        if sectors_per_cluster == 0 {
            log::error!("sectors_per_cluster is 0");
            return Err(Box::new(Error::CorruptFilesystem));
        }
        let fat_count = bytes[16];
        if fat_count == 0 {
            log::error!("fat_count is 0");
            return Err(Box::new(Error::CorruptFilesystem));
        }
        let boot = Self {
            oem_label,
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sectors: u16::from_le_bytes([bytes[14], bytes[15]]),
            fat_count,
            root_dir_entries: u16::from_le_bytes([bytes[17], bytes[18]]),
            total_sectors,
            media_id: bytes[21],
            sectors_per_fat: u16::from_le_bytes([bytes[22], bytes[23]]),
            sectors_per_track: u16::from_le_bytes([bytes[24], bytes[25]]),
            sides: u16::from_le_bytes([bytes[26], bytes[27]]),
            hidden_sectors: u32::from_le_bytes([bytes[28], bytes[29], bytes[30], bytes[31]]),
            drive_number: bytes[36],
            nt_flag: bytes[37],
            signature: bytes[38],
            volume_id: u32::from_le_bytes([bytes[39], bytes[40], bytes[41], bytes[42]]),
            volume_label,
            fs_identifier,
            remainder: bytes[HEADER_LEN..sig_at].to_vec(),
        };
        Ok(boot)
    }

    /// Sectors occupied by the (single) root directory region.
    pub fn root_dir_sectors(&self) -> u32 {
        let bytes = self.bytes_per_sector as u32;
        let entries = self.root_dir_entries as u32;
        (entries * 32 + bytes - 1) / bytes
    }

    /// First sector (0-based LBA) of the root directory region.
    pub fn root_dir_start_sector(&self) -> u32 {
        self.reserved_sectors as u32 + self.fat_count as u32 * self.sectors_per_fat as u32
    }

    /// First sector of the data (cluster) region.
    pub fn first_data_sector(&self) -> u32 {
        self.root_dir_start_sector() + self.root_dir_sectors()
    }

    /// Absolute sector of the start of cluster `n` (clusters are numbered from 2).
    pub fn cluster_to_sector(&self, cluster: u32) -> u32 {
        self.first_data_sector() + (cluster - 2) * self.sectors_per_cluster as u32
    }

    /// Total usable clusters in the data region.
    pub fn cluster_count(&self) -> u32 {
        let data_sectors = self.total_sectors - self.first_data_sector();
        data_sectors / self.sectors_per_cluster as u32
    }

    pub fn bytes_per_cluster(&self) -> u32 {
        self.bytes_per_sector as u32 * self.sectors_per_cluster as u32
    }

    /// First sector of FAT copy `index` (0-based).
    pub fn fat_start_sector(&self, index: u32) -> u32 {
        self.reserved_sectors as u32 + index * self.sectors_per_fat as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::GeometryRegistry;

    #[test]
    fn round_trips_through_bytes() {
        let reg = GeometryRegistry::builtin().unwrap();
        let geometry = reg.get("IBM PC 3.5IN 1.44MB").unwrap();
        let boot = BootSector::from_geometry(geometry, 0x1234_5678, "TESTDISK");
        let bytes = boot.to_bytes();
        assert_eq!(bytes.len(), 512);
        assert_eq!(bytes[510], 0x55);
        assert_eq!(bytes[511], 0xaa);
        let back = BootSector::from_bytes(&bytes).unwrap();
        assert_eq!(back, boot);
    }

    #[test]
    fn derives_layout_offsets() {
        let reg = GeometryRegistry::builtin().unwrap();
        let geometry = reg.get("IBM PC 3.5IN 1.44MB").unwrap();
        let boot = BootSector::from_geometry(geometry, 0, "NO NAME");
        assert_eq!(boot.root_dir_sectors(), 14);
        assert_eq!(boot.root_dir_start_sector(), 1 + 2 * 9);
        assert_eq!(boot.first_data_sector(), 1 + 2 * 9 + 14);
        assert_eq!(boot.cluster_to_sector(2), boot.first_data_sector());
    }

    #[test]
    fn rejects_missing_signature() {
        let mut bytes = vec![0u8; 512];
        bytes[11] = 0x00;
        bytes[12] = 0x02;
        assert!(BootSector::from_bytes(&bytes).is_err());
    }
}
