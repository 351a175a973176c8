//! ### Geometry Registry
//!
//! A `Geometry` is the set of BPB/EBPB field values that together describe one
//! named floppy format (160 KB through 2.88 MB).  The registry is loaded once,
//! from the built-in table or an external INI file, and is read-only for the
//! lifetime of the process: nothing in `format`/`mount` mutates a `Geometry`
//! after it has been handed out.

use std::collections::BTreeMap;
use std::path::Path;

use ini::Ini;

use crate::error::Error;
use crate::DYNERR;

/// Default geometry table, one `[section]` per named format.  Shipped with the
/// crate so callers get a working registry with no configuration at all.
const BUILTIN_GEOMETRIES: &str = include_str!("geometries.ini");

/// BPB/EBPB field values for one named floppy format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Geometry {
    pub oem_label: String,
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub fat_count: u8,
    pub root_dir_entries: u16,
    pub logical_sectors: u16,
    pub media_id: u8,
    pub sectors_per_fat: u16,
    pub sectors_per_track: u16,
    pub sides: u16,
    pub hidden_sectors: u32,
    pub lba_sectors: u32,
    pub drive_number: u8,
    pub nt_flag: u8,
    pub signature: u8,
    pub volume_id: u32,
    pub volume_label: String,
    pub fs_identifier: String,
}

impl Geometry {
    /// Total image size in bytes implied by this geometry.
    pub fn image_size(&self) -> u64 {
        let sectors = if self.logical_sectors != 0 {
            self.logical_sectors as u64
        } else {
            self.lba_sectors as u64
        };
        sectors * self.bytes_per_sector as u64
    }

    fn from_section(name: &str, props: &ini::Properties) -> Result<Self, DYNERR> {
        let get = |key: &str| -> Result<&str, DYNERR> {
            props.get(key).ok_or_else(|| {
                log::error!("geometry '{}' is missing key '{}'", name, key);
                Box::new(Error::CorruptFilesystem) as DYNERR
            })
        };
        let get_int = |key: &str| -> Result<u64, DYNERR> {
            get(key)?.trim().parse::<u64>().map_err(|_| {
                log::error!("geometry '{}' has non-numeric key '{}'", name, key);
                Box::new(Error::CorruptFilesystem) as DYNERR
            })
        };
        Ok(Self {
            oem_label: get("oem_label")?.trim().to_string(),
            bytes_per_sector: get_int("bytes_per_sector")? as u16,
            sectors_per_cluster: get_int("sectors_per_cluster")? as u8,
            reserved_sectors: get_int("reserved_sectors")? as u16,
            fat_count: get_int("fat_count")? as u8,
            root_dir_entries: get_int("root_dir_entries")? as u16,
            logical_sectors: get_int("logical_sectors")? as u16,
            media_id: get_int("media_id")? as u8,
            sectors_per_fat: get_int("sectors_per_fat")? as u16,
            sectors_per_track: get_int("sectors_per_track")? as u16,
            sides: get_int("sides")? as u16,
            hidden_sectors: get_int("hidden_sectors")? as u32,
            lba_sectors: get_int("lba_sectors")? as u32,
            drive_number: get_int("drive_number")? as u8,
            nt_flag: get_int("nt_flag")? as u8,
            signature: get_int("signature")? as u8,
            volume_id: get_int("volume_id")? as u32,
            volume_label: get("volume_label")?.trim().to_string(),
            fs_identifier: get("fs_identifier")?.trim().to_string(),
        })
    }
}

/// A loaded, read-only table of named geometries.
#[derive(Debug, Clone)]
pub struct GeometryRegistry {
    formats: BTreeMap<String, Geometry>,
}

impl GeometryRegistry {
    /// Build the registry from the built-in eight-format table.
    pub fn builtin() -> Result<Self, DYNERR> {
        Self::from_ini_str(BUILTIN_GEOMETRIES)
    }

    /// Load a registry from an external INI file, falling back to nothing but
    /// what the file defines.  Callers who want the built-ins plus overrides
    /// should call `builtin()` and then `merge_file`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DYNERR> {
        let ini = Ini::load_from_file(path.as_ref()).map_err(|e| {
            log::error!("failed to parse geometry file {}: {}", path.as_ref().display(), e);
            Box::new(Error::CorruptFilesystem) as DYNERR
        })?;
        Self::from_ini(ini)
    }

    fn from_ini_str(text: &str) -> Result<Self, DYNERR> {
        let ini = Ini::load_from_str(text).map_err(|e| {
            log::error!("failed to parse built-in geometry table: {}", e);
            Box::new(Error::CorruptFilesystem) as DYNERR
        })?;
        Self::from_ini(ini)
    }

    fn from_ini(ini: Ini) -> Result<Self, DYNERR> {
        let mut formats = BTreeMap::new();
        for (section, props) in ini.iter() {
            let Some(name) = section else { continue };
            let geometry = Geometry::from_section(name, props)?;
            formats.insert(name.to_string(), geometry);
        }
        Ok(Self { formats })
    }

    /// Merge in (overwriting on name collision) every format defined in an
    /// external INI file.
    pub fn merge_file(&mut self, path: impl AsRef<Path>) -> Result<(), DYNERR> {
        let extra = Self::from_file(path)?;
        self.formats.extend(extra.formats);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Geometry, DYNERR> {
        self.formats.get(name).ok_or_else(|| {
            log::warn!("geometry '{}' is not registered", name);
            Box::new(Error::FormatDoesNotExist) as DYNERR
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.formats.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }
}
