//! # `fat12`
//!
//! A library for reading and modifying FAT12 floppy disk images: BPB/EBPB
//! parsing, packed 12-bit FAT arithmetic, an SFN+VFAT directory engine, file
//! CRUD, and volume mount/format/boot-install.
//!
//! ## Architecture
//!
//! * [`image`] is the byte-addressable, sector-aligned view of the backing
//!   file.
//! * [`geometry`] holds the registry of named floppy formats (BPB field
//!   presets), loaded from a built-in table or an external INI file.
//! * [`bpb`] packs and unpacks the boot sector's BIOS Parameter Block.
//! * [`fat`] is the packed 12-bit cluster table: get/set/allocate/free/walk.
//! * [`name`] converts between host strings and 8.3 short names or VFAT
//!   long-name fragments.
//! * [`directory`] is the directory engine: decoding/encoding 32-byte slots,
//!   reassembling long names, and finding/allocating free entries.
//! * [`volume`] ties the above together into the public `Volume` API:
//!   mount, format, list/change directory, read/write/rename/delete files.
//!
//! ## Errors
//!
//! Every fallible operation in this crate returns `Result<_, DYNERR>`,
//! a boxed `dyn std::error::Error`.  Most failures are the closed
//! [`error::Error`] enum; I/O failures from the backing store are wrapped
//! the same way.
//!
//! ## Logging
//!
//! This crate logs through the `log` facade; callers decide the backend
//! (`env_logger` is a reasonable default, and is what this crate's own
//! integration tests install under `RUST_LOG`).

pub mod bpb;
pub mod directory;
pub mod error;
pub mod fat;
pub mod geometry;
pub mod image;
pub mod name;
pub mod volume;

pub use error::Error;
pub use geometry::{Geometry, GeometryRegistry};
pub use volume::Volume;

/// A boxed error, used everywhere a caller might receive either this
/// crate's own [`Error`] or an I/O failure from the backing store.
pub type DYNERR = Box<dyn std::error::Error>;
/// Shorthand for a fallible operation with no payload on success.
pub type STDRESULT = Result<(), DYNERR>;
