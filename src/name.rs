//! ### Name Codec
//!
//! Converts between host strings and the two directory-entry name
//! encodings: classic 8.3 short names (SFN) and the VFAT long-name (LFN)
//! side-entries that carry a UTF-16 name in chunks of 13 code units.
//!
//! Date/time packing lives here too, since it is the other half of what
//! goes into a short-name entry alongside the name itself.

use std::collections::BTreeSet;

use chrono::{Datelike, Timelike};
use log::{debug, warn};

pub const DOT: ([u8; 8], [u8; 3]) = ([b'.', 32, 32, 32, 32, 32, 32, 32], [32, 32, 32]);
pub const DOT_DOT: ([u8; 8], [u8; 3]) = ([b'.', b'.', 32, 32, 32, 32, 32, 32], [32, 32, 32]);

pub fn pack_date(time: Option<chrono::NaiveDateTime>) -> [u8; 2] {
    let now = time.unwrap_or_else(|| chrono::Local::now().naive_local());
    let year = match now.year() {
        y if y < 1980 => {
            warn!("date prior to 1980, pegging to reference date");
            1980
        }
        y if y > 2107 => {
            warn!("date past 2107, pegging to maximum");
            2107
        }
        y => y,
    };
    let packed = now.day() as u16 + ((now.month() as u16) << 5) + ((year as u16 - 1980) << 9);
    u16::to_le_bytes(packed)
}

pub fn pack_time(time: Option<chrono::NaiveDateTime>) -> [u8; 2] {
    let now = time.unwrap_or_else(|| chrono::Local::now().naive_local());
    let packed = (now.second() as u16) / 2 + ((now.minute() as u16) << 5) + ((now.hour() as u16) << 11);
    u16::to_le_bytes(packed)
}

pub fn pack_tenths(time: Option<chrono::NaiveDateTime>) -> u8 {
    let now = time.unwrap_or_else(|| chrono::Local::now().naive_local());
    (now.timestamp_subsec_millis() / 100) as u8 + 10 * (now.second() % 2) as u8
}

pub fn unpack_date(fat_date: [u8; 2]) -> Option<chrono::NaiveDate> {
    if fat_date == [0, 0] {
        return None;
    }
    let date16 = u16::from_le_bytes(fat_date);
    let year = 1980 + (date16 >> 9) as i32;
    let month = ((date16 & 0b0000_0001_1110_0000) >> 5) as u32;
    let day = (date16 & 0b1_1111) as u32;
    chrono::NaiveDate::from_ymd_opt(year, month, day)
}

pub fn unpack_time(fat_time: [u8; 2], tenths: u8) -> Option<chrono::NaiveTime> {
    let time16 = u16::from_le_bytes(fat_time);
    let hour = (time16 >> 11) as u32;
    let min = ((time16 & 0b0000_0111_1110_0000) >> 5) as u32;
    let sec2 = (time16 & 0b1_1111) as u32;
    chrono::NaiveTime::from_hms_opt(hour, min, sec2 * 2 + tenths as u32 / 10)
}

/// True for a byte in the legal short-name character set: space, `!`, `-`,
/// `#`-`)`, digits, `@`, `A`-`Z`, `^`-backtick, `{`, `}`, `~`, and the
/// extended range 0x80-0xFF.
fn is_legal_sfn_byte(b: u8) -> bool {
    matches!(b,
        0x20 | 0x21 | 0x2d |
        0x23..=0x29 |
        0x30..=0x39 |
        0x40 |
        0x41..=0x5a |
        0x5e..=0x60 |
        0x7b | 0x7d | 0x7e |
        0x80..=0xff
    )
}

/// Accepts lower case; case is raised by `encode_sfn`.  "." and ".." are not
/// accepted here, callers special-case them.
pub fn is_valid_sfn(s: &str) -> bool {
    let parts: Vec<&str> = s.split('.').collect();
    if parts.len() > 2 {
        return false;
    }
    let base = parts[0];
    let ext = if parts.len() == 2 { parts[1] } else { "" };
    for c in [base, ext].concat().chars() {
        if !c.is_ascii() || !is_legal_sfn_byte(c.to_ascii_uppercase() as u8) {
            debug!("bad SFN character `{}`", c);
            return false;
        }
    }
    if base.is_empty() || base.len() > 8 {
        return false;
    }
    if ext.len() > 3 {
        return false;
    }
    true
}

fn lossy_ascii(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '?' }).collect()
}

/// Decode an 8.3 entry's name+ext bytes to a display string.
pub fn decode_sfn(name: [u8; 8], ext: [u8; 3]) -> String {
    match (name, ext) {
        DOT => ".".to_string(),
        DOT_DOT => "..".to_string(),
        _ => {
            let base = lossy_ascii(&name);
            let x = lossy_ascii(&ext);
            let base = base.trim_end();
            let x = x.trim_end();
            if x.is_empty() {
                base.to_string()
            } else {
                format!("{}.{}", base, x)
            }
        }
    }
}

/// Encode a short-name string into its 8+3 byte pair: base left-padded to 8
/// with spaces, extension padded to 3, both uppercased, with any illegal
/// character replaced by `~`.
pub fn encode_sfn(s: &str) -> ([u8; 8], [u8; 3]) {
    if s == "." {
        return DOT;
    }
    if s == ".." {
        return DOT_DOT;
    }
    let parts: Vec<&str> = s.split('.').collect();
    let base = basis_clean(parts[0]);
    let ext = if parts.len() == 2 { basis_clean(parts[1]) } else { String::new() };
    to_entry_bytes(&base, &ext)
}

/// VFAT checksum of the 11-byte short name, stored in every LFN entry that
/// belongs to the short-name entry it precedes.
pub fn sfn_checksum(name: [u8; 8], ext: [u8; 3]) -> u8 {
    let mut sum: u8 = 0;
    for &b in name.iter().chain(ext.iter()) {
        sum = (if sum & 1 != 0 { 0x80u8 } else { 0u8 }).wrapping_add(sum >> 1).wrapping_add(b);
    }
    sum
}

/// Uppercase and replace every byte outside the legal SFN set with `~`.
fn basis_clean(s: &str) -> String {
    s.to_uppercase().bytes().map(|b| if is_legal_sfn_byte(b) { b } else { b'~' } as char).collect()
}

/// Split a long name into (basis, extension) the way the basis-name
/// algorithm does: extension is whatever follows the last dot.
fn split_long_name(long: &str) -> (String, String) {
    match long.rfind('.') {
        Some(i) if i > 0 => (long[..i].to_string(), long[i + 1..].to_string()),
        _ => (long.to_string(), String::new()),
    }
}

fn to_entry_bytes(base: &str, ext: &str) -> ([u8; 8], [u8; 3]) {
    let mut name = [0x20u8; 8];
    for (i, b) in base.bytes().enumerate().take(8) {
        name[i] = b;
    }
    let mut typ = [0x20u8; 3];
    for (i, b) in ext.bytes().enumerate().take(3) {
        typ[i] = b;
    }
    (name, typ)
}

/// Derive a unique short name for a long name that is not itself a valid
/// SFN: uppercase and `~`-substitute illegal characters, collapse a basis
/// longer than 8 characters to its first 4 and last 4, then disambiguate
/// collisions by splicing a `~K` tail into the basis.  `existing` holds
/// every short name already present in the target directory, in `BASE.EXT`
/// display form.
pub fn derive_sfn_from_lfn(long: &str, existing: &BTreeSet<String>) -> ([u8; 8], [u8; 3]) {
    let (basis_raw, ext_raw) = split_long_name(long);
    let ext_clean: String = basis_clean(&ext_raw).chars().take(3).collect();
    let basis: Vec<char> = basis_clean(&basis_raw).chars().collect();
    let base = if basis.len() > 8 {
        let mut s: String = basis[0..4].iter().collect();
        s.extend(basis[basis.len() - 4..].iter());
        s
    } else {
        basis.into_iter().collect()
    };
    let display = |base: &str| if ext_clean.is_empty() { base.to_string() } else { format!("{}.{}", base, ext_clean) };
    if !existing.contains(&display(&base)) {
        return to_entry_bytes(&base, &ext_clean);
    }
    for k in 1u32..=999 {
        let tail = format!("~{}", k);
        let keep = 8usize.saturating_sub(tail.len());
        let candidate_base: String = base.chars().take(keep).collect::<String>() + &tail;
        if !existing.contains(&display(&candidate_base)) {
            return to_entry_bytes(&candidate_base, &ext_clean);
        }
    }
    unreachable!("exhausted ~K disambiguation space (1..999) for {}", long);
}

/// Pack a long name into UTF-16 chunks of 13 code units for LFN entries,
/// in on-disk order: highest-ordinal chunk first.  The final (highest)
/// chunk pads with `0x0000` then `0xffff` to fill out to 13 units.
pub fn lfn_chunks(long: &str) -> Vec<[u16; 13]> {
    let mut units: Vec<u16> = long.encode_utf16().collect();
    units.push(0x0000);
    while units.len() % 13 != 0 {
        units.push(0xffff);
    }
    let mut chunks = Vec::new();
    for group in units.chunks(13) {
        let mut chunk = [0xffffu16; 13];
        chunk[..group.len()].copy_from_slice(group);
        chunks.push(chunk);
    }
    chunks.reverse();
    chunks
}

/// Reassemble UTF-16 chunks (given in on-disk order: last entry first) back
/// into a host string, stopping at the first NUL terminator.
pub fn lfn_join(chunks: &[[u16; 13]]) -> String {
    let mut units = Vec::new();
    for chunk in chunks.iter().rev() {
        for &u in chunk {
            if u == 0x0000 {
                break;
            }
            if u == 0xffff {
                continue;
            }
            units.push(u);
        }
    }
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sfn_round_trips() {
        let (name, ext) = encode_sfn("readme.txt");
        assert_eq!(decode_sfn(name, ext), "README.TXT");
    }

    #[test]
    fn dot_and_dotdot_are_special_cased() {
        assert_eq!(decode_sfn(encode_sfn(".").0, encode_sfn(".").1), ".");
        assert_eq!(decode_sfn(encode_sfn("..").0, encode_sfn("..").1), "..");
    }

    #[test]
    fn rejects_invalid_sfn_characters() {
        assert!(!is_valid_sfn("bad*name.txt"));
        assert!(!is_valid_sfn("toolongbasename.txt"));
        assert!(!is_valid_sfn("ok.toolong"));
        assert!(is_valid_sfn("README.TXT"));
    }

    #[test]
    fn checksum_is_stable_for_same_name() {
        let (name, ext) = encode_sfn("FOOBAR.TXT");
        assert_eq!(sfn_checksum(name, ext), sfn_checksum(name, ext));
    }

    #[test]
    fn derives_first_four_last_four_basis_on_long_name() {
        let existing = BTreeSet::new();
        let (name, ext) = derive_sfn_from_lfn("my long file name.txt", &existing);
        // basis "MY LONG FILE NAME" (17 chars) collapses to first 4 + last 4.
        assert_eq!(decode_sfn(name, ext), "MY LNAME.TXT");
    }

    #[test]
    fn derives_next_numeric_tail_on_collision() {
        let mut existing = BTreeSet::new();
        existing.insert("MY LNAME.TXT".to_string());
        let (name, ext) = derive_sfn_from_lfn("my long file name.txt", &existing);
        assert_eq!(decode_sfn(name, ext), "MY LNA~1.TXT");
    }

    #[test]
    fn derives_sfn_unchanged_when_basis_already_fits() {
        let existing = BTreeSet::new();
        let (name, ext) = derive_sfn_from_lfn("readme!.txt", &existing);
        assert_eq!(decode_sfn(name, ext), "README!.TXT");
    }

    #[test]
    fn derives_sfn_replacing_illegal_characters_with_tilde() {
        let existing = BTreeSet::new();
        let (name, ext) = derive_sfn_from_lfn("a+b=c.txt", &existing);
        assert_eq!(decode_sfn(name, ext), "A~B~C.TXT");
    }

    #[test]
    fn lfn_chunks_round_trip() {
        let long = "a reasonably long file name.docx";
        let chunks = lfn_chunks(long);
        assert!(chunks.len() >= 3);
        assert_eq!(lfn_join(&chunks), long);
    }
}
