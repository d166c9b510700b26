//! Binary header sniffing
//!
//! Reads just enough of an executable image to learn its ABI width, and for
//! PE images the embedded fixed file-version record.
//!
//! ```text
//! ELF     7f 'E' 'L' 'F'  EI_CLASS: 1 = 32-bit, 2 = 64-bit
//! PE      'MZ' .. e_lfanew -> 'PE\0\0' COFF(20) optional-magic 0x10b / 0x20b
//! Mach-O  feedface / feedfacf (either byte order)
//! ```

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::platform::AbiWidth;
use crate::version::{PatchLevel, ReleaseLevel};

/// Bytes read when only the ABI width is wanted.
const HEADER_PROBE_LEN: usize = 4096;

/// Version resources are not searched in images larger than this.
const MAX_IMAGE_LEN: u64 = 64 * 1024 * 1024;

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const MACHO_32: u32 = 0xfeed_face;
const MACHO_64: u32 = 0xfeed_facf;
const PE32_MAGIC: u16 = 0x10b;
const PE32_PLUS_MAGIC: u16 = 0x20b;
const VS_FIXEDFILEINFO_SIGNATURE: u32 = 0xfeef_04bd;

/// Container format recognized from the leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Elf,
    Pe,
    MachO,
}

fn u16_le(bytes: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_le_bytes(bytes.get(at..at + 2)?.try_into().ok()?))
}

fn u32_le(bytes: &[u8], at: usize) -> Option<u32> {
    Some(u32::from_le_bytes(bytes.get(at..at + 4)?.try_into().ok()?))
}

/// Identify the image format and ABI width from a header prefix.
pub fn sniff(bytes: &[u8]) -> Option<(ImageFormat, AbiWidth)> {
    if bytes.len() >= 5 && bytes[..4] == ELF_MAGIC {
        let width = match bytes[4] {
            1 => AbiWidth::Bits32,
            2 => AbiWidth::Bits64,
            _ => AbiWidth::Unknown,
        };
        return Some((ImageFormat::Elf, width));
    }

    if bytes.len() >= 4 {
        let le = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let be = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        for magic in [le, be] {
            if magic == MACHO_32 {
                return Some((ImageFormat::MachO, AbiWidth::Bits32));
            }
            if magic == MACHO_64 {
                return Some((ImageFormat::MachO, AbiWidth::Bits64));
            }
        }
    }

    if bytes.starts_with(b"MZ") {
        let width = pe_width(bytes).unwrap_or(AbiWidth::Unknown);
        return Some((ImageFormat::Pe, width));
    }

    None
}

fn pe_width(bytes: &[u8]) -> Option<AbiWidth> {
    let e_lfanew = u32_le(bytes, 0x3c)? as usize;
    if bytes.get(e_lfanew..e_lfanew + 4)? != b"PE\0\0" {
        return None;
    }
    // Signature (4) + COFF file header (20)
    match u16_le(bytes, e_lfanew + 24)? {
        PE32_MAGIC => Some(AbiWidth::Bits32),
        PE32_PLUS_MAGIC => Some(AbiWidth::Bits64),
        _ => Some(AbiWidth::Unknown),
    }
}

/// Read the ABI width of the image at `path`.
///
/// Unreadable files and unrecognized formats report [`AbiWidth::Unknown`].
pub fn read_abi_width(path: &Path) -> AbiWidth {
    let mut buf = Vec::with_capacity(HEADER_PROBE_LEN);
    let read = File::open(path).and_then(|f| f.take(HEADER_PROBE_LEN as u64).read_to_end(&mut buf));
    match read {
        Ok(_) => sniff(&buf).map(|(_, width)| width).unwrap_or(AbiWidth::Unknown),
        Err(err) => {
            tracing::trace!(path = %path.display(), error = %err, "header read failed");
            AbiWidth::Unknown
        }
    }
}

/// Version embedded in a PE image's fixed file-version record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileVersion {
    pub patch_level: PatchLevel,
    pub release_level: ReleaseLevel,
}

/// Decode a fixed file-version record.
///
/// The native runtime stamps `major.minor.releaseLevel.serial`, so the third
/// field becomes the release level and the fourth the patch component.
pub fn parse_fixed_file_info(bytes: &[u8]) -> Option<FileVersion> {
    let mut at = 0;
    while at + 16 <= bytes.len() {
        if u32_le(bytes, at) == Some(VS_FIXEDFILEINFO_SIGNATURE) {
            let ms = u32_le(bytes, at + 8)?;
            let ls = u32_le(bytes, at + 12)?;
            let (major, minor) = (ms >> 16, ms & 0xffff);
            let (level, serial) = (ls >> 16, ls & 0xffff);
            if major == 0 && minor == 0 {
                return None;
            }
            return Some(FileVersion {
                patch_level: PatchLevel::new(&[major, minor, serial]),
                release_level: ReleaseLevel::from_native(level as i32),
            });
        }
        at += 4;
    }
    None
}

/// Read the file-version record of the PE image at `path`, if it has one.
pub fn read_file_version(path: &Path) -> Option<FileVersion> {
    let meta = std::fs::metadata(path).ok()?;
    if meta.len() > MAX_IMAGE_LEN {
        return None;
    }
    let bytes = std::fs::read(path).ok()?;
    match sniff(&bytes) {
        Some((ImageFormat::Pe, _)) => parse_fixed_file_info(&bytes),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal PE image: DOS stub, PE signature, COFF header, optional magic.
    pub(crate) fn pe_image(magic: u16) -> Vec<u8> {
        let mut bytes = vec![0u8; 0x100];
        bytes[0] = b'M';
        bytes[1] = b'Z';
        bytes[0x3c..0x40].copy_from_slice(&0x80u32.to_le_bytes());
        bytes[0x80..0x84].copy_from_slice(b"PE\0\0");
        bytes[0x98..0x9a].copy_from_slice(&magic.to_le_bytes());
        bytes
    }

    pub(crate) fn with_file_version(mut bytes: Vec<u8>, parts: [u16; 4]) -> Vec<u8> {
        while bytes.len() % 4 != 0 {
            bytes.push(0);
        }
        bytes.extend_from_slice(&VS_FIXEDFILEINFO_SIGNATURE.to_le_bytes());
        bytes.extend_from_slice(&0x0001_0000u32.to_le_bytes());
        let ms = (u32::from(parts[0]) << 16) | u32::from(parts[1]);
        let ls = (u32::from(parts[2]) << 16) | u32::from(parts[3]);
        bytes.extend_from_slice(&ms.to_le_bytes());
        bytes.extend_from_slice(&ls.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 36]);
        bytes
    }

    #[test]
    fn test_sniff_elf() {
        let mut bytes = ELF_MAGIC.to_vec();
        bytes.push(2);
        assert_eq!(sniff(&bytes), Some((ImageFormat::Elf, AbiWidth::Bits64)));
        bytes[4] = 1;
        assert_eq!(sniff(&bytes), Some((ImageFormat::Elf, AbiWidth::Bits32)));
    }

    #[test]
    fn test_sniff_pe() {
        assert_eq!(sniff(&pe_image(PE32_PLUS_MAGIC)), Some((ImageFormat::Pe, AbiWidth::Bits64)));
        assert_eq!(sniff(&pe_image(PE32_MAGIC)), Some((ImageFormat::Pe, AbiWidth::Bits32)));
        // Truncated after the DOS header
        assert_eq!(sniff(b"MZ"), Some((ImageFormat::Pe, AbiWidth::Unknown)));
    }

    #[test]
    fn test_sniff_macho_both_orders() {
        assert_eq!(sniff(&MACHO_64.to_le_bytes()), Some((ImageFormat::MachO, AbiWidth::Bits64)));
        assert_eq!(sniff(&MACHO_32.to_be_bytes()), Some((ImageFormat::MachO, AbiWidth::Bits32)));
        assert_eq!(sniff(b"#!/bin/sh\n"), None);
    }

    #[test]
    fn test_fixed_file_info() {
        let bytes = with_file_version(pe_image(PE32_PLUS_MAGIC), [8, 6, 2, 13]);
        let version = parse_fixed_file_info(&bytes).unwrap();
        assert_eq!(version.patch_level.components(), &[8, 6, 13]);
        assert_eq!(version.release_level, ReleaseLevel::Final);

        let bytes = with_file_version(pe_image(PE32_PLUS_MAGIC), [9, 0, 1, 2]);
        let version = parse_fixed_file_info(&bytes).unwrap();
        assert_eq!(version.patch_level.to_string(), "9.0.2");
        assert_eq!(version.release_level, ReleaseLevel::Beta);

        assert!(parse_fixed_file_info(&pe_image(PE32_MAGIC)).is_none());
    }
}
