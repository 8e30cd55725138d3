use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// `dwSignature` of a `VS_FIXEDFILEINFO` block
const SIGNATURE: [u8; 4] = 0xFEEF_04BDu32.to_le_bytes();
/// `dwStrucVersion` every block in the wild carries
const STRUCT_VERSION: [u8; 4] = 0x0001_0000u32.to_le_bytes();
/// Signature, struct version, then the two version words
const HEADER_LEN: usize = 16;
const CHUNK_LEN: usize = 64 * 1024;

/// Four-part file version, ordered part by part
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileVersion {
    pub major: u16,
    pub minor: u16,
    pub build: u16,
    pub private: u16,
}

impl FileVersion {
    pub const fn new(major: u16, minor: u16, build: u16, private: u16) -> Self {
        Self {
            major,
            minor,
            build,
            private,
        }
    }

    /// The version packed into one integer, major part highest
    pub fn as_u64(self) -> u64 {
        (u64::from(self.major) << 48)
            | (u64::from(self.minor) << 32)
            | (u64::from(self.build) << 16)
            | u64::from(self.private)
    }

    fn from_words(ms: u32, ls: u32) -> Self {
        Self::new(
            (ms >> 16) as u16,
            (ms & 0xffff) as u16,
            (ls >> 16) as u16,
            (ls & 0xffff) as u16,
        )
    }
}

impl fmt::Display for FileVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.private
        )
    }
}

fn word(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn find_in(window: &[u8]) -> Option<FileVersion> {
    window
        .windows(HEADER_LEN)
        .find(|header| header[..4] == SIGNATURE && header[4..8] == STRUCT_VERSION)
        .map(|header| FileVersion::from_words(word(&header[8..12]), word(&header[12..16])))
}

/// Read the file version embedded in `path`.
///
/// The file is scanned for the first `VS_FIXEDFILEINFO` block, which is where
/// PE resources keep it. `Ok(None)` means the file carries no version.
pub fn read_file_version(path: &Path) -> io::Result<Option<FileVersion>> {
    let mut file = File::open(path)?;
    let mut buf = vec![0u8; HEADER_LEN - 1 + CHUNK_LEN];
    let mut carried = 0;

    loop {
        let read = match file.read(&mut buf[carried..]) {
            Ok(0) => return Ok(None),
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        let filled = carried + read;

        if let Some(version) = find_in(&buf[..filled]) {
            return Ok(Some(version));
        }

        // keep a partial header spanning the chunk boundary
        carried = filled.min(HEADER_LEN - 1);
        buf.copy_within(filled - carried..filled, 0);
    }
}

#[cfg(test)]
pub(crate) fn version_block(version: FileVersion) -> Vec<u8> {
    let ms = (u32::from(version.major) << 16) | u32::from(version.minor);
    let ls = (u32::from(version.build) << 16) | u32::from(version.private);
    let mut block = Vec::with_capacity(52);
    block.extend_from_slice(&SIGNATURE);
    block.extend_from_slice(&STRUCT_VERSION);
    block.extend_from_slice(&ms.to_le_bytes());
    block.extend_from_slice(&ls.to_le_bytes());
    // product version, flags, os, type and date
    block.extend_from_slice(&[0u8; 36]);
    block
}
