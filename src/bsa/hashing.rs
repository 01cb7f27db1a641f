//! 64-bit BSA name hashes
//!
//! Layout of the numeric value, low byte first: last char, second-to-last
//! char, length, first char, then a 32-bit rolling checksum of the middle.

const MAX_PATH: usize = 260;

/// Lower-case, backslash-separated, no leading/trailing separators
pub fn normalize_path(path: &[u8]) -> Vec<u8> {
    let mut out: Vec<u8> = path
        .iter()
        .map(|&b| if b == b'/' { b'\\' } else { b.to_ascii_lowercase() })
        .collect();

    while out.last() == Some(&b'\\') {
        out.pop();
    }
    let leading = out.iter().take_while(|&&b| b == b'\\').count();
    out.drain(..leading);

    if out.is_empty() || out.len() >= MAX_PATH {
        out.clear();
        out.push(b'.');
    }
    out
}

fn checksum(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |crc, &b| {
        u32::from(b).wrapping_add(crc.wrapping_mul(0x1003F))
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Parts {
    last: u8,
    last2: u8,
    length: u8,
    first: u8,
    crc: u32,
}

impl Parts {
    fn numeric(self) -> u64 {
        u64::from(self.last)
            | (u64::from(self.last2) << 8)
            | (u64::from(self.length) << 16)
            | (u64::from(self.first) << 24)
            | (u64::from(self.crc) << 32)
    }
}

fn hash_normalized(path: &[u8]) -> Parts {
    let len = path.len();
    let mut h = Parts::default();
    if len >= 3 {
        h.last2 = path[len - 2];
    }
    if len >= 1 {
        h.last = path[len - 1];
        h.first = path[0];
    }
    // truncation matches the game's own tooling
    h.length = len as u8;
    if h.length > 3 {
        h.crc = checksum(&path[1..len - 2]);
    }
    h
}

/// Hash of a folder path ("sound\fx\wpn")
pub fn hash_directory(path: impl AsRef<[u8]>) -> u64 {
    hash_normalized(&normalize_path(path.as_ref())).numeric()
}

/// Hash of a file name; any parent folders are ignored
pub fn hash_file(path: impl AsRef<[u8]>) -> u64 {
    // extensions the hash special-cases, packed little-endian
    const KNOWN_EXTENSIONS: [&[u8]; 6] = [b"", b".nif", b".kf", b".dds", b".wav", b".adp"];

    let mut path = normalize_path(path.as_ref());
    if let Some(pos) = path.iter().rposition(|&b| b == b'\\') {
        path.drain(..=pos);
    }

    let (stem, extension) = match path.iter().rposition(|&b| b == b'.') {
        Some(split) => (&path[..split], &path[split..]),
        None => (&path[..], &b""[..]),
    };

    if stem.is_empty() || stem.len() >= MAX_PATH || extension.len() >= 16 {
        return 0;
    }

    let mut h = hash_normalized(stem);
    h.crc = h.crc.wrapping_add(checksum(extension));

    if let Some(i) = KNOWN_EXTENSIONS.iter().position(|&ext| ext == extension) {
        let i = i as u8;
        h.first = u32::from(h.first).wrapping_add(32 * u32::from(i & 0xFC)) as u8;
        h.last = u32::from(h.last).wrapping_add(u32::from(i & 0xFE) << 6) as u8;
        h.last2 = u32::from(h.last2).wrapping_add(u32::from(i.wrapping_shl(7))) as u8;
    }

    h.numeric()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_hashes() {
        assert_eq!(
            hash_directory("textures/armor/amuletsandrings/elder council"),
            0x04BC422C742C696C
        );
        assert_eq!(
            hash_directory("sound/voice/skyrim.esm/maleuniquedbguardian"),
            0x594085AC732B616E
        );
        assert_eq!(hash_directory("textures/architecture/windhelm"), 0xC1D97EBE741E6C6D);
    }

    #[test]
    fn test_file_hashes() {
        assert_eq!(hash_file("darkbrotherhood__0007469a_1.fuz"), 0x011F11B0641B5F31);
        assert_eq!(hash_file("elder_council_amulet_n.dds"), 0xDC531E2F6516DFEE);
        assert_eq!(
            hash_file("testtoddquest_testtoddhappy_00027fa2_1.mp3"),
            0xDE0301EE74265F31
        );
    }

    #[test]
    fn test_case_and_separator_invariance() {
        assert_eq!(hash_directory("Sound/FX"), hash_directory("sound\\fx"));
        assert_eq!(hash_file("Foo/Bar.wav"), hash_file("foo\\bar.wav"));
    }

    #[test]
    fn test_empty_directory_is_current_directory() {
        assert_eq!(hash_directory(""), hash_directory("."));
    }

    #[test]
    fn test_extensionless_dotfile_hashes_to_zero() {
        assert_eq!(hash_file(".gitignore"), 0);
    }

    #[test]
    fn test_parent_folders_ignored_for_files() {
        assert_eq!(hash_file("users/john/test.txt"), hash_file("test.txt"));
    }
}
