//! 32-bit BA2 name hashes (FNV-1a over the case-folded string)

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Normalize an archive path: backslash separators, no leading separator
pub fn normalize_path(path: &str) -> String {
    path.replace('/', "\\").trim_start_matches('\\').to_string()
}

/// Hash a string after lower-casing it and normalizing separators
pub fn hash_string(s: &str) -> u32 {
    if s.is_empty() {
        return 0;
    }

    let normalized = s.to_lowercase().replace('/', "\\");
    normalized.bytes().fold(FNV_OFFSET, |hash, b| {
        (hash ^ u32::from(b)).wrapping_mul(FNV_PRIME)
    })
}

/// Name pieces a BA2 record is keyed on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathHashes {
    pub name_hash: u32,
    pub dir_hash: u32,
    pub extension: [u8; 4],
}

impl PathHashes {
    pub fn of(path: &str) -> Self {
        let path = normalize_path(path);
        let (parent, file_name) = match path.rfind('\\') {
            Some(pos) => (&path[..pos], &path[pos + 1..]),
            None => (".", path.as_str()),
        };
        let (stem, ext) = split_extension(file_name);

        Self {
            name_hash: hash_string(stem),
            dir_hash: hash_string(parent),
            extension: pack_extension(ext),
        }
    }
}

/// Split "name.ext" at the last dot; dotfiles have no extension
fn split_extension(file_name: &str) -> (&str, &str) {
    match file_name.rfind('.') {
        Some(pos) if pos > 0 => (&file_name[..pos], &file_name[pos + 1..]),
        _ => (file_name, ""),
    }
}

/// Lower-case ASCII extension, truncated or zero padded to 4 bytes
fn pack_extension(ext: &str) -> [u8; 4] {
    let mut packed = [0u8; 4];
    for (slot, b) in packed
        .iter_mut()
        .zip(ext.bytes().filter(u8::is_ascii).map(|b| b.to_ascii_lowercase()))
    {
        *slot = b;
    }
    packed
}
