use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, Read};

use crate::binio::ReadExt;

/// BSA magic "BSA\0"
pub const BSA_MAGIC: [u8; 4] = *b"BSA\0";
pub const HEADER_SIZE: u64 = 36;

/// Oblivion, Fallout 3 / New Vegas / Skyrim LE, Skyrim SE
pub const SUPPORTED_VERSIONS: [u32; 3] = [103, 104, 105];
pub const SSE_VERSION: u32 = 105;

/// BSA archive header (36 bytes)
#[derive(Debug, Clone)]
pub struct BsaHeader {
    pub magic: [u8; 4],
    pub version: u32,
    pub offset: u32,
    pub archive_flags: ArchiveFlags,
    pub folder_count: u32,
    pub file_count: u32,
    pub total_folder_name_length: u32,
    pub total_file_name_length: u32,
    pub file_flags: u32,
}

impl BsaHeader {
    pub fn read<R: Read>(reader: &mut R) -> io::Result<Self> {
        Ok(Self {
            magic: reader.read_tag()?,
            version: reader.read_u32::<LittleEndian>()?,
            offset: reader.read_u32::<LittleEndian>()?,
            archive_flags: ArchiveFlags::from_bits(reader.read_u32::<LittleEndian>()?),
            folder_count: reader.read_u32::<LittleEndian>()?,
            file_count: reader.read_u32::<LittleEndian>()?,
            total_folder_name_length: reader.read_u32::<LittleEndian>()?,
            total_file_name_length: reader.read_u32::<LittleEndian>()?,
            file_flags: reader.read_u32::<LittleEndian>()?,
        })
    }

    pub fn is_valid(&self) -> bool {
        self.magic == BSA_MAGIC
    }

    pub fn is_supported_version(&self) -> bool {
        SUPPORTED_VERSIONS.contains(&self.version)
    }

    /// SSE widened folder records to 24 bytes with a 64-bit offset
    pub fn folder_record_size(&self) -> usize {
        if self.version == SSE_VERSION {
            24
        } else {
            16
        }
    }
}

/// Archive-level flag bits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveFlags(u32);

impl ArchiveFlags {
    pub const DIRECTORY_NAMES: u32 = 0x0001;
    pub const FILE_NAMES: u32 = 0x0002;
    pub const COMPRESSED: u32 = 0x0004;
    pub const XBOX: u32 = 0x0040;
    pub const EMBEDDED_NAMES: u32 = 0x0100;
    pub const XMEM: u32 = 0x0200;

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    const fn has(self, flag: u32) -> bool {
        self.0 & flag != 0
    }

    pub const fn has_folder_names(self) -> bool {
        self.has(Self::DIRECTORY_NAMES)
    }

    pub const fn has_file_names(self) -> bool {
        self.has(Self::FILE_NAMES)
    }

    /// Files are compressed unless their size field toggles it off
    pub const fn compressed_by_default(self) -> bool {
        self.has(Self::COMPRESSED)
    }

    pub const fn is_xbox(self) -> bool {
        self.has(Self::XBOX)
    }

    /// Each file's data block starts with its full path (bstring)
    pub const fn has_embedded_names(self) -> bool {
        self.has(Self::EMBEDDED_NAMES)
    }

    pub const fn uses_xmem(self) -> bool {
        self.has(Self::XMEM)
    }
}

/// Folder record; only lives while the tables are being parsed
#[derive(Debug, Clone)]
pub struct FolderRecord {
    pub name_hash: u64,
    pub file_count: u32,
    pub offset: u64,
}

/// Combined size field of a file record
/// Bit 30 toggles the archive default compression, bits 0-29 are the size
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeField(u32);

impl SizeField {
    pub const COMPRESSION_TOGGLE: u32 = 0x4000_0000;
    pub const SIZE_MASK: u32 = 0x3FFF_FFFF;

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn size(self) -> u32 {
        self.0 & Self::SIZE_MASK
    }

    pub const fn toggles_compression(self) -> bool {
        self.0 & Self::COMPRESSION_TOGGLE != 0
    }
}

/// File record as stored in a folder's file block
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub name_hash: u64,
    pub size: SizeField,
    pub offset: u32,
}

impl FileRecord {
    /// Effective compression: archive default XOR the per-file toggle
    pub fn is_compressed(&self, flags: ArchiveFlags) -> bool {
        flags.compressed_by_default() ^ self.size.toggles_compression()
    }
}

/// A file entry in a BSA archive, resolved after the name block is read
#[derive(Debug, Clone)]
pub struct BsaFile {
    /// Folder path as stored (e.g., "sound\fx\wpn")
    pub folder: String,
    /// File name as stored (e.g., "laser_fire.wav")
    pub name: String,
    pub name_hash: u64,
    /// Stored size of the data block (includes any prefixes)
    pub size: u32,
    /// Absolute offset of the data block
    pub offset: u64,
    /// Effective compression state
    pub compressed: bool,
}

impl BsaFile {
    /// Archive-relative path with backslash separators
    pub fn path(&self) -> String {
        if self.folder.is_empty() {
            self.name.clone()
        } else {
            format!("{}\\{}", self.folder, self.name)
        }
    }
}
