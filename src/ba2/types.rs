use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use crate::binio::ReadExt;

/// BA2 magic "BTDX"
pub const BA2_MAGIC: [u8; 4] = *b"BTDX";
/// Fallout 4 archive version
pub const BA2_VERSION: u32 = 1;
pub const HEADER_SIZE: u64 = 24;
/// Size of one general-archive file record
pub const RECORD_SIZE: u64 = 36;
/// Filler written into the trailing record field
pub const RECORD_PADDING: u32 = 0xBAAD_F00D;

/// BA2 archive layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveType {
    /// Loose files ("GNRL")
    General,
    /// DirectX textures ("DX10")
    Textures,
    /// PS4 textures ("GNMF")
    Gnf,
}

impl ArchiveType {
    const ALL: [ArchiveType; 3] = [ArchiveType::General, ArchiveType::Textures, ArchiveType::Gnf];

    /// Value written into the header type field
    pub fn code(self) -> u32 {
        match self {
            ArchiveType::General => 0,
            ArchiveType::Textures => 1,
            ArchiveType::Gnf => 2,
        }
    }

    pub fn tag(self) -> [u8; 4] {
        match self {
            ArchiveType::General => *b"GNRL",
            ArchiveType::Textures => *b"DX10",
            ArchiveType::Gnf => *b"GNMF",
        }
    }

    /// Decode the header type field
    ///
    /// Accepts the numeric value and the four-character tag that the
    /// game's own archives carry.
    pub fn from_raw(raw: [u8; 4]) -> Option<Self> {
        let code = u32::from_le_bytes(raw);
        Self::ALL
            .into_iter()
            .find(|kind| kind.code() == code || kind.tag() == raw)
    }
}

/// BA2 archive header (24 bytes)
#[derive(Debug, Clone)]
pub struct Ba2Header {
    pub magic: [u8; 4],
    pub version: u32,
    /// Raw type field; see `ArchiveType::from_raw`
    pub archive_type: [u8; 4],
    pub file_count: u32,
    pub name_table_offset: u64,
}

impl Ba2Header {
    pub fn general(file_count: u32, name_table_offset: u64) -> Self {
        Self {
            magic: BA2_MAGIC,
            version: BA2_VERSION,
            archive_type: ArchiveType::General.code().to_le_bytes(),
            file_count,
            name_table_offset,
        }
    }

    pub fn read<R: Read>(reader: &mut R) -> io::Result<Self> {
        Ok(Self {
            magic: reader.read_tag()?,
            version: reader.read_u32::<LittleEndian>()?,
            archive_type: reader.read_tag()?,
            file_count: reader.read_u32::<LittleEndian>()?,
            name_table_offset: reader.read_u64::<LittleEndian>()?,
        })
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.magic)?;
        writer.write_u32::<LittleEndian>(self.version)?;
        writer.write_all(&self.archive_type)?;
        writer.write_u32::<LittleEndian>(self.file_count)?;
        writer.write_u64::<LittleEndian>(self.name_table_offset)
    }
}

/// General-archive file record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ba2FileRecord {
    pub name_hash: u32,
    /// Lower-case extension, zero padded
    pub extension: [u8; 4],
    pub dir_hash: u32,
    pub flags: u32,
    pub offset: u64,
    /// 0 when stored, else the zlib stream length
    pub packed_size: u32,
    pub unpacked_size: u32,
    /// Archive-relative path, filled from the name table
    pub path: String,
}

impl Ba2FileRecord {
    pub fn read<R: Read>(reader: &mut R) -> io::Result<Self> {
        let record = Self {
            name_hash: reader.read_u32::<LittleEndian>()?,
            extension: reader.read_tag()?,
            dir_hash: reader.read_u32::<LittleEndian>()?,
            flags: reader.read_u32::<LittleEndian>()?,
            offset: reader.read_u64::<LittleEndian>()?,
            packed_size: reader.read_u32::<LittleEndian>()?,
            unpacked_size: reader.read_u32::<LittleEndian>()?,
            path: String::new(),
        };
        reader.read_u32::<LittleEndian>()?; // padding
        Ok(record)
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.name_hash)?;
        writer.write_all(&self.extension)?;
        writer.write_u32::<LittleEndian>(self.dir_hash)?;
        writer.write_u32::<LittleEndian>(self.flags)?;
        writer.write_u64::<LittleEndian>(self.offset)?;
        writer.write_u32::<LittleEndian>(self.packed_size)?;
        writer.write_u32::<LittleEndian>(self.unpacked_size)?;
        writer.write_u32::<LittleEndian>(RECORD_PADDING)
    }

    pub fn is_compressed(&self) -> bool {
        self.packed_size != 0
    }

    /// Bytes the payload occupies in the archive
    pub fn stored_size(&self) -> u32 {
        if self.is_compressed() {
            self.packed_size
        } else {
            self.unpacked_size
        }
    }
}
