use byteorder::{LittleEndian, WriteBytesExt};
use std::io::{self, Write};

use crate::binio::WriteExt;

pub const TES4: [u8; 4] = *b"TES4";
pub const GRUP: [u8; 4] = *b"GRUP";

pub const HEDR: [u8; 4] = *b"HEDR";
pub const CNAM: [u8; 4] = *b"CNAM";
pub const SNAM: [u8; 4] = *b"SNAM";
pub const MAST: [u8; 4] = *b"MAST";
pub const DATA: [u8; 4] = *b"DATA";
pub const INTV: [u8; 4] = *b"INTV";
pub const EDID: [u8; 4] = *b"EDID";
pub const ANAM: [u8; 4] = *b"ANAM";
pub const FNAM: [u8; 4] = *b"FNAM";

/// Record and group headers are both 24 bytes
pub const RECORD_HEADER_SIZE: u32 = 24;
pub const GROUP_HEADER_SIZE: u32 = 24;
/// Fallout 4 form version
pub const INTERNAL_VERSION: u16 = 44;
/// Top-level group type
pub const GROUP_TYPE_TOP: u32 = 0;

/// Record header flag bits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordFlags(u32);

impl RecordFlags {
    /// ESM
    pub const MASTER: Self = Self(0x0000_0001);
    /// ESL
    pub const LIGHT: Self = Self(0x0000_0200);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for RecordFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for RecordFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Tagged field inside a record: 4-byte tag, u16 length, payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subrecord {
    pub tag: [u8; 4],
    pub data: Vec<u8>,
}

impl Subrecord {
    pub fn new(tag: [u8; 4], data: Vec<u8>) -> Self {
        Self { tag, data }
    }

    /// NUL-terminated string payload
    pub fn zstring(tag: [u8; 4], value: &str) -> Self {
        let mut data = Vec::with_capacity(value.len() + 1);
        data.extend_from_slice(value.as_bytes());
        data.push(0);
        Self { tag, data }
    }

    pub fn u32(tag: [u8; 4], value: u32) -> Self {
        Self::new(tag, value.to_le_bytes().to_vec())
    }

    pub fn u64(tag: [u8; 4], value: u64) -> Self {
        Self::new(tag, value.to_le_bytes().to_vec())
    }

    pub fn encoded_len(&self) -> usize {
        6 + self.data.len()
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.tag)?;
        writer.write_wstring(&self.data)
    }
}

/// A serialized record; the declared size is always the body length
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub tag: [u8; 4],
    pub flags: RecordFlags,
    pub form_id: u32,
    data: Vec<u8>,
}

impl Record {
    /// Serialize `subrecords` in order into a record body
    pub fn from_subrecords(
        tag: [u8; 4],
        flags: RecordFlags,
        form_id: u32,
        subrecords: &[Subrecord],
    ) -> io::Result<Self> {
        let mut data = Vec::with_capacity(subrecords.iter().map(Subrecord::encoded_len).sum());
        for subrecord in subrecords {
            subrecord.write(&mut data)?;
        }
        Ok(Self {
            tag,
            flags,
            form_id,
            data,
        })
    }

    pub fn data_size(&self) -> u32 {
        self.data.len() as u32
    }

    /// Header plus body
    pub fn total_size(&self) -> u32 {
        RECORD_HEADER_SIZE + self.data_size()
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.tag)?;
        writer.write_u32::<LittleEndian>(self.data_size())?;
        writer.write_u32::<LittleEndian>(self.flags.bits())?;
        writer.write_u32::<LittleEndian>(self.form_id)?;
        writer.write_u16::<LittleEndian>(0)?; // timestamp
        writer.write_u16::<LittleEndian>(0)?; // version control
        writer.write_u16::<LittleEndian>(INTERNAL_VERSION)?;
        writer.write_u16::<LittleEndian>(0)?;
        writer.write_all(&self.data)
    }
}

/// Size a group wrapper declares: its header plus every member record
pub fn group_size<'a>(records: impl IntoIterator<Item = &'a Record>) -> u32 {
    GROUP_HEADER_SIZE + records.into_iter().map(Record::total_size).sum::<u32>()
}

/// Write a top-level GRUP labelled with the member record type
pub fn write_group<W: Write>(writer: &mut W, label: [u8; 4], records: &[&Record]) -> io::Result<()> {
    writer.write_all(&GRUP)?;
    writer.write_u32::<LittleEndian>(group_size(records.iter().copied()))?;
    writer.write_all(&label)?;
    writer.write_u32::<LittleEndian>(GROUP_TYPE_TOP)?;
    writer.write_u16::<LittleEndian>(0)?; // timestamp
    writer.write_u16::<LittleEndian>(0)?; // version control
    writer.write_u32::<LittleEndian>(0)?;
    for record in records {
        record.write(writer)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subrecord_encoding() {
        let mut buf = Vec::new();
        Subrecord::zstring(EDID, "Test").write(&mut buf).unwrap();
        assert_eq!(buf, b"EDID\x05\x00Test\x00");
    }

    #[test]
    fn test_record_size_matches_body() {
        let record = Record::from_subrecords(
            *b"SNDR",
            RecordFlags::empty(),
            0x800,
            &[Subrecord::zstring(EDID, "A"), Subrecord::u32(CNAM, 0)],
        )
        .unwrap();
        assert_eq!(record.data_size(), (6 + 2) + (6 + 4));

        let mut buf = Vec::new();
        record.write(&mut buf).unwrap();
        assert_eq!(buf.len() as u32, record.total_size());
        assert_eq!(&buf[4..8], &record.data_size().to_le_bytes());
        assert_eq!(&buf[12..16], &0x800u32.to_le_bytes());
        assert_eq!(&buf[20..22], &INTERNAL_VERSION.to_le_bytes());
    }

    #[test]
    fn test_oversized_subrecord_is_rejected() {
        let big = Subrecord::new(ANAM, vec![0; u16::MAX as usize + 1]);
        assert!(Record::from_subrecords(*b"SNDR", RecordFlags::empty(), 1, &[big]).is_err());
    }

    #[test]
    fn test_group_size() {
        let a = Record::from_subrecords(*b"MUSC", RecordFlags::empty(), 1, &[Subrecord::u32(FNAM, 1)]).unwrap();
        let b = Record::from_subrecords(*b"MUSC", RecordFlags::empty(), 2, &[]).unwrap();
        assert_eq!(group_size([&a, &b]), 24 + (24 + 10) + 24);

        let mut buf = Vec::new();
        write_group(&mut buf, *b"MUSC", &[&a, &b]).unwrap();
        assert_eq!(buf.len() as u32, group_size([&a, &b]));
        assert_eq!(&buf[8..12], b"MUSC");
    }

    #[test]
    fn test_flags() {
        let flags = RecordFlags::MASTER | RecordFlags::LIGHT;
        assert_eq!(flags.bits(), 0x201);
        assert_eq!(RecordFlags::empty().bits(), 0);
    }
}
