/// Little-endian field helpers shared by the archive codecs
/// Fixed-width fields come from byteorder; these add the string shapes
/// Bethesda formats use (u8/u16 length prefixes, NUL terminators)

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// Longest NUL-terminated string we will scan before giving up
const MAX_ZSTRING_LEN: usize = 4096;

/// Cap on buffers sized from on-disk length fields
pub const MAX_PREALLOC_BYTES: usize = 1 << 26;

pub trait ReadExt: Read {
    /// Read a 4-byte tag ("BSA\0", "BTDX", "FUZE", "TES4", ...)
    fn read_tag(&mut self) -> io::Result<[u8; 4]> {
        let mut tag = [0u8; 4];
        self.read_exact(&mut tag)?;
        Ok(tag)
    }

    /// String prefixed with a 1-byte length
    fn read_bstring(&mut self) -> io::Result<Vec<u8>> {
        let len = self.read_u8()? as usize;
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// String prefixed with a 2-byte little-endian length
    fn read_wstring(&mut self) -> io::Result<Vec<u8>> {
        let len = self.read_u16::<LittleEndian>()? as usize;
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// NUL-terminated string; end of stream also terminates
    fn read_zstring(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        loop {
            match self.read_u8() {
                Ok(0) => break,
                Ok(b) => buf.push(b),
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            if buf.len() > MAX_ZSTRING_LEN {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "unterminated string",
                ));
            }
        }
        Ok(buf)
    }

    /// Exactly `len` bytes, growing the buffer as data arrives instead of
    /// trusting `len` up front
    fn read_bounded(&mut self, len: u64) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity((len as usize).min(MAX_PREALLOC_BYTES));
        self.take(len).read_to_end(&mut buf)?;
        if (buf.len() as u64) < len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("expected {} bytes, found {}", len, buf.len()),
            ));
        }
        Ok(buf)
    }
}

impl<R: Read + ?Sized> ReadExt for R {}

pub trait WriteExt: Write {
    /// String prefixed with a 2-byte little-endian length
    fn write_wstring(&mut self, bytes: &[u8]) -> io::Result<()> {
        let len = u16::try_from(bytes.len()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("string of {} bytes exceeds u16 length prefix", bytes.len()),
            )
        })?;
        self.write_u16::<LittleEndian>(len)?;
        self.write_all(bytes)
    }
}

impl<W: Write + ?Sized> WriteExt for W {}

/// Windows-1252 code points for 0x80..=0x9F; the rest of the page is Latin-1
const CP1252_HIGH: [char; 32] = [
    '\u{20AC}', '\u{FFFD}', '\u{201A}', '\u{0192}', '\u{201E}', '\u{2026}', '\u{2020}', '\u{2021}',
    '\u{02C6}', '\u{2030}', '\u{0160}', '\u{2039}', '\u{0152}', '\u{FFFD}', '\u{017D}', '\u{FFFD}',
    '\u{FFFD}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{2022}', '\u{2013}', '\u{2014}',
    '\u{02DC}', '\u{2122}', '\u{0161}', '\u{203A}', '\u{0153}', '\u{FFFD}', '\u{017E}', '\u{0178}',
];

/// Decode archive name bytes (Windows-1252) into a String
pub fn decode_cp1252(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| match b {
            0x80..=0x9F => CP1252_HIGH[(b - 0x80) as usize],
            _ => b as char,
        })
        .collect()
}
