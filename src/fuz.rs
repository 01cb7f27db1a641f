/// FUZ container: optional lip-sync block followed by raw audio
/// Layout: "FUZE", u32 version, u32 lip size, lip bytes, audio to end of file

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, error, info, warn};
use std::fs;
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::binio::ReadExt;
use crate::error::{ArchiveError, Result};

pub const FUZ_MAGIC: [u8; 4] = *b"FUZE";
/// Version written by Fallout 3 and Fallout 4 alike
pub const FUZ_VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 12;

/// Default extensions for unpacked payloads
pub const AUDIO_EXTENSION: &str = "xwm";
pub const LIP_EXTENSION: &str = "lip";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuzContainer {
    pub version: u32,
    /// Lip-sync data; empty when the container carries none
    pub lip: Vec<u8>,
    /// Audio payload, untouched
    pub audio: Vec<u8>,
}

impl FuzContainer {
    pub fn new(audio: Vec<u8>, lip: Option<Vec<u8>>) -> Self {
        Self {
            version: FUZ_VERSION,
            lip: lip.unwrap_or_default(),
            audio,
        }
    }

    /// Lip data, if any
    pub fn lip(&self) -> Option<&[u8]> {
        (!self.lip.is_empty()).then_some(self.lip.as_slice())
    }

    /// Parse a container; `label` names the source in errors
    pub fn read<R: Read>(reader: &mut R, label: &Path) -> Result<Self> {
        let truncated = |e: io::Error| ArchiveError::format(label, format!("truncated FUZ header: {}", e));

        let magic = reader.read_tag().map_err(truncated)?;
        if magic != FUZ_MAGIC {
            return Err(ArchiveError::format(
                label,
                format!("invalid FUZ magic {:02X?}", magic),
            ));
        }

        let version = reader.read_u32::<LittleEndian>().map_err(truncated)?;
        let lip_size = reader.read_u32::<LittleEndian>().map_err(truncated)? as u64;
        debug!("FUZ version {}, {} bytes of lip data", version, lip_size);

        let mut lip = Vec::new();
        reader
            .by_ref()
            .take(lip_size)
            .read_to_end(&mut lip)
            .map_err(|e| ArchiveError::from_io(e, label))?;
        if lip.len() as u64 != lip_size {
            return Err(ArchiveError::format(
                label,
                format!("lip block claims {} bytes, only {} present", lip_size, lip.len()),
            ));
        }

        // no audio size field: everything after the lip block is audio
        let mut audio = Vec::new();
        reader
            .read_to_end(&mut audio)
            .map_err(|e| ArchiveError::from_io(e, label))?;

        Ok(Self { version, lip, audio })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Self::read(&mut Cursor::new(bytes), Path::new("<memory>"))
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let lip_size = u32::try_from(self.lip.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "lip block exceeds 4 GiB"))?;
        writer.write_all(&FUZ_MAGIC)?;
        writer.write_u32::<LittleEndian>(self.version)?;
        writer.write_u32::<LittleEndian>(lip_size)?;
        writer.write_all(&self.lip)?;
        writer.write_all(&self.audio)
    }

    /// Serialize into memory; fails only when the lip block exceeds 4 GiB
    pub fn encode(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.lip.len() + self.audio.len());
        self.write(&mut out)?;
        Ok(out)
    }

    pub fn read_file(path: &Path) -> Result<Self> {
        debug!("Reading FUZ file: {:?}", path);
        let bytes = fs::read(path).map_err(|e| ArchiveError::from_io(e, path))?;
        Self::read(&mut Cursor::new(bytes), path)
    }

    pub fn write_file(&self, path: &Path) -> Result<()> {
        let bytes = self.encode().map_err(|e| ArchiveError::format(path, e.to_string()))?;
        write_payload(path, &bytes)
    }
}

/// Write the audio payload; defaults to a sibling `.xwm`
pub fn extract_audio(fuz_path: &Path, output_path: Option<&Path>) -> Result<PathBuf> {
    let output_path = output_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| fuz_path.with_extension(AUDIO_EXTENSION));

    let container = FuzContainer::read_file(fuz_path)?;
    write_payload(&output_path, &container.audio)?;

    info!("Extracted audio to: {:?}", output_path);
    Ok(output_path)
}

/// Write the lip payload; defaults to a sibling `.lip`. `None` without lip data
pub fn extract_lip(fuz_path: &Path, output_path: Option<&Path>) -> Result<Option<PathBuf>> {
    let container = FuzContainer::read_file(fuz_path)?;
    let Some(lip) = container.lip() else {
        warn!("No lip data in FUZ file: {:?}", fuz_path);
        return Ok(None);
    };

    let output_path = output_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| fuz_path.with_extension(LIP_EXTENSION));
    write_payload(&output_path, lip)?;

    info!("Extracted lip data to: {:?}", output_path);
    Ok(Some(output_path))
}

/// Pack an audio file and optional lip file into a FUZ
///
/// A lip path that does not exist is treated as "no lip data".
pub fn create(audio_path: &Path, lip_path: Option<&Path>, output_path: &Path) -> Result<PathBuf> {
    let audio = fs::read(audio_path).map_err(|e| ArchiveError::from_io(e, audio_path))?;
    let lip = match lip_path {
        Some(path) if path.exists() => Some(fs::read(path).map_err(|e| ArchiveError::from_io(e, path))?),
        Some(path) => {
            debug!("Lip file {:?} not found, packing audio only", path);
            None
        }
        None => None,
    };

    FuzContainer::new(audio, lip).write_file(output_path)?;
    info!("Created FUZ file: {:?}", output_path);
    Ok(output_path.to_path_buf())
}

/// Re-emit a FUZ as the current version, keeping both payloads
pub fn convert(input_path: &Path, output_path: &Path) -> Result<PathBuf> {
    info!("Converting FUZ file: {:?}", input_path);
    let mut container = FuzContainer::read_file(input_path)?;
    container.version = FUZ_VERSION;
    container.write_file(output_path)?;

    info!("Converted FUZ file: {:?}", output_path);
    Ok(output_path.to_path_buf())
}

/// Result of a directory-wide FUZ unpack
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub found: usize,
    pub processed: usize,
    pub failed: usize,
    /// Containers that also produced a `.lip`
    pub lip_files: usize,
}

/// Unpack every `*.fuz` below `input_dir`
///
/// Outputs keep the relative layout under `output_dir` (default: next to
/// each source). Individual failures are logged and counted.
pub fn process_directory(input_dir: &Path, output_dir: Option<&Path>) -> Result<BatchSummary> {
    if !input_dir.is_dir() {
        return Err(ArchiveError::NotFound(input_dir.to_path_buf()));
    }
    let output_dir = output_dir.unwrap_or(input_dir);
    fs::create_dir_all(output_dir).map_err(|e| ArchiveError::from_io(e, output_dir))?;

    let fuz_files: Vec<PathBuf> = WalkDir::new(input_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_fuz(e.path()))
        .map(|e| e.into_path())
        .collect();

    info!("Found {} FUZ files to process", fuz_files.len());
    let mut summary = BatchSummary {
        found: fuz_files.len(),
        ..BatchSummary::default()
    };

    for fuz_path in &fuz_files {
        match unpack_one(fuz_path, input_dir, output_dir) {
            Ok(wrote_lip) => {
                summary.processed += 1;
                if wrote_lip {
                    summary.lip_files += 1;
                }
            }
            Err(e) => {
                error!("Failed to process {:?}: {}", fuz_path, e);
                summary.failed += 1;
            }
        }
    }

    info!(
        "Processed {}/{} FUZ files ({} failed)",
        summary.processed, summary.found, summary.failed
    );
    Ok(summary)
}

fn unpack_one(fuz_path: &Path, input_dir: &Path, output_dir: &Path) -> Result<bool> {
    let relative = fuz_path.strip_prefix(input_dir).unwrap_or(fuz_path);
    let base = output_dir.join(relative);
    let container = FuzContainer::read_file(fuz_path)?;

    write_payload(&base.with_extension(AUDIO_EXTENSION), &container.audio)?;
    match container.lip() {
        Some(lip) => {
            write_payload(&base.with_extension(LIP_EXTENSION), lip)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

pub fn is_fuz(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("fuz"))
}

fn write_payload(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ArchiveError::from_io(e, parent))?;
    }
    fs::write(path, data).map_err(|e| ArchiveError::from_io(e, path))
}
