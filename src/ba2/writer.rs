use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::{debug, info};
use std::borrow::Cow;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use walkdir::WalkDir;

use super::hashing::{normalize_path, PathHashes};
use super::types::*;
use crate::binio::WriteExt;
use crate::error::{ArchiveError, Result};

/// zlib level used for compressed payloads
const COMPRESSION_LEVEL: u32 = 6;

/// One pending file; records, payloads and names are all derived from
/// this single list so the three regions always stay aligned
#[derive(Debug, Clone)]
struct PendingFile {
    path: String,
    hashes: PathHashes,
    data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum BuilderState {
    Collecting,
    /// Layout is frozen; only `clear` returns to collecting
    Built(Vec<Ba2FileRecord>),
}

/// Two-phase general BA2 writer: collect files, then lay out and write
/// everything in insertion order
///
/// Audio archives for Fallout 4 must be stored uncompressed, so
/// compression is opt-in.
pub struct Ba2Builder {
    compress: bool,
    files: Vec<PendingFile>,
    state: BuilderState,
}

impl Ba2Builder {
    pub fn new(compress: bool) -> Self {
        Self {
            compress,
            files: Vec::new(),
            state: BuilderState::Collecting,
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn is_built(&self) -> bool {
        matches!(self.state, BuilderState::Built(_))
    }

    /// Records with final offsets and sizes; `None` until built
    pub fn records(&self) -> Option<&[Ba2FileRecord]> {
        match &self.state {
            BuilderState::Built(records) => Some(records),
            BuilderState::Collecting => None,
        }
    }

    /// Add in-memory bytes under an archive-relative path
    pub fn add_bytes(&mut self, archive_path: &str, data: Vec<u8>) -> Result<()> {
        if self.is_built() {
            return Err(ArchiveError::InvalidState("archive already built; call clear() first"));
        }

        let path = normalize_path(archive_path);
        let hashes = PathHashes::of(&path);
        debug!("Added file: {} ({} bytes)", path, data.len());
        self.files.push(PendingFile { path, hashes, data });
        Ok(())
    }

    /// Add a file from disk; a missing source fails immediately
    pub fn add_file(&mut self, file_path: &Path, archive_path: &str) -> Result<()> {
        if !file_path.is_file() {
            return Err(ArchiveError::NotFound(file_path.to_path_buf()));
        }
        let data = fs::read(file_path).map_err(|e| ArchiveError::from_io(e, file_path))?;
        self.add_bytes(archive_path, data)
    }

    /// Add every file below `source_dir`, in sorted path order
    pub fn add_directory(&mut self, source_dir: &Path, archive_base: &str) -> Result<usize> {
        if !source_dir.is_dir() {
            return Err(ArchiveError::NotFound(source_dir.to_path_buf()));
        }

        let mut count = 0;
        for entry in WalkDir::new(source_dir).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(source_dir).to_path_buf();
                ArchiveError::from_io(io::Error::from(e), &path)
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let Ok(relative) = entry.path().strip_prefix(source_dir) else {
                continue;
            };
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("\\");
            let archive_path = if archive_base.is_empty() {
                relative
            } else {
                format!("{}\\{}", archive_base.trim_end_matches(['\\', '/']), relative)
            };

            self.add_file(entry.path(), &archive_path)?;
            count += 1;
        }

        info!("Added {} files from {:?}", count, source_dir);
        Ok(count)
    }

    /// Lay out and serialize the archive, freezing the builder
    pub fn build_to_vec(&mut self) -> Result<Vec<u8>> {
        if self.is_empty() {
            return Err(ArchiveError::EmptyArchive);
        }

        let (records, payloads) = self.layout()?;
        let name_table_offset = records
            .last()
            .map(|r| r.offset + u64::from(r.stored_size()))
            .unwrap_or(HEADER_SIZE);

        let mut out = Vec::with_capacity(name_table_offset as usize);
        Ba2Header::general(records.len() as u32, name_table_offset).write(&mut out)?;
        for record in &records {
            record.write(&mut out)?;
        }
        for payload in &payloads {
            out.write_all(payload)?;
        }
        for file in &self.files {
            out.write_wstring(file.path.as_bytes())
                .map_err(|e| ArchiveError::format(&file.path, e.to_string()))?;
        }

        self.state = BuilderState::Built(records);
        Ok(out)
    }

    /// Build and write the archive to `output_path`
    ///
    /// The archive is assembled in memory first, so a failed build never
    /// leaves a partial file behind.
    pub fn build(&mut self, output_path: &Path) -> Result<()> {
        if self.is_empty() {
            return Err(ArchiveError::EmptyArchive);
        }

        info!("Building BA2 archive with {} files", self.files.len());
        let bytes = self.build_to_vec()?;

        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent).map_err(|e| ArchiveError::from_io(e, parent))?;
        }
        fs::write(output_path, &bytes).map_err(|e| ArchiveError::from_io(e, output_path))?;

        info!("Created BA2 archive: {:?} ({} bytes)", output_path, bytes.len());
        Ok(())
    }

    /// Drop all pending files and return to collecting
    pub fn clear(&mut self) {
        self.files.clear();
        self.state = BuilderState::Collecting;
    }

    /// Phase 2: encode payloads and assign running offsets
    fn layout(&self) -> Result<(Vec<Ba2FileRecord>, Vec<Cow<'_, [u8]>>)> {
        let mut cursor = HEADER_SIZE + RECORD_SIZE * self.files.len() as u64;
        let mut records = Vec::with_capacity(self.files.len());
        let mut payloads = Vec::with_capacity(self.files.len());

        for file in &self.files {
            let unpacked_size = u32::try_from(file.data.len()).map_err(|_| {
                ArchiveError::format(&file.path, "file too large for a BA2 record")
            })?;

            // keep the deflated form only when it is strictly smaller
            let packed = if self.compress {
                Some(deflate(&file.data)?).filter(|packed| packed.len() < file.data.len())
            } else {
                None
            };
            let (payload, packed_size) = match packed {
                Some(packed) => {
                    let packed_size = packed.len() as u32;
                    (Cow::Owned(packed), packed_size)
                }
                None => (Cow::Borrowed(file.data.as_slice()), 0),
            };

            records.push(Ba2FileRecord {
                name_hash: file.hashes.name_hash,
                extension: file.hashes.extension,
                dir_hash: file.hashes.dir_hash,
                flags: 0,
                offset: cursor,
                packed_size,
                unpacked_size,
                path: file.path.clone(),
            });
            cursor += payload.len() as u64;
            payloads.push(payload);
        }

        Ok((records, payloads))
    }
}

fn deflate(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(COMPRESSION_LEVEL));
    encoder.write_all(data)?;
    encoder.finish()
}
