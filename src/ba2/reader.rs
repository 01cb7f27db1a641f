use flate2::read::ZlibDecoder;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Instant;

use super::hashing::normalize_path;
use super::types::*;
use crate::binio::{ReadExt, MAX_PREALLOC_BYTES};
use crate::error::{ArchiveError, Result};
use crate::extraction::{self, ExtractSummary};
use crate::filter::{self, EntryFilter};

/// General-type BA2 archive reader
pub struct Ba2Archive<R> {
    pub header: Ba2Header,
    records: Vec<Ba2FileRecord>,
    /// lower-cased path -> index into `records`
    index: HashMap<String, usize>,
    archive_path: PathBuf,
    source: R,
}

impl Ba2Archive<BufReader<File>> {
    /// Open and parse a BA2 archive
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Opening BA2: {:?}", path);

        let file = File::open(path).map_err(|e| ArchiveError::from_io(e, path))?;
        Self::read(BufReader::new(file), path)
    }
}

impl<R: Read + Seek> Ba2Archive<R> {
    pub fn read(mut source: R, path: impl Into<PathBuf>) -> Result<Self> {
        let archive_path = path.into();
        let truncated = |what: &str, e: io::Error| {
            ArchiveError::format(&archive_path, format!("truncated {}: {}", what, e))
        };

        source
            .seek(SeekFrom::Start(0))
            .map_err(|e| ArchiveError::from_io(e, &archive_path))?;
        let header = Ba2Header::read(&mut source).map_err(|e| truncated("header", e))?;

        if header.magic != BA2_MAGIC {
            return Err(ArchiveError::format(
                &archive_path,
                format!("bad magic {:02X?}", header.magic),
            ));
        }

        match ArchiveType::from_raw(header.archive_type) {
            Some(ArchiveType::General) => {}
            Some(other) => {
                return Err(ArchiveError::unsupported(
                    &archive_path,
                    format!("{:?} archives use a texture record layout", other),
                ));
            }
            None => {
                return Err(ArchiveError::format(
                    &archive_path,
                    format!("unknown archive type {:02X?}", header.archive_type),
                ));
            }
        }

        if header.version != BA2_VERSION {
            warn!(
                "BA2 version {} may not be fully supported: {:?}",
                header.version, archive_path
            );
        }

        debug!(
            "BA2: version={}, files={}, names at 0x{:X}",
            header.version, header.file_count, header.name_table_offset
        );

        let mut records = Vec::with_capacity((header.file_count as usize).min(1 << 16));
        for _ in 0..header.file_count {
            records.push(Ba2FileRecord::read(&mut source).map_err(|e| truncated("file records", e))?);
        }

        source
            .seek(SeekFrom::Start(header.name_table_offset))
            .map_err(|e| ArchiveError::from_io(e, &archive_path))?;
        let mut index = HashMap::with_capacity(records.len());
        let mut unique: Vec<Ba2FileRecord> = Vec::with_capacity(records.len());

        for mut record in records {
            let raw = source.read_wstring().map_err(|e| truncated("name table", e))?;
            record.path = String::from_utf8(raw).map_err(|e| {
                ArchiveError::format(&archive_path, format!("name table entry is not UTF-8: {}", e))
            })?;

            let key = lookup_key(&record.path);
            match index.get(&key) {
                Some(&existing) => {
                    warn!("Duplicate entry {} in {:?}; keeping the last", record.path, archive_path);
                    unique[existing] = record;
                }
                None => {
                    index.insert(key, unique.len());
                    unique.push(record);
                }
            }
        }

        debug!("Parsed {} files from BA2 {:?}", unique.len(), archive_path);

        Ok(Self {
            header,
            records: unique,
            index,
            archive_path,
            source,
        })
    }

    /// Records in archive order
    pub fn files(&self) -> &[Ba2FileRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Lower-cased archive paths, in archive order
    pub fn list(&self) -> Vec<String> {
        self.records.iter().map(|r| lookup_key(&r.path)).collect()
    }

    /// Look up a record by path (case and separator insensitive)
    pub fn get(&self, path: &str) -> Option<&Ba2FileRecord> {
        self.index.get(&lookup_key(path)).map(|&i| &self.records[i])
    }

    /// Decode one file by path
    pub fn read_file(&mut self, path: &str) -> Result<Vec<u8>> {
        let i = *self
            .index
            .get(&lookup_key(path))
            .ok_or_else(|| ArchiveError::NotFound(PathBuf::from(path)))?;
        read_payload(&mut self.source, &self.archive_path, &self.records[i])
    }

    /// Extract every record matching `filter` under `output_dir`
    pub fn extract(&mut self, output_dir: &Path, filter: Option<&EntryFilter>) -> Result<ExtractSummary> {
        info!("Extracting BA2: {:?}", self.archive_path);
        fs::create_dir_all(output_dir).map_err(|e| ArchiveError::from_io(e, output_dir))?;

        let started = Instant::now();
        let mut summary = ExtractSummary::new(self.records.len());

        for record in &self.records {
            if !filter::accepts(filter, &record.path) {
                summary.skipped += 1;
                continue;
            }

            let result = read_payload(&mut self.source, &self.archive_path, record)
                .and_then(|data| extraction::write_entry(output_dir, &record.path, &data));

            match result {
                Ok(_) => summary.extracted += 1,
                Err(e) => {
                    warn!("Failed to extract {}: {}", record.path, e);
                    summary.failed += 1;
                }
            }
        }

        summary.log_completion(&self.archive_path, output_dir, started);
        Ok(summary)
    }
}

fn lookup_key(path: &str) -> String {
    normalize_path(path).to_lowercase()
}

fn read_payload<R: Read + Seek>(source: &mut R, archive_path: &Path, record: &Ba2FileRecord) -> Result<Vec<u8>> {
    let io_err = |e: io::Error| ArchiveError::from_io(e, archive_path);
    source.seek(SeekFrom::Start(record.offset)).map_err(io_err)?;

    if !record.is_compressed() {
        return source.read_bounded(u64::from(record.unpacked_size)).map_err(io_err);
    }

    let packed = source.read_bounded(u64::from(record.packed_size)).map_err(io_err)?;

    // one byte of slack so an overlong stream shows up as a size mismatch
    let mut data = Vec::with_capacity((record.unpacked_size as usize).min(MAX_PREALLOC_BYTES));
    ZlibDecoder::new(packed.as_slice())
        .take(u64::from(record.unpacked_size) + 1)
        .read_to_end(&mut data)
        .map_err(|e| ArchiveError::compression(&record.path, e))?;

    if data.len() != record.unpacked_size as usize {
        return Err(ArchiveError::compression(
            &record.path,
            format!(
                "expected {} bytes, got at least {}",
                record.unpacked_size,
                data.len()
            ),
        ));
    }

    Ok(data)
}
