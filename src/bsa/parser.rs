use byteorder::{LittleEndian, ReadBytesExt};
use flate2::read::ZlibDecoder;
use indicatif::ProgressBar;
use log::{debug, info, warn};
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Instant;

use super::hashing;
use super::types::*;
use crate::binio::{decode_cp1252, ReadExt, MAX_PREALLOC_BYTES};
use crate::error::{ArchiveError, Result};
use crate::extraction::{self, ExtractSummary};
use crate::filter::{self, EntryFilter};

/// Upper bound for up-front allocations driven by header counts
const MAX_PREALLOC: usize = 1 << 16;

/// Filter selecting the sound tree
pub const AUDIO_PATTERN: &str = "sound\\*";

/// BSA archive reader
///
/// Parses the header, folder table, file tables and name block once;
/// payloads are read from `source` on demand.
pub struct BsaArchive<R> {
    pub header: BsaHeader,
    pub files: Vec<BsaFile>,
    archive_path: PathBuf,
    source: R,
}

impl BsaArchive<BufReader<File>> {
    /// Open and parse a BSA archive
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Opening BSA: {:?}", path);

        let file = File::open(path).map_err(|e| ArchiveError::from_io(e, path))?;
        Self::read(BufReader::new(file), path)
    }
}

impl<R: Read + Seek> BsaArchive<R> {
    /// Parse a BSA from any seekable source; `path` labels errors and logs
    pub fn read(mut source: R, path: impl Into<PathBuf>) -> Result<Self> {
        let archive_path = path.into();
        let truncated = |what: &str, e: io::Error| {
            ArchiveError::format(&archive_path, format!("truncated {}: {}", what, e))
        };

        source
            .seek(SeekFrom::Start(0))
            .map_err(|e| ArchiveError::from_io(e, &archive_path))?;
        let header = BsaHeader::read(&mut source).map_err(|e| truncated("header", e))?;

        if !header.is_valid() {
            return Err(ArchiveError::format(
                &archive_path,
                format!("bad magic {:02X?}", header.magic),
            ));
        }

        if !header.is_supported_version() {
            warn!(
                "BSA version {} may not be fully supported: {:?}",
                header.version, archive_path
            );
        }

        let flags = header.archive_flags;
        debug!(
            "BSA v{} contains {} folders, {} files, flags=0x{:08X}, compressed={}",
            header.version,
            header.folder_count,
            header.file_count,
            flags.bits(),
            flags.compressed_by_default()
        );

        // Folder records follow the header
        source
            .seek(SeekFrom::Start(u64::from(header.offset).max(HEADER_SIZE)))
            .map_err(|e| ArchiveError::from_io(e, &archive_path))?;
        let folders = read_folder_records(&mut source, &header)
            .map_err(|e| truncated("folder records", e))?;

        // Per-folder blocks: optional bstring name, then that folder's file records
        let mut records: Vec<(String, FileRecord)> =
            Vec::with_capacity((header.file_count as usize).min(MAX_PREALLOC));
        for folder in &folders {
            let folder_name = if flags.has_folder_names() {
                let raw = source
                    .read_bstring()
                    .map_err(|e| truncated("folder name", e))?;
                let name = decode_cp1252(&raw).trim_end_matches('\0').to_string();
                if !flags.is_xbox() && hashing::hash_directory(&name) != folder.name_hash {
                    debug!("Folder hash mismatch for {:?} in {:?}", name, archive_path);
                }
                name
            } else {
                String::new()
            };

            for _ in 0..folder.file_count {
                let record = read_file_record(&mut source)
                    .map_err(|e| truncated("file records", e))?;
                records.push((folder_name.clone(), record));
            }
        }

        // Name block: one zstring per file record, same folder-then-file order
        let mut names = Vec::with_capacity(records.len());
        for (_, record) in &records {
            let name = if flags.has_file_names() {
                let raw = source
                    .read_zstring()
                    .map_err(|e| truncated("file name block", e))?;
                let name = decode_cp1252(&raw);
                if !flags.is_xbox() && hashing::hash_file(&raw) != record.name_hash {
                    debug!("File hash mismatch for {:?} in {:?}", name, archive_path);
                }
                name
            } else {
                format!("{:016x}", record.name_hash)
            };
            names.push(name);
        }

        let files: Vec<BsaFile> = records
            .into_iter()
            .zip(names)
            .map(|((folder, record), name)| BsaFile {
                compressed: record.is_compressed(flags),
                size: record.size.size(),
                offset: u64::from(record.offset),
                name_hash: record.name_hash,
                folder,
                name,
            })
            .collect();

        debug!("Parsed {} files from BSA {:?}", files.len(), archive_path);

        Ok(Self {
            header,
            files,
            archive_path,
            source,
        })
    }

    /// All archive-relative paths (backslash separated), in table order
    pub fn list(&self) -> Vec<String> {
        self.files.iter().map(BsaFile::path).collect()
    }

    /// Decode one entry into memory
    pub fn read_file(&mut self, file: &BsaFile) -> Result<Vec<u8>> {
        read_payload(&mut self.source, &self.archive_path, &self.header, file)
    }

    /// Extract every entry matching `filter` under `output_dir`
    ///
    /// Per-file failures are logged and counted; only archive-level
    /// problems (e.g. an unwritable output root) return an error.
    pub fn extract(&mut self, output_dir: &Path, filter: Option<&EntryFilter>) -> Result<ExtractSummary> {
        self.extract_with_progress(output_dir, filter, &ProgressBar::hidden())
    }

    pub fn extract_with_progress(
        &mut self,
        output_dir: &Path,
        filter: Option<&EntryFilter>,
        progress: &ProgressBar,
    ) -> Result<ExtractSummary> {
        info!("Extracting BSA: {:?}", self.archive_path);
        fs::create_dir_all(output_dir).map_err(|e| ArchiveError::from_io(e, output_dir))?;

        let started = Instant::now();
        let mut summary = ExtractSummary::new(self.files.len());
        progress.set_length(self.files.len() as u64);

        for file in &self.files {
            progress.inc(1);
            let path = file.path();
            if !filter::accepts(filter, &path) {
                summary.skipped += 1;
                continue;
            }

            let result = read_payload(&mut self.source, &self.archive_path, &self.header, file)
                .and_then(|data| extraction::write_entry(output_dir, &path, &data));

            match result {
                Ok(written) => {
                    debug!("Extracted {} -> {:?}", path, written);
                    summary.extracted += 1;
                }
                Err(e) => {
                    warn!("Failed to extract {}: {}", path, e);
                    summary.failed += 1;
                }
            }
        }

        summary.log_completion(&self.archive_path, output_dir, started);
        Ok(summary)
    }

    /// Extract only the sound tree
    pub fn extract_audio_only(&mut self, output_dir: &Path, progress: &ProgressBar) -> Result<ExtractSummary> {
        self.extract_with_progress(output_dir, Some(&EntryFilter::new(AUDIO_PATTERN)), progress)
    }
}

fn read_folder_records<R: Read>(reader: &mut R, header: &BsaHeader) -> io::Result<Vec<FolderRecord>> {
    let wide = header.folder_record_size() == 24;
    let mut folders = Vec::with_capacity((header.folder_count as usize).min(MAX_PREALLOC));

    for _ in 0..header.folder_count {
        let name_hash = reader.read_u64::<LittleEndian>()?;
        let file_count = reader.read_u32::<LittleEndian>()?;
        let offset = if wide {
            reader.read_u32::<LittleEndian>()?; // padding
            reader.read_u64::<LittleEndian>()?
        } else {
            u64::from(reader.read_u32::<LittleEndian>()?)
        };
        folders.push(FolderRecord {
            name_hash,
            file_count,
            offset,
        });
    }

    Ok(folders)
}

fn read_file_record<R: Read>(reader: &mut R) -> io::Result<FileRecord> {
    Ok(FileRecord {
        name_hash: reader.read_u64::<LittleEndian>()?,
        size: SizeField::from_bits(reader.read_u32::<LittleEndian>()?),
        offset: reader.read_u32::<LittleEndian>()?,
    })
}

/// Read and decode one file's data block
fn read_payload<R: Read + Seek>(
    source: &mut R,
    archive_path: &Path,
    header: &BsaHeader,
    file: &BsaFile,
) -> Result<Vec<u8>> {
    let entry = file.path();
    let flags = header.archive_flags;
    let io_err = |e: io::Error| ArchiveError::from_io(e, archive_path);

    source.seek(SeekFrom::Start(file.offset)).map_err(io_err)?;
    let mut remaining = u64::from(file.size);

    if flags.has_embedded_names() {
        let name_len = u64::from(source.read_u8().map_err(io_err)?);
        let prefix = 1 + name_len;
        if prefix > remaining {
            return Err(ArchiveError::format(
                &entry,
                format!(
                    "embedded name ({} bytes) exceeds data block ({} bytes)",
                    prefix, remaining
                ),
            ));
        }
        source.seek(SeekFrom::Current(name_len as i64)).map_err(io_err)?;
        remaining -= prefix;
    }

    if !file.compressed {
        return source.read_bounded(remaining).map_err(io_err);
    }

    if flags.uses_xmem() {
        return Err(ArchiveError::unsupported(&entry, "XMem-compressed data"));
    }

    if remaining < 4 {
        return Err(ArchiveError::format(
            &entry,
            format!("compressed block of {} bytes has no size prefix", remaining),
        ));
    }

    let original_size = source.read_u32::<LittleEndian>().map_err(io_err)? as usize;
    let compressed = source.read_bounded(remaining - 4).map_err(io_err)?;

    let data = if header.version == SSE_VERSION {
        decompress_lz4(&compressed, original_size)
    } else {
        decompress_zlib(&compressed, original_size)
    }
    .map_err(|e| ArchiveError::compression(&entry, e))?;

    if data.len() != original_size {
        warn!(
            "{}: decompressed to {} bytes, header says {}",
            entry,
            data.len(),
            original_size
        );
    }

    Ok(data)
}

fn decompress_zlib(compressed: &[u8], size_hint: usize) -> io::Result<Vec<u8>> {
    let mut data = Vec::with_capacity(size_hint.min(MAX_PREALLOC_BYTES));
    ZlibDecoder::new(compressed).read_to_end(&mut data)?;
    Ok(data)
}

/// Skyrim SE archives store LZ4 frames instead of zlib streams
fn decompress_lz4(compressed: &[u8], size_hint: usize) -> io::Result<Vec<u8>> {
    let mut decoder = lz4::Decoder::new(compressed)?;
    let mut data = Vec::with_capacity(size_hint.min(MAX_PREALLOC_BYTES));
    decoder.read_to_end(&mut data)?;
    Ok(data)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::{Cursor, Write};

    pub(crate) struct TestFile {
        name: &'static str,
        stored: Vec<u8>,
        toggle: bool,
    }

    pub(crate) fn raw(name: &'static str, data: &[u8]) -> TestFile {
        TestFile { name, stored: data.to_vec(), toggle: false }
    }

    /// Size prefix + zlib stream, as a compressed BSA block
    fn zlib_block(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        let mut block = Vec::new();
        block.write_u32::<LittleEndian>(data.len() as u32).unwrap();
        block.extend(encoder.finish().unwrap());
        block
    }

    /// Size prefix + LZ4 frame, as a compressed v105 block
    fn lz4_block(data: &[u8]) -> Vec<u8> {
        let mut encoder = lz4::EncoderBuilder::new().build(Vec::new()).unwrap();
        encoder.write_all(data).unwrap();
        let (frame, result) = encoder.finish();
        result.unwrap();
        let mut block = Vec::new();
        block.write_u32::<LittleEndian>(data.len() as u32).unwrap();
        block.extend(frame);
        block
    }

    /// Lay out an archive: header, folder records, folder blocks, names, data
    ///
    /// Version 105 gets the wide folder records.
    pub(crate) fn build_bsa(version: u32, flags: u32, folders: &[(&str, Vec<TestFile>)]) -> Vec<u8> {
        let folder_record = if version == SSE_VERSION { 24 } else { 16 };
        let file_count: usize = folders.iter().map(|(_, f)| f.len()).sum();
        let folder_blocks: usize = folders
            .iter()
            .map(|(name, files)| 1 + name.len() + 1 + 16 * files.len())
            .sum();
        let names_len: usize = folders
            .iter()
            .flat_map(|(_, files)| files.iter().map(|f| f.name.len() + 1))
            .sum();
        let mut data_offset = 36 + folder_record * folders.len() + folder_blocks + names_len;

        let mut out = Vec::new();
        out.extend_from_slice(b"BSA\0");
        for v in [
            version,
            36,
            flags,
            folders.len() as u32,
            file_count as u32,
            folders.iter().map(|(n, _)| n.len() as u32 + 1).sum(),
            names_len as u32,
            0,
        ] {
            out.write_u32::<LittleEndian>(v).unwrap();
        }

        for (name, files) in folders {
            out.write_u64::<LittleEndian>(hashing::hash_directory(name)).unwrap();
            out.write_u32::<LittleEndian>(files.len() as u32).unwrap();
            out.write_u32::<LittleEndian>(0).unwrap();
            if folder_record == 24 {
                out.write_u64::<LittleEndian>(0).unwrap();
            }
        }

        for (name, files) in folders {
            out.write_u8(name.len() as u8 + 1).unwrap();
            out.extend_from_slice(name.as_bytes());
            out.write_u8(0).unwrap();
            for file in files {
                let mut size = file.stored.len() as u32;
                if file.toggle {
                    size |= SizeField::COMPRESSION_TOGGLE;
                }
                out.write_u64::<LittleEndian>(hashing::hash_file(file.name)).unwrap();
                out.write_u32::<LittleEndian>(size).unwrap();
                out.write_u32::<LittleEndian>(data_offset as u32).unwrap();
                data_offset += file.stored.len();
            }
        }

        for (_, files) in folders {
            for file in files {
                out.extend_from_slice(file.name.as_bytes());
                out.write_u8(0).unwrap();
            }
        }

        for (_, files) in folders {
            for file in files {
                out.extend_from_slice(&file.stored);
            }
        }

        out
    }

    pub(crate) const NAMED: u32 = ArchiveFlags::DIRECTORY_NAMES | ArchiveFlags::FILE_NAMES;

    fn open(bytes: Vec<u8>) -> BsaArchive<Cursor<Vec<u8>>> {
        BsaArchive::read(Cursor::new(bytes), "test.bsa").unwrap()
    }

    #[test]
    fn test_lists_folder_and_file_paths() {
        let bytes = build_bsa(
            104,
            NAMED,
            &[
                ("sound\\fx", vec![raw("a.wav", b"aaaa"), raw("b.wav", b"bb")]),
                ("music", vec![raw("c.mp3", b"c")]),
            ],
        );
        let archive = open(bytes);
        assert_eq!(archive.header.folder_count, 2);
        assert_eq!(
            archive.list(),
            vec!["sound\\fx\\a.wav", "sound\\fx\\b.wav", "music\\c.mp3"]
        );
    }

    #[test]
    fn test_extracts_compressed_and_raw_files() {
        let original = vec![b'a'; 100];
        let raw_data = b"RIFF....WAVE".to_vec();
        let bytes = build_bsa(
            104,
            NAMED,
            &[
                (
                    "sound",
                    vec![TestFile { name: "packed.wav", stored: zlib_block(&original), toggle: true }],
                ),
                ("music", vec![raw("plain.wav", &raw_data)]),
            ],
        );

        let dir = tempfile::tempdir().unwrap();
        let mut archive = open(bytes);
        assert!(archive.files[0].compressed);
        assert!(!archive.files[1].compressed);

        let summary = archive.extract(dir.path(), None).unwrap();
        assert_eq!(summary.extracted, 2);
        assert_eq!(summary.failed, 0);
        assert_eq!(fs::read(dir.path().join("sound/packed.wav")).unwrap(), original);
        assert_eq!(fs::read(dir.path().join("music/plain.wav")).unwrap(), raw_data);
    }

    #[test]
    fn test_v105_wide_folders_and_lz4_payloads() {
        let original = b"LZ4 framed voice line ".repeat(20);
        let raw_data = b"stored as is".to_vec();
        let bytes = build_bsa(
            105,
            NAMED | ArchiveFlags::COMPRESSED,
            &[
                (r"sound\voice", vec![TestFile { name: "hello.fuz", stored: lz4_block(&original), toggle: false }]),
                ("music", vec![TestFile { name: "plain.wav", stored: raw_data.clone(), toggle: true }]),
            ],
        );

        let dir = tempfile::tempdir().unwrap();
        let mut archive = open(bytes);
        assert_eq!(archive.header.folder_record_size(), 24);
        assert_eq!(archive.list(), vec!["sound\\voice\\hello.fuz", "music\\plain.wav"]);
        assert!(archive.files[0].compressed);
        assert!(!archive.files[1].compressed);

        let summary = archive.extract(dir.path(), None).unwrap();
        assert_eq!(summary.extracted, 2);
        assert_eq!(summary.failed, 0);
        assert_eq!(fs::read(dir.path().join("sound/voice/hello.fuz")).unwrap(), original);
        assert_eq!(fs::read(dir.path().join("music/plain.wav")).unwrap(), raw_data);
    }

    #[test]
    fn test_toggle_on_compressed_archive_yields_raw_bytes() {
        let data = b"not actually compressed".to_vec();
        let bytes = build_bsa(
            104,
            NAMED | ArchiveFlags::COMPRESSED,
            &[("sound", vec![TestFile { name: "x.wav", stored: data.clone(), toggle: true }])],
        );
        let mut archive = open(bytes);
        let file = archive.files[0].clone();
        assert!(!file.compressed);
        assert_eq!(archive.read_file(&file).unwrap(), data);
    }

    #[test]
    fn test_corrupt_entry_is_skipped() {
        let mut corrupt = zlib_block(&[7u8; 64]);
        for b in corrupt.iter_mut().skip(4) {
            *b = 0xFF;
        }
        let bytes = build_bsa(
            104,
            NAMED | ArchiveFlags::COMPRESSED,
            &[
                ("sound", vec![TestFile { name: "bad.wav", stored: corrupt, toggle: false }]),
                (
                    "music",
                    vec![
                        TestFile { name: "ok1.wav", stored: zlib_block(b"first"), toggle: false },
                        TestFile { name: "ok2.wav", stored: zlib_block(b"second"), toggle: false },
                    ],
                ),
            ],
        );

        let dir = tempfile::tempdir().unwrap();
        let mut archive = open(bytes);
        let summary = archive.extract(dir.path(), None).unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.extracted, 2);
        assert_eq!(summary.failed, 1);
        assert!(!dir.path().join("sound/bad.wav").exists());
        assert_eq!(fs::read(dir.path().join("music/ok2.wav")).unwrap(), b"second");

        let bad = archive.files[0].clone();
        assert!(matches!(
            archive.read_file(&bad),
            Err(ArchiveError::Compression { .. })
        ));
    }

    #[test]
    fn test_filter_limits_extraction() {
        let bytes = build_bsa(
            104,
            NAMED,
            &[
                ("sound\\fx", vec![raw("a.wav", b"a")]),
                ("textures", vec![raw("b.dds", b"b")]),
                ("textures\\sound", vec![raw("x.dds", b"x")]),
            ],
        );
        let dir = tempfile::tempdir().unwrap();
        let mut archive = open(bytes);
        let summary = archive.extract_audio_only(dir.path(), &ProgressBar::hidden()).unwrap();
        assert_eq!(summary.extracted, 1);
        assert_eq!(summary.skipped, 2);
        assert!(!dir.path().join("textures/sound/x.dds").exists());
        assert!(dir.path().join("sound/fx/a.wav").exists());
        assert!(!dir.path().join("textures/b.dds").exists());
    }

    #[test]
    fn test_bad_magic_is_format_error() {
        let mut bytes = build_bsa(104, NAMED, &[("sound", vec![raw("a.wav", b"a")])]);
        bytes[..4].copy_from_slice(b"BTDX");
        let err = BsaArchive::read(Cursor::new(bytes), "bad.bsa").err().unwrap();
        assert!(matches!(err, ArchiveError::Format { .. }));
    }

    #[test]
    fn test_unknown_version_still_reads() {
        let bytes = build_bsa(99, NAMED, &[("sound", vec![raw("a.wav", b"abc")])]);
        let mut archive = open(bytes);
        assert!(!archive.header.is_supported_version());
        let file = archive.files[0].clone();
        assert_eq!(archive.read_file(&file).unwrap(), b"abc");
    }

    #[test]
    fn test_embedded_names_are_skipped() {
        let mut stored = vec![9u8];
        stored.extend_from_slice(b"sound\\a.x");
        stored.extend_from_slice(b"payload");
        let bytes = build_bsa(
            104,
            NAMED | ArchiveFlags::EMBEDDED_NAMES,
            &[("sound", vec![TestFile { name: "a.x", stored, toggle: false }])],
        );
        let mut archive = open(bytes);
        let file = archive.files[0].clone();
        assert_eq!(archive.read_file(&file).unwrap(), b"payload");
    }

    #[test]
    fn test_embedded_name_longer_than_block_fails_entry() {
        let stored = vec![200u8, b'a', b'b'];
        let bytes = build_bsa(
            104,
            NAMED | ArchiveFlags::EMBEDDED_NAMES,
            &[("sound", vec![TestFile { name: "a.x", stored, toggle: false }])],
        );
        let mut archive = open(bytes);
        let file = archive.files[0].clone();
        assert!(matches!(archive.read_file(&file), Err(ArchiveError::Format { .. })));
    }

    #[test]
    fn test_missing_archive_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = BsaArchive::open(dir.path().join("nope.bsa")).err().unwrap();
        assert!(matches!(err, ArchiveError::NotFound(_)));
    }

    #[test]
    fn test_truncated_tables_are_format_errors() {
        let mut bytes = build_bsa(104, NAMED, &[("sound", vec![raw("a.wav", b"a")])]);
        bytes.truncate(50);
        let err = BsaArchive::read(Cursor::new(bytes), "short.bsa").err().unwrap();
        assert!(matches!(err, ArchiveError::Format { .. }));
    }
}
