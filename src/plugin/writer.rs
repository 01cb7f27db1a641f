use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::record::*;
use crate::error::{ArchiveError, Result};

/// First form id handed out; the range below is reserved and keeps ids
/// valid for light plugins
pub const DEFAULT_FORM_ID_BASE: u32 = 0x800;
/// HEDR version field
pub const HEADER_VERSION: f32 = 0.95;
/// CNAM placeholder until real category forms are referenced
pub const DEFAULT_SOUND_CATEGORY: u32 = 0;
pub const DEFAULT_EDITOR_ID_PREFIX: &str = "FO3Audio_";

/// Extensions picked up when scanning for audio
pub const AUDIO_EXTENSIONS: [&str; 4] = ["xwm", "wav", "fuz", "mp3"];

/// Record kinds this writer produces, in group order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    SoundDescriptor,
    MusicTrack,
}

impl RecordKind {
    pub const ALL: [RecordKind; 2] = [RecordKind::SoundDescriptor, RecordKind::MusicTrack];

    pub fn tag(self) -> [u8; 4] {
        match self {
            RecordKind::SoundDescriptor => *b"SNDR",
            RecordKind::MusicTrack => *b"MUSC",
        }
    }
}

/// Plugin metadata written into the header record
#[derive(Debug, Clone)]
pub struct PluginInfo {
    pub name: String,
    pub author: String,
    pub description: String,
    pub masters: Vec<String>,
}

impl PluginInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            author: "FO3 Audio Repository Builder".to_string(),
            description: "Fallout 3 audio files for Fallout 4".to_string(),
            masters: vec!["Fallout4.esm".to_string()],
        }
    }
}

/// Accumulates SNDR/MUSC records and serializes a master file
pub struct PluginWriter {
    info: PluginInfo,
    light: bool,
    editor_id_prefix: String,
    records: Vec<(RecordKind, Record)>,
    next_form_id: u32,
}

impl PluginWriter {
    pub fn new(name: impl Into<String>, light: bool) -> Self {
        Self {
            info: PluginInfo::new(name),
            light,
            editor_id_prefix: DEFAULT_EDITOR_ID_PREFIX.to_string(),
            records: Vec::new(),
            next_form_id: DEFAULT_FORM_ID_BASE,
        }
    }

    pub fn with_masters(mut self, masters: Vec<String>) -> Self {
        self.info.masters = masters;
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.info.author = author.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.info.description = description.into();
        self
    }

    pub fn with_editor_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.editor_id_prefix = prefix.into();
        self
    }

    /// Only meaningful before any record is added
    pub fn with_form_id_base(mut self, base: u32) -> Self {
        if self.records.is_empty() {
            self.next_form_id = base;
        }
        self
    }

    pub fn info(&self) -> &PluginInfo {
        &self.info
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Ids are never reused, even when the add that took one fails
    fn allocate_form_id(&mut self) -> Result<u32> {
        let form_id = self.next_form_id;
        self.next_form_id = form_id
            .checked_add(1)
            .ok_or(ArchiveError::InvalidState("form id space exhausted"))?;
        Ok(form_id)
    }

    fn invalid(&self, reason: String) -> ArchiveError {
        ArchiveError::format(&self.info.name, reason)
    }

    /// Add a sound descriptor referencing one or more sound files
    pub fn add_sound_descriptor<S: AsRef<str>>(
        &mut self,
        editor_id: &str,
        sound_files: &[S],
        category: u32,
    ) -> Result<u32> {
        let form_id = self.allocate_form_id()?;
        if editor_id.is_empty() {
            return Err(self.invalid(format!("sound descriptor {:08X} has no editor id", form_id)));
        }
        if sound_files.is_empty() {
            return Err(self.invalid(format!("sound descriptor {} has no sound files", editor_id)));
        }

        let mut subrecords = vec![
            Subrecord::zstring(EDID, editor_id),
            Subrecord::u32(CNAM, category),
        ];
        subrecords.extend(
            sound_files
                .iter()
                .map(|file| Subrecord::zstring(ANAM, file.as_ref())),
        );

        self.push(RecordKind::SoundDescriptor, form_id, editor_id, &subrecords)?;
        debug!("Added sound descriptor: {} (FormID: {:08X})", editor_id, form_id);
        Ok(form_id)
    }

    /// Add a music track referencing one file
    pub fn add_music_track(&mut self, editor_id: &str, music_file: &str, looping: bool) -> Result<u32> {
        let form_id = self.allocate_form_id()?;
        if editor_id.is_empty() {
            return Err(self.invalid(format!("music track {:08X} has no editor id", form_id)));
        }
        if music_file.is_empty() {
            return Err(self.invalid(format!("music track {} has no file", editor_id)));
        }

        let subrecords = [
            Subrecord::zstring(EDID, editor_id),
            Subrecord::u32(FNAM, u32::from(looping)),
            Subrecord::zstring(ANAM, music_file),
        ];

        self.push(RecordKind::MusicTrack, form_id, editor_id, &subrecords)?;
        debug!("Added music track: {} (FormID: {:08X})", editor_id, form_id);
        Ok(form_id)
    }

    fn push(&mut self, kind: RecordKind, form_id: u32, editor_id: &str, subrecords: &[Subrecord]) -> Result<()> {
        let record = Record::from_subrecords(kind.tag(), RecordFlags::empty(), form_id, subrecords)
            .map_err(|e| self.invalid(format!("{}: {}", editor_id, e)))?;
        self.records.push((kind, record));
        Ok(())
    }

    fn header_record(&self) -> Result<Record> {
        let mut hedr = Vec::with_capacity(12);
        hedr.extend_from_slice(&HEADER_VERSION.to_le_bytes());
        hedr.extend_from_slice(&(self.records.len() as u32).to_le_bytes());
        hedr.extend_from_slice(&self.next_form_id.to_le_bytes());

        let mut subrecords = vec![
            Subrecord::new(HEDR, hedr),
            Subrecord::zstring(CNAM, &self.info.author),
            Subrecord::zstring(SNAM, &self.info.description),
        ];
        for master in &self.info.masters {
            subrecords.push(Subrecord::zstring(MAST, master));
            subrecords.push(Subrecord::u64(DATA, 0));
        }
        subrecords.push(Subrecord::u32(INTV, 1));

        let mut flags = RecordFlags::MASTER;
        if self.light {
            flags |= RecordFlags::LIGHT;
        }

        Record::from_subrecords(TES4, flags, 0, &subrecords)
            .map_err(|e| self.invalid(format!("header record: {}", e)))
    }

    /// Serialize: header record, then one group per record kind present
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.header_record()?.write(&mut out)?;

        for kind in RecordKind::ALL {
            let members: Vec<&Record> = self
                .records
                .iter()
                .filter(|(k, _)| *k == kind)
                .map(|(_, record)| record)
                .collect();
            if members.is_empty() {
                continue;
            }
            write_group(&mut out, kind.tag(), &members)?;
        }

        Ok(out)
    }

    /// Write the plugin file
    pub fn generate(&self, output_path: &Path) -> Result<PathBuf> {
        info!("Generating plugin: {:?}", output_path);
        let bytes = self.to_bytes()?;

        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent).map_err(|e| ArchiveError::from_io(e, parent))?;
        }
        fs::write(output_path, bytes).map_err(|e| ArchiveError::from_io(e, output_path))?;

        info!(
            "Created plugin: {:?} ({} records, ESL={})",
            output_path,
            self.records.len(),
            self.light
        );
        Ok(output_path.to_path_buf())
    }

    /// Add one record for an archive-relative audio path: a music track
    /// when the path mentions "music", a sound descriptor otherwise
    pub fn add_audio_path(&mut self, sound_path: &str) -> Result<u32> {
        let stem = Path::new(&sound_path.replace('\\', "/"))
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let editor_id = sanitize_editor_id(&format!("{}{}", self.editor_id_prefix, stem));

        if sound_path.to_lowercase().contains("music") {
            self.add_music_track(&editor_id, sound_path, true)
        } else {
            self.add_sound_descriptor(&editor_id, &[sound_path], DEFAULT_SOUND_CATEGORY)
        }
    }

    /// Add one record per file, with paths relative to `base_path`
    pub fn add_from_audio_files(&mut self, audio_files: &[PathBuf], base_path: &Path) -> Result<usize> {
        for audio_file in audio_files {
            let relative = audio_file
                .strip_prefix(base_path)
                .unwrap_or_else(|_| Path::new(audio_file.file_name().unwrap_or_default()));
            self.add_audio_path(&archive_path(relative))?;
        }
        Ok(audio_files.len())
    }
}

/// Editor ids allow ASCII letters, digits and underscores only
pub fn sanitize_editor_id(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Data-relative path with backslash separators
fn archive_path(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("\\")
}

/// Audio files below `audio_dir`, sorted
pub fn find_audio_files(audio_dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(audio_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| AUDIO_EXTENSIONS.iter().any(|a| a.eq_ignore_ascii_case(e)))
        })
        .collect()
}

/// Scan `audio_dir` and write `<output_dir>/<plugin_name>.esm`
pub fn create_audio_plugin(
    plugin_name: &str,
    audio_dir: &Path,
    output_dir: &Path,
    light: bool,
) -> Result<PathBuf> {
    write_audio_plugin(PluginWriter::new(plugin_name, light), audio_dir, output_dir)
}

/// Same as `create_audio_plugin`, with a preconfigured writer
pub fn write_audio_plugin(mut writer: PluginWriter, audio_dir: &Path, output_dir: &Path) -> Result<PathBuf> {
    if !audio_dir.is_dir() {
        return Err(ArchiveError::NotFound(audio_dir.to_path_buf()));
    }

    let audio_files = find_audio_files(audio_dir);
    info!("Found {} audio files", audio_files.len());

    writer.add_from_audio_files(&audio_files, audio_dir)?;
    let output_path = output_dir.join(format!("{}.esm", writer.info().name));
    writer.generate(&output_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u32_at(bytes: &[u8], at: usize) -> u32 {
        u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
    }

    /// (tag, declared size, flags, form id) of the record or group at `at`
    fn header_at(bytes: &[u8], at: usize) -> ([u8; 4], u32, u32, u32) {
        (
            bytes[at..at + 4].try_into().unwrap(),
            u32_at(bytes, at + 4),
            u32_at(bytes, at + 8),
            u32_at(bytes, at + 12),
        )
    }

    #[test]
    fn test_one_sound_and_one_music_record() {
        let mut writer = PluginWriter::new("FO3Audio", true);
        let sndr = writer
            .add_sound_descriptor("FO3Audio_laser", &["Sound\\FX\\laser.xwm"], DEFAULT_SOUND_CATEGORY)
            .unwrap();
        let musc = writer
            .add_music_track("FO3Audio_battle", "Music\\Battle\\mus_01.wav", true)
            .unwrap();
        assert_eq!(sndr, DEFAULT_FORM_ID_BASE);
        assert_eq!(musc, DEFAULT_FORM_ID_BASE + 1);

        let bytes = writer.to_bytes().unwrap();

        let (tag, tes4_size, flags, _) = header_at(&bytes, 0);
        assert_eq!(&tag, b"TES4");
        assert_eq!(flags, 0x201);
        // HEDR payload: version, record count, next id
        assert_eq!(&bytes[24..28], b"HEDR");
        assert_eq!(u32_at(&bytes, 34), 2);
        assert_eq!(u32_at(&bytes, 38), DEFAULT_FORM_ID_BASE + 2);

        let first_group = 24 + tes4_size as usize;
        let (tag, sndr_group_size, _, _) = header_at(&bytes, first_group);
        assert_eq!(&tag, b"GRUP");
        assert_eq!(&bytes[first_group + 8..first_group + 12], b"SNDR");
        let (tag, _, _, form_id) = header_at(&bytes, first_group + 24);
        assert_eq!(&tag, b"SNDR");
        assert_eq!(form_id, sndr);

        let second_group = first_group + sndr_group_size as usize;
        let (tag, musc_group_size, _, _) = header_at(&bytes, second_group);
        assert_eq!(&tag, b"GRUP");
        assert_eq!(&bytes[second_group + 8..second_group + 12], b"MUSC");
        let (_, _, _, form_id) = header_at(&bytes, second_group + 24);
        assert_eq!(form_id, musc);

        assert_eq!(second_group + musc_group_size as usize, bytes.len());
    }

    #[test]
    fn test_empty_groups_are_not_written() {
        let mut writer = PluginWriter::new("Music", false);
        writer.add_music_track("A", "music\\a.wav", false).unwrap();
        let bytes = writer.to_bytes().unwrap();

        let (_, tes4_size, flags, _) = header_at(&bytes, 0);
        assert_eq!(flags, RecordFlags::MASTER.bits());
        let group = 24 + tes4_size as usize;
        assert_eq!(&bytes[group + 8..group + 12], b"MUSC");
        let (_, group_size, _, _) = header_at(&bytes, group);
        assert_eq!(group + group_size as usize, bytes.len());
    }

    #[test]
    fn test_failed_add_still_consumes_form_id() {
        let mut writer = PluginWriter::new("Test", true).with_form_id_base(0x900);
        assert!(writer.add_sound_descriptor::<&str>("Empty", &[], 0).is_err());
        assert!(writer.add_music_track("", "music\\a.wav", true).is_err());
        let id = writer.add_music_track("Ok", "music\\a.wav", true).unwrap();
        assert_eq!(id, 0x902);
        assert_eq!(writer.record_count(), 1);
        // HEDR: version, record count, next free id
        let bytes = writer.to_bytes().unwrap();
        assert_eq!(&bytes[24..28], b"HEDR");
        assert_eq!(u32_at(&bytes, 34), 1);
        assert_eq!(u32_at(&bytes, 38), 0x903);
    }

    #[test]
    fn test_form_id_overflow_is_an_error() {
        let mut writer = PluginWriter::new("Test", true).with_form_id_base(u32::MAX - 1);
        assert_eq!(writer.add_music_track("Last", "music\\a.wav", false).unwrap(), u32::MAX - 1);

        let mut writer = PluginWriter::new("Test", true).with_form_id_base(u32::MAX);
        assert!(matches!(
            writer.add_music_track("Overflow", "music\\a.wav", false),
            Err(ArchiveError::InvalidState(_))
        ));
        assert_eq!(writer.record_count(), 0);
    }

    #[test]
    fn test_masters_are_written_with_data_pairs() {
        let writer = PluginWriter::new("Test", true)
            .with_masters(vec!["Fallout4.esm".to_string(), "DLCRobot.esm".to_string()])
            .with_author("me");
        let bytes = writer.to_bytes().unwrap();
        let body = &bytes[24..];
        let mast_count = body.windows(4).filter(|w| *w == b"MAST").count();
        let data_count = body.windows(4).filter(|w| *w == b"DATA").count();
        assert_eq!(mast_count, 2);
        assert_eq!(data_count, 2);
        assert!(body.windows(4).any(|w| w == b"INTV"));
    }

    #[test]
    fn test_add_audio_path_classifies_and_names() {
        let mut writer = PluginWriter::new("Test", true);
        writer.add_audio_path("Sound\\FX\\wpn laser.xwm").unwrap();
        writer.add_audio_path("Music\\Explore\\mus_01.wav").unwrap();
        let bytes = writer.to_bytes().unwrap();
        assert!(bytes.windows(18).any(|w| w == b"FO3Audio_wpn_laser"));
        assert!(bytes.windows(4).any(|w| w == b"MUSC"));
        assert_eq!(writer.record_count(), 2);
    }

    #[test]
    fn test_sanitize_editor_id() {
        assert_eq!(sanitize_editor_id("FO3Audio_wpn laser-fire.01"), "FO3Audio_wpn_laser_fire_01");
    }

    #[test]
    fn test_create_audio_plugin_classifies_music() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("audio");
        fs::create_dir_all(audio.join("Music").join("Battle")).unwrap();
        fs::create_dir_all(audio.join("Sound").join("FX")).unwrap();
        fs::write(audio.join("Music").join("Battle").join("mus_01.wav"), b"RIFF").unwrap();
        fs::write(audio.join("Sound").join("FX").join("laser.xwm"), b"RIFF").unwrap();
        fs::write(audio.join("Sound").join("FX").join("notes.txt"), b"skip").unwrap();

        let out = create_audio_plugin("FO3Audio", &audio, &dir.path().join("out"), true).unwrap();
        assert_eq!(out, dir.path().join("out").join("FO3Audio.esm"));

        let bytes = fs::read(out).unwrap();
        assert_eq!(u32_at(&bytes, 34), 2);
        assert!(bytes.windows(4).any(|w| w == b"MUSC"));
        assert!(bytes.windows(4).any(|w| w == b"SNDR"));
        assert!(bytes.windows(19).any(|w| w == b"Sound\\FX\\laser.xwm\0"));
    }
}
