/// BSA to BA2 repacking: entries are decoded in memory, FUZ containers
/// are split into audio and lip files, and a plugin referencing the audio
/// is written next to the archive

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::ba2::hashing::normalize_path;
use crate::ba2::Ba2Builder;
use crate::bsa::BsaArchive;
use crate::config::Settings;
use crate::extraction::ExtractSummary;
use crate::filter::{self, EntryFilter};
use crate::fuz::{self, FuzContainer};

/// Entries that get a plugin record
pub const PLUGIN_AUDIO_EXTENSIONS: [&str; 4] = ["xwm", "wav", "mp3", "ogg"];

#[derive(Debug, Clone)]
pub struct RepackOptions {
    /// Base name of the plugin and its archive
    pub name: String,
    pub output_dir: PathBuf,
    pub settings: Settings,
}

impl RepackOptions {
    pub fn new(name: impl Into<String>, output_dir: impl Into<PathBuf>, settings: Settings) -> Self {
        Self {
            name: name.into(),
            output_dir: output_dir.into(),
            settings,
        }
    }

    /// Fallout 4 loads "<plugin> - Main.ba2" alongside "<plugin>.esm"
    pub fn ba2_path(&self) -> PathBuf {
        self.output_dir.join(format!("{} - Main.ba2", self.name))
    }

    pub fn plugin_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.esm", self.name))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RepackReport {
    pub archives: usize,
    /// Per-entry tallies across all source archives
    pub entries: ExtractSummary,
    /// Entries replaced by a later archive
    pub overridden: usize,
    pub fuz_decoded: usize,
    pub lip_files: usize,
    pub archived_files: usize,
    pub plugin_records: usize,
    pub plugin_failures: usize,
    pub ba2_path: PathBuf,
    pub plugin_path: PathBuf,
}

impl RepackReport {
    pub fn log_summary(&self, started: Instant) {
        info!("=== Repack Complete ===");
        info!("Source archives: {}", self.archives);
        info!(
            "Entries: {}/{} repacked ({} failed, {} filtered, {} overridden)",
            self.entries.extracted,
            self.entries.attempted(),
            self.entries.failed,
            self.entries.skipped,
            self.overridden
        );
        info!("FUZ decoded: {} ({} with lip data)", self.fuz_decoded, self.lip_files);
        info!("BA2: {:?} ({} files)", self.ba2_path, self.archived_files);
        info!("Plugin: {:?} ({} records)", self.plugin_path, self.plugin_records);
        info!("Time: {:.2?}", started.elapsed());
    }
}

/// Repack `bsa_paths` into one BA2 plus a plugin
///
/// Later archives override earlier ones for the same path, as in the
/// game's load order. Entries that fail to decode are counted and skipped.
pub fn repack(bsa_paths: &[PathBuf], filter: Option<&EntryFilter>, options: &RepackOptions) -> Result<RepackReport> {
    let started = Instant::now();
    let mut report = RepackReport::default();
    let mut staged: Vec<(String, Vec<u8>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for bsa_path in bsa_paths {
        let mut archive = BsaArchive::open(bsa_path)
            .with_context(|| format!("Failed to open BSA: {:?}", bsa_path))?;
        report.archives += 1;

        let files = archive.files.clone();
        let mut summary = ExtractSummary::new(files.len());

        for file in &files {
            let path = file.path();
            if !filter::accepts(filter, &path) {
                summary.skipped += 1;
                continue;
            }

            let unpacked = archive
                .read_file(file)
                .and_then(|data| unpack_entry(&path, data));
            let outputs = match unpacked {
                Ok(outputs) => outputs,
                Err(e) => {
                    warn!("Failed to repack {} from {:?}: {}", path, bsa_path, e);
                    summary.failed += 1;
                    continue;
                }
            };

            if fuz::is_fuz(Path::new(&path)) {
                report.fuz_decoded += 1;
                if outputs.len() > 1 {
                    report.lip_files += 1;
                }
            }
            summary.extracted += 1;

            for (out_path, data) in outputs {
                let key = out_path.to_lowercase();
                match index.get(&key) {
                    Some(&slot) => {
                        debug!("{} overrides an earlier archive", out_path);
                        staged[slot] = (out_path, data);
                        report.overridden += 1;
                    }
                    None => {
                        index.insert(key, staged.len());
                        staged.push((out_path, data));
                    }
                }
            }
        }

        info!(
            "Read {}/{} entries from {:?} ({} failed)",
            summary.extracted,
            summary.attempted(),
            bsa_path,
            summary.failed
        );
        report.entries.merge(&summary);
    }

    if staged.is_empty() {
        bail!("No entries to repack from {} archive(s)", bsa_paths.len());
    }

    let mut builder = Ba2Builder::new(options.settings.compress);
    let mut audio_paths = Vec::new();
    for (path, data) in staged {
        if is_plugin_audio(&path) {
            audio_paths.push(path.clone());
        }
        builder.add_bytes(&path, data)?;
    }
    report.archived_files = builder.len();

    fs::create_dir_all(&options.output_dir)
        .with_context(|| format!("Failed to create output directory: {:?}", options.output_dir))?;

    report.ba2_path = options.ba2_path();
    builder
        .build(&report.ba2_path)
        .with_context(|| format!("Failed to build BA2: {:?}", report.ba2_path))?;
    // payloads are on disk now
    builder.clear();

    let mut writer = options.settings.plugin_writer(&options.name);
    for path in &audio_paths {
        if let Err(e) = writer.add_audio_path(path) {
            warn!("Skipping plugin record for {}: {}", path, e);
            report.plugin_failures += 1;
        }
    }
    report.plugin_records = writer.record_count();
    report.plugin_path = writer
        .generate(&options.plugin_path())
        .with_context(|| format!("Failed to write plugin: {:?}", options.plugin_path()))?;

    report.log_summary(started);
    Ok(report)
}

/// Files one archive entry becomes in the BA2: FUZ containers split into
/// `.xwm` audio plus `.lip` when present, everything else unchanged
fn unpack_entry(path: &str, data: Vec<u8>) -> crate::error::Result<Vec<(String, Vec<u8>)>> {
    let path = normalize_path(path);
    if !fuz::is_fuz(Path::new(&path)) {
        return Ok(vec![(path, data)]);
    }

    let container = FuzContainer::decode(&data)?;
    let mut outputs = Vec::with_capacity(2);
    if let Some(lip) = container.lip() {
        outputs.push((replace_extension(&path, fuz::LIP_EXTENSION), lip.to_vec()));
    }
    outputs.insert(0, (replace_extension(&path, fuz::AUDIO_EXTENSION), container.audio));
    Ok(outputs)
}

fn replace_extension(path: &str, extension: &str) -> String {
    let stem_end = match path.rfind('.') {
        Some(dot) if !path[dot..].contains('\\') => dot,
        _ => path.len(),
    };
    format!("{}.{}", &path[..stem_end], extension)
}

fn is_plugin_audio(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| PLUGIN_AUDIO_EXTENSIONS.iter().any(|a| a.eq_ignore_ascii_case(e)))
}
