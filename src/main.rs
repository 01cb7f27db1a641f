mod ba2;
mod binio;
mod bsa;
mod config;
mod error;
mod extraction;
mod filter;
mod fuz;
mod game;
mod plugin;
mod repack;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{error, info, warn};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Instant;

use ba2::{Ba2Archive, Ba2Builder};
use bsa::BsaArchive;
use config::Settings;
use extraction::ExtractSummary;
use filter::EntryFilter;
use game::Game;
use repack::RepackOptions;

#[derive(Parser)]
#[command(name = "fo-audio-repack")]
#[command(version = "1.0.0")]
#[command(about = "Repack Fallout 3 audio archives for Fallout 4", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List the contents of a BSA archive
    ListBsa {
        /// Path to BSA file
        bsa: PathBuf,

        /// Only list entries matching this pattern (e.g. "*.wav")
        #[arg(long)]
        filter: Option<String>,
    },

    /// Extract one or more BSA archives
    ExtractBsa {
        /// BSA files; several archives are extracted in parallel
        #[arg(required = true)]
        bsa: Vec<PathBuf>,

        /// Output directory (one subfolder per archive when several are given)
        #[arg(short, long)]
        output: PathBuf,

        /// Only extract entries matching this pattern
        #[arg(long, conflicts_with = "audio_only")]
        filter: Option<String>,

        /// Only extract the sound tree
        #[arg(long)]
        audio_only: bool,
    },

    /// List the contents of a BA2 archive
    ListBa2 {
        /// Path to BA2 file
        ba2: PathBuf,

        #[arg(long)]
        filter: Option<String>,
    },

    /// Extract a BA2 archive
    ExtractBa2 {
        ba2: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(long, conflicts_with = "file")]
        filter: Option<String>,

        /// Extract only these archive paths (repeatable)
        #[arg(long)]
        file: Vec<String>,
    },

    /// Pack a directory into a general BA2 archive
    BuildBa2 {
        /// Directory to pack
        input: PathBuf,

        /// Output BA2 file
        #[arg(short, long)]
        output: PathBuf,

        /// Archive path prefix for every file (e.g. "Sound")
        #[arg(long, default_value = "")]
        base: String,

        /// Compress payloads (audio archives should stay uncompressed)
        #[arg(long)]
        compress: bool,
    },

    /// Split a FUZ file into audio and lip data
    UnpackFuz {
        fuz: PathBuf,

        /// Audio output (default: sibling .xwm)
        #[arg(long)]
        audio: Option<PathBuf>,

        /// Lip output (default: sibling .lip)
        #[arg(long)]
        lip: Option<PathBuf>,
    },

    /// Create a FUZ file from audio and optional lip data
    PackFuz {
        audio: PathBuf,

        #[arg(long)]
        lip: Option<PathBuf>,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Re-emit a FUZ file as a version 1 container
    ConvertFuz {
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Unpack every FUZ file below a directory
    FuzBatch {
        input: PathBuf,

        /// Output directory (default: next to each source)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate a plugin referencing a directory of audio files
    Plugin {
        /// Directory with audio files (.xwm .wav .fuz .mp3)
        audio_dir: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Plugin name, without extension
        #[arg(long, default_value = "Fallout3Audio")]
        name: String,

        /// Write a full master instead of a light plugin
        #[arg(long)]
        no_light: bool,

        #[arg(long, value_enum)]
        game: Option<Game>,
    },

    /// Repack BSA archives into a Fallout 4 BA2 plus plugin
    Repack {
        #[arg(required = true)]
        bsa: Vec<PathBuf>,

        #[arg(short, long)]
        output: PathBuf,

        /// Base name for "<name>.esm" and "<name> - Main.ba2"
        #[arg(long, default_value = "Fallout3Audio")]
        name: String,

        #[arg(long)]
        filter: Option<String>,

        #[arg(long)]
        compress: bool,

        #[arg(long)]
        no_light: bool,

        #[arg(long, value_enum)]
        game: Option<Game>,
    },

    /// Show the settings file, optionally writing the current values
    Config {
        #[arg(long)]
        save: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // If RUST_LOG is set, use it; otherwise use cli.verbose flag
    if std::env::var("RUST_LOG").is_ok() {
        env_logger::init();
    } else {
        env_logger::Builder::new()
            .filter_level(if cli.verbose {
                log::LevelFilter::Debug
            } else {
                log::LevelFilter::Info
            })
            .init();
    }

    let settings = Settings::load();

    match cli.command {
        Commands::ListBsa { bsa, filter } => {
            list_bsa(&bsa, filter.as_deref())?;
        }
        Commands::ExtractBsa { bsa, output, filter, audio_only } => {
            let selection = if audio_only {
                Selection::AudioOnly
            } else {
                Selection::Matching(filter.as_deref().map(EntryFilter::new))
            };
            extract_bsas(&bsa, &output, &selection)?;
        }
        Commands::ListBa2 { ba2, filter } => {
            list_ba2(&ba2, filter.as_deref())?;
        }
        Commands::ExtractBa2 { ba2, output, filter, file } => {
            let mut archive = Ba2Archive::open(&ba2)
                .with_context(|| format!("Failed to open BA2: {:?}", ba2))?;
            if file.is_empty() {
                let filter = filter.as_deref().map(EntryFilter::new);
                archive
                    .extract(&output, filter.as_ref())
                    .with_context(|| format!("Failed to extract {:?} to {:?}", ba2, output))?;
            } else {
                extract_ba2_entries(&mut archive, &ba2, &file, &output)?;
            }
        }
        Commands::BuildBa2 { input, output, base, compress } => {
            build_ba2(&input, &output, &base, compress || settings.compress)?;
        }
        Commands::UnpackFuz { fuz: fuz_path, audio, lip } => {
            let audio_path = fuz::extract_audio(&fuz_path, audio.as_deref())
                .with_context(|| format!("Failed to unpack audio from {:?}", fuz_path))?;
            info!("Audio: {:?}", audio_path);
            let lip_path = fuz::extract_lip(&fuz_path, lip.as_deref())
                .with_context(|| format!("Failed to unpack lip data from {:?}", fuz_path))?;
            match lip_path {
                Some(lip_path) => info!("Lip: {:?}", lip_path),
                None => info!("No lip data in {:?}", fuz_path),
            }
        }
        Commands::PackFuz { audio, lip, output } => {
            fuz::create(&audio, lip.as_deref(), &output)
                .with_context(|| format!("Failed to pack {:?} into {:?}", audio, output))?;
        }
        Commands::ConvertFuz { input, output } => {
            fuz::convert(&input, &output)
                .with_context(|| format!("Failed to convert {:?} to {:?}", input, output))?;
        }
        Commands::FuzBatch { input, output } => {
            let summary = fuz::process_directory(&input, output.as_deref())
                .with_context(|| format!("Failed to process FUZ files in {:?}", input))?;
            if summary.failed > 0 {
                error!("{} of {} FUZ files failed", summary.failed, summary.found);
            }
        }
        Commands::Plugin { audio_dir, output, name, no_light, game } => {
            let settings = with_overrides(settings, false, no_light, game);
            build_plugin(&audio_dir, &output, &name, &settings)?;
        }
        Commands::Repack { bsa, output, name, filter, compress, no_light, game } => {
            let settings = with_overrides(settings, compress, no_light, game);
            let filter = filter.as_deref().map(EntryFilter::new);
            let options = RepackOptions::new(name, output, settings);
            repack::repack(&bsa, filter.as_ref(), &options)?;
        }
        Commands::Config { save } => {
            info!("Settings file: {:?}", Settings::config_path());
            info!("{}", serde_json::to_string_pretty(&settings)?);
            if save {
                settings.save().context("Failed to save settings")?;
                info!("Settings saved");
            }
        }
    }

    Ok(())
}

/// CLI flags win over the settings file
fn with_overrides(mut settings: Settings, compress: bool, no_light: bool, game: Option<Game>) -> Settings {
    settings.compress |= compress;
    if no_light {
        settings.light_plugin = false;
    }
    if let Some(game) = game {
        settings.target_game = game;
    }
    settings
}

fn list_bsa(bsa_path: &Path, pattern: Option<&str>) -> Result<()> {
    let start = Instant::now();
    let archive = BsaArchive::open(bsa_path)
        .with_context(|| format!("Failed to open BSA: {:?}", bsa_path))?;

    info!("Version: {}", archive.header.version);
    info!("Folders: {}", archive.header.folder_count);
    info!("Files: {}", archive.files.len());

    let filter = pattern.map(EntryFilter::new);
    let mut shown = 0;
    for path in archive.list() {
        if filter::accepts(filter.as_ref(), &path) {
            println!("{}", path);
            shown += 1;
        }
    }

    info!("Listed {} of {} files in {:.2?}", shown, archive.files.len(), start.elapsed());
    Ok(())
}

fn list_ba2(ba2_path: &Path, pattern: Option<&str>) -> Result<()> {
    let archive = Ba2Archive::open(ba2_path)
        .with_context(|| format!("Failed to open BA2: {:?}", ba2_path))?;

    let unpacked: u64 = archive.files().iter().map(|r| u64::from(r.unpacked_size)).sum();
    info!("Version: {}", archive.header.version);
    info!("Files: {} ({} bytes unpacked)", archive.len(), unpacked);
    if archive.is_empty() {
        warn!("{:?} contains no files", ba2_path);
    }

    let filter = pattern.map(EntryFilter::new);
    for path in archive.list() {
        if filter::accepts(filter.as_ref(), &path) {
            println!("{}", path);
        }
    }
    Ok(())
}

/// Extract named entries, keeping the archive's own spelling of each path
fn extract_ba2_entries<R: std::io::Read + std::io::Seek>(
    archive: &mut Ba2Archive<R>,
    ba2_path: &Path,
    names: &[String],
    output_dir: &Path,
) -> Result<()> {
    for name in names {
        let Some(record) = archive.get(name) else {
            bail!("{} not found in {:?}", name, ba2_path);
        };
        let entry_path = record.path.clone();
        let data = archive
            .read_file(name)
            .with_context(|| format!("Failed to read {} from {:?}", entry_path, ba2_path))?;
        let written = extraction::write_entry(output_dir, &entry_path, &data)?;
        info!("Extracted {} -> {:?}", entry_path, written);
    }
    Ok(())
}

fn build_ba2(input: &Path, output: &Path, base: &str, compress: bool) -> Result<()> {
    let mut builder = Ba2Builder::new(compress);
    builder
        .add_directory(input, base)
        .with_context(|| format!("Failed to collect files from {:?}", input))?;
    builder
        .build(output)
        .with_context(|| format!("Failed to build BA2: {:?}", output))?;

    if let Some(records) = builder.records() {
        let packed = records.iter().filter(|r| r.is_compressed()).count();
        info!("{} of {} files stored compressed", packed, records.len());
    }
    Ok(())
}

/// Which BSA entries to extract
enum Selection {
    Matching(Option<EntryFilter>),
    AudioOnly,
}

/// Extract archives in parallel, each with its own reader and progress bar
fn extract_bsas(bsa_paths: &[PathBuf], output_dir: &Path, selection: &Selection) -> Result<()> {
    let start = Instant::now();
    let progress = MultiProgress::new();
    let style = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
        .progress_chars("=>-");

    let results: Vec<(PathBuf, crate::error::Result<ExtractSummary>)> = bsa_paths
        .par_iter()
        .map(|bsa_path| {
            let target = if bsa_paths.len() > 1 {
                output_dir.join(bsa_path.file_stem().unwrap_or_default())
            } else {
                output_dir.to_path_buf()
            };

            let pb = progress.add(ProgressBar::new(0));
            pb.set_style(style.clone());
            pb.set_message(bsa_path.file_name().unwrap_or_default().to_string_lossy().into_owned());

            let result = BsaArchive::open(bsa_path).and_then(|mut archive| match selection {
                Selection::AudioOnly => archive.extract_audio_only(&target, &pb),
                Selection::Matching(filter) => archive.extract_with_progress(&target, filter.as_ref(), &pb),
            });
            pb.finish();
            (bsa_path.clone(), result)
        })
        .collect();

    let mut total = ExtractSummary::default();
    let mut failed_archives = 0;
    for (bsa_path, result) in results {
        match result {
            Ok(summary) => total.merge(&summary),
            Err(e) => {
                error!("Failed to extract {:?}: {}", bsa_path, e);
                failed_archives += 1;
            }
        }
    }

    info!(
        "Extracted {}/{} files from {} archives in {:.2?}",
        total.extracted,
        total.attempted(),
        bsa_paths.len() - failed_archives,
        start.elapsed()
    );

    if failed_archives > 0 {
        bail!("{} of {} archives failed", failed_archives, bsa_paths.len());
    }
    Ok(())
}

fn build_plugin(audio_dir: &Path, output_dir: &Path, name: &str, settings: &Settings) -> Result<()> {
    let writer = settings.plugin_writer(name);
    plugin::writer::write_audio_plugin(writer, audio_dir, output_dir)
        .with_context(|| format!("Failed to build plugin from {:?}", audio_dir))?;
    Ok(())
}
