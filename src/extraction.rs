/// Shared extraction plumbing for the archive readers
/// Writes decoded entries under an output root and tallies per-file results

use log::{info, warn};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;

use crate::error::{ArchiveError, Result};

/// Outcome of one archive extraction ("extracted N/M files")
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    /// Entries in the archive
    pub total: usize,
    /// Entries that passed the filter and were written
    pub extracted: usize,
    /// Entries that passed the filter but failed to decode or write
    pub failed: usize,
    /// Entries rejected by the filter
    pub skipped: usize,
}

impl ExtractSummary {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    /// Entries that were attempted (passed the filter)
    pub fn attempted(&self) -> usize {
        self.extracted + self.failed
    }

    pub fn merge(&mut self, other: &ExtractSummary) {
        self.total += other.total;
        self.extracted += other.extracted;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }

    pub(crate) fn log_completion(&self, archive: &Path, output_dir: &Path, started: Instant) {
        info!(
            "Extracted {}/{} files from {:?} to {:?} ({} failed, {} filtered) in {:.2?}",
            self.extracted,
            self.attempted(),
            archive,
            output_dir,
            self.failed,
            self.skipped,
            started.elapsed()
        );
        if self.failed > 0 {
            warn!("{} entries in {:?} could not be extracted", self.failed, archive);
        }
    }
}

/// Map an archive-relative path (either separator) onto the output root
///
/// Rejects absolute paths and `..` components so a hostile archive cannot
/// write outside `output_dir`.
pub fn output_path_for(output_dir: &Path, archive_path: &str) -> Result<PathBuf> {
    let relative: PathBuf = archive_path
        .split(['\\', '/'])
        .filter(|part| !part.is_empty())
        .collect();

    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes || relative.as_os_str().is_empty() {
        return Err(ArchiveError::format(
            archive_path,
            "entry path is empty or escapes the output directory",
        ));
    }

    Ok(output_dir.join(relative))
}

/// Write one decoded entry, creating parent directories as needed
pub fn write_entry(output_dir: &Path, archive_path: &str, data: &[u8]) -> Result<PathBuf> {
    let output_path = output_path_for(output_dir, archive_path)?;
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent).map_err(|e| ArchiveError::from_io(e, parent))?;
    }
    fs::write(&output_path, data).map_err(|e| ArchiveError::from_io(e, &output_path))?;
    Ok(output_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_path_translates_separators() {
        let root = Path::new("out");
        let path = output_path_for(root, "sound\\fx/wpn.wav").unwrap();
        assert_eq!(path, root.join("sound").join("fx").join("wpn.wav"));
    }

    #[test]
    fn test_output_path_rejects_parent_components() {
        let root = Path::new("out");
        assert!(output_path_for(root, "..\\..\\evil.dll").is_err());
        assert!(output_path_for(root, "").is_err());
    }

    #[test]
    fn test_write_entry_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let written = write_entry(dir.path(), "music\\battle\\a.wav", b"RIFF").unwrap();
        assert_eq!(fs::read(written).unwrap(), b"RIFF");
    }

    #[test]
    fn test_summary_merge() {
        let mut a = ExtractSummary { total: 3, extracted: 2, failed: 1, skipped: 0 };
        let b = ExtractSummary { total: 2, extracted: 1, failed: 0, skipped: 1 };
        a.merge(&b);
        assert_eq!(a.total, 5);
        assert_eq!(a.attempted(), 4);
    }
}
