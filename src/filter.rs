/// Glob-style entry filter used by archive extraction
/// Matching is case-insensitive with separators normalized to backslash.
/// A pattern containing a separator is anchored at the archive root
/// ("sound\*"); one without a separator may also match any trailing run of
/// components ("hello.fuz" matches "sound\voice\hello.fuz")

use wildmatch::WildMatch;

#[derive(Debug, Clone)]
pub struct EntryFilter {
    matcher: WildMatch,
    /// Pattern names a folder, so it only matches from the root
    anchored: bool,
}

impl EntryFilter {
    pub fn new(pattern: &str) -> Self {
        let pattern = normalize(pattern);
        Self {
            matcher: WildMatch::new_case_insensitive(&pattern),
            anchored: pattern.contains('\\'),
        }
    }

    /// Check an archive-relative path against the pattern
    pub fn matches(&self, path: &str) -> bool {
        let path = normalize(path);
        if self.matcher.matches(&path) {
            return true;
        }
        if self.anchored {
            return false;
        }

        // Right-anchored component match
        path.match_indices('\\')
            .any(|(i, _)| self.matcher.matches(&path[i + 1..]))
    }
}

/// Apply an optional filter; no filter accepts everything
pub fn accepts(filter: Option<&EntryFilter>, path: &str) -> bool {
    filter.map_or(true, |f| f.matches(path))
}

fn normalize(path: &str) -> String {
    path.replace('/', "\\").trim_start_matches('\\').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_pattern() {
        let filter = EntryFilter::new("*.wav");
        assert!(filter.matches("sound\\fx\\wpn_laser.wav"));
        assert!(filter.matches("Sound/FX/WPN_LASER.WAV"));
        assert!(!filter.matches("sound\\fx\\wpn_laser.xwm"));
    }

    #[test]
    fn test_folder_prefix_pattern() {
        let filter = EntryFilter::new("sound/*");
        assert!(filter.matches("sound\\voice\\fallout3.esm\\hello.fuz"));
        assert!(filter.matches("SOUND\\fx\\a.wav"));
        assert!(!filter.matches("music\\battle\\a.wav"));
    }

    #[test]
    fn test_folder_patterns_are_anchored_at_root() {
        let filter = EntryFilter::new("sound\\*");
        assert!(filter.matches("sound\\fx\\a.wav"));
        assert!(!filter.matches("textures\\sound\\x.dds"));

        let filter = EntryFilter::new("fx\\*.wav");
        assert!(!filter.matches("sound\\fx\\a.wav"));
        assert!(EntryFilter::new("sound\\fx\\*.wav").matches("sound\\fx\\a.wav"));
    }

    #[test]
    fn test_bare_names_match_trailing_components() {
        let filter = EntryFilter::new("hello.fuz");
        assert!(filter.matches("sound\\voice\\fallout3.esm\\hello.fuz"));
        assert!(filter.matches("hello.fuz"));
        assert!(!filter.matches("sound\\voice\\ohello.fuz"));
    }

    #[test]
    fn test_no_filter_accepts_all() {
        assert!(accepts(None, "anything"));
        let filter = EntryFilter::new("*.lip");
        assert!(!accepts(Some(&filter), "a.wav"));
    }
}
