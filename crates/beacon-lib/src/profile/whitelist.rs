use crate::profile::types::FileRecord;

/// Default protected file: the client options file survives restores.
const DEFAULT_PATTERN: &str = "options.txt";

/// Selects which manifest entries are protected from being overwritten or
/// removed by a sync-from-server restore.
///
/// Patterns are trailing path fragments matched on segment boundaries, so
/// `options.txt` protects `options.txt` and `config/options.txt` but not
/// `myoptions.txt`.
#[derive(Debug, Clone)]
pub struct WhitelistFilter {
    patterns: Vec<String>,
}

impl Default for WhitelistFilter {
    fn default() -> Self {
        Self {
            patterns: vec![DEFAULT_PATTERN.to_string()],
        }
    }
}

impl WhitelistFilter {
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }

    pub fn matches(&self, relative_path: &str) -> bool {
        self.patterns.iter().any(|pattern| {
            relative_path == pattern
                || relative_path.ends_with(&format!("/{}", pattern))
        })
    }

    /// Return the protected subsequence of `files`, by relative path.
    pub fn filter(&self, files: &[FileRecord]) -> Vec<FileRecord> {
        files
            .iter()
            .filter(|f| self.matches(&f.relative_path))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str) -> FileRecord {
        FileRecord {
            relative_path: path.to_string(),
            size: 1,
            hash: format!("hash-{}", path),
        }
    }

    #[test]
    fn default_pattern_protects_options_file() {
        let filter = WhitelistFilter::default();
        let files = vec![
            record("options.txt"),
            record("config/options.txt"),
            record("mods/sodium.jar"),
        ];

        let protected = filter.filter(&files);
        assert_eq!(protected.len(), 2);
        assert!(protected.iter().all(|f| f.relative_path.ends_with("options.txt")));
    }

    #[test]
    fn suffix_match_respects_segment_boundaries() {
        let filter = WhitelistFilter::default();
        assert!(!filter.matches("myoptions.txt"));
        assert!(!filter.matches("config/myoptions.txt"));
        assert!(filter.matches("deep/nested/options.txt"));
    }

    #[test]
    fn custom_patterns_extend_protection() {
        let filter = WhitelistFilter::new(vec![
            "options.txt".to_string(),
            "servers.dat".to_string(),
        ]);

        assert!(filter.matches("servers.dat"));
        assert!(filter.matches("options.txt"));
        assert!(!filter.matches("mods/servers.dat.jar"));
    }
}
