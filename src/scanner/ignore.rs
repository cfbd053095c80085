//! Ignore-rule matching for the scanner: system files to treat as absent,
//! and folder names to exclude from descent entirely, grounded in
//! `core/filter.rs`'s `FilterRule` (glob + literal matching).

use glob::Pattern;

use crate::config::Config;

/// Compiled form of `Config`'s ignore lists, built once per scan.
pub struct IgnoreRules {
    system_file_patterns: Vec<CompiledPattern>,
    exclude_folder_names: Vec<String>,
}

enum CompiledPattern {
    Glob(Pattern),
    Literal(String),
}

impl IgnoreRules {
    pub fn from_config(config: &Config) -> Self {
        let system_file_patterns = config
            .system_files
            .iter()
            .map(|raw| {
                let lower = raw.to_lowercase();
                if raw.contains('*') || raw.contains('?') {
                    match Pattern::new(&lower) {
                        Ok(p) => CompiledPattern::Glob(p),
                        Err(_) => CompiledPattern::Literal(lower),
                    }
                } else {
                    CompiledPattern::Literal(lower)
                }
            })
            .collect();

        let exclude_folder_names = config.exclude_patterns.iter().map(|s| s.to_lowercase()).collect();

        Self {
            system_file_patterns,
            exclude_folder_names,
        }
    }

    /// True if a file with this name should be treated as absent for
    /// emptiness accounting (still enumerated, just not counted as content).
    pub fn is_system_file(&self, file_name: &str) -> bool {
        let lower = file_name.to_lowercase();
        self.system_file_patterns.iter().any(|p| match p {
            CompiledPattern::Glob(pattern) => pattern.matches(&lower),
            CompiledPattern::Literal(literal) => literal == &lower,
        })
    }

    /// True if a directory with this final segment must not be descended.
    pub fn is_excluded_folder(&self, folder_name: &str) -> bool {
        let lower = folder_name.to_lowercase();
        self.exclude_folder_names.iter().any(|name| name == &lower)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_literal_system_files_case_insensitively() {
        let rules = IgnoreRules::from_config(&Config::default());
        assert!(rules.is_system_file(".DS_Store"));
        assert!(rules.is_system_file(".ds_store"));
        assert!(rules.is_system_file("Thumbs.db"));
        assert!(!rules.is_system_file("notes.txt"));
    }

    #[test]
    fn matches_glob_system_files() {
        let rules = IgnoreRules::from_config(&Config::default());
        assert!(rules.is_system_file("backup.lnk"));
        assert!(rules.is_system_file("shared.symlink"));
        assert!(!rules.is_system_file("report.pdf"));
    }

    #[test]
    fn excludes_default_folder_names() {
        let rules = IgnoreRules::from_config(&Config::default());
        assert!(rules.is_excluded_folder(".git"));
        assert!(rules.is_excluded_folder("Node_Modules"));
        assert!(!rules.is_excluded_folder("src"));
    }
}
