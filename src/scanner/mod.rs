//! Tree enumeration and structural-hygiene analysis (spec §4.3).
//!
//! Given a [`Provider`] and a root path, walks the subtree once, classifies
//! every file against the ignore rules, and derives the empty-folder set —
//! the algorithm this crate exists to get right.

pub mod hygiene;
pub mod ignore;

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use futures::StreamExt;
use regex::Regex;

use crate::config::Config;
use crate::error::Result;
use crate::provider::{FileResource, ListOptions, Provider};

use ignore::IgnoreRules;

const DEFAULT_CONFLICT_SUBSTRING: &str = " (conflicted copy)";

/// Result of one subtree scan (spec §3's `ScanResult`).
#[derive(Debug, Default)]
pub struct ScanResult {
    pub all_folders: HashSet<String>,
    pub folders_with_content: HashSet<String>,
    /// Deepest-first, so deleting in order never hits "directory not empty".
    pub empty_folders: Vec<String>,
    pub files: Vec<FileResource>,
    pub conflicts: Vec<FileResource>,
    pub folder_sizes: HashMap<String, u64>,
    pub files_ignored: u64,
    pub scan_duration: Duration,
    pub hygiene_score: u32,
    pub wasted_bytes: u64,
}

/// Enumerates `root` on `provider` and computes the full [`ScanResult`].
pub async fn scan(provider: &dyn Provider, root: &str, config: &Config) -> Result<ScanResult> {
    let started = Instant::now();
    let rules = IgnoreRules::from_config(config);
    let conflict_pattern = config
        .conflict_pattern
        .as_deref()
        .map(Regex::new)
        .transpose()
        .map_err(|e| crate::error::MeridianError::Config(format!("invalid conflict_pattern: {e}")))?;

    let mut all_folders: HashSet<String> = HashSet::new();
    let mut folders_with_content: HashSet<String> = HashSet::new();
    let mut files = Vec::new();
    let mut conflicts = Vec::new();
    let mut folder_sizes: HashMap<String, u64> = HashMap::new();
    let mut files_ignored: u64 = 0;

    all_folders.insert(root.to_string());

    let mut entries = provider.list(root, ListOptions::recursive()).await?;
    while let Some(entry) = entries.next().await {
        let entry = entry?;

        if is_under_excluded_subtree(&entry.path, &rules) {
            continue;
        }

        if entry.is_dir() {
            all_folders.insert(entry.path.clone());
            continue;
        }

        if !entry.is_file() {
            continue;
        }

        let parent = parent_of(&entry.path);
        for ancestor in ancestors_of(&parent) {
            all_folders.insert(ancestor);
        }

        let is_conflict = is_conflict_copy(&entry.name, conflict_pattern.as_ref());
        let is_system_ignored = config.ignore_system_files && rules.is_system_file(&entry.name);

        if is_system_ignored {
            files_ignored += 1;
        } else {
            folders_with_content.insert(parent.clone());
        }

        for ancestor in ancestors_of(&parent).chain(std::iter::once(parent.clone())) {
            *folder_sizes.entry(ancestor).or_insert(0) += entry.size;
        }

        if is_conflict {
            conflicts.push(entry.clone());
        }
        files.push(entry);
    }

    let empty_folders = compute_empty_folders(&all_folders, &folders_with_content);
    let wasted_bytes: u64 = conflicts.iter().map(|f| f.size).sum();
    let hygiene_score = hygiene::hygiene_score(empty_folders.len(), all_folders.len(), conflicts.len(), files.len());

    Ok(ScanResult {
        all_folders,
        folders_with_content,
        empty_folders,
        files,
        conflicts,
        folder_sizes,
        files_ignored,
        scan_duration: started.elapsed(),
        hygiene_score,
        wasted_bytes,
    })
}

fn is_conflict_copy(name: &str, pattern: Option<&Regex>) -> bool {
    match pattern {
        Some(re) => re.is_match(name),
        None => name.contains(DEFAULT_CONFLICT_SUBSTRING),
    }
}

fn is_under_excluded_subtree(path: &str, rules: &IgnoreRules) -> bool {
    path.trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .any(|segment| rules.is_excluded_folder(segment))
}

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
        None => "/".to_string(),
    }
}

/// All ancestors of `path`, from its immediate parent up to (and including)
/// the root, but not `path` itself.
fn ancestors_of(path: &str) -> impl Iterator<Item = String> + '_ {
    let mut current = path.to_string();
    std::iter::from_fn(move || {
        if current == "/" {
            return None;
        }
        let parent = parent_of(&current);
        let result = parent.clone();
        current = parent;
        Some(result)
    })
}

/// The empty-folder algorithm from spec §4.3: seed with content, close
/// upward to the root, then close across siblings until a fixed point,
/// finally take the complement and sort deepest-first.
fn compute_empty_folders(all_folders: &HashSet<String>, folders_with_content: &HashSet<String>) -> Vec<String> {
    let mut has_content: HashSet<String> = folders_with_content.clone();

    for folder in folders_with_content {
        for ancestor in ancestors_of(folder) {
            has_content.insert(ancestor);
        }
    }

    let mut children_of: HashMap<String, Vec<String>> = HashMap::new();
    for folder in all_folders {
        if folder == "/" {
            continue;
        }
        children_of.entry(parent_of(folder)).or_default().push(folder.clone());
    }

    loop {
        let mut changed = false;
        for folder in all_folders {
            if has_content.contains(folder) {
                continue;
            }
            if let Some(children) = children_of.get(folder) {
                if children.iter().any(|c| has_content.contains(c)) {
                    has_content.insert(folder.clone());
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }

    let mut empty: Vec<String> = all_folders.difference(&has_content).cloned().collect();
    // Deepest first; ties broken lexically for reproducible test fixtures.
    empty.sort_by(|a, b| depth(b).cmp(&depth(a)).then_with(|| a.cmp(b)));
    empty
}

fn depth(path: &str) -> usize {
    path.matches('/').count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folders(paths: &[&str]) -> HashSet<String> {
        paths.iter().map(|s| s.to_string()).collect()
    }

    // S1: a chain with no files at all — everything is empty, deepest first.
    #[test]
    fn s1_empty_chain() {
        let all = folders(&["/a", "/a/b", "/a/b/c"]);
        let with_content = HashSet::new();
        let empty = compute_empty_folders(&all, &with_content);
        assert_eq!(empty, vec!["/a/b/c", "/a/b", "/a"]);
    }

    // S2: siblings where one has content and one doesn't.
    #[test]
    fn s2_mixed_siblings() {
        let all = folders(&["/p", "/p/e", "/p/f"]);
        let with_content = folders(&["/p/f"]);
        let empty = compute_empty_folders(&all, &with_content);
        assert_eq!(empty, vec!["/p/e"]);
    }

    #[test]
    fn property_empty_and_content_sets_are_disjoint() {
        let all = folders(&["/a", "/a/b", "/a/b/c", "/a/d"]);
        let with_content = folders(&["/a/b/c"]);
        let empty = compute_empty_folders(&all, &with_content);
        for folder in &empty {
            assert!(!with_content.contains(folder));
        }
    }

    #[test]
    fn property_ancestors_of_content_are_never_empty() {
        let all = folders(&["/a", "/a/b", "/a/b/c"]);
        let with_content = folders(&["/a/b/c"]);
        let empty = compute_empty_folders(&all, &with_content);
        assert!(!empty.contains(&"/a".to_string()));
        assert!(!empty.contains(&"/a/b".to_string()));
    }

    #[test]
    fn sort_order_is_strictly_non_increasing_depth() {
        let all = folders(&["/a", "/a/b", "/a/b/c", "/x"]);
        let empty = compute_empty_folders(&all, &HashSet::new());
        let mut last_depth = usize::MAX;
        for folder in &empty {
            let d = depth(folder);
            assert!(d <= last_depth);
            last_depth = d;
        }
    }

    #[test]
    fn conflict_copy_default_pattern_matches_literal_substring() {
        assert!(is_conflict_copy("report (conflicted copy).txt", None));
        assert!(!is_conflict_copy("report.txt", None));
    }

    #[test]
    fn conflict_copy_honors_configured_regex() {
        let re = Regex::new(r"__CONFLICT__").unwrap();
        assert!(is_conflict_copy("report__CONFLICT__.txt", Some(&re)));
        assert!(!is_conflict_copy("report (conflicted copy).txt", Some(&re)));
    }

    #[test]
    fn ancestors_of_root_is_empty() {
        let found: Vec<String> = ancestors_of("/").collect();
        assert!(found.is_empty());
    }

    #[test]
    fn ancestors_of_nested_path_walks_to_root() {
        let found: Vec<String> = ancestors_of("/a/b/c").collect();
        assert_eq!(found, vec!["/a/b", "/a", "/"]);
    }

    #[tokio::test]
    async fn s3_system_file_only_folder_is_empty() {
        use crate::provider::local::LocalProvider;
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("x")).unwrap();
        std::fs::write(dir.path().join("x/.DS_Store"), b"").unwrap();

        let provider = LocalProvider::new(dir.path());
        let config = Config::default();
        let result = scan(&provider, "/", &config).await.unwrap();

        assert!(result.empty_folders.contains(&"/x".to_string()));
        assert_eq!(result.files_ignored, 1);
    }
}
