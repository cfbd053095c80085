//! Human-in-the-loop comparison of two arbitrary trees (spec §4.7), a
//! simpler specialization of the decision engine, grounded in
//! `compare_folders.py`.

use crate::provider::FileResource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suggestion {
    MoveToRight,
    DeleteFromLeft,
    ManualReview,
}

#[derive(Debug, Clone)]
pub struct ComparisonEntry {
    pub relative_path: String,
    pub left: Option<FileResource>,
    pub right: Option<FileResource>,
    pub suggestion: Suggestion,
}

#[derive(Debug, Clone, Default)]
pub struct ComparisonResult {
    pub only_in_left: Vec<ComparisonEntry>,
    pub only_in_right: Vec<ComparisonEntry>,
    pub size_mismatched: Vec<ComparisonEntry>,
}

/// Compares two flat file inventories keyed by relative path, producing
/// three buckets plus a per-entry suggestion. Only files are compared —
/// directory entries carry no size/content to reconcile.
pub fn compare(left: &[FileResource], right: &[FileResource]) -> ComparisonResult {
    use std::collections::HashMap;

    let left_by_path: HashMap<&str, &FileResource> =
        left.iter().filter(|f| f.is_file()).map(|f| (f.path.as_str(), f)).collect();
    let right_by_path: HashMap<&str, &FileResource> =
        right.iter().filter(|f| f.is_file()).map(|f| (f.path.as_str(), f)).collect();

    let mut result = ComparisonResult::default();

    for (path, file) in &left_by_path {
        match right_by_path.get(path) {
            None => result.only_in_left.push(ComparisonEntry {
                relative_path: path.to_string(),
                left: Some((*file).clone()),
                right: None,
                suggestion: Suggestion::MoveToRight,
            }),
            Some(other) if other.size == file.size => {}
            Some(other) => result.size_mismatched.push(ComparisonEntry {
                relative_path: path.to_string(),
                left: Some((*file).clone()),
                right: Some((*other).clone()),
                suggestion: Suggestion::ManualReview,
            }),
        }
    }

    for (path, file) in &right_by_path {
        if !left_by_path.contains_key(path) {
            result.only_in_right.push(ComparisonEntry {
                relative_path: path.to_string(),
                left: None,
                right: Some((*file).clone()),
                suggestion: Suggestion::DeleteFromLeft,
            });
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::FileKind;

    fn file(path: &str, size: u64) -> FileResource {
        FileResource::new(path, FileKind::File, size, 0.0)
    }

    #[test]
    fn only_in_left_suggests_move_to_right() {
        let left = vec![file("/a.txt", 10)];
        let right = vec![];
        let result = compare(&left, &right);
        assert_eq!(result.only_in_left.len(), 1);
        assert_eq!(result.only_in_left[0].suggestion, Suggestion::MoveToRight);
    }

    #[test]
    fn only_in_right_suggests_delete_from_left() {
        let left = vec![];
        let right = vec![file("/b.txt", 10)];
        let result = compare(&left, &right);
        assert_eq!(result.only_in_right.len(), 1);
        assert_eq!(result.only_in_right[0].suggestion, Suggestion::DeleteFromLeft);
    }

    #[test]
    fn size_mismatch_suggests_manual_review() {
        let left = vec![file("/c.txt", 10)];
        let right = vec![file("/c.txt", 20)];
        let result = compare(&left, &right);
        assert_eq!(result.size_mismatched.len(), 1);
        assert_eq!(result.size_mismatched[0].suggestion, Suggestion::ManualReview);
    }

    #[test]
    fn identical_files_appear_in_no_bucket() {
        let left = vec![file("/d.txt", 10)];
        let right = vec![file("/d.txt", 10)];
        let result = compare(&left, &right);
        assert!(result.only_in_left.is_empty());
        assert!(result.only_in_right.is_empty());
        assert!(result.size_mismatched.is_empty());
    }
}
