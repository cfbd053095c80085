//! Hygiene score: a single number in [0, 100] summarizing tree cleanliness.

/// `e = |empty| / |all_folders|`, `c = |conflicts| / |files|` (spec §4.3).
pub fn hygiene_score(empty_folders: usize, all_folders: usize, conflicts: usize, files: usize) -> u32 {
    let mut score: f64 = 100.0;

    let e = if all_folders > 0 {
        empty_folders as f64 / all_folders as f64
    } else {
        0.0
    };
    score -= (e * 100.0 * 0.6).min(30.0);

    let c = if files > 0 { conflicts as f64 / files as f64 } else { 0.0 };
    score -= (c * 100.0 * 5.0).min(50.0);

    score.floor().max(0.0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfectly_clean_tree_scores_100() {
        assert_eq!(hygiene_score(0, 10, 0, 100), 100);
    }

    #[test]
    fn empty_tree_with_no_folders_or_files_scores_100() {
        assert_eq!(hygiene_score(0, 0, 0, 0), 100);
    }

    #[test]
    fn empty_folder_penalty_is_capped_at_30() {
        // e = 1.0 -> 100*0.6 = 60, capped to 30
        assert_eq!(hygiene_score(10, 10, 0, 100), 70);
    }

    #[test]
    fn conflict_penalty_is_capped_at_50() {
        // c = 1.0 -> 100*5 = 500, capped to 50
        assert_eq!(hygiene_score(0, 10, 100, 100), 50);
    }

    #[test]
    fn combined_penalties_floor_at_zero() {
        assert_eq!(hygiene_score(10, 10, 100, 100), 20);
    }
}
