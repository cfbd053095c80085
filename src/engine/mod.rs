//! Reconciliation: the decision table that turns a per-path (left, right,
//! last-seen) tuple into exactly one [`Action`], a direct port of
//! `core/engine.py`'s `_decide`.

pub mod comparator;
pub mod executor;
pub mod facade;
pub mod retry;
pub mod safety;

use serde::Serialize;

use crate::provider::FileResource;
use crate::state::FileState;

/// Mtime differences within this tolerance are treated as "no newer side",
/// absorbing filesystem-timestamp coarseness (spec §4.4).
const MTIME_TOLERANCE_SECS: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    CopyLeftToRight,
    CopyRightToLeft,
    DeleteLeft,
    DeleteRight,
    Conflict,
    Skip,
}

impl ActionKind {
    pub fn is_deletion(&self) -> bool {
        matches!(self, ActionKind::DeleteLeft | ActionKind::DeleteRight)
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, ActionKind::Skip)
    }
}

/// One unit of reconciliation: a decision plus the file it applies to and
/// why it was made.
#[derive(Debug, Clone)]
pub struct Action {
    pub kind: ActionKind,
    /// For copies, the source side's resource; for deletes/conflicts/skips,
    /// whichever side produced the decisive resource.
    pub file: FileResource,
    pub reason: &'static str,
}

/// The ordered list of Actions produced by the Decision Engine for one run,
/// plus derived counts used by the Safety Monitor.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub actions: Vec<Action>,
}

impl Plan {
    pub fn total(&self) -> usize {
        self.actions.len()
    }

    pub fn deletions(&self) -> usize {
        self.actions.iter().filter(|a| a.kind.is_deletion()).count()
    }

    pub fn copies(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a.kind, ActionKind::CopyLeftToRight | ActionKind::CopyRightToLeft))
            .count()
    }
}

/// Whether two sides' checksums (when both present) or sizes agree
/// "identical enough" not to warrant any action — spec §4.4's first rule,
/// with the optional deep-equal mode from Open Question 3.
fn sides_are_identical(left: &FileResource, right: &FileResource, deep_equal: bool) -> bool {
    if let (Some(l), Some(r)) = (&left.chksum, &right.chksum) {
        return l == r;
    }
    if deep_equal {
        // No checksums on both sides: without one, size-only agreement is
        // not enough to call two files identical in deep-equal mode.
        return false;
    }
    left.size == right.size
}

/// Decides exactly one [`Action`] for one path, given what each side
/// reports (possibly absent) and the persisted last-seen state.
pub fn decide(
    left: Option<&FileResource>,
    right: Option<&FileResource>,
    last_seen: Option<&FileState>,
    deep_equal: bool,
) -> Action {
    match (left, right) {
        (Some(l), Some(r)) => {
            if sides_are_identical(l, r, deep_equal) {
                return Action {
                    kind: ActionKind::Skip,
                    file: l.clone(),
                    reason: "identical",
                };
            }

            if l.mtime > r.mtime + MTIME_TOLERANCE_SECS {
                return Action {
                    kind: ActionKind::CopyLeftToRight,
                    file: l.clone(),
                    reason: "left newer",
                };
            }

            if r.mtime > l.mtime + MTIME_TOLERANCE_SECS {
                return Action {
                    kind: ActionKind::CopyRightToLeft,
                    file: r.clone(),
                    reason: "right newer",
                };
            }

            Action {
                kind: ActionKind::Conflict,
                file: l.clone(),
                reason: "diverged",
            }
        }

        (Some(l), None) => {
            if last_seen.is_some() {
                Action {
                    kind: ActionKind::DeleteLeft,
                    file: l.clone(),
                    reason: "deleted on right",
                }
            } else {
                Action {
                    kind: ActionKind::CopyLeftToRight,
                    file: l.clone(),
                    reason: "new on left",
                }
            }
        }

        (None, Some(r)) => {
            if last_seen.is_some() {
                Action {
                    kind: ActionKind::DeleteRight,
                    file: r.clone(),
                    reason: "deleted on left",
                }
            } else {
                Action {
                    kind: ActionKind::CopyRightToLeft,
                    file: r.clone(),
                    reason: "new on right",
                }
            }
        }

        (None, None) => unreachable!("decide is only called for paths observed on at least one side"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::FileKind;

    fn file(path: &str, size: u64, mtime: f64) -> FileResource {
        FileResource::new(path, FileKind::File, size, mtime)
    }

    fn last_seen(path: &str) -> FileState {
        FileState {
            path: path.to_string(),
            provider_id: "local".to_string(),
            size: 100,
            mtime: 1000.0,
            checksum: None,
            inode: None,
            last_seen_run_id: 1,
        }
    }

    // S4
    #[test]
    fn s4_new_on_left() {
        let left = file("/new.txt", 100, 1000.0);
        let action = decide(Some(&left), None, None, false);
        assert_eq!(action.kind, ActionKind::CopyLeftToRight);
        assert_eq!(action.reason, "new on left");
    }

    // S5
    #[test]
    fn s5_deletion_propagation() {
        let right = file("/old.txt", 50, 500.0);
        let seen = last_seen("/old.txt");
        let action = decide(None, Some(&right), Some(&seen), false);
        assert_eq!(action.kind, ActionKind::DeleteRight);
        assert_eq!(action.reason, "deleted on left");
    }

    // S6
    #[test]
    fn s6_concurrent_divergence() {
        let mut left = file("/d.txt", 200, 2000.0);
        left.chksum = Some("def".to_string());
        let mut right = file("/d.txt", 205, 2000.0);
        right.chksum = Some("xyz".to_string());

        let action = decide(Some(&left), Some(&right), None, false);
        assert_eq!(action.kind, ActionKind::Conflict);
    }

    #[test]
    fn matching_checksums_win_over_size_mismatch() {
        let mut left = file("/a.txt", 100, 1000.0);
        left.chksum = Some("same".to_string());
        let mut right = file("/a.txt", 999, 1000.0);
        right.chksum = Some("same".to_string());

        let action = decide(Some(&left), Some(&right), None, false);
        assert_eq!(action.kind, ActionKind::Skip);
    }

    #[test]
    fn mtime_within_tolerance_is_not_newer() {
        let left = file("/a.txt", 100, 1000.0);
        let right = file("/a.txt", 200, 1001.0);
        let action = decide(Some(&left), Some(&right), None, false);
        assert_eq!(action.kind, ActionKind::Conflict);
    }

    #[test]
    fn mtime_past_tolerance_picks_newer_side() {
        let left = file("/a.txt", 100, 1003.0);
        let right = file("/a.txt", 200, 1000.0);
        let action = decide(Some(&left), Some(&right), None, false);
        assert_eq!(action.kind, ActionKind::CopyLeftToRight);
    }

    #[test]
    fn present_on_left_absent_on_right_without_history_is_new() {
        let left = file("/fresh.txt", 10, 10.0);
        let action = decide(Some(&left), None, None, false);
        assert_eq!(action.kind, ActionKind::CopyLeftToRight);
    }

    #[test]
    fn deep_equal_mode_refuses_size_only_agreement() {
        let left = file("/a.txt", 100, 1000.0);
        let right = file("/a.txt", 100, 1000.0);
        let action = decide(Some(&left), Some(&right), None, true);
        assert_eq!(action.kind, ActionKind::Conflict);
    }

    #[test]
    fn plan_counts_classify_actions() {
        let plan = Plan {
            actions: vec![
                Action { kind: ActionKind::CopyLeftToRight, file: file("/a", 1, 1.0), reason: "new on left" },
                Action { kind: ActionKind::DeleteRight, file: file("/b", 1, 1.0), reason: "deleted on left" },
                Action { kind: ActionKind::Skip, file: file("/c", 1, 1.0), reason: "identical" },
            ],
        };
        assert_eq!(plan.total(), 3);
        assert_eq!(plan.deletions(), 1);
        assert_eq!(plan.copies(), 1);
    }
}
