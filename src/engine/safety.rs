//! Plan-level guardrails, a direct port of `core/safety.py`'s
//! `SafetyMonitor.analyze_plan`.

use crate::config::Config;

use super::{ActionKind, Plan};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyVerdict {
    Accept,
    Reject(String),
}

impl SafetyVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SafetyVerdict::Accept)
    }
}

pub struct SafetyMonitor {
    canary_files: Vec<String>,
    max_deletions_percent: f64,
    max_deletions_count: u64,
}

impl SafetyMonitor {
    pub fn from_config(config: &Config) -> Self {
        Self {
            canary_files: config.canary_files.clone(),
            max_deletions_percent: config.max_deletions_percent,
            max_deletions_count: config.max_deletions_count,
        }
    }

    /// Policy 1: any non-`Skip` action touching a canary segment is a
    /// fatal violation, independent of every other threshold.
    fn canary_violation(&self, plan: &Plan) -> Option<String> {
        for action in &plan.actions {
            if action.kind.is_skip() {
                continue;
            }
            if self.touches_canary(&action.file.path) {
                return Some(format!("action on canary path {}", action.file.path));
            }
        }
        None
    }

    fn touches_canary(&self, path: &str) -> bool {
        path.split('/')
            .any(|segment| self.canary_files.iter().any(|canary| canary == segment))
    }

    /// Policy 2: reject only when both the absolute count and the
    /// percentage thresholds are exceeded — a conjunction, not either.
    fn deletion_threshold_violation(&self, plan: &Plan) -> Option<String> {
        let deletions = plan.deletions() as u64;
        let total = plan.total();

        if deletions <= self.max_deletions_count {
            return None;
        }
        if total == 0 {
            return None;
        }

        let percent = (deletions as f64 / total as f64) * 100.0;
        if percent > self.max_deletions_percent {
            Some(format!(
                "{deletions} deletions ({percent:.1}%) exceed threshold (max_count={}, max_percent={})",
                self.max_deletions_count, self.max_deletions_percent
            ))
        } else {
            None
        }
    }

    pub fn analyze_plan(&self, plan: &Plan) -> SafetyVerdict {
        if let Some(reason) = self.canary_violation(plan) {
            return SafetyVerdict::Reject(reason);
        }
        if let Some(reason) = self.deletion_threshold_violation(plan) {
            return SafetyVerdict::Reject(reason);
        }
        SafetyVerdict::Accept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Action;
    use crate::provider::{FileKind, FileResource};

    fn monitor(max_count: u64, max_percent: f64) -> SafetyMonitor {
        let mut config = Config::default();
        config.max_deletions_count = max_count;
        config.max_deletions_percent = max_percent;
        SafetyMonitor::from_config(&config)
    }

    fn action(kind: ActionKind, path: &str) -> Action {
        Action {
            kind,
            file: FileResource::new(path, FileKind::File, 1, 1.0),
            reason: "test",
        }
    }

    // S7
    #[test]
    fn s7_rejects_when_both_thresholds_exceeded() {
        let monitor = monitor(2, 20.0);
        let plan = Plan {
            actions: vec![
                action(ActionKind::DeleteLeft, "/a"),
                action(ActionKind::DeleteLeft, "/b"),
                action(ActionKind::DeleteLeft, "/c"),
            ],
        };
        assert!(!monitor.analyze_plan(&plan).is_accepted());
    }

    #[test]
    fn s7_accepts_when_count_under_limit() {
        let monitor = monitor(2, 20.0);
        let plan = Plan {
            actions: vec![
                action(ActionKind::DeleteLeft, "/a"),
                action(ActionKind::CopyLeftToRight, "/b"),
                action(ActionKind::CopyLeftToRight, "/c"),
            ],
        };
        assert!(monitor.analyze_plan(&plan).is_accepted());
    }

    #[test]
    fn canary_rule_rejects_regardless_of_plan_size() {
        let monitor = monitor(1000, 100.0);
        let plan = Plan {
            actions: vec![action(ActionKind::DeleteLeft, "/data/.sys_canary")],
        };
        assert!(!monitor.analyze_plan(&plan).is_accepted());
    }

    #[test]
    fn canary_rule_ignores_skip_actions() {
        let monitor = monitor(1000, 100.0);
        let plan = Plan {
            actions: vec![action(ActionKind::Skip, "/data/.sys_canary")],
        };
        assert!(monitor.analyze_plan(&plan).is_accepted());
    }

    // Property 5: canary rule is absolute.
    #[test]
    fn property_canary_rule_is_absolute_regardless_of_thresholds() {
        for (max_count, max_percent) in [(0u64, 0.0f64), (1, 1.0), (10_000, 100.0)] {
            let monitor = monitor(max_count, max_percent);
            let plan = Plan {
                actions: vec![action(ActionKind::CopyLeftToRight, "/canary.dat")],
            };
            assert!(!monitor.analyze_plan(&plan).is_accepted());
        }
    }

    // Property 4: safety monitor is monotone in deletions.
    #[test]
    fn property_monotone_in_deletions() {
        let monitor = monitor(2, 20.0);
        let mut plan = Plan {
            actions: vec![
                action(ActionKind::DeleteLeft, "/a"),
                action(ActionKind::DeleteLeft, "/b"),
                action(ActionKind::DeleteLeft, "/c"),
            ],
        };
        assert!(!monitor.analyze_plan(&plan).is_accepted());

        for i in 0..10 {
            plan.actions.push(action(ActionKind::DeleteLeft, &format!("/extra{i}")));
            assert!(!monitor.analyze_plan(&plan).is_accepted());
        }
    }
}
