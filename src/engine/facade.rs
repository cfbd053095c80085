//! `Engine` — the typed handle this crate uses instead of the Python
//! original's global `app_state` dict (spec §9 Design Notes), grounded in
//! `main.py`'s module-level state plus `core/engine.py`'s `SyncEngine`.
//!
//! Everything the Operational API (§4.11) needs to read or trigger lives
//! on this one struct: current config, durable state, in-flight
//! scan/compare/sync bookkeeping, and the notification fan-out.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::config::{Config, ProviderMode};
use crate::credentials::CredentialStore;
use crate::engine::comparator::{self, ComparisonResult};
use crate::engine::executor::{self, ActionOutcome, CancellationToken, ExecutorConfig, TransferExecutor};
use crate::engine::safety::{SafetyMonitor, SafetyVerdict};
use crate::engine::{decide, Action, ActionKind, Plan};
use crate::error::{MeridianError, Result};
use crate::notify::{Level, NotificationManager};
use crate::provider::factory::build_provider;
use crate::provider::{FileResource, ListOptions, Provider};
use crate::scanner::ignore::IgnoreRules;
use crate::scanner::{self, ScanResult};
use crate::state::{RunStatus, StateStore};
use crate::stats::{ProgressSnapshot, RunProgress};

/// Everything `/status` reports beyond the raw config, mirroring the
/// `safe_keys` subset `main.py`'s `get_status` returns.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSnapshot {
    pub scanning: bool,
    pub deleting: bool,
    pub comparing: bool,
    pub compare_executing: bool,
    pub scan_progress: Option<ProgressSnapshot>,
    pub empty_folders_count: usize,
    pub conflicts_count: usize,
    pub files_found_count: usize,
    pub next_scheduled_run_secs: Option<f64>,
}

#[derive(Default)]
struct Busy {
    scanning: std::sync::atomic::AtomicBool,
    deleting: std::sync::atomic::AtomicBool,
    comparing: std::sync::atomic::AtomicBool,
    compare_executing: std::sync::atomic::AtomicBool,
}

impl Busy {
    fn is_scanning(&self) -> bool {
        self.scanning.load(std::sync::atomic::Ordering::SeqCst)
    }
    fn is_deleting(&self) -> bool {
        self.deleting.load(std::sync::atomic::Ordering::SeqCst)
    }
    fn is_comparing(&self) -> bool {
        self.comparing.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// An in-progress or finished ad-hoc comparison, started by
/// `/compare/start` and read back by `/compare/status` and
/// `/compare/results`.
#[derive(Default)]
struct CompareSession {
    left_mode: Option<ProviderMode>,
    right_mode: Option<ProviderMode>,
    left_path: String,
    right_path: String,
    result: Option<ComparisonResult>,
}

#[derive(Default)]
struct EngineState {
    last_scan: Option<ScanResult>,
    last_scan_folder: Option<String>,
    compare: CompareSession,
    last_run_progress: Option<RunProgress>,
}

/// The typed handle wiring config, durable state, credentials and
/// notifications together, replacing the original's global dict.
pub struct Engine {
    config: RwLock<Config>,
    config_path: Option<std::path::PathBuf>,
    state_store: StateStore,
    credentials: Arc<dyn CredentialStore>,
    notifications: RwLock<NotificationManager>,
    busy: Busy,
    cancel: CancellationToken,
    inner: RwLock<EngineState>,
}

impl Engine {
    pub fn new(
        config: Config,
        config_path: Option<std::path::PathBuf>,
        state_store: StateStore,
        credentials: Arc<dyn CredentialStore>,
        notifications: NotificationManager,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            config_path,
            state_store,
            credentials,
            notifications: RwLock::new(notifications),
            busy: Busy::default(),
            cancel: CancellationToken::new(),
            inner: RwLock::new(EngineState::default()),
        }
    }

    pub async fn config_snapshot(&self) -> Config {
        self.config.read().await.clone()
    }

    pub async fn update_config(&self, updated: Config) -> Result<()> {
        if let Some(path) = &self.config_path {
            updated.save(path)?;
        }
        *self.config.write().await = updated;
        Ok(())
    }

    pub async fn status(&self) -> StatusSnapshot {
        let inner = self.inner.read().await;
        let config = self.config.read().await;

        let next_scheduled_run_secs = if config.schedule.enabled {
            let next_run = config.schedule.last_run + config.schedule.interval_hours * 3600.0;
            Some(next_run)
        } else {
            None
        };

        StatusSnapshot {
            scanning: self.busy.is_scanning(),
            deleting: self.busy.is_deleting(),
            comparing: self.busy.is_comparing(),
            compare_executing: self.busy.compare_executing.load(std::sync::atomic::Ordering::SeqCst),
            scan_progress: inner.last_run_progress.as_ref().map(|p| p.snapshot()),
            empty_folders_count: inner.last_scan.as_ref().map(|s| s.empty_folders.len()).unwrap_or(0),
            conflicts_count: inner.last_scan.as_ref().map(|s| s.conflicts.len()).unwrap_or(0),
            files_found_count: inner.last_scan.as_ref().map(|s| s.files.len()).unwrap_or(0),
            next_scheduled_run_secs,
        }
    }

    /// `scanning`/`deleting`/`comparing` busy state, for the scheduler's
    /// `should_skip_busy` check.
    pub fn busy_flags(&self) -> (bool, bool, bool) {
        (self.busy.is_scanning(), self.busy.is_deleting(), self.busy.is_comparing())
    }

    pub fn request_cancel(&self) {
        self.cancel.cancel();
    }

    async fn provider_for(&self, mode: ProviderMode, config: &Config) -> Result<Arc<dyn Provider>> {
        build_provider(mode, config, self.credentials.as_ref()).await
    }

    /// `GET /subfolders?path=&mode=` — shallow listing for tree navigation.
    pub async fn subfolders(&self, path: &str, mode: Option<ProviderMode>) -> Result<Vec<FileResource>> {
        let config = self.config.read().await;
        let mode = mode.unwrap_or(config.mode);
        let provider = self.provider_for(mode, &config).await?;
        drop(config);

        let mut stream = provider.list(path, ListOptions::shallow()).await?;
        let mut out = Vec::new();
        use futures::StreamExt;
        while let Some(entry) = stream.next().await {
            let entry = entry?;
            if entry.is_dir() {
                out.push(entry);
            }
        }
        out.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(out)
    }

    /// `POST /scan { folder }` — scans the configured single-pane provider,
    /// storing the result for `/status`, `/export` and `/delete` to read.
    pub async fn scan(&self, folder: &str) -> Result<()> {
        if self.busy.scanning.swap(true, std::sync::atomic::Ordering::SeqCst) {
            return Err(MeridianError::Other("a scan is already in progress".to_string()));
        }

        let config = self.config.read().await.clone();
        let result = async {
            let provider = self.provider_for(config.mode, &config).await?;
            scanner::scan(provider.as_ref(), folder, &config).await
        }
        .await;

        self.busy.scanning.store(false, std::sync::atomic::Ordering::SeqCst);

        match result {
            Ok(scan_result) => {
                info!(folder, files = scan_result.files.len(), "scan complete");
                let mut inner = self.inner.write().await;
                inner.last_scan_folder = Some(folder.to_string());
                inner.last_scan = Some(scan_result);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "scan failed");
                Err(e)
            }
        }
    }

    /// `POST /delete` — deletes the empty folders from the latest scan,
    /// deepest-first, each independently re-verified before removal.
    pub async fn delete_empty_folders(&self) -> Result<Vec<ActionOutcome>> {
        if self.busy.deleting.swap(true, std::sync::atomic::Ordering::SeqCst) {
            return Err(MeridianError::Other("a delete is already in progress".to_string()));
        }

        let outcome = self.run_deletion(|scan| scan.empty_folders.clone(), ActionKind::DeleteLeft).await;
        self.busy.deleting.store(false, std::sync::atomic::Ordering::SeqCst);
        outcome
    }

    /// `POST /conflicts/delete` — deletes the conflict-copy files found by
    /// the latest scan.
    pub async fn delete_conflicts(&self) -> Result<Vec<ActionOutcome>> {
        if self.busy.deleting.swap(true, std::sync::atomic::Ordering::SeqCst) {
            return Err(MeridianError::Other("a delete is already in progress".to_string()));
        }

        let outcome = self
            .run_deletion(|scan| scan.conflicts.iter().map(|f| f.path.clone()).collect(), ActionKind::DeleteLeft)
            .await;
        self.busy.deleting.store(false, std::sync::atomic::Ordering::SeqCst);
        outcome
    }

    async fn run_deletion(
        &self,
        paths_of: impl FnOnce(&ScanResult) -> Vec<String>,
        kind: ActionKind,
    ) -> Result<Vec<ActionOutcome>> {
        let config = self.config.read().await.clone();
        let paths = {
            let inner = self.inner.read().await;
            let scan = inner
                .last_scan
                .as_ref()
                .ok_or_else(|| MeridianError::Other("no scan result available; run a scan first".to_string()))?;
            paths_of(scan)
        };

        let provider = self.provider_for(config.mode, &config).await?;
        let ignore_rules = IgnoreRules::from_config(&config);

        let mut outcomes = Vec::with_capacity(paths.len());
        for path in paths {
            if self.cancel.is_cancelled() {
                outcomes.push(ActionOutcome {
                    path,
                    kind,
                    outcome: executor::Outcome::Cancelled,
                    reason: "cancelled",
                });
                continue;
            }
            let result = executor::delete_with_verification(provider.as_ref(), &path, &ignore_rules).await;
            outcomes.push(ActionOutcome { path, kind, outcome: result, reason: "operator requested" });
        }
        Ok(outcomes)
    }

    /// `GET /conflicts`
    pub async fn conflicts(&self) -> Vec<FileResource> {
        self.inner.read().await.last_scan.as_ref().map(|s| s.conflicts.clone()).unwrap_or_default()
    }

    /// `GET /export?format=` — the latest scan as a report, serialized by
    /// the caller (API layer owns JSON/CSV framing).
    pub async fn export_empty_folders(&self) -> Result<Vec<String>> {
        let inner = self.inner.read().await;
        let scan = inner
            .last_scan
            .as_ref()
            .ok_or_else(|| MeridianError::Other("no scan result available".to_string()))?;
        Ok(scan.empty_folders.clone())
    }

    /// `POST /compare/start { left_path, right_path, left_mode, right_mode }`
    pub async fn compare_start(
        &self,
        left_path: String,
        right_path: String,
        left_mode: ProviderMode,
        right_mode: ProviderMode,
    ) -> Result<()> {
        if self.busy.comparing.swap(true, std::sync::atomic::Ordering::SeqCst) {
            return Err(MeridianError::Other("a comparison is already in progress".to_string()));
        }

        let config = self.config.read().await.clone();
        let result = async {
            let left_provider = self.provider_for(left_mode, &config).await?;
            let right_provider = self.provider_for(right_mode, &config).await?;
            let left_scan = scanner::scan(left_provider.as_ref(), &left_path, &config).await?;
            let right_scan = scanner::scan(right_provider.as_ref(), &right_path, &config).await?;
            Ok::<_, MeridianError>(comparator::compare(&left_scan.files, &right_scan.files))
        }
        .await;

        self.busy.comparing.store(false, std::sync::atomic::Ordering::SeqCst);

        match result {
            Ok(comparison) => {
                let mut inner = self.inner.write().await;
                inner.compare = CompareSession {
                    left_mode: Some(left_mode),
                    right_mode: Some(right_mode),
                    left_path,
                    right_path,
                    result: Some(comparison),
                };
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "comparison failed");
                Err(e)
            }
        }
    }

    /// `POST /compare/cancel`
    pub fn compare_cancel(&self) {
        self.cancel.cancel();
    }

    /// `GET /compare/status`
    pub async fn compare_status(&self) -> bool {
        self.busy.is_comparing()
    }

    /// `POST /compare/results`
    pub async fn compare_results(&self) -> Option<ComparisonResult> {
        self.inner.read().await.compare.result.clone()
    }

    /// `POST /compare/reset`
    pub async fn compare_reset(&self) {
        self.inner.write().await.compare = CompareSession::default();
    }

    /// `POST /compare/execute { delete_indices, copy_indices }` — applies a
    /// user-selected subset of the last comparison's suggestions.
    pub async fn compare_execute(&self, delete_indices: Vec<usize>, copy_indices: Vec<usize>) -> Result<Vec<ActionOutcome>> {
        if self.busy.compare_executing.swap(true, std::sync::atomic::Ordering::SeqCst) {
            return Err(MeridianError::Other("a comparison execute is already in progress".to_string()));
        }

        let outcome = self.run_compare_execute(delete_indices, copy_indices).await;
        self.busy.compare_executing.store(false, std::sync::atomic::Ordering::SeqCst);
        outcome
    }

    async fn run_compare_execute(&self, delete_indices: Vec<usize>, copy_indices: Vec<usize>) -> Result<Vec<ActionOutcome>> {
        let config = self.config.read().await.clone();
        let (left_mode, right_mode, result) = {
            let inner = self.inner.read().await;
            let session = &inner.compare;
            let result = session
                .result
                .clone()
                .ok_or_else(|| MeridianError::Other("no comparison results available".to_string()))?;
            let left_mode = session.left_mode.ok_or_else(|| MeridianError::Other("comparison session missing left mode".to_string()))?;
            let right_mode = session.right_mode.ok_or_else(|| MeridianError::Other("comparison session missing right mode".to_string()))?;
            (left_mode, right_mode, result)
        };

        let left_provider = self.provider_for(left_mode, &config).await?;
        let right_provider = self.provider_for(right_mode, &config).await?;
        let ignore_rules = IgnoreRules::from_config(&config);

        let mut outcomes = Vec::new();

        for idx in delete_indices {
            if let Some(entry) = result.only_in_right.get(idx) {
                let path = entry.relative_path.clone();
                let out = executor::delete_with_verification(left_provider.as_ref(), &path, &ignore_rules).await;
                outcomes.push(ActionOutcome { path, kind: ActionKind::DeleteLeft, outcome: out, reason: "operator requested" });
            }
        }

        for idx in copy_indices {
            if let Some(entry) = result.only_in_left.get(idx) {
                let path = entry.relative_path.clone();
                match copy_one(left_provider.as_ref(), right_provider.as_ref(), &path).await {
                    Ok(()) => outcomes.push(ActionOutcome {
                        path,
                        kind: ActionKind::CopyLeftToRight,
                        outcome: executor::Outcome::Success,
                        reason: "operator requested",
                    }),
                    Err(e) => outcomes.push(ActionOutcome {
                        path,
                        kind: ActionKind::CopyLeftToRight,
                        outcome: executor::Outcome::Failed(e.to_string()),
                        reason: "operator requested",
                    }),
                }
            }
        }

        Ok(outcomes)
    }

    /// `POST /sync/start { … }` — the full bidirectional engine run. Left
    /// is always the local provider per `local_path`; right is whichever
    /// remote backend `mode` selects, mirroring `main.py`'s MVP assumption.
    pub async fn sync_start(&self, folder: &str) -> Result<Vec<ActionOutcome>> {
        if self.busy.scanning.swap(true, std::sync::atomic::Ordering::SeqCst) {
            return Err(MeridianError::Other("busy".to_string()));
        }

        let outcome = self.run_sync(folder).await;
        self.busy.scanning.store(false, std::sync::atomic::Ordering::SeqCst);
        outcome
    }

    async fn run_sync(&self, folder: &str) -> Result<Vec<ActionOutcome>> {
        let config = self.config.read().await.clone();
        if config.mode == ProviderMode::Local {
            return Err(MeridianError::Config("sync requires a non-local mode for the right-hand side".to_string()));
        }

        let left = self.provider_for(ProviderMode::Local, &config).await?;
        let right = self.provider_for(config.mode, &config).await?;

        let run_id = self.state_store.start_run(unix_time()).await?;

        let plan_result = build_plan(left.as_ref(), right.as_ref(), &self.state_store, folder, &config).await;

        let plan = match plan_result {
            Ok(plan) => plan,
            Err(e) => {
                self.state_store.end_run(run_id, RunStatus::Failed, 0, unix_time()).await?;
                self.notify(&format!("sync run {run_id} failed to build a plan: {e}"), Level::Error).await;
                return Err(e);
            }
        };

        let monitor = SafetyMonitor::from_config(&config);
        if let SafetyVerdict::Reject(reason) = monitor.analyze_plan(&plan) {
            self.state_store.end_run(run_id, RunStatus::Failed, 0, unix_time()).await?;
            self.notify(&format!("sync run {run_id} rejected by safety monitor: {reason}"), Level::Error).await;
            return Err(MeridianError::Safety(reason));
        }

        let progress = RunProgress::new(plan.total() as u64);
        {
            let mut inner = self.inner.write().await;
            inner.last_run_progress = Some(progress.clone());
        }

        let ignore_rules = Arc::new(IgnoreRules::from_config(&config));
        let executor_config = ExecutorConfig { parallelism: config.parallelism, ..ExecutorConfig::default() };
        let executor = TransferExecutor::new(left.clone(), right.clone(), executor_config);
        let outcomes = executor.execute(plan, progress.clone(), self.cancel.clone(), ignore_rules).await;

        for outcome in &outcomes {
            if outcome.outcome == executor::Outcome::Success && !outcome.kind.is_deletion() && !outcome.kind.is_skip() {
                if let Ok(Some(resource)) = stat_either(left.as_ref(), right.as_ref(), &outcome.path).await {
                    let _ = self
                        .state_store
                        .upsert_file_state(outcome.path.clone(), "local", resource.size, resource.mtime, resource.chksum.clone(), run_id)
                        .await;
                }
            }
        }

        let snapshot = progress.snapshot();
        let status = if snapshot.failed > 0 { RunStatus::Failed } else { RunStatus::Success };
        self.state_store.end_run(run_id, status, snapshot.succeeded, unix_time()).await?;
        self.notify(
            &format!("sync run {run_id} finished: {} succeeded, {} failed, {} skipped", snapshot.succeeded, snapshot.failed, snapshot.skipped),
            if snapshot.failed > 0 { Level::Warning } else { Level::Info },
        )
        .await;

        Ok(outcomes)
    }

    async fn notify(&self, message: &str, level: Level) {
        self.notifications.read().await.notify(message, level).await;
    }

    /// `POST /auth/test { mode }` — builds the provider from whatever
    /// credentials are already stored and probes the root path, the local
    /// equivalent of `test_credentials`'s round trip to the backend's API.
    pub async fn test_provider_reachability(&self, mode: ProviderMode) -> Result<bool> {
        let config = self.config.read().await.clone();
        let provider = self.provider_for(mode, &config).await?;
        Ok(provider.exists("/").await?)
    }

    /// `GET /credentials?mode=` — reads the stored credential bundle for a
    /// provider, never the OAuth flow that produced it.
    pub async fn load_credentials(&self, provider: &str) -> Result<crate::credentials::CredentialSet> {
        self.credentials.load(provider)
    }

    /// `POST /credentials { provider, ... }` — persists a credential bundle
    /// supplied out-of-band (e.g. pasted from a manual OAuth exchange).
    pub async fn save_credentials(&self, provider: &str, credentials: &crate::credentials::CredentialSet) -> Result<()> {
        self.credentials.save(provider, credentials)
    }
}

async fn copy_one(src: &dyn Provider, dst: &dyn Provider, path: &str) -> Result<()> {
    let mut reader = src.read(path).await.map_err(MeridianError::from)?;
    let size_hint = src.stat(path).await.ok().map(|r| r.size);
    let mut sink = dst.write(path, size_hint).await.map_err(MeridianError::from)?;
    tokio::io::copy(&mut reader, &mut sink).await?;
    use tokio::io::AsyncWriteExt;
    sink.shutdown().await?;
    Ok(())
}

async fn stat_either(left: &dyn Provider, right: &dyn Provider, path: &str) -> Result<Option<FileResource>> {
    if let Ok(resource) = left.stat(path).await {
        return Ok(Some(resource));
    }
    match right.stat(path).await {
        Ok(resource) => Ok(Some(resource)),
        Err(_) => Ok(None),
    }
}

fn unix_time() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Scans both sides and turns the union of observed paths into a [`Plan`],
/// consulting the State Store for each path's last-seen row — the
/// reconciliation loop `core/engine.py`'s `SyncEngine.sync` drives.
async fn build_plan(left: &dyn Provider, right: &dyn Provider, state: &StateStore, folder: &str, config: &Config) -> Result<Plan> {
    let left_scan = scanner::scan(left, folder, config).await?;
    let right_scan = scanner::scan(right, folder, config).await?;

    let mut left_by_path = std::collections::HashMap::new();
    for f in left_scan.files.into_iter().filter(|f| f.is_file()) {
        left_by_path.insert(f.path.clone(), f);
    }
    let mut right_by_path = std::collections::HashMap::new();
    for f in right_scan.files.into_iter().filter(|f| f.is_file()) {
        right_by_path.insert(f.path.clone(), f);
    }

    let mut all_paths: Vec<String> = left_by_path.keys().chain(right_by_path.keys()).cloned().collect();
    all_paths.sort();
    all_paths.dedup();

    let mut actions = Vec::with_capacity(all_paths.len());
    for path in all_paths {
        let left_entry = left_by_path.get(&path);
        let right_entry = right_by_path.get(&path);
        let last_seen = state.get_file_state(path.clone()).await?;

        let action: Action = decide(left_entry, right_entry, last_seen.as_ref(), config.deep_equal);
        actions.push(action);
    }

    Ok(Plan { actions })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::FileCredentialStore;
    use crate::notify::NotificationManager;

    fn engine_with(config: Config, config_path: Option<std::path::PathBuf>) -> Engine {
        let state = StateStore::open_in_memory().unwrap();
        let creds_dir = tempfile::tempdir().unwrap();
        let credentials: Arc<dyn CredentialStore> = Arc::new(FileCredentialStore::new(creds_dir.path()));
        Engine::new(config, config_path, state, credentials, NotificationManager::new())
    }

    #[tokio::test]
    async fn status_reports_idle_before_any_scan() {
        let engine = engine_with(Config::default(), None);
        let status = engine.status().await;
        assert!(!status.scanning);
        assert_eq!(status.files_found_count, 0);
    }

    #[tokio::test]
    async fn scan_populates_last_scan_and_status_counts() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("a.txt"), b"hi").unwrap();

        let mut config = Config::default();
        config.mode = ProviderMode::Local;
        config.local_path = Some(root.path().to_path_buf());

        let engine = engine_with(config, None);
        engine.scan("/").await.unwrap();

        let status = engine.status().await;
        assert_eq!(status.files_found_count, 1);
    }

    #[tokio::test]
    async fn delete_without_prior_scan_is_an_error() {
        let mut config = Config::default();
        config.local_path = Some(tempfile::tempdir().unwrap().path().to_path_buf());
        let engine = engine_with(config, None);
        assert!(engine.delete_empty_folders().await.is_err());
    }

    #[tokio::test]
    async fn compare_start_populates_results() {
        // A single local provider root with two distinct subfolders, since
        // one Meridian `Config` names one local root — `left_path`/
        // `right_path` select folders within it, as `compare_folders.py`
        // does for two paths on the same Dropbox connection.
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("a")).unwrap();
        std::fs::create_dir(root.path().join("b")).unwrap();
        std::fs::write(root.path().join("a/only_left.txt"), b"x").unwrap();

        let mut config = Config::default();
        config.local_path = Some(root.path().to_path_buf());

        let engine = engine_with(config, None);
        engine
            .compare_start("/a".to_string(), "/b".to_string(), ProviderMode::Local, ProviderMode::Local)
            .await
            .unwrap();

        let results = engine.compare_results().await.unwrap();
        assert_eq!(results.only_in_left.len(), 1);
        assert_eq!(results.only_in_left[0].relative_path, "/a/only_left.txt");
    }
}
