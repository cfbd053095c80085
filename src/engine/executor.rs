//! Bounded worker pool that carries out an accepted [`Plan`] (spec §4.6).
//!
//! Async equivalent of the teacher's `ConcurrencyLimiter`: `Provider` here
//! is an async trait, so the pool is a `tokio::sync::Semaphore` guarding
//! `tokio::spawn`ed tasks rather than the teacher's condvar-based limiter.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::StreamExt;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::provider::error::ProviderError;
use crate::provider::{ListOptions, Provider, WriteSink};
use crate::scanner::ignore::IgnoreRules;
use crate::stats::RunProgress;

use super::retry::{with_retry, RetryPolicy};
use super::{Action, ActionKind, Plan};

/// Shared cancellation signal: checked between every provider call and
/// between every action (spec §5).
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome {
    pub path: String,
    pub kind: ActionKind,
    pub outcome: Outcome,
    pub reason: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failed(String),
    SkippedFailSafe,
    Cancelled,
}

pub struct ExecutorConfig {
    pub parallelism: usize,
    /// Wrap copy destinations whose path indicates a compressed variant
    /// with a zstd level-3 sink.
    pub compress: bool,
    pub compressed_suffix: String,
    pub retry_policy: RetryPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            parallelism: 5,
            compress: false,
            compressed_suffix: ".zst".to_string(),
            retry_policy: RetryPolicy::default(),
        }
    }
}

pub struct TransferExecutor {
    left: Arc<dyn Provider>,
    right: Arc<dyn Provider>,
    config: ExecutorConfig,
}

impl TransferExecutor {
    pub fn new(left: Arc<dyn Provider>, right: Arc<dyn Provider>, config: ExecutorConfig) -> Self {
        Self { left, right, config }
    }

    /// Runs every action in `plan` under the bounded pool. Individual
    /// failures are logged and counted, never abort the batch; deletions
    /// are independently re-verified immediately before they execute.
    pub async fn execute(
        &self,
        plan: Plan,
        progress: RunProgress,
        cancel: CancellationToken,
        ignore_rules: Arc<IgnoreRules>,
    ) -> Vec<ActionOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.config.parallelism.max(1)));
        let mut handles = Vec::with_capacity(plan.actions.len());

        for action in plan.actions {
            if cancel.is_cancelled() {
                handles.push(tokio::spawn(async move {
                    ActionOutcome {
                        path: action.file.path.clone(),
                        kind: action.kind,
                        outcome: Outcome::Cancelled,
                        reason: action.reason,
                    }
                }));
                continue;
            }

            let semaphore = semaphore.clone();
            let left = self.left.clone();
            let right = self.right.clone();
            let cancel = cancel.clone();
            let progress = progress.clone();
            let ignore_rules = ignore_rules.clone();
            let compress = self.config.compress;
            let compressed_suffix = self.config.compressed_suffix.clone();
            let retry_policy = self.config.retry_policy.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore never closes");

                if cancel.is_cancelled() {
                    progress.record_skip();
                    return ActionOutcome {
                        path: action.file.path.clone(),
                        kind: action.kind,
                        outcome: Outcome::Cancelled,
                        reason: action.reason,
                    };
                }

                let outcome =
                    run_one(&left, &right, &action, compress, &compressed_suffix, &ignore_rules, &retry_policy).await;

                match &outcome {
                    Outcome::Success => progress.record_success(action.file.size),
                    Outcome::Failed(_) => progress.record_failure(),
                    Outcome::SkippedFailSafe | Outcome::Cancelled => progress.record_skip(),
                }

                ActionOutcome {
                    path: action.file.path.clone(),
                    kind: action.kind,
                    outcome,
                    reason: action.reason,
                }
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(outcome) => results.push(outcome),
                Err(e) => warn!(error = %e, "executor task panicked"),
            }
        }
        results
    }
}

async fn run_one(
    left: &Arc<dyn Provider>,
    right: &Arc<dyn Provider>,
    action: &Action,
    compress: bool,
    compressed_suffix: &str,
    ignore_rules: &IgnoreRules,
    retry_policy: &RetryPolicy,
) -> Outcome {
    let path = action.file.path.as_str();

    let result = match action.kind {
        ActionKind::Skip | ActionKind::Conflict => Ok(()),
        ActionKind::CopyLeftToRight => {
            copy_between(left.as_ref(), right.as_ref(), path, compress, compressed_suffix, retry_policy).await
        }
        ActionKind::CopyRightToLeft => {
            copy_between(right.as_ref(), left.as_ref(), path, compress, compressed_suffix, retry_policy).await
        }
        ActionKind::DeleteLeft => delete_with_failsafe(left.as_ref(), path, ignore_rules, retry_policy).await,
        ActionKind::DeleteRight => delete_with_failsafe(right.as_ref(), path, ignore_rules, retry_policy).await,
    };

    match result {
        Ok(()) => Outcome::Success,
        Err(ExecutionError::FailSafeTriggered) => {
            info!(%path, "fail-safe triggered: folder is not actually empty, skipping delete");
            Outcome::SkippedFailSafe
        }
        Err(ExecutionError::Provider(e)) => Outcome::Failed(e.to_string()),
    }
}

enum ExecutionError {
    Provider(crate::error::MeridianError),
    FailSafeTriggered,
}

impl From<crate::error::MeridianError> for ExecutionError {
    fn from(e: crate::error::MeridianError) -> Self {
        ExecutionError::Provider(e)
    }
}

impl From<ProviderError> for ExecutionError {
    fn from(e: ProviderError) -> Self {
        ExecutionError::Provider(e.into())
    }
}

async fn copy_between(
    src: &dyn Provider,
    dst: &dyn Provider,
    path: &str,
    compress: bool,
    compressed_suffix: &str,
    retry_policy: &RetryPolicy,
) -> Result<(), ExecutionError> {
    let mut reader = with_retry(retry_policy, || src.read(path)).await?;
    let size_hint = with_retry(retry_policy, || src.stat(path)).await.ok().map(|r| r.size);
    let sink = with_retry(retry_policy, || dst.write(path, size_hint)).await?;

    if compress && path.ends_with(compressed_suffix) {
        let mut sink = CompressingSink::new(sink, 3);
        tokio::io::copy(&mut reader, &mut sink).await.map_err(io_to_meridian)?;
        sink.shutdown().await.map_err(io_to_meridian)?;
    } else {
        let mut sink = sink;
        tokio::io::copy(&mut reader, &mut sink).await.map_err(io_to_meridian)?;
        sink.shutdown().await.map_err(io_to_meridian)?;
    }

    Ok(())
}

fn io_to_meridian(e: std::io::Error) -> ExecutionError {
    ExecutionError::Provider(crate::error::MeridianError::Io(e))
}

/// Public entry point for single-provider deletions (empty folders,
/// conflict-copy files) outside a bidirectional [`Plan`], reusing the same
/// fail-safe re-verification.
pub async fn delete_with_verification(provider: &dyn Provider, path: &str, ignore_rules: &IgnoreRules) -> Outcome {
    let retry_policy = RetryPolicy::default();
    match delete_with_failsafe(provider, path, ignore_rules, &retry_policy).await {
        Ok(()) => Outcome::Success,
        Err(ExecutionError::FailSafeTriggered) => Outcome::SkippedFailSafe,
        Err(ExecutionError::Provider(e)) => Outcome::Failed(e.to_string()),
    }
}

/// Spec §4.5 policy 3: before actually deleting a folder reported empty,
/// independently re-list it and bail at the first non-ignored file found.
async fn delete_with_failsafe(
    provider: &dyn Provider,
    path: &str,
    ignore_rules: &IgnoreRules,
    retry_policy: &RetryPolicy,
) -> Result<(), ExecutionError> {
    let resource = with_retry(retry_policy, || provider.stat(path)).await?;

    if resource.is_dir() {
        let mut entries = with_retry(retry_policy, || provider.list(path, ListOptions::recursive())).await?;
        while let Some(entry) = entries.next().await {
            let entry = entry?;
            if entry.is_file() && !ignore_rules.is_system_file(&entry.name) {
                return Err(ExecutionError::FailSafeTriggered);
            }
        }
    }

    with_retry(retry_policy, || provider.delete(path, true)).await?;
    Ok(())
}

/// Buffers writes, zstd-compresses the whole payload on shutdown, then
/// forwards the compressed bytes to the inner sink.
///
/// This trades true incremental streaming compression for simplicity: the
/// source stream is still read and copied incrementally, only the
/// compression step itself is whole-payload.
struct CompressingSink {
    inner: WriteSink,
    level: i32,
    buffer: Vec<u8>,
    pending: Option<PendingWrite>,
}

struct PendingWrite {
    data: Vec<u8>,
    offset: usize,
}

impl CompressingSink {
    fn new(inner: WriteSink, level: i32) -> Self {
        Self {
            inner,
            level,
            buffer: Vec::new(),
            pending: None,
        }
    }
}

impl AsyncWrite for CompressingSink {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        this.buffer.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();

        if this.pending.is_none() {
            let compressed = zstd::bulk::compress(&this.buffer, this.level)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
            this.pending = Some(PendingWrite { data: compressed, offset: 0 });
        }

        loop {
            let pending = this.pending.as_mut().unwrap();
            if pending.offset < pending.data.len() {
                let n = match Pin::new(&mut this.inner).poll_write(cx, &pending.data[pending.offset..]) {
                    Poll::Ready(Ok(n)) => n,
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                };
                pending.offset += n;
                continue;
            }

            return Pin::new(&mut this.inner).poll_shutdown(cx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::provider::local::LocalProvider;
    use crate::provider::FileKind;
    use std::sync::Arc;

    fn provider_pair() -> (Arc<dyn Provider>, Arc<dyn Provider>, tempfile::TempDir, tempfile::TempDir) {
        let left_dir = tempfile::tempdir().unwrap();
        let right_dir = tempfile::tempdir().unwrap();
        let left: Arc<dyn Provider> = Arc::new(LocalProvider::new(left_dir.path()));
        let right: Arc<dyn Provider> = Arc::new(LocalProvider::new(right_dir.path()));
        (left, right, left_dir, right_dir)
    }

    #[tokio::test]
    async fn copy_left_to_right_transfers_bytes() {
        let (left, right, left_dir, right_dir) = provider_pair();
        std::fs::write(left_dir.path().join("a.txt"), b"hello world").unwrap();

        let executor = TransferExecutor::new(left.clone(), right.clone(), ExecutorConfig::default());
        let action = Action {
            kind: ActionKind::CopyLeftToRight,
            file: crate::provider::FileResource::new("/a.txt", FileKind::File, 11, 0.0),
            reason: "new on left",
        };
        let plan = Plan { actions: vec![action] };
        let ignore_rules = Arc::new(IgnoreRules::from_config(&Config::default()));

        let outcomes = executor
            .execute(plan, RunProgress::new(1), CancellationToken::new(), ignore_rules)
            .await;

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].outcome, Outcome::Success);
        assert_eq!(std::fs::read(right_dir.path().join("a.txt")).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn failsafe_skips_delete_when_folder_not_actually_empty() {
        let (left, right, left_dir, _right_dir) = provider_pair();
        std::fs::create_dir(left_dir.path().join("x")).unwrap();
        std::fs::write(left_dir.path().join("x/surprise.txt"), b"oops").unwrap();

        let executor = TransferExecutor::new(left.clone(), right.clone(), ExecutorConfig::default());
        let action = Action {
            kind: ActionKind::DeleteLeft,
            file: crate::provider::FileResource::new("/x", FileKind::Directory, 0, 0.0),
            reason: "deleted on right",
        };
        let plan = Plan { actions: vec![action] };
        let ignore_rules = Arc::new(IgnoreRules::from_config(&Config::default()));

        let outcomes = executor
            .execute(plan, RunProgress::new(1), CancellationToken::new(), ignore_rules)
            .await;

        assert_eq!(outcomes[0].outcome, Outcome::SkippedFailSafe);
        assert!(left_dir.path().join("x/surprise.txt").exists());
    }

    #[tokio::test]
    async fn cancellation_marks_remaining_actions_cancelled() {
        let (left, right, _left_dir, _right_dir) = provider_pair();
        let executor = TransferExecutor::new(left, right, ExecutorConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let action = Action {
            kind: ActionKind::CopyLeftToRight,
            file: crate::provider::FileResource::new("/never.txt", FileKind::File, 1, 0.0),
            reason: "new on left",
        };
        let plan = Plan { actions: vec![action] };
        let ignore_rules = Arc::new(IgnoreRules::from_config(&Config::default()));

        let outcomes = executor.execute(plan, RunProgress::new(1), cancel, ignore_rules).await;
        assert_eq!(outcomes[0].outcome, Outcome::Cancelled);
    }
}
