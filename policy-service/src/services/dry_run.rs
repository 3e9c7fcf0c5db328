use std::future::Future;

use serde::Serialize;
use uuid::Uuid;

/// How a validated mutation is finished. Everything before the commit step
/// runs identically in both modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    #[default]
    Commit,
    DryRun,
}

impl ExecutionMode {
    pub fn from_flag(dry_run: bool) -> Self {
        if dry_run {
            ExecutionMode::DryRun
        } else {
            ExecutionMode::Commit
        }
    }

    pub fn is_dry_run(&self) -> bool {
        matches!(self, ExecutionMode::DryRun)
    }

    /// Runs `commit` in `Commit` mode; `Ok(None)` in `DryRun` mode.
    pub async fn run<T, E, F, Fut>(self, commit: F) -> Result<Option<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self {
            ExecutionMode::Commit => commit().await.map(Some),
            ExecutionMode::DryRun => Ok(None),
        }
    }
}

/// Response of a create or update, simulated or not.
#[derive(Debug, Serialize)]
pub struct MutationPreview<T> {
    pub dry_run: bool,
    pub result: T,
}

impl<T> MutationPreview<T> {
    pub fn new(mode: ExecutionMode, result: T) -> Self {
        Self {
            dry_run: mode.is_dry_run(),
            result,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeletionPreview {
    pub dry_run: bool,
    pub message: String,
    pub id: Uuid,
}

impl DeletionPreview {
    pub fn simulated(id: Uuid) -> Self {
        Self {
            dry_run: true,
            message: "Deletion simulated successfully".to_string(),
            id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_dry_run_skips_commit() {
        let called = AtomicBool::new(false);
        let result: Result<Option<()>, ()> = ExecutionMode::DryRun
            .run(|| async {
                called.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert_eq!(result, Ok(None));
        assert!(!called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_commit_runs_and_propagates_errors() {
        let ok: Result<Option<u8>, &str> = ExecutionMode::Commit.run(|| async { Ok(7) }).await;
        assert_eq!(ok, Ok(Some(7)));

        let err: Result<Option<u8>, &str> =
            ExecutionMode::Commit.run(|| async { Err("boom") }).await;
        assert_eq!(err, Err("boom"));
    }

    #[test]
    fn test_mode_from_flag() {
        assert_eq!(ExecutionMode::from_flag(true), ExecutionMode::DryRun);
        assert_eq!(ExecutionMode::from_flag(false), ExecutionMode::Commit);
        assert_eq!(ExecutionMode::default(), ExecutionMode::Commit);
    }
}
