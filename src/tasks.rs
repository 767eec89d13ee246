//! Supervision of long-running background tasks.

use std::future::Future;

use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error};

/// How a background task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskExit {
    Stopped,
    Cancelled,
    Failed(String),
    Panicked,
}

/// Wait for `task` in the background and log how it ended. Failures and
/// panics are logged as errors.
pub fn supervise<F>(name: &'static str, task: F) -> JoinHandle<TaskExit>
where
    F: Future<Output = Result<anyhow::Result<()>, JoinError>> + Send + 'static,
{
    tokio::spawn(async move {
        match task.await {
            Ok(Ok(())) => {
                debug!("{name} task stopped");
                TaskExit::Stopped
            }
            Ok(Err(e)) => {
                error!("{name} task failed: {e:#}");
                TaskExit::Failed(format!("{e:#}"))
            }
            Err(e) if e.is_cancelled() => {
                debug!("{name} task cancelled");
                TaskExit::Cancelled
            }
            Err(e) => {
                error!("{name} task panicked: {e}");
                TaskExit::Panicked
            }
        }
    })
}

/// [`supervise`] for tasks without an error of their own.
pub fn supervise_unit(name: &'static str, handle: JoinHandle<()>) -> JoinHandle<TaskExit> {
    supervise(name, async move { handle.await.map(Ok) })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::metrics::MetricsCollector;

    #[tokio::test]
    async fn test_reports_clean_stop_and_cancel() {
        let done = supervise_unit("done", tokio::spawn(async {}));
        assert_eq!(done.await.unwrap(), TaskExit::Stopped);

        let forever = tokio::spawn(std::future::pending::<()>());
        forever.abort();
        let cancelled = supervise_unit("forever", forever);
        assert_eq!(cancelled.await.unwrap(), TaskExit::Cancelled);
    }

    #[tokio::test]
    async fn test_reports_panic() {
        let handle = tokio::spawn(async { panic!("boom") });
        let exit = supervise_unit("boom", handle).await.unwrap();
        assert_eq!(exit, TaskExit::Panicked);
    }

    #[tokio::test]
    async fn test_reports_metrics_emission_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("metrics.jsonl");
        let collector = MetricsCollector::new();

        let emission = collector.start_emission_task(path, Duration::from_millis(10));
        let exit = supervise("Metrics emission", emission).await.unwrap();

        assert!(matches!(exit, TaskExit::Failed(_)), "{exit:?}");
    }
}
