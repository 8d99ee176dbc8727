use futures::FutureExt;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// A spawned reader or publisher task.
///
/// If the task fails or panics, its group stop token is cancelled so the
/// other half of the stream winds down too.
#[derive(Debug)]
pub struct Worker {
    name: String,
    handle: JoinHandle<()>,
}

impl Worker {
    pub fn spawn<F, E>(name: impl Into<String>, group_stop: CancellationToken, task: F) -> Self
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let name = name.into();
        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(worker = %task_name, error = %e, "Worker failed");
                    group_stop.cancel();
                }
                Err(_) => {
                    error!(worker = %task_name, "Worker panicked");
                    group_stop.cancel();
                }
            }
        });
        Self { name, handle }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }

    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            warn!(worker = %self.name, error = %e, "Worker did not finish cleanly");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_success_leaves_group_running() {
        let group_stop = CancellationToken::new();
        let worker = Worker::spawn("ok", group_stop.clone(), async { Ok::<(), String>(()) });
        worker.join().await;
        assert!(!group_stop.is_cancelled());
    }

    #[tokio::test]
    async fn test_failure_stops_group() {
        let group_stop = CancellationToken::new();
        let worker = Worker::spawn("bad", group_stop.clone(), async {
            Err::<(), _>("boom".to_string())
        });
        worker.join().await;
        assert!(group_stop.is_cancelled());
    }

    #[tokio::test]
    async fn test_panic_stops_group() {
        let group_stop = CancellationToken::new();
        let worker = Worker::spawn("panicky", group_stop.clone(), async {
            if group_stop_never() {
                return Ok::<(), String>(());
            }
            panic!("worker panic");
        });
        worker.join().await;
        assert!(group_stop.is_cancelled());
    }

    fn group_stop_never() -> bool {
        false
    }

    #[tokio::test]
    async fn test_is_alive_until_finished() {
        let release = CancellationToken::new();
        let waiter = release.clone();
        let worker = Worker::spawn("waiting", CancellationToken::new(), async move {
            waiter.cancelled().await;
            Ok::<(), String>(())
        });
        assert!(worker.is_alive());
        release.cancel();
        worker.join().await;
    }
}
