//! Bounded parallel execution for independent units of work.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

/// Run `task` over every input with at most `workers` tasks in flight
///
/// Results are returned by input index, never by completion order. A task
/// that panics leaves `None` in its slot so the caller can degrade that unit
/// instead of failing the batch.
pub(crate) async fn run_bounded<I, R, F, Fut>(
    inputs: Vec<I>,
    workers: usize,
    task: F,
) -> Vec<Option<R>>
where
    I: Send + 'static,
    R: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let task = Arc::new(task);
    let mut results: Vec<Option<R>> = std::iter::repeat_with(|| None)
        .take(inputs.len())
        .collect();

    let mut set = JoinSet::new();
    for (idx, input) in inputs.into_iter().enumerate() {
        let sem = semaphore.clone();
        let task = task.clone();
        set.spawn(async move {
            // Semaphore is never closed, so the permit is always granted
            let _permit = sem.acquire_owned().await.ok();
            (idx, (*task)(input).await)
        });
    }

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((idx, value)) => results[idx] = Some(value),
            Err(e) => warn!(error = %e, "Worker task failed"),
        }
    }

    results
}
