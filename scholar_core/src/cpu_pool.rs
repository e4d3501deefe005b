use crate::error::{ConnectorError, IndexError};
use once_cell::sync::Lazy;
use rayon::ThreadPool;
use std::cmp::max;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, info};

static POOL_SIZE: Lazy<usize> = Lazy::new(|| {
    let fallback = 4usize;
    let available = std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(fallback);
    available.clamp(2, 8)
});

static CPU_POOL: Lazy<ThreadPool> = Lazy::new(|| {
    rayon::ThreadPoolBuilder::new()
        .num_threads(*POOL_SIZE)
        .thread_name(|idx| format!("scholar-cpu-{idx}"))
        .build()
        .expect("failed to build scholar CPU pool")
});

static IN_FLIGHT: AtomicUsize = AtomicUsize::new(0);

/// A CPU job that never produced its own result.
#[derive(Debug, thiserror::Error)]
pub enum CpuTaskError {
    #[error("CPU task panicked: {0}")]
    Panicked(String),
    #[error("CPU pool dropped the task: {0}")]
    Dropped(String),
}

impl From<CpuTaskError> for ConnectorError {
    fn from(err: CpuTaskError) -> Self {
        ConnectorError::Other(err.to_string())
    }
}

impl From<CpuTaskError> for IndexError {
    fn from(err: CpuTaskError) -> Self {
        IndexError::Background(err.to_string())
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Spawn a CPU-intensive or blocking job on the dedicated pool.
pub async fn spawn_cpu<F, R, E>(job: F) -> Result<R, E>
where
    F: FnOnce() -> Result<R, E> + Send + 'static,
    R: Send + 'static,
    E: From<CpuTaskError> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let queued = IN_FLIGHT.fetch_add(1, Ordering::Relaxed) + 1;
    let threshold = max(*POOL_SIZE, 1) * 2;
    if queued > threshold {
        info!(
            target: "scholar.cpu_pool",
            queued,
            threads = *POOL_SIZE,
            "CPU pool backlog growing"
        );
    } else {
        debug!(
            target: "scholar.cpu_pool",
            queued,
            threads = *POOL_SIZE,
            "CPU task queued"
        );
    }
    let start = Instant::now();
    CPU_POOL.spawn(move || {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job))
            .map_err(|payload| E::from(CpuTaskError::Panicked(panic_message(payload.as_ref()))))
            .and_then(|inner| inner);
        let _ = tx.send(result);
        let finished = IN_FLIGHT.fetch_sub(1, Ordering::Relaxed) - 1;
        let latency_ms = start.elapsed().as_millis();
        if latency_ms > 500 {
            info!(
                target: "scholar.cpu_pool",
                queue_after = finished,
                latency_ms,
                "CPU task finished (slow)"
            );
        } else {
            debug!(
                target: "scholar.cpu_pool",
                queue_after = finished,
                latency_ms,
                "CPU task finished"
            );
        }
    });

    rx.await
        .map_err(|err| E::from(CpuTaskError::Dropped(err.to_string())))?
}

pub fn queue_depth() -> usize {
    IN_FLIGHT.load(Ordering::Relaxed)
}

pub fn worker_count() -> usize {
    *POOL_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_cpu_returns_result() {
        let value: Result<u32, IndexError> = spawn_cpu(|| Ok(21 * 2)).await;
        assert_eq!(value.unwrap(), 42);
        assert!(worker_count() >= 2);
    }

    #[tokio::test]
    async fn test_spawn_cpu_contains_panics() {
        let result: Result<(), ConnectorError> = spawn_cpu(|| panic!("boom")).await;
        match result {
            Err(ConnectorError::Other(msg)) => assert!(msg.contains("boom")),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
