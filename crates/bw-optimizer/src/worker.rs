//! Isolated execution of a single fit with an optional deadline.

use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use thiserror::Error;
use tracing::warn;

/// Why an isolated job produced no value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// The job did not report back before the deadline. The worker thread is
    /// detached and its eventual result discarded.
    #[error("worker timed out after {}s", .0.as_secs_f64())]
    TimedOut(Duration),

    /// The worker exited without sending a result (panic inside the job).
    #[error("worker terminated without a result")]
    Lost,

    /// The OS refused to start a worker thread.
    #[error("failed to spawn worker: {0}")]
    Spawn(String),
}

/// Run `job` on a dedicated thread named after `label` and wait for its
/// result, at most `timeout` when one is given.
///
/// Threads cannot be cancelled, so a job that misses its deadline keeps
/// running detached until it returns on its own.
pub fn run_isolated<T, F>(label: &str, job: F, timeout: Option<Duration>) -> Result<T, WorkerError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = crossbeam_channel::bounded(1);
    std::thread::Builder::new()
        .name(format!("bw-fit-{label}"))
        .spawn(move || {
            // Receiver may be gone after a timeout.
            let _ = tx.send(job());
        })
        .map_err(|e| WorkerError::Spawn(e.to_string()))?;

    match timeout {
        Some(limit) => rx.recv_timeout(limit).map_err(|e| match e {
            RecvTimeoutError::Timeout => {
                warn!(
                    "{} exceeded {:?}; abandoned worker thread keeps running until its fit returns",
                    label, limit
                );
                WorkerError::TimedOut(limit)
            }
            RecvTimeoutError::Disconnected => WorkerError::Lost,
        }),
        None => rx.recv().map_err(|_| WorkerError::Lost),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_job_value() {
        let value = run_isolated("sum", || 40 + 2, Some(Duration::from_secs(5))).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn slow_job_times_out() {
        let err = run_isolated(
            "sleepy",
            || std::thread::sleep(Duration::from_millis(500)),
            Some(Duration::from_millis(20)),
        )
        .unwrap_err();
        assert_eq!(err, WorkerError::TimedOut(Duration::from_millis(20)));
    }

    #[test]
    fn panicking_job_is_lost() {
        let err = run_isolated("panicky", || -> u32 { panic!("bad fit") }, None).unwrap_err();
        assert_eq!(err, WorkerError::Lost);
    }

    #[test]
    fn abandoned_worker_runs_to_completion() {
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let err = run_isolated(
            "trial-7",
            move || {
                std::thread::sleep(Duration::from_millis(100));
                let name = std::thread::current().name().map(str::to_string);
                let _ = done_tx.send(name);
            },
            Some(Duration::from_millis(10)),
        )
        .unwrap_err();
        assert!(matches!(err, WorkerError::TimedOut(_)));

        // The detached thread still finishes, under a name that identifies it.
        let name = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("bw-fit-trial-7"));
    }
}
