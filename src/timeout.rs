use std::sync::mpsc;
use std::time::Duration;

use crate::error::TimeoutError;

/// Run `task` on a worker thread and wait at most `limit` for it.
///
/// A task that misses the deadline keeps running detached; its result is
/// dropped when it eventually finishes. Whatever it writes to staging is
/// swept by `import::sweep_stale_staging` the next time a library opens.
pub fn run_with_timeout<T, F>(operation: &str, limit: Duration, task: F) -> Result<T, TimeoutError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (sender, receiver) = mpsc::channel();
    let spawned = std::thread::Builder::new()
        .name(format!("adapter-{}", operation))
        .spawn(move || {
            let _ = sender.send(task());
        });
    if let Err(err) = spawned {
        log::error!("could not spawn worker for {}: {}", operation, err);
        return Err(TimeoutError {
            operation: operation.to_string(),
            after: Duration::ZERO,
        });
    }

    match receiver.recv_timeout(limit) {
        Ok(value) => Ok(value),
        Err(mpsc::RecvTimeoutError::Timeout) => {
            log::warn!("{} exceeded {:?}", operation, limit);
            Err(TimeoutError {
                operation: operation.to_string(),
                after: limit,
            })
        }
        // the worker panicked before sending
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(TimeoutError {
            operation: format!("{} (worker aborted)", operation),
            after: Duration::ZERO,
        }),
    }
}
