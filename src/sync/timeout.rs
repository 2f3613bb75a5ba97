/// Wall-clock deadline around a single task invocation
///
/// The body is spawned onto its own tokio task and the caller waits for it up to the
/// deadline. Expiry stops the wait, not the work: the body is detached, keeps its
/// database connection until it finishes on its own, and whatever it returns late is
/// dropped.

use crate::sync::task::TaskResult;
use std::{any::Any, future::Future, time::Duration};

/// Run `body` with a hard deadline, folding panics and expiry into a `TaskResult`
pub async fn guard<F>(key: &str, deadline: Duration, body: F) -> TaskResult
where
    F: Future<Output = TaskResult> + Send + 'static,
{
    let handle = tokio::spawn(body);

    match tokio::time::timeout(deadline, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) if join_error.is_panic() => {
            let reason = panic_message(join_error.into_panic());
            tracing::error!("💥 Task {} panicked: {}", key, reason);
            TaskResult::failure(format!("task panicked: {}", reason))
        }
        Ok(Err(join_error)) => {
            tracing::error!("❌ Task {} was cancelled: {}", key, join_error);
            TaskResult::failure(format!("task cancelled: {}", join_error))
        }
        Err(_) => {
            // Dropping the JoinHandle detaches the body rather than aborting it.
            tracing::warn!("⏰ Task {} timed out after {:?}; leaving it to finish in the background", key, deadline);
            TaskResult::timed_out(deadline)
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
