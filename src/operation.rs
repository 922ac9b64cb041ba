//! Type-erased operation envelope
//!
//! A submission is generic over its result and error types, but the
//! per-key queue has to hold submissions of any type side by side. The
//! envelope owns the caller's closure together with the sender half of the
//! caller's result channel, and exposes only what the controller needs:
//! run it under a deadline, reject it, or check whether anyone is still
//! waiting for it.

use crate::error::{AdmissionError, SubmitError};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::oneshot;

/// How an executed operation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Completed,
    Failed,
    TimedOut,
    Panicked,
}

impl Outcome {
    pub(crate) fn is_success(self) -> bool {
        matches!(self, Outcome::Completed)
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Failed => "failed",
            Outcome::TimedOut => "timed_out",
            Outcome::Panicked => "panicked",
        }
    }
}

/// Result of running an operation, not yet delivered to its caller.
///
/// Delivery is split from execution so the controller can release the slot
/// before the caller observes the result.
pub(crate) struct Settled {
    pub(crate) outcome: Outcome,
    deliver: Box<dyn FnOnce() + Send>,
}

impl Settled {
    /// Hand the result to the waiting caller (no-op if it went away)
    pub(crate) fn deliver(self) {
        (self.deliver)()
    }
}

pub(crate) type SettledFuture = Pin<Box<dyn Future<Output = Settled> + Send>>;

/// A queued or running operation with its result channel
pub(crate) trait Job: Send {
    /// True once the caller dropped its side of the result channel
    fn is_abandoned(&self) -> bool;

    /// Resolve the caller with a controller error without running
    fn reject(self: Box<Self>, error: AdmissionError);

    /// Run the operation, racing it against `timeout`
    fn execute(self: Box<Self>, key: String, timeout: Duration) -> SettledFuture;
}

pub(crate) struct PendingOperation<F, T, E> {
    operation: F,
    result_tx: oneshot::Sender<Result<T, SubmitError<E>>>,
}

impl<F, T, E> PendingOperation<F, T, E> {
    pub(crate) fn new(operation: F, result_tx: oneshot::Sender<Result<T, SubmitError<E>>>) -> Self {
        Self {
            operation,
            result_tx,
        }
    }
}

impl<F, Fut, T, E> Job for PendingOperation<F, T, E>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    fn is_abandoned(&self) -> bool {
        self.result_tx.is_closed()
    }

    fn reject(self: Box<Self>, error: AdmissionError) {
        let _ = self.result_tx.send(Err(SubmitError::Admission(error)));
    }

    fn execute(self: Box<Self>, key: String, timeout: Duration) -> SettledFuture {
        let PendingOperation {
            operation,
            result_tx,
        } = *self;

        Box::pin(async move {
            // The operation runs in its own task so a timeout detaches it
            // instead of dropping it mid-flight; its late result is discarded.
            let mut handle = tokio::spawn(operation());

            let (outcome, result) = match tokio::time::timeout(timeout, &mut handle).await {
                Ok(Ok(Ok(value))) => (Outcome::Completed, Ok(value)),
                Ok(Ok(Err(err))) => (Outcome::Failed, Err(SubmitError::Operation(err))),
                Ok(Err(join_err)) if join_err.is_panic() => (
                    Outcome::Panicked,
                    Err(AdmissionError::OperationPanicked { key }.into()),
                ),
                Ok(Err(_)) => (Outcome::Failed, Err(AdmissionError::Cancelled { key }.into())),
                Err(_) => (
                    Outcome::TimedOut,
                    Err(AdmissionError::ExecutionTimeout { key, timeout }.into()),
                ),
            };

            Settled {
                outcome,
                deliver: Box::new(move || {
                    let _ = result_tx.send(result);
                }),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Rx<T> = oneshot::Receiver<Result<T, SubmitError<String>>>;

    fn job<F, Fut, T>(operation: F) -> (Box<dyn Job>, Rx<T>)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, String>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        (Box::new(PendingOperation::new(operation, tx)), rx)
    }

    #[tokio::test]
    async fn test_execute_success() {
        let (job, rx) = job(|| async { Ok::<_, String>(42) });
        let settled = job.execute("k".into(), Duration::from_secs(1)).await;
        assert_eq!(settled.outcome, Outcome::Completed);
        assert!(settled.outcome.is_success());
        settled.deliver();
        assert_eq!(rx.await.unwrap().unwrap(), 42);
    }

    #[tokio::test]
    async fn test_execute_operation_error_passes_through() {
        let (job, rx) = job(|| async { Err::<u32, _>("boom".to_string()) });
        let settled = job.execute("k".into(), Duration::from_secs(1)).await;
        assert_eq!(settled.outcome, Outcome::Failed);
        settled.deliver();
        let err = rx.await.unwrap().unwrap_err();
        assert_eq!(err.into_operation(), Some("boom".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_timeout() {
        let (job, rx) = job(|| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, String>(())
        });
        let settled = job.execute("k".into(), Duration::from_millis(100)).await;
        assert_eq!(settled.outcome, Outcome::TimedOut);
        settled.deliver();
        match rx.await.unwrap() {
            Err(SubmitError::Admission(AdmissionError::ExecutionTimeout { key, timeout })) => {
                assert_eq!(key, "k");
                assert_eq!(timeout, Duration::from_millis(100));
            }
            other => panic!("Expected ExecutionTimeout, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_execute_panic() {
        let (job, rx) = job(|| async {
            if true {
                panic!("operation blew up");
            }
            Ok::<u32, String>(0)
        });
        let settled = job.execute("k".into(), Duration::from_secs(1)).await;
        assert_eq!(settled.outcome, Outcome::Panicked);
        settled.deliver();
        let err = rx.await.unwrap().unwrap_err();
        assert_eq!(
            err.admission(),
            Some(&AdmissionError::OperationPanicked { key: "k".into() })
        );
    }

    #[tokio::test]
    async fn test_reject_resolves_caller() {
        let (job, rx) = job(|| async { Ok::<_, String>(1) });
        job.reject(AdmissionError::Cancelled { key: "k".into() });
        let err = rx.await.unwrap().unwrap_err();
        assert_eq!(err.admission().map(|e| e.code()), Some("CANCELLED"));
    }

    #[tokio::test]
    async fn test_is_abandoned_after_receiver_dropped() {
        let (job, rx) = job(|| async { Ok::<_, String>(1) });
        assert!(!job.is_abandoned());
        drop(rx);
        assert!(job.is_abandoned());
    }
}
