//! # Cancellation & Deadline Machinery
//!
//! The teacher has no cancellation-token type of its own, only ad hoc retry
//! loops; this is an enrichment grounded on the `omnidotdev-synapse-gateway`
//! reference gateway's use of `tokio_util::sync::CancellationToken` for the
//! same purpose (see DESIGN.md). Every suspension point in the orchestrator
//! (provider `infer`/`stream`/`health`, queue dequeue, backoff sleeps) honors
//! both a deadline and a cooperative cancel signal.

use crate::error::EngineError;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// A request's deadline plus its cancellation token, threaded through the
/// orchestrator and handed to providers.
#[derive(Clone)]
pub struct CallContext {
    deadline: Instant,
    cancel: CancellationToken,
}

impl CallContext {
    pub fn new(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// Like [`CallContext::new`] but wired to a caller-supplied token, so an
    /// external cancel (an async job's cancel flag, a dropped HTTP request)
    /// propagates into this call.
    pub fn with_cancel(timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            cancel,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// A clone of the root token this context runs under. Unlike
    /// [`CallContext::child_token`], cancelling a clone cancels `self` too —
    /// parent/child propagation only runs parent-to-child, so anything that
    /// needs to observe (or drive) the same cancel signal `run` awaits must
    /// share this token rather than derive a child of it.
    pub fn root(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs `fut` under both the remaining deadline and the cancel signal.
    /// Cancellation is checked first: a cancelled call never even starts
    /// waiting on the deadline race, matching "no further chunks after
    /// cancel" semantics for streaming consumers.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, EngineError>
    where
        F: Future<Output = Result<T, EngineError>>,
    {
        if self.is_cancelled() {
            return Err(EngineError::Cancelled {
                reason: "cancelled before dispatch".to_string(),
            });
        }
        let remaining = self.remaining();
        if remaining.is_zero() {
            return Err(EngineError::Timeout { elapsed_ms: 0 });
        }
        let started = Instant::now();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(EngineError::Cancelled {
                reason: "cancelled during call".to_string(),
            }),
            result = tokio::time::timeout(remaining, fut) => {
                match result {
                    Ok(inner) => inner,
                    Err(_) => Err(EngineError::Timeout {
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    }),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn completes_normally_within_deadline() {
        let ctx = CallContext::new(Duration::from_millis(200));
        let result: Result<i32, EngineError> = ctx.run(async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn exceeding_deadline_raises_timeout() {
        let ctx = CallContext::new(Duration::from_millis(20));
        let result: Result<(), EngineError> = ctx
            .run(async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(())
            })
            .await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn cancel_before_dispatch_raises_cancelled() {
        let ctx = CallContext::new(Duration::from_secs(5));
        ctx.cancel();
        let result: Result<(), EngineError> = ctx.run(async { Ok(()) }).await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn cancel_during_call_preempts_the_in_flight_future() {
        let ctx = CallContext::new(Duration::from_secs(5));
        let ctx2 = ctx.clone();
        let handle = tokio::spawn(async move {
            ctx2.run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        ctx.cancel();
        let result: Result<(), EngineError> = handle.await.unwrap();
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Cancelled);
    }
}
