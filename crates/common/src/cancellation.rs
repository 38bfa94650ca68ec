//! Composed cancellation handles
//!
//! Every API call owns a [`CallSignal`]: the caller's optional
//! [`CancellationToken`] combined with an optional deadline. Whichever fires
//! first aborts the guarded future, and the reason is reported as an
//! [`AbortReason`]. Waits that are not bound by the attempt deadline (backoff
//! sleeps, waiting on a shared refresh) use [`CallSignal::guard_external`],
//! which only listens to the caller's token.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a guarded future was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The caller's cancellation token fired
    Cancelled,
    /// The deadline elapsed; carries the configured timeout
    TimedOut(Duration),
}

/// "First signal wins" combination of external cancellation and a timeout.
#[derive(Debug, Clone)]
pub struct CallSignal {
    external: CancellationToken,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
}

impl CallSignal {
    /// Compose a signal from an optional caller token and an optional
    /// timeout starting now.
    ///
    /// The caller's token is observed through a child token, so firing
    /// this signal never cancels the caller's token.
    pub fn new(external: Option<&CancellationToken>, timeout: Option<Duration>) -> Self {
        let external = external.map_or_else(CancellationToken::new, CancellationToken::child_token);
        Self { external, timeout, deadline: timeout.map(|t| Instant::now() + t) }
    }

    /// Same external token, fresh deadline. Used once per network attempt.
    pub fn rearm(&self, timeout: Option<Duration>) -> Self {
        Self {
            external: self.external.clone(),
            timeout,
            deadline: timeout.map(|t| Instant::now() + t),
        }
    }

    /// True once the caller's token has fired.
    pub fn is_cancelled(&self) -> bool {
        self.external.is_cancelled()
    }

    /// The configured timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Drive `fut` until it completes or a signal fires.
    ///
    /// Cancellation is checked before the deadline, and both before the
    /// future, so an already-fired signal never lets the future start.
    pub async fn guard<F>(&self, fut: F) -> Result<F::Output, AbortReason>
    where
        F: Future,
    {
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            () = self.external.cancelled() => Err(AbortReason::Cancelled),
            () = deadline => Err(AbortReason::TimedOut(self.timeout.unwrap_or_default())),
            out = fut => Ok(out),
        }
    }

    /// Drive `fut` until it completes or the caller cancels; the deadline is
    /// ignored.
    pub async fn guard_external<F>(&self, fut: F) -> Result<F::Output, AbortReason>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            () = self.external.cancelled() => Err(AbortReason::Cancelled),
            out = fut => Ok(out),
        }
    }

    /// Sleep for `delay` unless the caller cancels first.
    pub async fn sleep(&self, delay: Duration) -> Result<(), AbortReason> {
        if delay.is_zero() {
            return if self.is_cancelled() { Err(AbortReason::Cancelled) } else { Ok(()) };
        }
        self.guard_external(tokio::time::sleep(delay)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_future_completes_first() {
        let signal = CallSignal::new(None, Some(Duration::from_secs(5)));
        let result = signal.guard(async { 7 }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn test_timeout_fires() {
        let signal = CallSignal::new(None, Some(Duration::from_millis(20)));
        let result = signal.guard(tokio::time::sleep(Duration::from_secs(5))).await;
        assert_eq!(result, Err(AbortReason::TimedOut(Duration::from_millis(20))));
    }

    #[tokio::test]
    async fn test_external_cancellation_fires() {
        let token = CancellationToken::new();
        let signal = CallSignal::new(Some(&token), Some(Duration::from_secs(5)));

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = signal.guard(tokio::time::sleep(Duration::from_secs(5))).await;
        assert_eq!(result, Err(AbortReason::Cancelled));
    }

    #[tokio::test]
    async fn test_already_cancelled_wins_over_ready_future() {
        let token = CancellationToken::new();
        token.cancel();
        let signal = CallSignal::new(Some(&token), None);
        assert_eq!(signal.guard(async { 1 }).await, Err(AbortReason::Cancelled));
    }

    #[tokio::test]
    async fn test_signal_does_not_cancel_caller_token() {
        let token = CancellationToken::new();
        let signal = CallSignal::new(Some(&token), Some(Duration::from_millis(5)));
        let _ = signal.guard(tokio::time::sleep(Duration::from_secs(1))).await;
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn test_guard_external_ignores_deadline() {
        let signal = CallSignal::new(None, Some(Duration::from_millis(1)));
        tokio::time::sleep(Duration::from_millis(5)).await;
        let result = signal.guard_external(async { "done" }).await;
        assert_eq!(result, Ok("done"));
    }

    #[tokio::test]
    async fn test_rearm_resets_deadline() {
        let signal = CallSignal::new(None, Some(Duration::from_millis(10)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        let fresh = signal.rearm(Some(Duration::from_secs(5)));
        assert_eq!(fresh.guard(async { 3 }).await, Ok(3));
    }

    #[tokio::test]
    async fn test_zero_sleep_respects_cancellation() {
        let token = CancellationToken::new();
        let signal = CallSignal::new(Some(&token), None);
        assert_eq!(signal.sleep(Duration::ZERO).await, Ok(()));
        token.cancel();
        assert_eq!(signal.sleep(Duration::ZERO).await, Err(AbortReason::Cancelled));
    }
}
