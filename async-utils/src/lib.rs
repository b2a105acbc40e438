//! Bounded execution helpers for probe and layer-write futures.
//!
//! Every probe or write in the continuity engine runs under two limits: a
//! per-operation deadline and a caller-owned `CancellationToken`. The
//! extension trait here races a future against both and reports
//! which limit fired, so callers can record the outcome as a value instead
//! of awaiting a stuck sink.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Why a bounded future did not produce a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundErr {
    /// The cancellation token fired first.
    Cancelled,
    /// The deadline elapsed first.
    TimedOut(Duration),
}

impl BoundErr {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut(_))
    }
}

impl std::fmt::Display for BoundErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => f.write_str("cancelled"),
            Self::TimedOut(limit) => write!(f, "timed out after {}ms", limit.as_millis()),
        }
    }
}

/// Extension trait bounding a future by a deadline and a cancellation token.
#[async_trait]
pub trait BoundedExt: Sized {
    type Output;

    /// Run to completion unless `limit` elapses or `token` fires.
    ///
    /// Cancellation wins over a simultaneous timeout.
    async fn bounded(
        self,
        limit: Duration,
        token: &CancellationToken,
    ) -> Result<Self::Output, BoundErr>;
}

#[async_trait]
impl<F> BoundedExt for F
where
    F: Future + Send,
    F::Output: Send,
{
    type Output = F::Output;

    async fn bounded(
        self,
        limit: Duration,
        token: &CancellationToken,
    ) -> Result<Self::Output, BoundErr> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(BoundErr::Cancelled),
            res = tokio::time::timeout(limit, self) => res.map_err(|_| BoundErr::TimedOut(limit)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::time::sleep;

    #[tokio::test]
    async fn bounded_returns_value_within_deadline() {
        let token = CancellationToken::new();

        let result = async { "layer written" }
            .bounded(Duration::from_secs(1), &token)
            .await;

        assert_eq!(Ok("layer written"), result);
    }

    #[tokio::test]
    async fn bounded_reports_timeout() {
        let token = CancellationToken::new();
        let limit = Duration::from_millis(20);

        let result = async {
            sleep(Duration::from_millis(500)).await;
            1
        }
        .bounded(limit, &token)
        .await;

        assert_eq!(Err(BoundErr::TimedOut(limit)), result);
        assert!(result.unwrap_err().is_timeout());
    }

    #[tokio::test]
    async fn bounded_prefers_cancellation_when_token_already_fired() {
        let token = CancellationToken::new();
        token.cancel();

        let result = async { 5 }.bounded(Duration::from_secs(1), &token).await;

        assert_eq!(Err(BoundErr::Cancelled), result);
    }

    #[test]
    fn timeout_display_includes_limit() {
        let err = BoundErr::TimedOut(Duration::from_millis(8000));
        assert_eq!(err.to_string(), "timed out after 8000ms");
    }
}
