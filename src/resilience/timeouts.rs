//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap remote calls with a hard deadline
//! - Keep timeout errors distinct from the wrapped operation's errors
//! - Share one deadline across several sequential calls

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// Either the deadline passed or the operation failed on its own.
#[derive(Debug)]
pub enum DeadlineError<E> {
    Elapsed(Duration),
    Inner(E),
}

/// Run `fut`, giving up after `deadline`.
pub async fn with_deadline<F, T, E>(deadline: Duration, fut: F) -> Result<T, DeadlineError<E>>
where
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(DeadlineError::Inner(e)),
        Err(_) => Err(DeadlineError::Elapsed(deadline)),
    }
}

/// One deadline that bounds a whole sequence of calls.
///
/// Each [`Budget::run`] gets whatever is left, so two phases together never
/// take longer than the limit.
#[derive(Debug, Clone, Copy)]
pub struct Budget {
    expires_at: Instant,
    limit: Duration,
}

impl Budget {
    pub fn start(limit: Duration) -> Self {
        Self {
            expires_at: Instant::now() + limit,
            limit,
        }
    }

    /// Run `fut` until the budget expires. Elapsed reports the full limit.
    pub async fn run<F, T, E>(&self, fut: F) -> Result<T, DeadlineError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        match tokio::time::timeout_at(self.expires_at, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(DeadlineError::Inner(e)),
            Err(_) => Err(DeadlineError::Elapsed(self.limit)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_through_results() {
        let ok: Result<u8, DeadlineError<&str>> =
            with_deadline(Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let err = with_deadline(Duration::from_secs(1), async { Err::<u8, _>("refused") }).await;
        assert!(matches!(err, Err(DeadlineError::Inner("refused"))));
    }

    #[tokio::test]
    async fn reports_elapsed_deadline() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, ()>(())
        };
        let res = with_deadline(Duration::from_millis(20), slow).await;
        assert!(matches!(res, Err(DeadlineError::Elapsed(d)) if d == Duration::from_millis(20)));
    }

    #[tokio::test]
    async fn budget_is_shared_between_calls() {
        let budget = Budget::start(Duration::from_millis(60));
        let first = budget
            .run(async {
                tokio::time::sleep(Duration::from_millis(40)).await;
                Ok::<_, ()>(())
            })
            .await;
        assert!(first.is_ok());

        // alone this would fit, but only ~20ms are left
        let second = budget
            .run(async {
                tokio::time::sleep(Duration::from_millis(40)).await;
                Ok::<_, ()>(())
            })
            .await;
        assert!(matches!(second, Err(DeadlineError::Elapsed(d)) if d == Duration::from_millis(60)));
    }
}
