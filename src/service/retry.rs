//! Transaction runner with serialization-failure retries.
//!
//! Every unit of work the services perform goes through [`run`]: it opens a
//! transaction, hands it to the caller's closure (which commits), and if the
//! storage reports a serialization failure, starts over with exponential
//! backoff. Each attempt carries its own deadline.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::BookingError;
use crate::persistence::{Storage, StorageError, StorageTx};

/// Attempts per unit of work, the first one included.
pub const MAX_ATTEMPTS: u32 = 3;

const BASE_DELAY: Duration = Duration::from_millis(10);

/// Failure inside a unit of work: either the storage or a domain rule.
///
/// Keeps storage errors distinguishable until the retry loop has decided
/// whether to start over.
#[derive(Debug)]
pub enum TxError {
    /// Storage failure, possibly retryable.
    Storage(StorageError),
    /// Domain failure, never retried.
    Domain(BookingError),
}

impl TxError {
    /// Returns `true` if the transaction may be re-run.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_retryable())
    }
}

impl From<StorageError> for TxError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}

impl From<BookingError> for TxError {
    fn from(err: BookingError) -> Self {
        Self::Domain(err)
    }
}

impl From<TxError> for BookingError {
    fn from(err: TxError) -> Self {
        match err {
            TxError::Storage(e) => e.into(),
            TxError::Domain(e) => e,
        }
    }
}

/// Delay before retry number `attempt` (1-based): `10ms × 2^(attempt-1)`
/// plus up to 50 % jitter.
#[must_use]
pub fn backoff(attempt: u32) -> Duration {
    let exp = BASE_DELAY.saturating_mul(1_u32 << attempt.saturating_sub(1).min(16));
    let max_jitter = u64::try_from(exp.as_micros() / 2).unwrap_or(u64::MAX);
    let jitter = rand::thread_rng().gen_range(0..=max_jitter);
    exp.saturating_add(Duration::from_micros(jitter))
}

/// Runs `work` in a fresh transaction, retrying serialization failures.
///
/// `work` receives the open transaction and is responsible for committing
/// it; returning early drops it, which rolls back. Each attempt, including
/// `begin`, must finish within `deadline`.
///
/// # Errors
///
/// Returns the domain error produced by `work`, `internal` once retries are
/// exhausted, or `internal` if an attempt exceeds its deadline.
pub async fn run<T, F, Fut>(
    storage: &dyn Storage,
    deadline: Duration,
    operation: &'static str,
    mut work: F,
) -> Result<T, BookingError>
where
    F: FnMut(Box<dyn StorageTx>) -> Fut,
    Fut: Future<Output = Result<T, TxError>>,
{
    let mut attempt = 1;
    loop {
        let outcome = tokio::time::timeout(deadline, async {
            let tx = storage.begin().await?;
            work(tx).await
        })
        .await
        .unwrap_or(Err(TxError::Storage(StorageError::Timeout)));

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < MAX_ATTEMPTS => {
                let delay = backoff(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = ?err,
                    "serialization failure, retrying transaction"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{BookingId, ClubId};
    use crate::persistence::memory::MemoryStorage;

    #[test]
    fn backoff_grows_with_bounded_jitter() {
        for attempt in 1..=3 {
            let base = BASE_DELAY * (1 << (attempt - 1));
            let delay = backoff(attempt);
            assert!(delay >= base, "attempt {attempt}: {delay:?} < {base:?}");
            assert!(delay <= base + base / 2, "attempt {attempt}: {delay:?} too long");
        }
    }

    #[test]
    fn only_storage_serialization_is_retryable() {
        assert!(TxError::Storage(StorageError::Serialization("x".into())).is_retryable());
        assert!(!TxError::Storage(StorageError::Timeout).is_retryable());
        assert!(!TxError::Domain(BookingError::InvalidInput("x".into())).is_retryable());
    }

    #[tokio::test]
    async fn recovers_from_transient_serialization_failures() {
        let storage = MemoryStorage::new();
        storage.fail_next_commits(2);
        let result = run(&storage, Duration::from_secs(1), "test", |tx| async move {
            tx.commit().await?;
            Ok(7)
        })
        .await;
        assert!(matches!(result, Ok(7)));
    }

    #[tokio::test]
    async fn gives_up_after_three_attempts() {
        let storage = MemoryStorage::new();
        storage.fail_next_commits(3);
        let result = run(&storage, Duration::from_secs(1), "test", |tx| async move {
            tx.commit().await?;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(BookingError::Internal(_))));
    }

    #[tokio::test]
    async fn domain_errors_are_not_retried() {
        let storage = MemoryStorage::new();
        let mut calls = 0;
        let result: Result<(), _> = run(&storage, Duration::from_secs(1), "test", |mut tx| {
            calls += 1;
            async move {
                let club = ClubId::new();
                let missing = tx.get_booking(club, BookingId::new()).await?;
                if missing.is_none() {
                    return Err(BookingError::NotFound("booking".into()).into());
                }
                Ok(())
            }
        })
        .await;
        assert!(matches!(result, Err(BookingError::NotFound(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn attempts_past_the_deadline_time_out() {
        let storage = MemoryStorage::new();
        let result: Result<(), _> = tokio_test::block_on(run(
            &storage,
            Duration::from_millis(5),
            "test",
            |tx| async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                tx.commit().await?;
                Ok(())
            },
        ));
        assert!(matches!(result, Err(BookingError::Internal(_))));
    }
}
