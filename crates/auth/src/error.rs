use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Startup failures. None of these are recoverable; the process must not serve
/// traffic after one.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("could not read key file {path}: {source}")]
    KeyRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not decode key file {path}: {reason}")]
    KeyDecode { path: PathBuf, reason: String },

    #[error("invalid {purpose} key: {reason}")]
    InvalidKey { purpose: &'static str, reason: String },

    #[error("could not write key file {path}: {source}")]
    KeyWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// A shared store, cache or directory could not answer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
}

impl StoreError {
    pub fn unavailable(reason: impl core::fmt::Display) -> Self {
        StoreError::Unavailable(reason.to_string())
    }
}

/// Run a store call under `limit`; an elapsed timer becomes [`StoreError::Timeout`].
pub(crate) async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounded_reports_timeout() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, StoreError>(true)
        };
        let err = bounded(Duration::from_millis(10), slow).await.unwrap_err();
        assert_eq!(err, StoreError::Timeout(Duration::from_millis(10)));
    }

    #[tokio::test]
    async fn bounded_passes_results_through() {
        assert_eq!(bounded(Duration::from_secs(1), async { Ok::<_, StoreError>(7) }).await, Ok(7));
        let failing = async { Err::<u8, _>(StoreError::unavailable("down")) };
        assert_eq!(
            bounded(Duration::from_secs(1), failing).await,
            Err(StoreError::Unavailable("down".into()))
        );
    }
}
