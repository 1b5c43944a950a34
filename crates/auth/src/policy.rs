use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::PolicyRequest;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("policy evaluation failed: {0}")]
    Evaluation(String),

    #[error("policy evaluation timed out after {0:?}")]
    Timeout(Duration),
}

/// Decides whether a single role may perform an action on a resource.
#[async_trait]
pub trait PolicyEngine: Send + Sync {
    async fn enforce(&self, request: &PolicyRequest) -> Result<bool, PolicyError>;

    /// One answer per request, in order.
    async fn batch_enforce(&self, requests: &[PolicyRequest]) -> Result<Vec<bool>, PolicyError> {
        let mut answers = Vec::with_capacity(requests.len());
        for request in requests {
            answers.push(self.enforce(request).await?);
        }
        Ok(answers)
    }
}
