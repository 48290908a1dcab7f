/// Request deadlines
///
/// Every store call made on behalf of an inbound request is bounded by the
/// request's deadline. When it elapses the call is abandoned and reported as
/// `StoreError::Timeout`; nothing is retried.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::StoreError;

#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// Deadline `budget` from now
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    pub fn is_elapsed(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Run `fut`, failing with `StoreError::Timeout(operation)` if the deadline passes first
    pub async fn bound<T, F>(&self, operation: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        // An elapsed deadline never starts the call
        if self.is_elapsed() {
            tracing::warn!(operation = operation, "Request deadline elapsed before store call");
            return Err(StoreError::Timeout(operation));
        }

        match tokio::time::timeout_at(self.at, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(operation = operation, "Store call exceeded request deadline");
                Err(StoreError::Timeout(operation))
            }
        }
    }
}
