/// Resilience patterns for the ingestion pipeline
///
/// - **Timeout**: races an operation against a fixed deadline; the losing
///   operation is dropped, not awaited
/// - **Retry**: bounded attempts with capped exponential backoff and jitter
///
/// # Example: publish with timeout and retry
///
/// ```rust,no_run
/// use resilience::{with_retry, with_timeout_result, RetryConfig};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let config = RetryConfig::default();
///
///     let result = with_retry(config, || async {
///         with_timeout_result(Duration::from_secs(10), async {
///             // Your broker call here
///             Ok::<_, String>(())
///         })
///         .await
///     })
///     .await;
/// }
/// ```

pub mod retry;
pub mod timeout;

// Re-export main types for convenience
pub use retry::{backoff_for_attempt, with_retry, RetryConfig, RetryError};
pub use timeout::{with_timeout, with_timeout_result, Elapsed, TimeoutError};
