/// Resilience helpers shared by Nova services
///
/// - **Retry**: bounded retries with exponential backoff and jitter, optionally
///   restricted to errors a predicate marks as transient (e.g. optimistic
///   version conflicts)
/// - **Timeout**: request-scoped deadlines that keep the operation's own error type
///
/// # Example: retry only on conflicts
///
/// ```rust,no_run
/// use resilience::{with_retry_if, RetryConfig};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let config = RetryConfig::for_conflicts(5, Duration::from_millis(10));
///
///     let result = with_retry_if(&config, |e: &String| e == "conflict", || async {
///         // read, modify, version-checked write
///         Ok::<_, String>(())
///     })
///     .await;
///     assert!(result.is_ok());
/// }
/// ```

pub mod retry;
pub mod timeout;

pub use retry::{with_retry, with_retry_if, RetryConfig, RetryError};
pub use timeout::{with_timeout, with_timeout_result, TimeoutError};
