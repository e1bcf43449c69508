pub mod account_deletion;
pub mod assets;
pub mod email;
pub mod follow;
pub mod password_reset;
pub mod profile;
pub mod reconciliation;

pub use account_deletion::AccountDeletionCoordinator;
pub use assets::{AssetError, AssetStore, InMemoryAssetStore, S3AssetStore};
pub use email::{MailError, Mailer, SmtpMailer};
pub use follow::RelationshipManager;
pub use password_reset::{IssuedResetToken, PasswordResetTokenService, ResetDispatch};
pub use profile::{NewAccount, ProfileService, ProfileUpdate};
pub use reconciliation::EdgeReconciler;

use resilience::{with_retry_if, with_timeout_result, RetryConfig, RetryError, TimeoutError};
use std::future::Future;
use std::time::Duration;

use crate::error::{ServiceError, ServiceResult};
use crate::metrics::VERSION_CONFLICTS_TOTAL;

/// Re-run `f` while it fails with a version conflict, up to the configured bound.
///
/// `f` must re-read the aggregates it writes on every attempt.
pub(crate) async fn retry_on_conflict<F, Fut, T>(config: &RetryConfig, f: F) -> ServiceResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ServiceResult<T>>,
{
    let should_retry = |e: &ServiceError| {
        let retryable = e.is_retryable();
        if retryable {
            VERSION_CONFLICTS_TOTAL.inc();
        }
        retryable
    };

    with_retry_if(config, should_retry, f)
        .await
        .map_err(RetryError::into_inner)
}

/// Request-scoped deadline for short operations.
pub(crate) async fn within_deadline<F, T>(
    deadline: Duration,
    operation: &'static str,
    future: F,
) -> ServiceResult<T>
where
    F: Future<Output = ServiceResult<T>>,
{
    match with_timeout_result(deadline, future).await {
        Ok(value) => Ok(value),
        Err(TimeoutError::Inner(e)) => Err(e),
        Err(TimeoutError::Elapsed(after)) => Err(ServiceError::Timeout(format!(
            "{operation} exceeded {after:?}"
        ))),
    }
}
