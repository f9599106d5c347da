use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Error taxonomy shared by every check and collaborator.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{service} unavailable: {message}")]
    TransientUpstream {
        service: &'static str,
        message: String,
    },
    #[error("recipient {0} is permanently unreachable")]
    RecipientUnreachable(i64),
    #[error("data integrity violation: {0}")]
    DataIntegrity(String),
    #[error("user {user_id} balance {available} does not cover {required}")]
    InsufficientBalance {
        user_id: i64,
        required: i64,
        available: i64,
    },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("template '{0}' is not registered")]
    TemplateMissing(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn transient(service: &'static str, message: impl Into<String>) -> Self {
        Self::TransientUpstream {
            service,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientUpstream { .. })
    }
}

/// Why a scheduled tick did not complete.
#[derive(Debug, Error)]
pub enum TickError {
    #[error("cannot open unit of work: {0:#}")]
    Begin(anyhow::Error),
    #[error("another tick is still running")]
    InProgress,
    #[error("tick aborted: {0}")]
    Aborted(#[from] CoreError),
}

/// Bounds an outbound call; elapsed time maps to `TransientUpstream`.
pub async fn bounded<T, F>(service: &'static str, limit: Duration, fut: F) -> CoreResult<T>
where
    F: Future<Output = CoreResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(CoreError::transient(
            service,
            format!("timed out after {}s", limit.as_secs_f32()),
        )),
    }
}
