use serde_derive::Deserialize;
use serde_derive::Serialize;

use crate::error::Result;
use crate::message::MessageId;

pub mod backoff;
pub mod failed_first;
pub mod never;

pub use self::backoff::BackoffConfig;
pub use self::backoff::ExponentialBackoff;
pub use self::failed_first::FailedTuplesFirst;
pub use self::never::NeverRetry;

/// Tracks failed message ids and decides whether/when a message should be retried.
///
/// All operations on one instance are expected to be serialized by the owning worker task: no
/// internal locking is required by implementations.
pub trait RetryManagerBackend: Send {
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    /// Registers `id` as failed, making it eligible for retry.
    fn failed(&mut self, id: MessageId);

    /// Clears all retry state tracked for `id`.
    fn acked(&mut self, id: &MessageId);

    /// Whether `id` should be retried at all (ignoring timing).
    fn retry_further(&self, id: &MessageId) -> bool;

    /// Returns the next failed id that is ready to be retried, if any, and marks it as
    /// "in flight" so it is not returned again until a new `failed` call re-marks it.
    fn next_failed_message_to_retry(&mut self) -> Option<MessageId>;
}

/// Enum-dispatched factory over the supported `RetryManagerBackend` variants.
///
/// Construction from configuration is a match over this closed variant set rather than dynamic
/// class loading: see the crate's design notes on replacing name-based plugin construction.
pub enum RetryManager {
    Never(NeverRetry),
    FailedTuplesFirst(FailedTuplesFirst),
    ExponentialBackoff(ExponentialBackoff),
}

impl RetryManager {
    pub fn from_config(config: &RetryManagerConfig) -> RetryManager {
        match config {
            RetryManagerConfig::Never => RetryManager::Never(NeverRetry::new()),
            RetryManagerConfig::FailedTuplesFirst => {
                RetryManager::FailedTuplesFirst(FailedTuplesFirst::new())
            }
            RetryManagerConfig::ExponentialBackoff(options) => {
                RetryManager::ExponentialBackoff(ExponentialBackoff::new(options.clone()))
            }
        }
    }
}

impl RetryManagerBackend for RetryManager {
    fn open(&mut self) -> Result<()> {
        match self {
            RetryManager::Never(inner) => inner.open(),
            RetryManager::FailedTuplesFirst(inner) => inner.open(),
            RetryManager::ExponentialBackoff(inner) => inner.open(),
        }
    }

    fn failed(&mut self, id: MessageId) {
        match self {
            RetryManager::Never(inner) => inner.failed(id),
            RetryManager::FailedTuplesFirst(inner) => inner.failed(id),
            RetryManager::ExponentialBackoff(inner) => inner.failed(id),
        }
    }

    fn acked(&mut self, id: &MessageId) {
        match self {
            RetryManager::Never(inner) => inner.acked(id),
            RetryManager::FailedTuplesFirst(inner) => inner.acked(id),
            RetryManager::ExponentialBackoff(inner) => inner.acked(id),
        }
    }

    fn retry_further(&self, id: &MessageId) -> bool {
        match self {
            RetryManager::Never(inner) => inner.retry_further(id),
            RetryManager::FailedTuplesFirst(inner) => inner.retry_further(id),
            RetryManager::ExponentialBackoff(inner) => inner.retry_further(id),
        }
    }

    fn next_failed_message_to_retry(&mut self) -> Option<MessageId> {
        match self {
            RetryManager::Never(inner) => inner.next_failed_message_to_retry(),
            RetryManager::FailedTuplesFirst(inner) => inner.next_failed_message_to_retry(),
            RetryManager::ExponentialBackoff(inner) => inner.next_failed_message_to_retry(),
        }
    }
}

/// Selects the `RetryManager` variant to construct and its tunables.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "retryManagerClass", content = "options")]
pub enum RetryManagerConfig {
    #[serde(rename = "never")]
    Never,

    #[serde(rename = "failedTuplesFirst")]
    FailedTuplesFirst,

    #[serde(rename = "exponentialBackoff")]
    ExponentialBackoff(BackoffConfig),
}

impl Default for RetryManagerConfig {
    fn default() -> RetryManagerConfig {
        RetryManagerConfig::ExponentialBackoff(BackoffConfig::default())
    }
}
