use std::collections::HashMap;
use std::collections::HashSet;
use std::time::Duration;
use std::time::Instant;

use serde_derive::Deserialize;
use serde_derive::Serialize;

use crate::message::MessageId;
use crate::retry::RetryManagerBackend;

/// Tunables for `ExponentialBackoff`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Initial delay, in milliseconds, before the first retry.
    #[serde(default = "BackoffConfig::default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Multiplier applied to the delay after every attempt.
    #[serde(default = "BackoffConfig::default_delay_multiplier")]
    pub delay_multiplier: f64,

    /// Upper bound on the computed delay, in milliseconds.
    #[serde(default = "BackoffConfig::default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Maximum number of attempts before an id is abandoned. Negative values mean unbounded;
    /// stored as `i64` for parity with the source configuration surface.
    #[serde(default = "BackoffConfig::default_max_attempts")]
    pub max_attempts: i64,
}

impl Default for BackoffConfig {
    fn default() -> BackoffConfig {
        BackoffConfig {
            initial_delay_ms: BackoffConfig::default_initial_delay_ms(),
            delay_multiplier: BackoffConfig::default_delay_multiplier(),
            max_delay_ms: BackoffConfig::default_max_delay_ms(),
            max_attempts: BackoffConfig::default_max_attempts(),
        }
    }
}

impl BackoffConfig {
    fn default_initial_delay_ms() -> u64 {
        1000
    }
    fn default_delay_multiplier() -> f64 {
        2.0
    }
    fn default_max_delay_ms() -> u64 {
        60_000
    }
    fn default_max_attempts() -> i64 {
        8
    }
}

struct RetryState {
    attempt: u32,
    first_failure: Instant,
    next_retry_at: Instant,
}

/// Retry manager where each id has an attempt counter and a `next_retry_at = now + base *
/// multiplier^attempt`, capped at `max_delay_ms`. `retry_further` returns false once the
/// attempt count reaches `max_attempts` (never, if `max_attempts` is negative).
pub struct ExponentialBackoff {
    config: BackoffConfig,
    state: HashMap<MessageId, RetryState>,
    in_flight: HashSet<MessageId>,
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> ExponentialBackoff {
        ExponentialBackoff {
            config,
            state: HashMap::new(),
            in_flight: HashSet::new(),
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.config.initial_delay_ms as f64;
        let delay = base * self.config.delay_multiplier.powi(attempt as i32);
        let delay = delay.min(self.config.max_delay_ms as f64).max(0.0);
        Duration::from_millis(delay as u64)
    }
}

impl RetryManagerBackend for ExponentialBackoff {
    fn failed(&mut self, id: MessageId) {
        self.in_flight.remove(&id);
        let now = Instant::now();
        let entry = self.state.entry(id).or_insert_with(|| RetryState {
            attempt: 0,
            first_failure: now,
            next_retry_at: now,
        });
        entry.next_retry_at = now + self.delay_for(entry.attempt);
    }

    fn acked(&mut self, id: &MessageId) {
        self.state.remove(id);
        self.in_flight.remove(id);
    }

    fn retry_further(&self, id: &MessageId) -> bool {
        if self.config.max_attempts < 0 {
            return true;
        }
        match self.state.get(id) {
            Some(state) => (state.attempt as i64) < self.config.max_attempts,
            None => true,
        }
    }

    fn next_failed_message_to_retry(&mut self) -> Option<MessageId> {
        let now = Instant::now();
        let ready = self
            .state
            .iter()
            .filter(|(id, state)| !self.in_flight.contains(*id) && state.next_retry_at <= now)
            .min_by_key(|(_, state)| (state.next_retry_at, state.first_failure))
            .map(|(id, _)| id.clone())?;

        if let Some(state) = self.state.get_mut(&ready) {
            state.attempt += 1;
        }
        self.in_flight.insert(ready.clone());
        Some(ready)
    }
}

#[cfg(test)]
mod tests {
    use std::thread::sleep;
    use std::time::Duration;

    use super::BackoffConfig;
    use super::ExponentialBackoff;
    use crate::id::VirtualConsumerId;
    use crate::message::MessageId;
    use crate::retry::RetryManagerBackend;

    fn id() -> MessageId {
        MessageId::new("t".into(), 3, 434323, VirtualConsumerId::firehose("p"))
    }

    #[test]
    fn not_ready_before_delay_elapses() {
        let config = BackoffConfig {
            initial_delay_ms: 50,
            delay_multiplier: 2.0,
            max_delay_ms: 1000,
            max_attempts: 5,
        };
        let mut manager = ExponentialBackoff::new(config);
        manager.failed(id());
        assert_eq!(manager.next_failed_message_to_retry(), None);
        sleep(Duration::from_millis(60));
        assert_eq!(manager.next_failed_message_to_retry(), Some(id()));
    }

    #[test]
    fn retry_further_false_after_max_attempts() {
        let config = BackoffConfig {
            initial_delay_ms: 1,
            delay_multiplier: 1.0,
            max_delay_ms: 10,
            max_attempts: 2,
        };
        let mut manager = ExponentialBackoff::new(config);
        for _ in 0..2 {
            manager.failed(id());
            sleep(Duration::from_millis(5));
            manager.next_failed_message_to_retry();
        }
        assert!(!manager.retry_further(&id()));
    }

    #[test]
    fn unbounded_when_max_attempts_negative() {
        let config = BackoffConfig {
            max_attempts: -1,
            ..BackoffConfig::default()
        };
        let manager = ExponentialBackoff::new(config);
        assert!(manager.retry_further(&id()));
    }
}
