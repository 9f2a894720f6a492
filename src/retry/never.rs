use crate::message::MessageId;
use crate::retry::RetryManagerBackend;

/// Retry manager that never retries: used to disable retries entirely.
#[derive(Default)]
pub struct NeverRetry;

impl NeverRetry {
    pub fn new() -> NeverRetry {
        NeverRetry
    }
}

impl RetryManagerBackend for NeverRetry {
    fn failed(&mut self, _id: MessageId) {}

    fn acked(&mut self, _id: &MessageId) {}

    fn retry_further(&self, _id: &MessageId) -> bool {
        false
    }

    fn next_failed_message_to_retry(&mut self) -> Option<MessageId> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::NeverRetry;
    use crate::id::VirtualConsumerId;
    use crate::message::MessageId;
    use crate::retry::RetryManagerBackend;

    fn id() -> MessageId {
        MessageId::new("t".into(), 0, 1, VirtualConsumerId::firehose("p"))
    }

    #[test]
    fn never_retries() {
        let mut manager = NeverRetry::new();
        manager.failed(id());
        assert!(!manager.retry_further(&id()));
        assert_eq!(manager.next_failed_message_to_retry(), None);
    }
}
