use std::collections::HashSet;
use std::collections::VecDeque;

use crate::message::MessageId;
use crate::retry::RetryManagerBackend;

/// Retry manager where every failed id is immediately eligible for retry, returned in the
/// order it failed. Used by replay consumers, which must re-emit every failure exactly once.
#[derive(Default)]
pub struct FailedTuplesFirst {
    queue: VecDeque<MessageId>,
    tracked: HashSet<MessageId>,
    in_flight: HashSet<MessageId>,
}

impl FailedTuplesFirst {
    pub fn new() -> FailedTuplesFirst {
        FailedTuplesFirst::default()
    }
}

impl RetryManagerBackend for FailedTuplesFirst {
    fn failed(&mut self, id: MessageId) {
        self.in_flight.remove(&id);
        if self.tracked.insert(id.clone()) {
            self.queue.push_back(id);
        }
    }

    fn acked(&mut self, id: &MessageId) {
        self.tracked.remove(id);
        self.in_flight.remove(id);
        self.queue.retain(|queued| queued != id);
    }

    fn retry_further(&self, _id: &MessageId) -> bool {
        true
    }

    fn next_failed_message_to_retry(&mut self) -> Option<MessageId> {
        let position = self.queue.iter().position(|id| !self.in_flight.contains(id))?;
        let id = self.queue.remove(position)?;
        self.tracked.remove(&id);
        self.in_flight.insert(id.clone());
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::FailedTuplesFirst;
    use crate::id::VirtualConsumerId;
    use crate::message::MessageId;
    use crate::retry::RetryManagerBackend;

    fn id(offset: i64) -> MessageId {
        MessageId::new("t".into(), 0, offset, VirtualConsumerId::firehose("p"))
    }

    #[test]
    fn scenario_s1_failed_tuples_first_basic() {
        let mut manager = FailedTuplesFirst::new();
        manager.failed(id(101));
        manager.failed(id(102));
        manager.failed(id(103));

        assert_eq!(manager.next_failed_message_to_retry(), Some(id(101)));
        assert_eq!(manager.next_failed_message_to_retry(), Some(id(102)));
        assert_eq!(manager.next_failed_message_to_retry(), Some(id(103)));
        assert_eq!(manager.next_failed_message_to_retry(), None);

        manager.acked(&id(102));
        manager.failed(id(103));
        manager.acked(&id(101));

        assert_eq!(manager.next_failed_message_to_retry(), Some(id(103)));
        assert_eq!(manager.next_failed_message_to_retry(), None);

        manager.acked(&id(103));
        assert_eq!(manager.next_failed_message_to_retry(), None);
    }

    #[test]
    fn in_flight_id_not_returned_twice() {
        let mut manager = FailedTuplesFirst::new();
        manager.failed(id(1));
        let first = manager.next_failed_message_to_retry();
        assert_eq!(first, Some(id(1)));
        assert_eq!(manager.next_failed_message_to_retry(), None);
        manager.failed(id(1));
        assert_eq!(manager.next_failed_message_to_retry(), Some(id(1)));
    }
}
