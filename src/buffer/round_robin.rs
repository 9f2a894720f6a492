use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Mutex;

use crossbeam_channel::bounded;
use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;

use crate::id::VirtualConsumerId;
use crate::message::Message;

/// One bounded sub-queue per registered producer key, polled in a stable order that advances by
/// one cursor position each call. Producers added or removed between polls do not crash the
/// iteration: `poll` takes a snapshot of the current key order before walking it.
pub struct RoundRobin {
    capacity: usize,
    queues: Mutex<HashMap<VirtualConsumerId, (Sender<Message>, Receiver<Message>)>>,
    order: Mutex<Vec<VirtualConsumerId>>,
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new(capacity: usize) -> RoundRobin {
        RoundRobin {
            capacity: capacity.max(1),
            queues: Mutex::new(HashMap::new()),
            order: Mutex::new(Vec::new()),
            cursor: AtomicUsize::new(0),
        }
    }

    fn sender_for(&self, key: &VirtualConsumerId) -> Sender<Message> {
        let mut queues = self.queues.lock().expect("round robin queues lock poisoned");
        if let Some((sender, _)) = queues.get(key) {
            return sender.clone();
        }
        let (sender, receiver) = bounded(self.capacity);
        queues.insert(key.clone(), (sender.clone(), receiver));
        self.order
            .lock()
            .expect("round robin order lock poisoned")
            .push(key.clone());
        sender
    }

    pub fn put(&self, key: &VirtualConsumerId, message: Message) {
        let sender = self.sender_for(key);
        // Sent without holding any lock: a full sub-queue blocks only its own producer.
        let _ = sender.send(message);
    }

    pub fn poll(&self) -> Option<Message> {
        let order = self.order.lock().expect("round robin order lock poisoned").clone();
        if order.is_empty() {
            return None;
        }
        let len = order.len();
        let start = self.cursor.fetch_add(1, Ordering::SeqCst) % len;
        let queues = self.queues.lock().expect("round robin queues lock poisoned");
        for offset in 0..len {
            let key = &order[(start + offset) % len];
            if let Some((_, receiver)) = queues.get(key) {
                if let Ok(message) = receiver.try_recv() {
                    return Some(message);
                }
            }
        }
        None
    }

    pub fn size(&self) -> usize {
        let queues = self.queues.lock().expect("round robin queues lock poisoned");
        queues.values().map(|(_, receiver)| receiver.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::RoundRobin;
    use crate::id::VirtualConsumerId;
    use crate::message::Message;
    use crate::message::MessageId;

    fn message(source: &VirtualConsumerId, offset: i64) -> Message {
        Message::new(MessageId::new("t".into(), 0, offset, source.clone()), vec![])
    }

    #[test]
    fn rotates_fairly_across_producers() {
        let buffer = RoundRobin::new(4);
        let a = VirtualConsumerId::firehose("a");
        let b = VirtualConsumerId::firehose("b");
        buffer.put(&a, message(&a, 1));
        buffer.put(&a, message(&a, 2));
        buffer.put(&b, message(&b, 10));

        let first = buffer.poll().unwrap();
        let second = buffer.poll().unwrap();
        let third = buffer.poll().unwrap();
        let mut sources: Vec<_> = vec![first, second, third]
            .into_iter()
            .map(|m| m.id().source.clone())
            .collect();
        sources.sort();
        assert_eq!(sources, vec![a.clone(), a.clone(), b.clone()]);
    }

    #[test]
    fn empty_producer_is_skipped() {
        let buffer = RoundRobin::new(4);
        let a = VirtualConsumerId::firehose("a");
        buffer.put(&a, message(&a, 1));
        assert!(buffer.poll().is_some());
        assert!(buffer.poll().is_none());
    }
}
