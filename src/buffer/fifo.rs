use crossbeam_channel::bounded;
use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;

use crate::id::VirtualConsumerId;
use crate::message::Message;

/// A single bounded queue shared by all producers. Simple, but a high-volume producer can
/// starve the others since ordering is strict insertion order across every source.
pub struct Fifo {
    sender: Sender<Message>,
    receiver: Receiver<Message>,
}

impl Fifo {
    pub fn new(capacity: usize) -> Fifo {
        let (sender, receiver) = bounded(capacity.max(1));
        Fifo { sender, receiver }
    }

    pub fn put(&self, _key: &VirtualConsumerId, message: Message) {
        // A disconnected receiver only happens once the buffer itself is being dropped.
        let _ = self.sender.send(message);
    }

    pub fn poll(&self) -> Option<Message> {
        self.receiver.try_recv().ok()
    }

    pub fn size(&self) -> usize {
        self.receiver.len()
    }
}

#[cfg(test)]
mod tests {
    use super::Fifo;
    use crate::id::VirtualConsumerId;
    use crate::message::Message;
    use crate::message::MessageId;

    fn message(offset: i64) -> Message {
        Message::new(
            MessageId::new("t".into(), 0, offset, VirtualConsumerId::firehose("p")),
            vec![],
        )
    }

    #[test]
    fn preserves_insertion_order() {
        let buffer = Fifo::new(4);
        let key = VirtualConsumerId::firehose("p");
        buffer.put(&key, message(1));
        buffer.put(&key, message(2));
        assert_eq!(buffer.poll().unwrap().id().offset, 1);
        assert_eq!(buffer.poll().unwrap().id().offset, 2);
        assert!(buffer.poll().is_none());
    }
}
