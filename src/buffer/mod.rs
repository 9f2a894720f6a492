use serde_derive::Deserialize;
use serde_derive::Serialize;

use crate::id::VirtualConsumerId;
use crate::message::Message;

pub mod fifo;
pub mod round_robin;

pub use self::fifo::Fifo;
pub use self::round_robin::RoundRobin;

/// Bounded, multi-producer single-consumer queue that multiplexes every virtual consumer's
/// output into the single pull interface the host runtime drives.
pub trait MessageBufferBackend: Send {
    /// Enqueues `message` under `key` (the emitting consumer's id). May block if the buffer
    /// (or, for `RoundRobin`, the producer's sub-queue) is at capacity: this is the mechanism
    /// by which the coordinator applies backpressure.
    fn put(&self, key: &VirtualConsumerId, message: Message);

    /// Non-blocking: returns the next message, or `None` if nothing is currently available.
    fn poll(&self) -> Option<Message>;

    /// Total number of messages currently queued across all producers.
    fn size(&self) -> usize;
}

/// Enum-dispatched factory over the supported `MessageBufferBackend` variants.
pub enum MessageBuffer {
    Fifo(Fifo),
    RoundRobin(RoundRobin),
}

impl MessageBuffer {
    pub fn from_config(config: &MessageBufferConfig) -> MessageBuffer {
        match config {
            MessageBufferConfig::Fifo { capacity } => MessageBuffer::Fifo(Fifo::new(*capacity)),
            MessageBufferConfig::RoundRobin { capacity } => {
                MessageBuffer::RoundRobin(RoundRobin::new(*capacity))
            }
        }
    }
}

impl MessageBufferBackend for MessageBuffer {
    fn put(&self, key: &VirtualConsumerId, message: Message) {
        match self {
            MessageBuffer::Fifo(inner) => inner.put(key, message),
            MessageBuffer::RoundRobin(inner) => inner.put(key, message),
        }
    }

    fn poll(&self) -> Option<Message> {
        match self {
            MessageBuffer::Fifo(inner) => inner.poll(),
            MessageBuffer::RoundRobin(inner) => inner.poll(),
        }
    }

    fn size(&self) -> usize {
        match self {
            MessageBuffer::Fifo(inner) => inner.size(),
            MessageBuffer::RoundRobin(inner) => inner.size(),
        }
    }
}

/// Selects the `MessageBuffer` variant to construct and its capacity.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[serde(tag = "messageBufferClass")]
pub enum MessageBufferConfig {
    #[serde(rename = "FIFO")]
    Fifo {
        #[serde(default = "MessageBufferConfig::default_capacity")]
        capacity: usize,
    },
    #[serde(rename = "RoundRobin")]
    RoundRobin {
        #[serde(default = "MessageBufferConfig::default_capacity")]
        capacity: usize,
    },
}

impl Default for MessageBufferConfig {
    fn default() -> MessageBufferConfig {
        MessageBufferConfig::Fifo {
            capacity: MessageBufferConfig::default_capacity(),
        }
    }
}

impl MessageBufferConfig {
    fn default_capacity() -> usize {
        1000
    }
}
