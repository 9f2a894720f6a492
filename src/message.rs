use std::collections::BTreeMap;

use serde_derive::Deserialize;
use serde_derive::Serialize;

use crate::id::VirtualConsumerId;

/// Identifies a single record read off the log: the topic, partition, offset it came from, and
/// the virtual consumer that emitted it. Emitted downstream so a later ack/fail can be routed
/// back to the owning consumer.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct MessageId {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub source: VirtualConsumerId,
}

impl MessageId {
    pub fn new(topic: String, partition: i32, offset: i64, source: VirtualConsumerId) -> MessageId {
        MessageId {
            topic,
            partition,
            offset,
            source,
        }
    }
}

/// A fully decoded record ready to hand to the host runtime.
///
/// Immutable after construction: fields are not intended to be mutated once a `Message` has been
/// emitted, since the id is already in flight with the owning `PartitionOffsetTracker`.
#[derive(Clone, Debug)]
pub struct Message {
    id: MessageId,
    values: Vec<serde_json::Value>,
}

impl Message {
    pub fn new(id: MessageId, values: Vec<serde_json::Value>) -> Message {
        Message { id, values }
    }

    pub fn id(&self) -> &MessageId {
        &self.id
    }

    pub fn values(&self) -> &[serde_json::Value] {
        &self.values
    }

    pub fn into_parts(self) -> (MessageId, Vec<serde_json::Value>) {
        (self.id, self.values)
    }
}

/// An immutable mapping from `(topic, partition)` to an offset.
///
/// Used both as a starting state (seek targets on open) and as an ending state (an inclusive
/// upper bound per partition). Built through `ConsumerStateBuilder`.
///
/// Serialized as a flat list of `(topic, partition, offset)` triples rather than a map, since JSON
/// object keys must be strings and `(String, i32)` tuple keys are not.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct ConsumerState {
    offsets: BTreeMap<(String, i32), i64>,
}

impl Serialize for ConsumerState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeSeq;
        let mut seq = serializer.serialize_seq(Some(self.offsets.len()))?;
        for (&(ref topic, partition), &offset) in &self.offsets {
            seq.serialize_element(&(topic, partition, offset))?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for ConsumerState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let entries = Vec::<(String, i32, i64)>::deserialize(deserializer)?;
        let offsets = entries
            .into_iter()
            .map(|(topic, partition, offset)| ((topic, partition), offset))
            .collect();
        Ok(ConsumerState { offsets })
    }
}

impl ConsumerState {
    pub fn builder() -> ConsumerStateBuilder {
        ConsumerStateBuilder::default()
    }

    pub fn get(&self, topic: &str, partition: i32) -> Option<i64> {
        self.offsets.get(&(topic.to_string(), partition)).copied()
    }

    pub fn partitions(&self) -> impl Iterator<Item = (&(String, i32), &i64)> {
        self.offsets.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

/// Builder for `ConsumerState`, mirroring the way `MessageId`/offsets accumulate one partition
/// at a time as the coordinator discovers assignments.
#[derive(Clone, Debug, Default)]
pub struct ConsumerStateBuilder {
    offsets: BTreeMap<(String, i32), i64>,
}

impl ConsumerStateBuilder {
    pub fn with_offset(mut self, topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        self.offsets.insert((topic.into(), partition), offset);
        self
    }

    pub fn build(self) -> ConsumerState {
        ConsumerState {
            offsets: self.offsets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ConsumerState;

    #[test]
    fn builder_accumulates_partitions() {
        let state = ConsumerState::builder()
            .with_offset("orders", 0, 100)
            .with_offset("orders", 1, 200)
            .build();
        assert_eq!(state.get("orders", 0), Some(100));
        assert_eq!(state.get("orders", 1), Some(200));
        assert_eq!(state.get("orders", 2), None);
    }

    #[test]
    fn empty_state_is_empty() {
        let state = ConsumerState::default();
        assert!(state.is_empty());
    }
}
