use std::time::Duration;

use failure::ResultExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::base_consumer::BaseConsumer;
use rdkafka::consumer::CommitMode;
use rdkafka::consumer::Consumer;
use rdkafka::message::Message as KafkaMessageTrait;
use rdkafka::topic_partition_list::Offset;
use rdkafka::topic_partition_list::TopicPartitionList;
use slog::debug;
use slog::Logger;

use crate::error::Error;
use crate::error::ErrorKind;
use crate::error::Result;
use crate::shared::kafka::consumer_config;
use crate::shared::kafka::ClientStatsContext;
use crate::shared::kafka::KafkaConfig;

/// A single raw record read from the log, before deserialization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Vec<u8>,
}

/// Low-level primitives a `VirtualConsumer` needs from the external partitioned log: assign a
/// fixed set of partitions (optionally seeking to a starting offset), poll one record at a time,
/// commit a partition's offset explicitly, and drop a partition once it is no longer needed.
pub trait LogConsumer: Send {
    fn open(&mut self) -> Result<()>;

    /// Assigns the given `(topic, partition, starting offset)` tuples. A `None` starting offset
    /// means "resume from whatever is already committed, or the earliest record".
    fn assign(&mut self, assignments: &[(String, i32, Option<i64>)]) -> Result<()>;

    /// Polls a single record, non-blocking.
    fn poll(&mut self) -> Result<Option<RawRecord>>;

    /// Lists the partition ids currently assigned to `topic` by the log. Used to subscribe the
    /// firehose to every partition of a topic when it has no starting state to derive the
    /// assignment from.
    fn partitions(&self, topic: &str) -> Result<Vec<i32>>;

    /// Commits the given partition's offset (the offset of the next record to read).
    fn commit(&mut self, topic: &str, partition: i32, offset: i64) -> Result<()>;

    /// Removes one partition from the current assignment.
    fn unsubscribe(&mut self, topic: &str, partition: i32) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

/// `LogConsumer` backed by a `rdkafka` `BaseConsumer` with explicit partition assignment and
/// manual offset commit (`enable.auto.commit=false`, `enable.auto.offset.store=false`).
pub struct KafkaLogConsumer {
    client_config: ClientConfig,
    consumer: Option<BaseConsumer<ClientStatsContext>>,
    assignment: Vec<(String, i32)>,
    logger: Logger,
}

impl KafkaLogConsumer {
    pub fn new(config: &KafkaConfig, client_id: &str, logger: Logger) -> KafkaLogConsumer {
        KafkaLogConsumer {
            client_config: consumer_config(config, client_id),
            consumer: None,
            assignment: Vec::new(),
            logger,
        }
    }

    fn consumer(&self) -> Result<&BaseConsumer<ClientStatsContext>> {
        self.consumer
            .as_ref()
            .ok_or_else(|| ErrorKind::IllegalState("log consumer used before open").into())
    }

    fn apply_assignment(&self) -> Result<()> {
        let consumer = self.consumer()?;
        let mut request = TopicPartitionList::with_capacity(self.assignment.len());
        for (topic, partition) in &self.assignment {
            request.add_partition(topic, *partition);
        }
        consumer
            .assign(&request)
            .with_context(|_| ErrorKind::Backend("assign"))?;
        Ok(())
    }
}

impl LogConsumer for KafkaLogConsumer {
    fn open(&mut self) -> Result<()> {
        let context = ClientStatsContext::new("sideline-spout-consumer");
        let consumer = self
            .client_config
            .create_with_context(context)
            .with_context(|_| ErrorKind::BackendConnect)?;
        self.consumer = Some(consumer);
        Ok(())
    }

    fn assign(&mut self, assignments: &[(String, i32, Option<i64>)]) -> Result<()> {
        self.assignment = assignments
            .iter()
            .map(|(topic, partition, _)| (topic.clone(), *partition))
            .collect();
        let mut request = TopicPartitionList::with_capacity(assignments.len());
        for (topic, partition, starting) in assignments {
            let offset = match starting {
                Some(offset) => Offset::Offset(*offset),
                None => Offset::Beginning,
            };
            request.add_partition_offset(topic, *partition, offset);
        }
        let consumer = self.consumer()?;
        consumer
            .assign(&request)
            .with_context(|_| ErrorKind::Backend("assign"))?;
        Ok(())
    }

    fn partitions(&self, topic: &str) -> Result<Vec<i32>> {
        let consumer = self.consumer()?;
        let metadata = consumer
            .fetch_metadata(Some(topic), Duration::from_secs(10))
            .with_context(|_| ErrorKind::Backend("fetch_metadata"))?;
        let topic_metadata = metadata
            .topics()
            .iter()
            .find(|candidate| candidate.name() == topic)
            .ok_or_else(|| Error::from(ErrorKind::Backend("topic metadata missing")))?;
        Ok(topic_metadata.partitions().iter().map(|partition| partition.id()).collect())
    }

    fn poll(&mut self) -> Result<Option<RawRecord>> {
        let consumer = self.consumer()?;
        match consumer.poll(Duration::from_millis(0)) {
            None => Ok(None),
            Some(Err(error)) => {
                debug!(self.logger, "Kafka poll failed"; "error" => %error);
                Err(error).with_context(|_| ErrorKind::Transient("log consumer poll"))?
            }
            Some(Ok(record)) => {
                let payload = match record.payload() {
                    Some(payload) => payload.to_vec(),
                    None => Vec::new(),
                };
                Ok(Some(RawRecord {
                    topic: record.topic().to_string(),
                    partition: record.partition(),
                    offset: record.offset(),
                    payload,
                }))
            }
        }
    }

    fn commit(&mut self, topic: &str, partition: i32, offset: i64) -> Result<()> {
        let consumer = self.consumer()?;
        let mut request = TopicPartitionList::with_capacity(1);
        request.add_partition_offset(topic, partition, Offset::Offset(offset + 1));
        consumer
            .commit(&request, CommitMode::Async)
            .with_context(|_| ErrorKind::Backend("commit"))?;
        Ok(())
    }

    fn unsubscribe(&mut self, topic: &str, partition: i32) -> Result<()> {
        self.assignment
            .retain(|(t, p)| !(t == topic && *p == partition));
        self.apply_assignment()
    }

    fn close(&mut self) -> Result<()> {
        self.consumer = None;
        Ok(())
    }
}

#[cfg(any(test, debug_assertions))]
pub mod mock {
    use std::collections::VecDeque;

    use super::LogConsumer;
    use super::RawRecord;
    use crate::error::Result;

    /// In-memory `LogConsumer` used in tests: records are queued up front and returned in
    /// order, honouring `unsubscribe` by dropping queued records for the removed partition.
    pub struct MockLogConsumer {
        records: VecDeque<RawRecord>,
        committed: Vec<(String, i32, i64)>,
        opened: bool,
        partitions: Vec<i32>,
    }

    impl Default for MockLogConsumer {
        fn default() -> MockLogConsumer {
            MockLogConsumer {
                records: VecDeque::new(),
                committed: Vec::new(),
                opened: false,
                partitions: vec![0],
            }
        }
    }

    impl MockLogConsumer {
        pub fn new() -> MockLogConsumer {
            MockLogConsumer::default()
        }

        pub fn push(&mut self, record: RawRecord) {
            self.records.push_back(record);
        }

        pub fn committed(&self) -> &[(String, i32, i64)] {
            &self.committed
        }

        pub fn is_opened(&self) -> bool {
            self.opened
        }

        /// Overrides the partition ids `partitions()` reports, for tests exercising
        /// multi-partition assignment.
        pub fn set_partitions(&mut self, partitions: Vec<i32>) {
            self.partitions = partitions;
        }
    }

    impl LogConsumer for MockLogConsumer {
        fn open(&mut self) -> Result<()> {
            self.opened = true;
            Ok(())
        }

        fn assign(&mut self, _assignments: &[(String, i32, Option<i64>)]) -> Result<()> {
            Ok(())
        }

        fn partitions(&self, _topic: &str) -> Result<Vec<i32>> {
            Ok(self.partitions.clone())
        }

        fn poll(&mut self) -> Result<Option<RawRecord>> {
            Ok(self.records.pop_front())
        }

        fn commit(&mut self, topic: &str, partition: i32, offset: i64) -> Result<()> {
            self.committed.push((topic.to_string(), partition, offset));
            Ok(())
        }

        fn unsubscribe(&mut self, topic: &str, partition: i32) -> Result<()> {
            self.records
                .retain(|record| !(record.topic == topic && record.partition == partition));
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            self.opened = false;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockLogConsumer;
    use super::LogConsumer;
    use super::RawRecord;

    #[test]
    fn mock_returns_records_in_order() {
        let mut consumer = MockLogConsumer::new();
        consumer.open().unwrap();
        consumer.push(RawRecord {
            topic: "t".into(),
            partition: 0,
            offset: 1,
            payload: b"a".to_vec(),
        });
        consumer.push(RawRecord {
            topic: "t".into(),
            partition: 0,
            offset: 2,
            payload: b"b".to_vec(),
        });
        assert_eq!(consumer.poll().unwrap().unwrap().offset, 1);
        assert_eq!(consumer.poll().unwrap().unwrap().offset, 2);
        assert_eq!(consumer.poll().unwrap(), None);
    }

    #[test]
    fn commit_is_recorded() {
        let mut consumer = MockLogConsumer::new();
        consumer.commit("t", 0, 10).unwrap();
        assert_eq!(consumer.committed(), &[("t".to_string(), 0, 10)]);
    }
}
