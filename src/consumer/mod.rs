use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use slog::debug;
use slog::info;
use slog::warn;
use slog::Logger;

use crate::error::Error;
use crate::error::ErrorKind;
use crate::error::Result;
use crate::filter::FilterChain;
use crate::id::SidelineRequestIdentifier;
use crate::id::VirtualConsumerId;
use crate::message::ConsumerState;
use crate::message::Message;
use crate::message::MessageId;
use crate::metrics::SPOUT_ABANDONED_TOTAL;
use crate::metrics::SPOUT_ACKED_TOTAL;
use crate::metrics::SPOUT_DESERIALIZE_ERRORS;
use crate::metrics::SPOUT_EMITTED_TOTAL;
use crate::metrics::SPOUT_FAILED_TOTAL;
use crate::metrics::SPOUT_FILTERED_TOTAL;
use crate::offset_tracker::PartitionOffsetTracker;
use crate::retry::RetryManager;
use crate::retry::RetryManagerBackend;
use crate::sideline::persistence::PersistenceAdapter;

pub mod deserializer;
pub mod log;

pub use self::deserializer::Deserializer;
pub use self::log::LogConsumer;
pub use self::log::RawRecord;

/// Constructs a `VirtualConsumer` piece by piece; mirrors the way the coordinator assembles one
/// consumer per sideline request without repeating the full constructor signature everywhere.
pub struct VirtualConsumerBuilder {
    id: VirtualConsumerId,
    topic: String,
    log_consumer: Box<dyn LogConsumer>,
    deserializer: Box<dyn Deserializer>,
    retry_manager: RetryManager,
    filter_chain: Arc<Mutex<FilterChain>>,
    starting_state: Option<ConsumerState>,
    ending_state: Option<ConsumerState>,
    sideline_request: Option<SidelineRequestIdentifier>,
    persistence: Option<Arc<dyn PersistenceAdapter>>,
    logger: Logger,
}

impl VirtualConsumerBuilder {
    pub fn new(
        id: VirtualConsumerId,
        topic: String,
        log_consumer: Box<dyn LogConsumer>,
        deserializer: Box<dyn Deserializer>,
        retry_manager: RetryManager,
        logger: Logger,
    ) -> VirtualConsumerBuilder {
        VirtualConsumerBuilder {
            id,
            topic,
            log_consumer,
            deserializer,
            retry_manager,
            filter_chain: Arc::new(Mutex::new(FilterChain::new())),
            starting_state: None,
            ending_state: None,
            sideline_request: None,
            persistence: None,
            logger,
        }
    }

    pub fn filter_chain(mut self, filter_chain: Arc<Mutex<FilterChain>>) -> Self {
        self.filter_chain = filter_chain;
        self
    }

    pub fn starting_state(mut self, state: ConsumerState) -> Self {
        self.starting_state = Some(state);
        self
    }

    pub fn ending_state(mut self, state: ConsumerState) -> Self {
        self.ending_state = Some(state);
        self
    }

    pub fn sideline_request(mut self, request: SidelineRequestIdentifier) -> Self {
        self.sideline_request = Some(request);
        self
    }

    pub fn persistence(mut self, persistence: Arc<dyn PersistenceAdapter>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn build(self) -> VirtualConsumer {
        VirtualConsumer {
            id: self.id,
            topic: self.topic,
            log_consumer: self.log_consumer,
            deserializer: self.deserializer,
            retry_manager: self.retry_manager,
            filter_chain: self.filter_chain,
            starting_state: self.starting_state,
            ending_state: self.ending_state,
            sideline_request: self.sideline_request,
            persistence: self.persistence,
            logger: self.logger,
            opened: false,
            completed: false,
            stop_requested: AtomicBool::new(false),
            trackers: HashMap::new(),
            pending_payloads: HashMap::new(),
            committed: HashMap::new(),
            done_partitions: Vec::new(),
        }
    }
}

/// One independent consumer instance bound to a topic, a partition set, an optional ending
/// state, a filter chain, and a retry manager. The firehose is one `VirtualConsumer` with no
/// `ending_state`; replay consumers are `VirtualConsumer`s bounded at both ends.
pub struct VirtualConsumer {
    id: VirtualConsumerId,
    topic: String,
    log_consumer: Box<dyn LogConsumer>,
    deserializer: Box<dyn Deserializer>,
    retry_manager: RetryManager,
    filter_chain: Arc<Mutex<FilterChain>>,
    starting_state: Option<ConsumerState>,
    ending_state: Option<ConsumerState>,
    sideline_request: Option<SidelineRequestIdentifier>,
    persistence: Option<Arc<dyn PersistenceAdapter>>,
    logger: Logger,

    opened: bool,
    completed: bool,
    stop_requested: AtomicBool,
    trackers: HashMap<(String, i32), PartitionOffsetTracker>,
    pending_payloads: HashMap<MessageId, Vec<u8>>,
    committed: HashMap<(String, i32), i64>,
    done_partitions: Vec<(String, i32)>,
}

impl VirtualConsumer {
    pub fn id(&self) -> &VirtualConsumerId {
        &self.id
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Shared handle to this consumer's filter chain, so a `SidelineController` can add or
    /// remove labelled step lists on the firehose without otherwise touching its state.
    pub fn filter_chain(&self) -> Arc<Mutex<FilterChain>> {
        Arc::clone(&self.filter_chain)
    }

    /// One-shot: acquires the log consumer, deserializer and retry manager, and seeks to the
    /// starting state if one was provided. Calling this twice is a programmer error.
    pub fn open(&mut self) -> Result<()> {
        if self.opened {
            return Err(Error::from(ErrorKind::IllegalState("open called twice")));
        }
        self.log_consumer.open()?;
        self.retry_manager.open()?;

        let assignments: Vec<(String, i32, Option<i64>)> = match &self.starting_state {
            Some(state) => state
                .partitions()
                .map(|((topic, partition), offset)| (topic.clone(), *partition, Some(*offset)))
                .collect(),
            None => self
                .log_consumer
                .partitions(&self.topic)?
                .into_iter()
                .map(|partition| (self.topic.clone(), partition, None))
                .collect(),
        };
        for (topic, partition, offset) in &assignments {
            let starting = offset.unwrap_or(0);
            self.trackers
                .insert((topic.clone(), *partition), PartitionOffsetTracker::new(starting));
        }
        self.log_consumer.assign(&assignments)?;
        self.opened = true;
        info!(self.logger, "Virtual consumer opened"; "consumer" => %self.id);
        Ok(())
    }

    /// Single, non-blocking step. See the module-level documentation for the full decision
    /// tree: retry replay takes priority over fresh polling, then end-offset, filter and
    /// deserializer checks each auto-commit the offset when they drop the message.
    pub fn next_message(&mut self) -> Result<Option<Message>> {
        if let Some(id) = self.retry_manager.next_failed_message_to_retry() {
            if let Some(payload) = self.pending_payloads.get(&id).cloned() {
                return self.build_message(id, payload).map(Some);
            }
            // The payload fell out of cache (process restart, or tracker eviction): drop the
            // retry silently rather than fabricate data.
            warn!(self.logger, "Retry payload no longer cached, dropping"; "offset" => id.offset);
            return Ok(None);
        }

        let record = match self.log_consumer.poll()? {
            Some(record) => record,
            None => return Ok(None),
        };

        let key = (record.topic.clone(), record.partition);
        if let Some(ending) = &self.ending_state {
            match ending.get(&record.topic, record.partition) {
                Some(bound) if record.offset > bound => {
                    self.maybe_complete_partition(&key)?;
                    return Ok(None);
                }
                Some(_) => {}
                None => {
                    return Err(Error::from(ErrorKind::IllegalState(
                        "message partition missing from ending state",
                    )))
                }
            }
        }

        let id = MessageId::new(record.topic.clone(), record.partition, record.offset, self.id.clone());

        let decoded = match self.deserializer.decode(&record.payload) {
            Ok(decoded) => decoded,
            Err(err) => {
                debug!(self.logger, "Deserializer failed, committing and skipping"; "error" => %err);
                SPOUT_DESERIALIZE_ERRORS.with_label_values(&[self.id.as_str()]).inc();
                self.log_consumer.commit(&record.topic, record.partition, record.offset)?;
                return Ok(None);
            }
        };
        let values = match decoded {
            Some(values) => values,
            None => {
                SPOUT_DESERIALIZE_ERRORS.with_label_values(&[self.id.as_str()]).inc();
                self.log_consumer.commit(&record.topic, record.partition, record.offset)?;
                return Ok(None);
            }
        };

        let message = Message::new(id.clone(), values);
        if self.filter_chain.lock().expect("filter chain lock poisoned").test(&message) {
            SPOUT_FILTERED_TOTAL.with_label_values(&[self.id.as_str()]).inc();
            self.log_consumer.commit(&record.topic, record.partition, record.offset)?;
            return Ok(None);
        }

        self.trackers
            .entry(key)
            .or_insert_with(|| PartitionOffsetTracker::new(record.offset))
            .start_tracking(record.offset);
        self.pending_payloads.insert(id.clone(), record.payload);
        SPOUT_EMITTED_TOTAL.with_label_values(&[self.id.as_str()]).inc();
        Ok(Some(message))
    }

    fn build_message(&mut self, id: MessageId, payload: Vec<u8>) -> Result<Message> {
        let decoded = self.deserializer.decode(&payload)?.unwrap_or_default();
        SPOUT_EMITTED_TOTAL.with_label_values(&[self.id.as_str()]).inc();
        Ok(Message::new(id, decoded))
    }

    fn maybe_complete_partition(&mut self, key: &(String, i32)) -> Result<()> {
        if self.done_partitions.contains(key) {
            return Ok(());
        }
        self.done_partitions.push(key.clone());
        self.log_consumer.unsubscribe(&key.0, key.1)?;

        let all_done = match &self.ending_state {
            Some(ending) => ending
                .partitions()
                .all(|(partition_key, _)| self.done_partitions.contains(partition_key)),
            None => false,
        };
        if all_done {
            self.completed = true;
            info!(self.logger, "Virtual consumer completed"; "consumer" => %self.id);
        }
        Ok(())
    }

    /// Informs the retry manager, finalizes the offset, and reports the tracker's advanced
    /// commit point to the log consumer. A `None` id (signalled by the caller via an
    /// `InvalidArgument` check upstream) must never reach here.
    pub fn ack(&mut self, id: &MessageId) -> Result<()> {
        if id.source != self.id {
            return Err(Error::from(ErrorKind::InvalidArgument(format!(
                "message id does not belong to consumer {}",
                self.id
            ))));
        }
        self.retry_manager.acked(id);
        self.pending_payloads.remove(id);
        self.finish_and_commit(id)?;
        SPOUT_ACKED_TOTAL.with_label_values(&[self.id.as_str()]).inc();
        Ok(())
    }

    /// If the retry manager says no more retries, behaves like `ack` (the message is
    /// abandoned). Otherwise registers the failure and leaves the offset in flight.
    pub fn fail(&mut self, id: &MessageId) -> Result<()> {
        if id.source != self.id {
            return Err(Error::from(ErrorKind::InvalidArgument(format!(
                "message id does not belong to consumer {}",
                self.id
            ))));
        }
        if !self.retry_manager.retry_further(id) {
            self.retry_manager.acked(id);
            self.pending_payloads.remove(id);
            self.finish_and_commit(id)?;
            SPOUT_ABANDONED_TOTAL.with_label_values(&[self.id.as_str()]).inc();
            return Ok(());
        }
        self.retry_manager.failed(id.clone());
        SPOUT_FAILED_TOTAL.with_label_values(&[self.id.as_str()]).inc();
        Ok(())
    }

    fn finish_and_commit(&mut self, id: &MessageId) -> Result<()> {
        let key = (id.topic.clone(), id.partition);
        if let Some(tracker) = self.trackers.get_mut(&key) {
            tracker.finish(id.offset);
            let commit_point = tracker.commit_point();
            if commit_point >= 0 {
                self.log_consumer.commit(&id.topic, id.partition, commit_point)?;
                self.committed.insert(key, commit_point);
            }
        }
        Ok(())
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Returns the committed state (not the in-flight leading edge).
    pub fn current_state(&self) -> ConsumerState {
        let mut builder = ConsumerState::builder();
        for ((topic, partition), offset) in &self.committed {
            builder = builder.with_offset(topic.clone(), *partition, *offset);
        }
        builder.build()
    }

    pub fn unsubscribe(&mut self, topic: &str, partition: i32) -> Result<()> {
        self.log_consumer.unsubscribe(topic, partition)
    }

    /// Idempotent. On completion, clears persisted offsets (and purges the sideline payload, if
    /// this is a replay consumer); otherwise flushes the current commit state. The log
    /// consumer is always closed last.
    pub fn close(&mut self) -> Result<()> {
        if !self.opened {
            return Ok(());
        }
        if self.completed {
            if let Some(persistence) = &self.persistence {
                persistence.clear_consumer_state(&self.id)?;
                if let Some(request) = &self.sideline_request {
                    persistence.clear_sideline_request(request)?;
                }
            }
        } else if let Some(persistence) = &self.persistence {
            persistence.persist_consumer_state(&self.id, &self.current_state())?;
        }
        self.log_consumer.close()?;
        self.opened = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::VirtualConsumerBuilder;
    use crate::consumer::deserializer::mock::MockDeserializer;
    use crate::consumer::log::mock::MockLogConsumer;
    use crate::id::VirtualConsumerId;
    use crate::retry::RetryManager;
    use crate::retry::RetryManagerConfig;

    /// A fresh firehose (no starting state) must subscribe to every partition the log reports
    /// for its topic, not just partition 0.
    #[test]
    fn firehose_with_no_starting_state_assigns_every_partition() {
        let mut log_consumer = MockLogConsumer::new();
        log_consumer.set_partitions(vec![0, 1, 2]);
        let mut consumer = VirtualConsumerBuilder::new(
            VirtualConsumerId::firehose("orders"),
            "orders".into(),
            Box::new(log_consumer),
            Box::new(MockDeserializer),
            RetryManager::from_config(&RetryManagerConfig::Never),
            crate::logging::starter(),
        )
        .build();
        consumer.open().unwrap();
        let mut partitions: Vec<i32> = consumer.trackers.keys().map(|(_, partition)| *partition).collect();
        partitions.sort();
        assert_eq!(partitions, vec![0, 1, 2]);
    }
}
