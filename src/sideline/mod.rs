use std::sync::Arc;
use std::sync::Mutex;

use serde_derive::Deserialize;
use serde_derive::Serialize;
use slog::info;
use slog::warn;
use slog::Logger;

use crate::consumer::Deserializer;
use crate::consumer::LogConsumer;
use crate::consumer::VirtualConsumer;
use crate::consumer::VirtualConsumerBuilder;
use crate::error::Error;
use crate::error::ErrorKind;
use crate::error::Result;
use crate::filter::negated_steps;
use crate::filter::FilterChainStep;
use crate::id::SidelineRequestIdentifier;
use crate::id::VirtualConsumerId;
use crate::message::ConsumerState;
use crate::metrics::SIDELINE_REQUESTS_ACTIVE;
use crate::retry::failed_first::FailedTuplesFirst;
use crate::retry::RetryManager;

pub mod persistence;

pub use self::persistence::PersistenceAdapter;

/// An immutable ordered list of filter predicates plus the identifier assigned once it is
/// started. Equality of the step list (not the identifier) is what `stop` uses to locate the
/// matching active request on the firehose's `FilterChain`.
pub struct SidelineRequest {
    steps: Vec<Box<dyn FilterChainStep>>,
}

impl SidelineRequest {
    pub fn new(steps: Vec<Box<dyn FilterChainStep>>) -> SidelineRequest {
        SidelineRequest { steps }
    }

    pub fn steps(&self) -> &[Box<dyn FilterChainStep>] {
        &self.steps
    }
}

/// Whether a persisted payload recorded the start or the end of a sideline request's life.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub enum SidelineRequestKind {
    Start,
    Stop,
}

/// The persisted record for a sideline request.
///
/// The step predicates themselves are not part of the persisted blob: `FilterChainStep`
/// implementors are supplied by the embedding application and are not required to be
/// serializable, so recovery takes the live step lists back from the caller (see
/// `SidelineController::recover_on_open`) and only trusts persistence for identity and state.
///
/// `negated` is carried explicitly rather than derived at recovery time: a STOP payload always
/// stores the *original* (non-negated) steps, so replaying `recover_on_open` any number of times
/// re-derives the same replay filter instead of accumulating double negations.
#[derive(Clone, Serialize, Deserialize)]
pub struct SidelinePayload {
    pub id: SidelineRequestIdentifier,
    pub kind: SidelineRequestKind,
    pub starting_state: ConsumerState,
    pub ending_state: Option<ConsumerState>,
    pub negated: bool,
}

impl SidelinePayload {
    fn new(
        id: SidelineRequestIdentifier,
        kind: SidelineRequestKind,
        starting_state: ConsumerState,
        ending_state: Option<ConsumerState>,
        negated: bool,
    ) -> SidelinePayload {
        SidelinePayload {
            id,
            kind,
            starting_state,
            ending_state,
            negated,
        }
    }
}

/// Constructs the `LogConsumer` and `Deserializer` a replay consumer needs, one fresh instance
/// per sideline stop (consumers are not shared across `VirtualConsumer`s).
pub trait ReplayBackendFactory: Send + Sync {
    fn log_consumer(&self) -> Box<dyn LogConsumer>;
    fn deserializer(&self) -> Box<dyn Deserializer>;
}

/// Coordinates sideline start/stop against the firehose `VirtualConsumer` and the persistence
/// adapter. Holds the firehose directly (rather than the other way around) to avoid a reference
/// cycle; the coordinator submits replay consumers `start`/`stop`/`recover_on_open` hand back,
/// rather than the controller reaching into the coordinator itself.
pub struct SidelineController {
    prefix: String,
    topic: String,
    firehose: Arc<Mutex<VirtualConsumer>>,
    persistence: Arc<dyn PersistenceAdapter>,
    backends: Arc<dyn ReplayBackendFactory>,
    active: Mutex<Vec<(SidelineRequestIdentifier, ConsumerState)>>,
    logger: Logger,
}

impl SidelineController {
    pub fn new(
        prefix: String,
        topic: String,
        firehose: Arc<Mutex<VirtualConsumer>>,
        persistence: Arc<dyn PersistenceAdapter>,
        backends: Arc<dyn ReplayBackendFactory>,
        logger: Logger,
    ) -> SidelineController {
        SidelineController {
            prefix,
            topic,
            firehose,
            persistence,
            backends,
            active: Mutex::new(Vec::new()),
            logger,
        }
    }

    /// Diverts `request`'s matching subset of the firehose starting now. Snapshots the
    /// firehose's current committed state, persists a START payload, and adds the request's
    /// steps to the firehose's filter chain under the freshly generated id.
    pub fn start(&self, request: SidelineRequest) -> Result<SidelineRequestIdentifier> {
        let id = SidelineRequestIdentifier::new();
        let firehose = self.firehose.lock().expect("firehose lock poisoned");
        let starting_state = firehose.current_state();

        let payload = SidelinePayload::new(
            id.clone(),
            SidelineRequestKind::Start,
            starting_state.clone(),
            None,
            false,
        );
        self.persistence.persist_sideline_request(&payload)?;

        firehose
            .filter_chain()
            .lock()
            .expect("filter chain lock poisoned")
            .add_steps(id.clone(), request.steps);
        self.active
            .lock()
            .expect("active list lock poisoned")
            .push((id.clone(), starting_state));
        SIDELINE_REQUESTS_ACTIVE.with_label_values(&[self.topic.as_str()]).inc();
        info!(self.logger, "Sideline request started"; "request" => %id);
        Ok(id)
    }

    /// Locates the active request whose registered steps equal `request`'s by value, removes it
    /// from the firehose, persists the STOP payload, and builds the replay `VirtualConsumer`
    /// responsible for re-emitting exactly the diverted subset. Returns `None` (logging a
    /// warning) if no matching request is currently active.
    pub fn stop(&self, request: SidelineRequest) -> Result<Option<VirtualConsumer>> {
        let firehose = self.firehose.lock().expect("firehose lock poisoned");
        let label = firehose
            .filter_chain()
            .lock()
            .expect("filter chain lock poisoned")
            .find_label(&request.steps)
            .cloned();
        let id = match label {
            Some(id) => id,
            None => {
                warn!(self.logger, "Sideline stop with no matching active request");
                return Ok(None);
            }
        };

        let starting_state = {
            let mut active = self.active.lock().expect("active list lock poisoned");
            let position = active.iter().position(|(existing, _)| existing == &id);
            match position {
                Some(index) => active.remove(index).1,
                None => ConsumerState::default(),
            }
        };
        let ending_state = firehose.current_state();
        firehose
            .filter_chain()
            .lock()
            .expect("filter chain lock poisoned")
            .remove_steps(&id);

        let payload = SidelinePayload::new(
            id.clone(),
            SidelineRequestKind::Stop,
            starting_state.clone(),
            Some(ending_state.clone()),
            true,
        );
        self.persistence.persist_sideline_request(&payload)?;
        SIDELINE_REQUESTS_ACTIVE.with_label_values(&[self.topic.as_str()]).dec();
        info!(self.logger, "Sideline request stopped"; "request" => %id);

        let replay =
            self.build_replay_consumer(id, starting_state, ending_state, request.steps, true)?;
        Ok(Some(replay))
    }

    /// Replays persisted payloads left over from a previous process: re-attaches START filters
    /// to the firehose and reconstructs STOP replay consumers (resuming from their own committed
    /// offset if one was already persisted). Idempotent: calling this twice with the same
    /// persisted state produces the same live configuration, since `FilterChain::add_steps`
    /// replaces rather than duplicates an entry and replay consumer ids are deterministic.
    ///
    /// The step predicates themselves are not part of the persisted blob (see `SidelinePayload`);
    /// callers pass in the live request each persisted id corresponds to, keyed by id. Persisted
    /// ids with no matching known request are skipped with a warning.
    pub fn recover_on_open(
        &self,
        mut known_requests: Vec<(SidelineRequestIdentifier, SidelineRequest)>,
    ) -> Result<Vec<VirtualConsumer>> {
        let mut replay_consumers = Vec::new();
        for id in self.persistence.list_sideline_requests()? {
            let payload = match self.persistence.retrieve_sideline_request(&id)? {
                Some(payload) => payload,
                None => continue,
            };
            let position = known_requests
                .iter()
                .position(|(known_id, _)| known_id == &id);
            let steps = match position {
                Some(index) => known_requests.remove(index).1.steps,
                None => {
                    warn!(self.logger, "No known steps for recovered sideline request, skipping"; "request" => %id);
                    continue;
                }
            };

            match payload.kind {
                SidelineRequestKind::Start => {
                    let firehose = self.firehose.lock().expect("firehose lock poisoned");
                    firehose
                        .filter_chain()
                        .lock()
                        .expect("filter chain lock poisoned")
                        .add_steps(id.clone(), steps);
                    self.active
                        .lock()
                        .expect("active list lock poisoned")
                        .push((id, payload.starting_state));
                }
                SidelineRequestKind::Stop => {
                    let ending_state = payload.ending_state.ok_or_else(|| {
                        Error::from(ErrorKind::IllegalState("stop payload missing ending state"))
                    })?;
                    let resume_from = self
                        .persistence
                        .retrieve_consumer_state(&VirtualConsumerId::replay(&self.prefix, &id))?
                        .filter(|state| !state.is_empty())
                        .unwrap_or_else(|| payload.starting_state.clone());
                    let replay = self.build_replay_consumer(
                        id,
                        resume_from,
                        ending_state,
                        steps,
                        payload.negated,
                    )?;
                    replay_consumers.push(replay);
                }
            }
        }
        Ok(replay_consumers)
    }

    fn build_replay_consumer(
        &self,
        id: SidelineRequestIdentifier,
        starting_state: ConsumerState,
        ending_state: ConsumerState,
        steps: Vec<Box<dyn FilterChainStep>>,
        negate: bool,
    ) -> Result<VirtualConsumer> {
        let consumer_id = VirtualConsumerId::replay(&self.prefix, &id);
        let retry_manager = RetryManager::FailedTuplesFirst(FailedTuplesFirst::default());
        let mut consumer = VirtualConsumerBuilder::new(
            consumer_id,
            self.topic.clone(),
            self.backends.log_consumer(),
            self.backends.deserializer(),
            retry_manager,
            self.logger.clone(),
        )
        .starting_state(starting_state)
        .ending_state(ending_state)
        .sideline_request(id.clone())
        .persistence(Arc::clone(&self.persistence))
        .build();
        let steps = if negate { negated_steps(steps) } else { steps };
        consumer
            .filter_chain()
            .lock()
            .expect("filter chain lock poisoned")
            .add_steps(id, steps);
        consumer.open()?;
        Ok(consumer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::deserializer::mock::MockDeserializer;
    use crate::consumer::log::mock::MockLogConsumer;
    use crate::message::MessageId;
    use crate::message::Message;
    use crate::sideline::persistence::mock::MockPersistenceAdapter;

    #[derive(Debug, PartialEq, Eq)]
    struct KeyEquals(&'static str);

    impl FilterChainStep for KeyEquals {
        fn test(&self, message: &Message) -> bool {
            message.values().get(0).and_then(|v| v.as_str()) == Some(self.0)
        }
        fn step_eq(&self, other: &dyn FilterChainStep) -> bool {
            format!("{:?}", self) == format!("{:?}", other)
        }
    }

    struct MockBackends;
    impl ReplayBackendFactory for MockBackends {
        fn log_consumer(&self) -> Box<dyn LogConsumer> {
            Box::new(MockLogConsumer::new())
        }
        fn deserializer(&self) -> Box<dyn Deserializer> {
            Box::new(MockDeserializer)
        }
    }

    fn firehose() -> Arc<Mutex<VirtualConsumer>> {
        let mut consumer = VirtualConsumerBuilder::new(
            VirtualConsumerId::firehose("orders"),
            "orders".into(),
            Box::new(MockLogConsumer::new()),
            Box::new(MockDeserializer),
            RetryManager::from_config(&crate::retry::RetryManagerConfig::Never),
            crate::logging::starter(),
        )
        .build();
        consumer.open().unwrap();
        Arc::new(Mutex::new(consumer))
    }

    fn controller() -> SidelineController {
        SidelineController::new(
            "orders".into(),
            "orders".into(),
            firehose(),
            Arc::new(MockPersistenceAdapter::new()),
            Arc::new(MockBackends),
            crate::logging::starter(),
        )
    }

    #[test]
    fn start_attaches_filter_to_firehose() {
        let controller = controller();
        let request = SidelineRequest::new(vec![Box::new(KeyEquals("vip"))]);
        let id = controller.start(request).unwrap();

        let message = Message::new(
            MessageId::new("orders".into(), 0, 1, VirtualConsumerId::firehose("orders")),
            vec![serde_json::Value::String("vip".into())],
        );
        let dropped = controller
            .firehose
            .lock()
            .unwrap()
            .filter_chain()
            .lock()
            .unwrap()
            .test(&message);
        assert!(dropped);

        let active = controller.active.lock().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].0, id);
    }

    #[test]
    fn stop_with_no_match_is_a_no_op() {
        let controller = controller();
        let request = SidelineRequest::new(vec![Box::new(KeyEquals("vip"))]);
        let result = controller.stop(request).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn stop_builds_replay_consumer_with_negated_filter() {
        let controller = controller();
        let steps: Vec<Box<dyn FilterChainStep>> = vec![Box::new(KeyEquals("vip"))];
        let started = SidelineRequest::new(vec![Box::new(KeyEquals("vip"))]);
        controller.start(started).unwrap();

        let stopped = SidelineRequest::new(steps);
        let replay = controller.stop(stopped).unwrap();
        assert!(replay.is_some());
        let mut replay = replay.unwrap();

        let vip = Message::new(
            MessageId::new("orders".into(), 0, 1, replay.id().clone()),
            vec![serde_json::Value::String("vip".into())],
        );
        let other = Message::new(
            MessageId::new("orders".into(), 0, 2, replay.id().clone()),
            vec![serde_json::Value::String("standard".into())],
        );
        // The replay filter is the negation of the original steps: it drops exactly what the
        // firehose would have diverted, and lets everything else through.
        assert!(replay.filter_chain().lock().unwrap().test(&vip));
        assert!(!replay.filter_chain().lock().unwrap().test(&other));

        // No more active firehose filters remain after stop.
        assert!(controller.active.lock().unwrap().is_empty());
        let _ = replay.close();
    }

    #[test]
    fn recover_on_open_reattaches_start_payloads() {
        let persistence = Arc::new(MockPersistenceAdapter::new());
        let controller = SidelineController::new(
            "orders".into(),
            "orders".into(),
            firehose(),
            Arc::clone(&persistence) as Arc<dyn PersistenceAdapter>,
            Arc::new(MockBackends),
            crate::logging::starter(),
        );
        let request = SidelineRequest::new(vec![Box::new(KeyEquals("vip"))]);
        let id = controller.start(request).unwrap();

        // A second controller, as if the process had restarted, recovering from the same
        // persisted state.
        let recovered = SidelineController::new(
            "orders".into(),
            "orders".into(),
            firehose(),
            Arc::clone(&persistence) as Arc<dyn PersistenceAdapter>,
            Arc::new(MockBackends),
            crate::logging::starter(),
        );
        let known = vec![(
            id,
            SidelineRequest::new(vec![Box::new(KeyEquals("vip"))]),
        )];
        let replay_consumers = recovered.recover_on_open(known).unwrap();
        assert!(replay_consumers.is_empty());
        assert_eq!(recovered.active.lock().unwrap().len(), 1);
    }

    #[test]
    fn recover_on_open_rebuilds_stop_replay_consumer() {
        let persistence = Arc::new(MockPersistenceAdapter::new());
        let controller = SidelineController::new(
            "orders".into(),
            "orders".into(),
            firehose(),
            Arc::clone(&persistence) as Arc<dyn PersistenceAdapter>,
            Arc::new(MockBackends),
            crate::logging::starter(),
        );
        let id = controller
            .start(SidelineRequest::new(vec![Box::new(KeyEquals("vip"))]))
            .unwrap();
        controller
            .stop(SidelineRequest::new(vec![Box::new(KeyEquals("vip"))]))
            .unwrap();

        let recovered = SidelineController::new(
            "orders".into(),
            "orders".into(),
            firehose(),
            Arc::clone(&persistence) as Arc<dyn PersistenceAdapter>,
            Arc::new(MockBackends),
            crate::logging::starter(),
        );
        let known = vec![(
            id,
            SidelineRequest::new(vec![Box::new(KeyEquals("vip"))]),
        )];
        let mut replay_consumers = recovered.recover_on_open(known).unwrap();
        assert_eq!(replay_consumers.len(), 1);
        let _ = replay_consumers[0].close();
    }
}
