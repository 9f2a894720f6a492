use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;
use failure::ResultExt;
use humthreads::Builder as ThreadBuilder;
use humthreads::Thread;
use slog::debug;
use slog::error;
use slog::info;
use slog::Logger;

use crate::buffer::MessageBuffer;
use crate::buffer::MessageBufferBackend;
use crate::config::CoordinatorConfig;
use crate::consumer::VirtualConsumer;
use crate::error::Error;
use crate::error::ErrorKind;
use crate::error::Result;
use crate::id::VirtualConsumerId;
use crate::message::Message;
use crate::message::MessageId;
use crate::metrics::SPOUT_ACTIVE_CONSUMERS;
use crate::metrics::SPOUT_BUFFER_SIZE;

/// An ack or fail dispatched to a specific `VirtualConsumer`'s worker. Enqueued rather than
/// applied directly so that `nextMessage`, `ack` and `fail` on one consumer stay serialized on
/// the single thread that owns it.
enum AckFailOp {
    Ack(MessageId),
    Fail(MessageId),
}

/// A consumer submitted to the coordinator: either owned outright by its worker (every replay
/// consumer, never touched externally once built), or shared with a `SidelineController` that
/// mutates its filter chain from other threads (the firehose). The worker locks `Shared` once
/// per loop iteration rather than holding the lock across the poll.
enum ConsumerHandle {
    Owned(VirtualConsumer),
    Shared(Arc<Mutex<VirtualConsumer>>),
}

impl ConsumerHandle {
    fn id(&self) -> VirtualConsumerId {
        match self {
            ConsumerHandle::Owned(consumer) => consumer.id().clone(),
            ConsumerHandle::Shared(consumer) => {
                consumer.lock().expect("firehose lock poisoned").id().clone()
            }
        }
    }

    fn next_message(&mut self) -> Result<Option<Message>> {
        match self {
            ConsumerHandle::Owned(consumer) => consumer.next_message(),
            ConsumerHandle::Shared(consumer) => {
                consumer.lock().expect("firehose lock poisoned").next_message()
            }
        }
    }

    fn ack(&mut self, id: &MessageId) -> Result<()> {
        match self {
            ConsumerHandle::Owned(consumer) => consumer.ack(id),
            ConsumerHandle::Shared(consumer) => consumer.lock().expect("firehose lock poisoned").ack(id),
        }
    }

    fn fail(&mut self, id: &MessageId) -> Result<()> {
        match self {
            ConsumerHandle::Owned(consumer) => consumer.fail(id),
            ConsumerHandle::Shared(consumer) => consumer.lock().expect("firehose lock poisoned").fail(id),
        }
    }

    fn is_completed(&self) -> bool {
        match self {
            ConsumerHandle::Owned(consumer) => consumer.is_completed(),
            ConsumerHandle::Shared(consumer) => {
                consumer.lock().expect("firehose lock poisoned").is_completed()
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        match self {
            ConsumerHandle::Owned(consumer) => consumer.close(),
            ConsumerHandle::Shared(consumer) => consumer.lock().expect("firehose lock poisoned").close(),
        }
    }
}

/// What the monitor and the public API need to know about one running worker.
struct WorkerHandle {
    ops: Sender<AckFailOp>,
    stop_requested: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
    thread: Option<Thread>,
}

/// Owns the set of `VirtualConsumer`s and the shared `MessageBuffer`.
///
/// One worker thread is spawned per `VirtualConsumer` (polling it, pushing emitted messages into
/// the buffer, and draining its ack/fail queue between polls); a single monitor thread drains
/// newly submitted consumers, reaps completed workers, and reports progress metrics. Mirrors the
/// thread-per-worker-plus-monitor shape used elsewhere in this codebase for task processing,
/// rather than an async runtime.
pub struct SpoutCoordinator {
    config: CoordinatorConfig,
    buffer: Arc<MessageBuffer>,
    logger: Logger,
    running: Arc<AtomicBool>,
    workers: Arc<Mutex<HashMap<VirtualConsumerId, WorkerHandle>>>,
    pending_tx: Sender<ConsumerHandle>,
    pending_rx: Option<Receiver<ConsumerHandle>>,
    monitor: Option<Thread>,
}

impl SpoutCoordinator {
    pub fn new(config: CoordinatorConfig, buffer: Arc<MessageBuffer>, logger: Logger) -> SpoutCoordinator {
        let (pending_tx, pending_rx) = crossbeam_channel::unbounded();
        SpoutCoordinator {
            config,
            buffer,
            logger,
            running: Arc::new(AtomicBool::new(true)),
            workers: Arc::new(Mutex::new(HashMap::new())),
            pending_tx,
            pending_rx: Some(pending_rx),
            monitor: None,
        }
    }

    /// Starts the monitor thread. Must be called once before `add_virtual_consumer`.
    pub fn open(&mut self) -> Result<()> {
        let pending_rx = self
            .pending_rx
            .take()
            .ok_or_else(|| Error::from(ErrorKind::IllegalState("coordinator opened twice")))?;
        let running = Arc::clone(&self.running);
        let workers = Arc::clone(&self.workers);
        let buffer = Arc::clone(&self.buffer);
        let logger = self.logger.clone();
        let interval = Duration::from_millis(self.config.monitor_interval_ms);
        let idle_sleep = Duration::from_millis(self.config.worker_idle_sleep_ms);

        let thread = ThreadBuilder::new("s:monitor")
            .full_name("sideline-spout:coordinator:monitor")
            .spawn(move |scope| {
                scope.activity("watching for new virtual consumers");
                while running.load(Ordering::Relaxed) && !scope.should_shutdown() {
                    while let Ok(consumer) = pending_rx.try_recv() {
                        spawn_worker(
                            consumer,
                            Arc::clone(&running),
                            Arc::clone(&buffer),
                            Arc::clone(&workers),
                            idle_sleep,
                            logger.clone(),
                        );
                    }
                    reap_completed(&workers, &logger);
                    SPOUT_ACTIVE_CONSUMERS.set(workers.lock().expect("workers lock poisoned").len() as f64);
                    SPOUT_BUFFER_SIZE.set(buffer.size() as f64);
                    std::thread::sleep(interval);
                }
            })
            .with_context(|_| ErrorKind::SpawnThread("coordinator monitor"))?;
        self.monitor = Some(thread);
        Ok(())
    }

    /// Submits a `VirtualConsumer` (already opened) for the coordinator to run. A worker thread
    /// is spawned for it on the monitor's next sweep. Used for replay consumers, which are never
    /// mutated externally once built.
    pub fn add_virtual_consumer(&self, consumer: VirtualConsumer) -> Result<()> {
        self.pending_tx
            .send(ConsumerHandle::Owned(consumer))
            .map_err(|_| Error::from(ErrorKind::IllegalState("coordinator monitor not running")))
    }

    /// Submits the firehose consumer, shared with a `SidelineController` that mutates its filter
    /// chain from other threads. The worker locks it once per poll iteration rather than holding
    /// the lock across the whole loop.
    pub fn add_firehose(&self, consumer: Arc<Mutex<VirtualConsumer>>) -> Result<()> {
        self.pending_tx
            .send(ConsumerHandle::Shared(consumer))
            .map_err(|_| Error::from(ErrorKind::IllegalState("coordinator monitor not running")))
    }

    /// Delegates to the buffer: the coordinator's only output surface.
    pub fn next_message(&self) -> Option<Message> {
        self.buffer.poll()
    }

    pub fn ack(&self, id: MessageId) -> Result<()> {
        self.dispatch(id, AckFailOp::Ack)
    }

    pub fn fail(&self, id: MessageId) -> Result<()> {
        self.dispatch(id, AckFailOp::Fail)
    }

    fn dispatch(&self, id: MessageId, wrap: impl FnOnce(MessageId) -> AckFailOp) -> Result<()> {
        let workers = self.workers.lock().expect("workers lock poisoned");
        let worker = workers.get(&id.source).ok_or_else(|| {
            Error::from(ErrorKind::InvalidArgument(format!(
                "no running worker for consumer {}",
                id.source
            )))
        })?;
        worker
            .ops
            .send(wrap(id))
            .map_err(|_| Error::from(ErrorKind::IllegalState("worker no longer accepting ops")))
    }

    /// Stops the monitor and every running worker, joining their threads.
    pub fn close(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        let mut workers = self.workers.lock().expect("workers lock poisoned");
        for (_, worker) in workers.drain() {
            worker.stop_requested.store(true, Ordering::SeqCst);
            if let Some(thread) = worker.thread {
                thread.join().map_err(|_| {
                    Error::from(ErrorKind::IllegalState("worker thread panicked"))
                })?;
            }
        }
        drop(workers);
        if let Some(monitor) = self.monitor.take() {
            monitor
                .join()
                .map_err(|_| Error::from(ErrorKind::IllegalState("monitor thread panicked")))?;
        }
        info!(self.logger, "Coordinator stopped");
        Ok(())
    }
}

fn spawn_worker(
    mut consumer: ConsumerHandle,
    running: Arc<AtomicBool>,
    buffer: Arc<MessageBuffer>,
    workers: Arc<Mutex<HashMap<VirtualConsumerId, WorkerHandle>>>,
    idle_sleep: Duration,
    logger: Logger,
) {
    let id = consumer.id();
    let (ops_tx, ops_rx) = crossbeam_channel::unbounded();
    let stop_requested = Arc::new(AtomicBool::new(false));
    let done = Arc::new(AtomicBool::new(false));
    let thread_stop = Arc::clone(&stop_requested);
    let thread_done = Arc::clone(&done);
    let thread_id = id.clone();
    let thread_logger = logger.clone();

    let spawned = ThreadBuilder::new(format!("s:w:{}", thread_id))
        .full_name(format!("sideline-spout:coordinator:worker:{}", thread_id))
        .spawn(move |scope| {
            scope.activity(format!("polling virtual consumer {}", thread_id));
            while running.load(Ordering::Relaxed)
                && !scope.should_shutdown()
                && !thread_stop.load(Ordering::SeqCst)
            {
                while let Ok(op) = ops_rx.try_recv() {
                    let result = match op {
                        AckFailOp::Ack(id) => consumer.ack(&id),
                        AckFailOp::Fail(id) => consumer.fail(&id),
                    };
                    if let Err(error) = result {
                        error!(thread_logger, "Failed to apply ack/fail"; "error" => %error);
                    }
                }
                match consumer.next_message() {
                    Ok(Some(message)) => buffer.put(&thread_id, message),
                    Ok(None) => std::thread::sleep(idle_sleep),
                    Err(error) => {
                        debug!(thread_logger, "Virtual consumer poll failed"; "error" => %error);
                        std::thread::sleep(idle_sleep);
                    }
                }
                if consumer.is_completed() {
                    break;
                }
            }
            if let Err(error) = consumer.close() {
                error!(thread_logger, "Failed to close virtual consumer"; "error" => %error);
            }
            thread_done.store(true, Ordering::SeqCst);
        });

    let thread = match spawned {
        Ok(thread) => Some(thread),
        Err(error) => {
            error!(logger, "Failed to spawn virtual consumer worker"; "error" => %error);
            return;
        }
    };

    workers.lock().expect("workers lock poisoned").insert(
        id,
        WorkerHandle {
            ops: ops_tx,
            stop_requested,
            done,
            thread,
        },
    );
}

fn reap_completed(workers: &Mutex<HashMap<VirtualConsumerId, WorkerHandle>>, logger: &Logger) {
    let mut workers = workers.lock().expect("workers lock poisoned");
    let finished: Vec<VirtualConsumerId> = workers
        .iter()
        .filter(|(_, worker)| worker.done.load(Ordering::SeqCst))
        .map(|(id, _)| id.clone())
        .collect();
    for id in finished {
        if let Some(worker) = workers.remove(&id) {
            if let Some(thread) = worker.thread {
                if let Err(error) = thread.join() {
                    let _ = error;
                    debug!(logger, "Worker thread join reported a panic"; "consumer" => %id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::buffer::MessageBuffer;
    use crate::buffer::MessageBufferBackend;
    use crate::buffer::MessageBufferConfig;
    use crate::config::CoordinatorConfig;
    use crate::consumer::deserializer::mock::MockDeserializer;
    use crate::consumer::log::mock::MockLogConsumer;
    use crate::consumer::log::RawRecord;
    use crate::consumer::VirtualConsumerBuilder;
    use crate::id::VirtualConsumerId;
    use crate::retry::RetryManager;
    use crate::retry::RetryManagerConfig;

    use super::SpoutCoordinator;

    #[test]
    fn emits_messages_through_the_buffer() {
        let buffer = Arc::new(MessageBuffer::from_config(&MessageBufferConfig::default()));
        let mut coordinator = SpoutCoordinator::new(
            CoordinatorConfig {
                monitor_interval_ms: 10,
                worker_idle_sleep_ms: 5,
            },
            Arc::clone(&buffer),
            crate::logging::starter(),
        );
        coordinator.open().unwrap();

        let mut log_consumer = MockLogConsumer::new();
        log_consumer.push(RawRecord {
            topic: "orders".into(),
            partition: 0,
            offset: 1,
            payload: b"hello".to_vec(),
        });
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
        coordinator.add_virtual_consumer(consumer).unwrap();

        let mut received = None;
        for _ in 0..50 {
            if let Some(message) = coordinator.next_message() {
                received = Some(message);
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(received.is_some());
        coordinator.close().unwrap();
    }
}
