use lazy_static::lazy_static;
use prometheus::Counter;
use prometheus::CounterVec;
use prometheus::GaugeVec;
use prometheus::Opts;
use prometheus::Registry;
use slog::debug;
use slog::Logger;

lazy_static! {
    pub static ref SPOUT_EMITTED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            "sideline_spout_emitted_total",
            "Number of messages emitted by a virtual consumer"
        ),
        &["consumer"]
    )
    .expect("Failed to create SPOUT_EMITTED_TOTAL counter");
    pub static ref SPOUT_ACKED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            "sideline_spout_acked_total",
            "Number of messages acknowledged by a virtual consumer"
        ),
        &["consumer"]
    )
    .expect("Failed to create SPOUT_ACKED_TOTAL counter");
    pub static ref SPOUT_FAILED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            "sideline_spout_failed_total",
            "Number of messages failed by a virtual consumer"
        ),
        &["consumer"]
    )
    .expect("Failed to create SPOUT_FAILED_TOTAL counter");
    pub static ref SPOUT_ABANDONED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            "sideline_spout_abandoned_total",
            "Number of messages abandoned after exhausting retries"
        ),
        &["consumer"]
    )
    .expect("Failed to create SPOUT_ABANDONED_TOTAL counter");
    pub static ref SPOUT_FILTERED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            "sideline_spout_filtered_total",
            "Number of messages dropped by the filter chain"
        ),
        &["consumer"]
    )
    .expect("Failed to create SPOUT_FILTERED_TOTAL counter");
    pub static ref SPOUT_DESERIALIZE_ERRORS: CounterVec = CounterVec::new(
        Opts::new(
            "sideline_spout_deserialize_errors",
            "Number of records that failed to deserialize and were skipped"
        ),
        &["consumer"]
    )
    .expect("Failed to create SPOUT_DESERIALIZE_ERRORS counter");
    pub static ref SPOUT_POLL_ERRORS: Counter = Counter::new(
        "sideline_spout_poll_errors",
        "Number of log consumer poll operations that failed"
    )
    .expect("Failed to create SPOUT_POLL_ERRORS counter");
    pub static ref SPOUT_BUFFER_SIZE: GaugeVec = GaugeVec::new(
        Opts::new(
            "sideline_spout_buffer_size",
            "Number of messages currently queued in the message buffer"
        ),
        &["buffer"]
    )
    .expect("Failed to create SPOUT_BUFFER_SIZE gauge");
    pub static ref SPOUT_ACTIVE_CONSUMERS: GaugeVec = GaugeVec::new(
        Opts::new(
            "sideline_spout_active_consumers",
            "Number of virtual consumers currently running"
        ),
        &["kind"]
    )
    .expect("Failed to create SPOUT_ACTIVE_CONSUMERS gauge");
    pub static ref SIDELINE_REQUESTS_ACTIVE: GaugeVec = GaugeVec::new(
        Opts::new(
            "sideline_spout_sideline_requests_active",
            "Number of sideline requests currently started but not stopped"
        ),
        &["request"]
    )
    .expect("Failed to create SIDELINE_REQUESTS_ACTIVE gauge");
}

/// Attempts to register metrics with the Registry.
///
/// Metrics that fail to register are logged and ignored.
pub fn register_metrics(logger: &Logger, registry: &Registry) {
    if let Err(err) = registry.register(Box::new(SPOUT_EMITTED_TOTAL.clone())) {
        debug!(logger, "Failed to register SPOUT_EMITTED_TOTAL"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(SPOUT_ACKED_TOTAL.clone())) {
        debug!(logger, "Failed to register SPOUT_ACKED_TOTAL"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(SPOUT_FAILED_TOTAL.clone())) {
        debug!(logger, "Failed to register SPOUT_FAILED_TOTAL"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(SPOUT_ABANDONED_TOTAL.clone())) {
        debug!(logger, "Failed to register SPOUT_ABANDONED_TOTAL"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(SPOUT_FILTERED_TOTAL.clone())) {
        debug!(logger, "Failed to register SPOUT_FILTERED_TOTAL"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(SPOUT_DESERIALIZE_ERRORS.clone())) {
        debug!(logger, "Failed to register SPOUT_DESERIALIZE_ERRORS"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(SPOUT_POLL_ERRORS.clone())) {
        debug!(logger, "Failed to register SPOUT_POLL_ERRORS"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(SPOUT_BUFFER_SIZE.clone())) {
        debug!(logger, "Failed to register SPOUT_BUFFER_SIZE"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(SPOUT_ACTIVE_CONSUMERS.clone())) {
        debug!(logger, "Failed to register SPOUT_ACTIVE_CONSUMERS"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(SIDELINE_REQUESTS_ACTIVE.clone())) {
        debug!(logger, "Failed to register SIDELINE_REQUESTS_ACTIVE"; "error" => ?err);
    }
}
