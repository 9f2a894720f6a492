use lazy_static::lazy_static;
use prometheus::CounterVec;
use prometheus::HistogramVec;
use prometheus::Opts;
use prometheus::Registry;
use slog::debug;
use slog::Logger;

lazy_static! {
    pub static ref ZOO_OP_DURATION: HistogramVec = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "sideline_spout_zookeeper_op_duration",
            "Duration of zookeeper operations"
        ),
        &["op"]
    )
    .expect("Failed to create ZOO_OP_DURATION histogram");
    pub static ref ZOO_OP_ERRORS_COUNT: CounterVec = CounterVec::new(
        Opts::new(
            "sideline_spout_zookeeper_op_errors",
            "Number of zookeeper operations that failed"
        ),
        &["op"]
    )
    .expect("Failed to create ZOO_OP_ERRORS_COUNT counter");
}

/// Attempts to register metrics with the Registry.
///
/// Metrics that fail to register are logged and ignored.
pub fn register_metrics(logger: &Logger, registry: &Registry) {
    if let Err(err) = registry.register(Box::new(ZOO_OP_DURATION.clone())) {
        debug!(logger, "Failed to register ZOO_OP_DURATION"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(ZOO_OP_ERRORS_COUNT.clone())) {
        debug!(logger, "Failed to register ZOO_OP_ERRORS_COUNT"; "error" => ?err);
    }
}
