use lazy_static::lazy_static;
use prometheus::GaugeVec;
use prometheus::Opts;
use prometheus::Registry;

use rdkafka::consumer::ConsumerContext;
use rdkafka::statistics::Statistics;
use rdkafka::ClientContext;
use slog::debug;
use slog::Logger;

lazy_static! {
    pub static ref KAFKA_BROKER_OUTBUF_CNT: GaugeVec = GaugeVec::new(
        Opts::new(
            "sideline_spout_kafka_broker_outbuf_cnt",
            "Number of requests awaiting transmission to broker"
        ),
        &["role", "broker"]
    )
    .expect("Failed to create KAFKA_BROKER_OUTBUF_CNT gauge");
    pub static ref KAFKA_BROKER_TX: GaugeVec = GaugeVec::new(
        Opts::new(
            "sideline_spout_kafka_broker_tx",
            "Total number of requests sent"
        ),
        &["role", "broker"]
    )
    .expect("Failed to create KAFKA_BROKER_TX gauge");
    pub static ref KAFKA_MSG_CNT: GaugeVec = GaugeVec::new(
        Opts::new(
            "sideline_spout_kafka_msg_cnt",
            "Current number of messages in the consumer's local queue"
        ),
        &["role"]
    )
    .expect("Failed to create KAFKA_MSG_CNT gauge");
    pub static ref KAFKA_REPLYQ: GaugeVec = GaugeVec::new(
        Opts::new(
            "sideline_spout_kafka_replyq",
            "Number of ops waiting in queue for the application to serve with poll()"
        ),
        &["role"]
    )
    .expect("Failed to create KAFKA_REPLYQ gauge");
}

/// Attempts to register metrics with the Registry.
///
/// Metrics that fail to register are logged and ignored.
pub fn register_metrics(logger: &Logger, registry: &Registry) {
    if let Err(err) = registry.register(Box::new(KAFKA_BROKER_OUTBUF_CNT.clone())) {
        debug!(logger, "Failed to register KAFKA_BROKER_OUTBUF_CNT"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(KAFKA_BROKER_TX.clone())) {
        debug!(logger, "Failed to register KAFKA_BROKER_TX"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(KAFKA_MSG_CNT.clone())) {
        debug!(logger, "Failed to register KAFKA_MSG_CNT"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(KAFKA_REPLYQ.clone())) {
        debug!(logger, "Failed to register KAFKA_REPLYQ"; "error" => ?err);
    }
}

/// Kafka client context that forwards librdkafka statistics callbacks to prometheus.
pub struct ClientStatsContext {
    role: String,
}

impl ClientStatsContext {
    pub fn new<S: Into<String>>(role: S) -> ClientStatsContext {
        ClientStatsContext { role: role.into() }
    }
}

impl ClientContext for ClientStatsContext {
    fn stats(&self, stats: Statistics) {
        KAFKA_MSG_CNT
            .with_label_values(&[&self.role])
            .set(stats.msg_cnt as f64);
        KAFKA_REPLYQ
            .with_label_values(&[&self.role])
            .set(stats.replyq as f64);
        for broker in stats.brokers.values() {
            KAFKA_BROKER_OUTBUF_CNT
                .with_label_values(&[&self.role, &broker.name])
                .set(broker.outbuf_cnt as f64);
            KAFKA_BROKER_TX
                .with_label_values(&[&self.role, &broker.name])
                .set(broker.tx as f64);
        }
    }
}

impl ConsumerContext for ClientStatsContext {}
