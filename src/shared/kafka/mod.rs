use rdkafka::config::ClientConfig;
use rdkafka::config::RDKafkaLogLevel;

use serde_derive::Deserialize;
use serde_derive::Serialize;

mod constants;
mod metrics;

pub use self::constants::*;
pub use self::metrics::register_metrics;
pub use self::metrics::ClientStatsContext;

/// Kafka client tunables shared by every virtual consumer's log-consumer backend.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Comma separated list of seed brokers.
    #[serde(default = "KafkaConfig::default_brokers")]
    pub brokers: String,

    /// Worker session keepalive heartbeat interval, in milliseconds.
    #[serde(default = "KafkaConfig::default_heartbeat")]
    pub heartbeat: u32,

    /// Kafka timeout options.
    #[serde(default)]
    pub timeouts: KafkaTimeouts,
}

impl Default for KafkaConfig {
    fn default() -> KafkaConfig {
        KafkaConfig {
            brokers: KafkaConfig::default_brokers(),
            heartbeat: KafkaConfig::default_heartbeat(),
            timeouts: KafkaTimeouts::default(),
        }
    }
}

impl KafkaConfig {
    fn default_brokers() -> String {
        "localhost:9092".into()
    }
    fn default_heartbeat() -> u32 {
        3000
    }
}

/// Kafka timeout options.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct KafkaTimeouts {
    #[serde(default = "KafkaTimeouts::default_metadata")]
    pub metadata: u32,

    #[serde(default = "KafkaTimeouts::default_request")]
    pub request: u32,

    #[serde(default = "KafkaTimeouts::default_session")]
    pub session: u32,

    #[serde(default = "KafkaTimeouts::default_socket")]
    pub socket: u32,
}

impl Default for KafkaTimeouts {
    fn default() -> KafkaTimeouts {
        KafkaTimeouts {
            metadata: KafkaTimeouts::default_metadata(),
            request: KafkaTimeouts::default_request(),
            session: KafkaTimeouts::default_session(),
            socket: KafkaTimeouts::default_socket(),
        }
    }
}

impl KafkaTimeouts {
    fn default_metadata() -> u32 {
        60000
    }
    fn default_request() -> u32 {
        5000
    }
    fn default_session() -> u32 {
        10000
    }
    fn default_socket() -> u32 {
        60000
    }
}

/// Sets kafka configuration options common to every log consumer.
///
/// `enable.auto.commit`/`enable.auto.offset.store` are always disabled: the `PartitionOffsetTracker`
/// is the single source of truth for what has been committed, and commits are issued explicitly
/// from `VirtualConsumer::ack`/`fail`.
fn common_config(config: &KafkaConfig, client_id: &str) -> ClientConfig {
    let mut kafka_config = ClientConfig::new();
    kafka_config
        .set("enable.auto.commit", "false")
        .set("enable.auto.offset.store", "false")
        .set("auto.offset.reset", "smallest")
        .set("bootstrap.servers", &config.brokers)
        .set("client.id", client_id)
        .set("enable.partition.eof", "false")
        .set("heartbeat.interval.ms", &config.heartbeat.to_string())
        .set(
            "metadata.request.timeout.ms",
            &config.timeouts.metadata.to_string(),
        )
        .set("request.timeout.ms", &config.timeouts.request.to_string())
        .set("session.timeout.ms", &config.timeouts.session.to_string())
        .set("socket.timeout.ms", &config.timeouts.socket.to_string())
        .set("statistics.interval.ms", KAFKA_STATS_INTERVAL)
        .set_log_level(RDKafkaLogLevel::Debug);
    kafka_config
}

/// Sets kafka configuration options for log consumers, on top of the common options.
pub fn consumer_config(config: &KafkaConfig, client_id: &str) -> ClientConfig {
    let mut kafka_config = common_config(config, client_id);
    kafka_config.set("queued.min.messages", KAFKA_MESSAGE_QUEUE_MIN);
    kafka_config
}
