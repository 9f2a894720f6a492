use std::fs::File;
use std::io::Read;
use std::path::Path;

use failure::ResultExt;
use serde_derive::Deserialize;
use serde_derive::Serialize;

use crate::buffer::MessageBufferConfig;
use crate::error::Error;
use crate::error::ErrorKind;
use crate::error::Result;
use crate::logging;
use crate::retry::RetryManagerConfig;
use crate::shared::kafka::KafkaConfig;
use crate::sideline::persistence::PersistenceConfig;

/// Selects the `Deserializer` implementation to construct for every consumer.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(tag = "deserializerClass", content = "options")]
pub enum DeserializerConfig {
    #[serde(rename = "json")]
    Json,

    #[cfg(any(test, debug_assertions))]
    #[serde(rename = "mock")]
    Mock,
}

impl Default for DeserializerConfig {
    fn default() -> DeserializerConfig {
        DeserializerConfig::Json
    }
}

impl DeserializerConfig {
    pub fn build(&self) -> Box<dyn crate::consumer::Deserializer> {
        match self {
            DeserializerConfig::Json => Box::new(crate::consumer::deserializer::JsonDeserializer),
            #[cfg(any(test, debug_assertions))]
            DeserializerConfig::Mock => {
                Box::new(crate::consumer::deserializer::mock::MockDeserializer)
            }
        }
    }
}

/// Coordinator scheduling tunables.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Interval, in milliseconds, between monitor task sweeps.
    #[serde(default = "CoordinatorConfig::default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,

    /// Interval, in milliseconds, a worker sleeps when its consumer yields nothing.
    #[serde(default = "CoordinatorConfig::default_worker_idle_sleep_ms")]
    pub worker_idle_sleep_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> CoordinatorConfig {
        CoordinatorConfig {
            monitor_interval_ms: CoordinatorConfig::default_monitor_interval_ms(),
            worker_idle_sleep_ms: CoordinatorConfig::default_worker_idle_sleep_ms(),
        }
    }
}

impl CoordinatorConfig {
    fn default_monitor_interval_ms() -> u64 {
        1000
    }
    fn default_worker_idle_sleep_ms() -> u64 {
        50
    }
}

/// Top level configuration for the ingestion engine.
///
/// Does not derive `Eq`/`Ord`/`Hash`: `retry` may carry `ExponentialBackoff`'s floating point
/// tunables, which are neither.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Prefix prepended to every generated `VirtualConsumerId`.
    ///
    /// Required and must be non-empty: see `Config::validate`.
    #[serde(default)]
    pub consumer_id_prefix: String,

    /// Coordinator scheduling options.
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Deserializer used to decode every record read off the log.
    #[serde(default)]
    pub deserializer: DeserializerConfig,

    /// Kafka client options shared by every virtual consumer's log consumer.
    #[serde(default)]
    pub kafka: KafkaConfig,

    /// Structured logging options.
    #[serde(default)]
    pub logging: logging::Config,

    /// Bounded buffer multiplexing options.
    #[serde(default)]
    pub message_buffer: MessageBufferConfig,

    /// Stream identifier attached to every emitted tuple.
    #[serde(default = "Config::default_output_stream_id")]
    pub output_stream_id: String,

    /// Sideline request persistence back-end options.
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Retry manager variant and tunables used by the firehose consumer.
    #[serde(default)]
    pub retry: RetryManagerConfig,

    /// Topic the firehose consumer subscribes to.
    ///
    /// Required and must be non-empty: see `Config::validate`.
    #[serde(default)]
    pub topic: String,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            consumer_id_prefix: String::new(),
            coordinator: CoordinatorConfig::default(),
            deserializer: DeserializerConfig::default(),
            kafka: KafkaConfig::default(),
            logging: logging::Config::default(),
            message_buffer: MessageBufferConfig::default(),
            output_stream_id: Config::default_output_stream_id(),
            persistence: PersistenceConfig::default(),
            retry: RetryManagerConfig::default(),
            topic: String::new(),
        }
    }
}

impl Config {
    fn default_output_stream_id() -> String {
        "default".into()
    }

    /// Loads the configuration from the given file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
        let file = File::open(path).with_context(|_| ErrorKind::Msg("unable to open config file".into()))?;
        Config::from_reader(file)
    }

    /// Loads the configuration from the given reader.
    pub fn from_reader<R: Read>(reader: R) -> Result<Config> {
        let config: Config = serde_yaml::from_reader(reader)
            .with_context(|_| ErrorKind::Decode("configuration yaml"))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that required fields are present and well formed.
    pub fn validate(&self) -> Result<()> {
        if self.consumer_id_prefix.is_empty() {
            return Err(Error::from(ErrorKind::ConfigMissing("consumer_id_prefix")));
        }
        if self.topic.is_empty() {
            return Err(Error::from(ErrorKind::ConfigMissing("topic")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::Config;

    #[test]
    fn from_reader_requires_prefix() {
        let cursor = Cursor::new("{}");
        match Config::from_reader(cursor) {
            Err(_) => (),
            Ok(_) => panic!("expected missing consumer_id_prefix to be rejected"),
        }
    }

    #[test]
    fn from_reader_requires_topic() {
        let cursor = Cursor::new("consumer_id_prefix: spout\n");
        match Config::from_reader(cursor) {
            Err(_) => (),
            Ok(_) => panic!("expected missing topic to be rejected"),
        }
    }

    #[test]
    fn from_reader_ok() {
        let cursor = Cursor::new("consumer_id_prefix: spout\ntopic: orders\n");
        let config = Config::from_reader(cursor).unwrap();
        assert_eq!(config.consumer_id_prefix, "spout");
        assert_eq!(config.topic, "orders");
        assert_eq!(config.output_stream_id, "default");
    }

    #[test]
    fn defaults_are_stable() {
        let config = Config {
            consumer_id_prefix: "spout".into(),
            topic: "orders".into(),
            ..Config::default()
        };
        assert_eq!(config.coordinator.monitor_interval_ms, 1000);
        assert_eq!(config.coordinator.worker_idle_sleep_ms, 50);
    }
}
