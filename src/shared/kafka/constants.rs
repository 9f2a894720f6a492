/// Interval, in milliseconds, at which librdkafka emits statistics callbacks.
pub const KAFKA_STATS_INTERVAL: &str = "5000";

/// Minimum number of messages librdkafka tries to keep queued locally per partition.
pub const KAFKA_MESSAGE_QUEUE_MIN: &str = "100";
