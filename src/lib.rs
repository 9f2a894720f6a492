//! Dynamic, multiplexed message-ingestion spout with runtime sidelining.
//!
//! Reads a partitioned log through a single firehose `VirtualConsumer`, multiplexes filtered
//! subsets out to replay consumers on operator demand (`sideline::SidelineController`), and
//! exposes the result through a single pull interface (`spout::Spout`) a host runtime drives.

use prometheus::Registry;
use slog::Logger;

pub mod buffer;
pub mod config;
pub mod consumer;
pub mod coordinator;
pub mod error;
pub mod filter;
pub mod id;
pub mod logging;
pub mod message;
pub mod metrics;
pub mod offset_tracker;
pub mod retry;
pub mod shared;
pub mod sideline;
pub mod spout;

pub use crate::config::Config;
pub use crate::error::Error;
pub use crate::error::ErrorKind;
pub use crate::error::Result;
pub use crate::spout::Spout;
pub use crate::spout::SpoutContext;

/// Registers every metric this crate exposes with `registry`. Failures to register an individual
/// metric (e.g. a name collision with a metric the host already registered) are logged, not
/// fatal: see each `register_metrics` for the rationale.
pub fn register_metrics(logger: &Logger, registry: &Registry) {
    metrics::register_metrics(logger, registry);
    shared::kafka::register_metrics(logger, registry);
    sideline::persistence::zookeeper::register_metrics(logger, registry);
}
