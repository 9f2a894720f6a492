mod client;
mod config;
mod constants;
mod metrics;

pub use self::client::Zookeeper;
pub use self::config::ZookeeperConfig;
pub use self::metrics::register_metrics;
