use std::io::stdout;
use std::sync::Mutex;

use serde_derive::Deserialize;
use serde_derive::Serialize;
use slog::o;
use slog::Drain;
use slog::IgnoreResult;
use slog::Logger;
use slog::Never;
use slog::SendSyncRefUnwindSafeDrain;
use slog::SendSyncUnwindSafeDrain;

use slog_async::Async;
use slog_json::Json;

/// List of supported logging drains.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub enum LoggingDrain {
    /// Log JSON objects to standard output.
    #[serde(rename = "json")]
    Json,
}

impl Default for LoggingDrain {
    fn default() -> LoggingDrain {
        LoggingDrain::Json
    }
}

/// Possible logging levels.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub enum LoggingLevel {
    #[serde(rename = "critical")]
    Critical,

    #[serde(rename = "error")]
    Error,

    #[serde(rename = "warning")]
    Warning,

    #[serde(rename = "info")]
    Info,

    #[serde(rename = "debug")]
    Debug,
}

impl Default for LoggingLevel {
    fn default() -> LoggingLevel {
        LoggingLevel::Info
    }
}

impl From<LoggingLevel> for ::slog::Level {
    fn from(level: LoggingLevel) -> Self {
        match level {
            LoggingLevel::Critical => ::slog::Level::Critical,
            LoggingLevel::Error => ::slog::Level::Error,
            LoggingLevel::Warning => ::slog::Level::Warning,
            LoggingLevel::Info => ::slog::Level::Info,
            LoggingLevel::Debug => ::slog::Level::Debug,
        }
    }
}

/// Logging configuration options.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Flush logs asynchronously.
    #[serde(default = "Config::default_async")]
    pub r#async: bool,

    /// The drain to send logs to.
    #[serde(default)]
    pub drain: LoggingDrain,

    /// The minimum logging level.
    #[serde(default)]
    pub level: LoggingLevel,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            r#async: true,
            drain: LoggingDrain::default(),
            level: LoggingLevel::default(),
        }
    }
}

impl Config {
    fn default_async() -> bool {
        true
    }
}

/// Alternative implementation of slog's `LevelFilter` with `Ok == ()`.
///
/// The stock `LevelFilter` wraps `D::Ok` into an `Option`, which makes it impossible to
/// wrap a filtering drain back into a `Logger`.
#[derive(Debug, Clone)]
pub struct LevelFilter<D: Drain>(pub D, pub ::slog::Level);
impl<D: Drain> Drain for LevelFilter<D> {
    type Ok = ();
    type Err = D::Err;
    fn log(
        &self,
        record: &::slog::Record,
        logger_values: &::slog::OwnedKVList,
    ) -> Result<Self::Ok, Self::Err> {
        if record.level().is_at_least(self.1) {
            self.0.log(record, logger_values)?;
        }
        Ok(())
    }
}

/// Converts a `Drain` into a `Logger`, tagging every record with the crate name.
fn into_logger<D>(drain: D) -> Logger
where
    D: SendSyncUnwindSafeDrain<Ok = (), Err = Never>,
    D: 'static + SendSyncRefUnwindSafeDrain<Ok = (), Err = Never>,
{
    Logger::root(drain, o!("component" => "sideline-spout"))
}

/// Optionally wrap the drain into an `Async` drain.
fn config_async<D>(config: &Config, drain: D) -> Logger
where
    D: SendSyncUnwindSafeDrain<Ok = (), Err = Never>,
    D: 'static + SendSyncRefUnwindSafeDrain<Ok = (), Err = Never>,
{
    if config.r#async {
        into_logger(Async::new(drain).build().ignore_res())
    } else {
        into_logger(drain)
    }
}

/// Configures the desired logging level.
fn config_level<D>(config: &Config, drain: D) -> Logger
where
    D: SendSyncUnwindSafeDrain<Ok = (), Err = Never>,
    D: 'static + SendSyncRefUnwindSafeDrain<Ok = (), Err = Never>,
{
    let drain = LevelFilter(drain, config.level.clone().into());
    config_async(config, drain)
}

/// Creates a `Logger` based on the given configuration.
///
/// This is the first function in a chain of generic functions. The intermediate stages all
/// implement `Drain` but have different concrete types, so generic functions are used to
/// avoid boxing at every step.
///
/// Filters should be applied before the `config_async` call, processing after it.
pub fn configure(config: Config) -> Logger {
    match config.drain {
        LoggingDrain::Json => {
            let drain = Mutex::new(Json::default(stdout())).map(IgnoreResult::new);
            config_level(&config, drain)
        }
    }
}

/// Creates a fixed `Logger` to be used before configuration is loaded.
pub fn starter() -> Logger {
    let drain = Mutex::new(Json::default(stdout())).map(IgnoreResult::new);
    into_logger(drain)
}

#[cfg(test)]
mod tests {
    use super::Config;
    use super::LoggingDrain;
    use super::LoggingLevel;

    #[test]
    fn config_defaults() {
        let config = Config::default();
        assert!(config.r#async);
        assert_eq!(config.drain, LoggingDrain::Json);
        assert_eq!(config.level, LoggingLevel::Info);
    }

    #[test]
    fn config_from_yaml() {
        let config: Config = serde_yaml::from_str("level: debug\nasync: false\n").unwrap();
        assert!(!config.r#async);
        assert_eq!(config.level, LoggingLevel::Debug);
        assert_eq!(config.drain, LoggingDrain::Json);
    }
}
