use serde_derive::Deserialize;
use serde_derive::Serialize;

/// Zookeeper-backed persistence adapter configuration.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct ZookeeperConfig {
    /// Zookeeper ensemble connection string.
    #[serde(default = "ZookeeperConfig::default_ensemble")]
    pub ensemble: String,

    /// Root znode under which consumer and sideline state is stored.
    #[serde(default = "ZookeeperConfig::default_root")]
    pub root: String,

    /// Session timeout, in seconds.
    #[serde(default = "ZookeeperConfig::default_timeout")]
    pub timeout: u64,
}

impl Default for ZookeeperConfig {
    fn default() -> ZookeeperConfig {
        ZookeeperConfig {
            ensemble: ZookeeperConfig::default_ensemble(),
            root: ZookeeperConfig::default_root(),
            timeout: ZookeeperConfig::default_timeout(),
        }
    }
}

impl ZookeeperConfig {
    fn default_ensemble() -> String {
        "localhost:2181".into()
    }
    fn default_root() -> String {
        "/sideline-spout".into()
    }
    fn default_timeout() -> u64 {
        10
    }
}
