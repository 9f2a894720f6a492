use serde_derive::Deserialize;
use serde_derive::Serialize;

use crate::error::Result;
use crate::id::SidelineRequestIdentifier;
use crate::id::VirtualConsumerId;
use crate::message::ConsumerState;
use crate::sideline::SidelinePayload;

pub mod zookeeper;

#[cfg(any(test, debug_assertions))]
pub mod mock;

pub use self::zookeeper::Zookeeper;
pub use self::zookeeper::ZookeeperConfig;

/// Key-value persistence for committed consumer offsets and sideline request payloads.
///
/// Implementations back onto a coordination service (`zookeeper` in production); this trait is
/// the only thing the rest of the crate depends on, so backends are swappable without touching
/// `VirtualConsumer` or `SidelineController`.
pub trait PersistenceAdapter: Send + Sync {
    fn open(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn persist_consumer_state(&self, id: &VirtualConsumerId, state: &ConsumerState) -> Result<()>;
    fn retrieve_consumer_state(&self, id: &VirtualConsumerId) -> Result<Option<ConsumerState>>;
    fn clear_consumer_state(&self, id: &VirtualConsumerId) -> Result<()>;

    fn persist_sideline_request(&self, payload: &SidelinePayload) -> Result<()>;
    fn retrieve_sideline_request(
        &self,
        id: &SidelineRequestIdentifier,
    ) -> Result<Option<SidelinePayload>>;
    fn list_sideline_requests(&self) -> Result<Vec<SidelineRequestIdentifier>>;
    fn clear_sideline_request(&self, id: &SidelineRequestIdentifier) -> Result<()>;
}

/// Selects the `PersistenceAdapter` backend to construct and its tunables.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[serde(tag = "persistenceAdapterClass", content = "options")]
pub enum PersistenceConfig {
    #[serde(rename = "zookeeper")]
    Zookeeper(ZookeeperConfig),
}

impl Default for PersistenceConfig {
    fn default() -> PersistenceConfig {
        PersistenceConfig::Zookeeper(ZookeeperConfig::default())
    }
}
