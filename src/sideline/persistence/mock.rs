use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::Result;
use crate::id::SidelineRequestIdentifier;
use crate::id::VirtualConsumerId;
use crate::message::ConsumerState;
use crate::sideline::persistence::PersistenceAdapter;
use crate::sideline::SidelinePayload;

/// In-memory `PersistenceAdapter`, for tests and for running the crate without a zookeeper
/// ensemble available.
#[derive(Default)]
pub struct MockPersistenceAdapter {
    consumers: Mutex<HashMap<VirtualConsumerId, ConsumerState>>,
    sidelines: Mutex<HashMap<SidelineRequestIdentifier, SidelinePayload>>,
}

impl MockPersistenceAdapter {
    pub fn new() -> MockPersistenceAdapter {
        MockPersistenceAdapter::default()
    }
}

impl PersistenceAdapter for MockPersistenceAdapter {
    fn persist_consumer_state(&self, id: &VirtualConsumerId, state: &ConsumerState) -> Result<()> {
        self.consumers
            .lock()
            .expect("mock persistence lock poisoned")
            .insert(id.clone(), state.clone());
        Ok(())
    }

    fn retrieve_consumer_state(&self, id: &VirtualConsumerId) -> Result<Option<ConsumerState>> {
        Ok(self
            .consumers
            .lock()
            .expect("mock persistence lock poisoned")
            .get(id)
            .cloned())
    }

    fn clear_consumer_state(&self, id: &VirtualConsumerId) -> Result<()> {
        self.consumers
            .lock()
            .expect("mock persistence lock poisoned")
            .remove(id);
        Ok(())
    }

    fn persist_sideline_request(&self, payload: &SidelinePayload) -> Result<()> {
        self.sidelines
            .lock()
            .expect("mock persistence lock poisoned")
            .insert(payload.id.clone(), payload.clone());
        Ok(())
    }

    fn retrieve_sideline_request(
        &self,
        id: &SidelineRequestIdentifier,
    ) -> Result<Option<SidelinePayload>> {
        Ok(self
            .sidelines
            .lock()
            .expect("mock persistence lock poisoned")
            .get(id)
            .cloned())
    }

    fn list_sideline_requests(&self) -> Result<Vec<SidelineRequestIdentifier>> {
        Ok(self
            .sidelines
            .lock()
            .expect("mock persistence lock poisoned")
            .keys()
            .cloned()
            .collect())
    }

    fn clear_sideline_request(&self, id: &SidelineRequestIdentifier) -> Result<()> {
        self.sidelines
            .lock()
            .expect("mock persistence lock poisoned")
            .remove(id);
        Ok(())
    }
}
