use std::sync::Mutex;
use std::time::Duration;

use failure::ResultExt;
use sha2::Digest;
use sha2::Sha256;
use slog::debug;
use slog::info;
use slog::Logger;

use zookeeper::Acl;
use zookeeper::CreateMode;
use zookeeper::ZkError;
use zookeeper::ZooKeeper;

use crate::error::ErrorKind;
use crate::error::Result;
use crate::id::SidelineRequestIdentifier;
use crate::id::VirtualConsumerId;
use crate::message::ConsumerState;
use crate::sideline::persistence::PersistenceAdapter;
use crate::sideline::SidelinePayload;

use super::constants::HASH_MIN_LENGTH;
use super::constants::PREFIX_CONSUMERS;
use super::constants::PREFIX_SIDELINE;
use super::metrics::ZOO_OP_DURATION;
use super::metrics::ZOO_OP_ERRORS_COUNT;
use super::ZookeeperConfig;

/// `PersistenceAdapter` backed by a zookeeper ensemble.
///
/// Committed consumer offsets and sideline request payloads are stored as JSON blobs under
/// hashed znode paths (uniform key distribution, no string escaping needed), mirroring the
/// coordination-service persistence pattern used elsewhere in this codebase.
pub struct Zookeeper {
    config: ZookeeperConfig,
    keeper: Mutex<Option<ZooKeeper>>,
    logger: Logger,
}

impl Zookeeper {
    pub fn new(config: ZookeeperConfig, logger: Logger) -> Zookeeper {
        Zookeeper {
            config,
            keeper: Mutex::new(None),
            logger,
        }
    }

    fn hash_from_key(key: &str) -> String {
        let mut hasher = Sha256::default();
        hasher.input(key.as_bytes());
        format!("{:x}", hasher.result())
    }

    fn path_from_hash(&self, prefix: &str, hash: &str) -> String {
        if hash.len() < HASH_MIN_LENGTH {
            panic!(
                "Zookeeper::path_from_hash hash must have at least {} characters",
                HASH_MIN_LENGTH
            );
        }
        let bucket: String = hash.chars().take(HASH_MIN_LENGTH).collect();
        format!("{}/{}/{}/{}", self.config.root, prefix, bucket, hash)
    }

    fn path_from_key(&self, prefix: &str, key: &str) -> String {
        let hash = Zookeeper::hash_from_key(key);
        self.path_from_hash(prefix, &hash)
    }

    fn connect(&self) -> Result<()> {
        let mut keeper = self.keeper.lock().expect("zookeeper client lock poisoned");
        if keeper.is_some() {
            return Ok(());
        }
        info!(self.logger, "Connecting to zookeeper"; "ensemble" => %self.config.ensemble);
        let timeout = Duration::from_secs(self.config.timeout);
        let timer = ZOO_OP_DURATION.with_label_values(&["connect"]).start_timer();
        let client = ZooKeeper::connect(&self.config.ensemble, timeout, |_| {})
            .with_context(|_| ErrorKind::BackendConnect)?;
        timer.observe_duration();
        *keeper = Some(client);
        Ok(())
    }

    /// Runs a zookeeper operation, tracking duration and error-count metrics, and returns the
    /// raw `ZkResult` so callers can match specific error variants (e.g. `ZkError::NoNode`)
    /// before deciding whether to wrap the failure into this crate's `Error`.
    ///
    /// Callers must have already run `connect()` successfully; this is guaranteed by
    /// `with_client`, the only caller.
    fn raw_op<T, F>(&self, op: &str, f: F) -> zookeeper::ZkResult<T>
    where
        F: FnOnce(&ZooKeeper) -> zookeeper::ZkResult<T>,
    {
        let keeper = self.keeper.lock().expect("zookeeper client lock poisoned");
        let keeper = keeper.as_ref().expect("connect() must populate the client");
        let timer = ZOO_OP_DURATION.with_label_values(&[op]).start_timer();
        let result = f(keeper);
        timer.observe_duration();
        if result.is_err() {
            ZOO_OP_ERRORS_COUNT.with_label_values(&[op]).inc();
        }
        result
    }

    fn with_client<T, F>(&self, op: &str, f: F) -> Result<T>
    where
        F: FnOnce(&ZooKeeper) -> zookeeper::ZkResult<T>,
    {
        self.connect()?;
        self.raw_op(op, f)
            .with_context(|_| ErrorKind::Backend("zookeeper operation"))
            .map_err(Into::into)
    }

    fn ensure_path(&self, path: &str) -> Result<()> {
        let mut prefix = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            prefix.push('/');
            prefix.push_str(segment);
            let exists = self.with_client("exists", |keeper| keeper.exists(&prefix, false))?;
            if exists.is_none() {
                let created = self.with_client("create", |keeper| {
                    keeper.create(
                        &prefix,
                        Vec::new(),
                        Acl::open_unsafe().clone(),
                        CreateMode::Persistent,
                    )
                });
                if let Err(err) = created {
                    debug!(self.logger, "Concurrent container creation"; "path" => &prefix, "error" => %err);
                }
            }
        }
        Ok(())
    }

    fn write(&self, path: &str, payload: Vec<u8>) -> Result<()> {
        self.ensure_path(&Zookeeper::container_path(path))?;
        let exists = self.with_client("exists", |keeper| keeper.exists(path, false))?;
        if exists.is_some() {
            self.with_client("set_data", |keeper| {
                keeper.set_data(path, payload.clone(), None)
            })?;
        } else {
            let result = self.with_client("create", |keeper| {
                keeper.create(
                    path,
                    payload.clone(),
                    Acl::open_unsafe().clone(),
                    CreateMode::Persistent,
                )
            });
            match result {
                Ok(_) => (),
                Err(_) => {
                    self.with_client("set_data", |keeper| {
                        keeper.set_data(path, payload.clone(), None)
                    })?;
                }
            }
        }
        Ok(())
    }

    fn read(&self, path: &str) -> Result<Option<Vec<u8>>> {
        self.connect()?;
        match self.raw_op("get_data", |keeper| keeper.get_data(path, false)) {
            Ok((data, _stat)) => Ok(Some(data)),
            Err(ZkError::NoNode) => Ok(None),
            Err(error) => Err(error)
                .with_context(|_| ErrorKind::Backend("zookeeper get_data"))
                .map_err(Into::into),
        }
    }

    fn remove(&self, path: &str) -> Result<()> {
        self.connect()?;
        match self.raw_op("delete", |keeper| keeper.delete(path, None)) {
            Ok(()) | Err(ZkError::NoNode) => Ok(()),
            Err(error) => Err(error)
                .with_context(|_| ErrorKind::Backend("zookeeper delete"))
                .map_err(Into::into),
        }
    }

    fn container_path(path: &str) -> String {
        match path.rfind('/') {
            Some(0) => "/".to_string(),
            Some(index) => path[..index].to_string(),
            None => "/".to_string(),
        }
    }
}

impl PersistenceAdapter for Zookeeper {
    fn open(&self) -> Result<()> {
        self.connect()
    }

    fn close(&self) -> Result<()> {
        let mut keeper = self.keeper.lock().expect("zookeeper client lock poisoned");
        *keeper = None;
        Ok(())
    }

    fn persist_consumer_state(&self, id: &VirtualConsumerId, state: &ConsumerState) -> Result<()> {
        let path = self.path_from_key(PREFIX_CONSUMERS, id.as_str());
        let payload =
            serde_json::to_vec(state).with_context(|_| ErrorKind::Encode("consumer state"))?;
        self.write(&path, payload)
    }

    fn retrieve_consumer_state(&self, id: &VirtualConsumerId) -> Result<Option<ConsumerState>> {
        let path = self.path_from_key(PREFIX_CONSUMERS, id.as_str());
        match self.read(&path)? {
            None => Ok(None),
            Some(data) => {
                let state = serde_json::from_slice(&data)
                    .with_context(|_| ErrorKind::Decode("consumer state"))?;
                Ok(Some(state))
            }
        }
    }

    fn clear_consumer_state(&self, id: &VirtualConsumerId) -> Result<()> {
        let path = self.path_from_key(PREFIX_CONSUMERS, id.as_str());
        self.remove(&path)
    }

    fn persist_sideline_request(&self, payload: &SidelinePayload) -> Result<()> {
        let path = self.path_from_key(PREFIX_SIDELINE, payload.id.as_str());
        let data =
            serde_json::to_vec(payload).with_context(|_| ErrorKind::Encode("sideline payload"))?;
        self.write(&path, data)
    }

    fn retrieve_sideline_request(
        &self,
        id: &SidelineRequestIdentifier,
    ) -> Result<Option<SidelinePayload>> {
        let path = self.path_from_key(PREFIX_SIDELINE, id.as_str());
        match self.read(&path)? {
            None => Ok(None),
            Some(data) => {
                let payload = serde_json::from_slice(&data)
                    .with_context(|_| ErrorKind::Decode("sideline payload"))?;
                Ok(Some(payload))
            }
        }
    }

    fn list_sideline_requests(&self) -> Result<Vec<SidelineRequestIdentifier>> {
        let root = format!("{}/{}", self.config.root, PREFIX_SIDELINE);
        let buckets = match self.with_client("get_children", |keeper| keeper.get_children(&root, false)) {
            Ok(buckets) => buckets,
            Err(_) => return Ok(Vec::new()),
        };
        let mut ids = Vec::new();
        for bucket in buckets {
            let bucket_path = format!("{}/{}", root, bucket);
            let children = self
                .with_client("get_children", |keeper| keeper.get_children(&bucket_path, false))
                .unwrap_or_default();
            for hash in children {
                if let Some(data) = self.read(&format!("{}/{}", bucket_path, hash))? {
                    if let Ok(payload) = serde_json::from_slice::<SidelinePayload>(&data) {
                        ids.push(payload.id);
                    }
                }
            }
        }
        Ok(ids)
    }

    fn clear_sideline_request(&self, id: &SidelineRequestIdentifier) -> Result<()> {
        let path = self.path_from_key(PREFIX_SIDELINE, id.as_str());
        self.remove(&path)
    }
}

#[cfg(test)]
mod tests {
    use super::Zookeeper;

    #[test]
    fn hash_is_deterministic() {
        let a = Zookeeper::hash_from_key("orders-firehose");
        let b = Zookeeper::hash_from_key("orders-firehose");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn container_path_strips_leaf() {
        assert_eq!(Zookeeper::container_path("/a/b/c"), "/a/b");
        assert_eq!(Zookeeper::container_path("/a"), "/");
    }
}
