use std::fmt;

use data_encoding::HEXLOWER_PERMISSIVE;
use rand::Rng;
use serde_derive::Deserialize;
use serde_derive::Serialize;

/// Opaque, printable identifier for a `VirtualConsumer`.
///
/// Built from a configured prefix, the consumer's task index, and an optional suffix (the
/// sideline request identifier, for replay consumers). Two consumers sharing an id within one
/// process is a programmer error: callers must not construct colliding ids.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct VirtualConsumerId(String);

impl VirtualConsumerId {
    /// Identifier for the firehose consumer: `<prefix>-firehose`.
    pub fn firehose(prefix: &str) -> VirtualConsumerId {
        VirtualConsumerId(format!("{}-firehose", prefix))
    }

    /// Identifier for a replay consumer spawned for a sideline request.
    pub fn replay(prefix: &str, request: &SidelineRequestIdentifier) -> VirtualConsumerId {
        VirtualConsumerId(format!("{}-sideline-{}", prefix, request))
    }

    /// Identifier built from a raw task index, for tests and ad-hoc consumers.
    pub fn indexed(prefix: &str, index: usize) -> VirtualConsumerId {
        VirtualConsumerId(format!("{}-{}", prefix, index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VirtualConsumerId {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.0)
    }
}

impl From<String> for VirtualConsumerId {
    fn from(id: String) -> VirtualConsumerId {
        VirtualConsumerId(id)
    }
}

/// Opaque, random identifier assigned to a sideline request when it is started.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct SidelineRequestIdentifier(String);

impl SidelineRequestIdentifier {
    /// Generates a fresh, random identifier.
    pub fn new() -> SidelineRequestIdentifier {
        let mut rng = rand::thread_rng();
        let id: [u8; 16] = rng.gen();
        SidelineRequestIdentifier(HEXLOWER_PERMISSIVE.encode(&id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SidelineRequestIdentifier {
    fn default() -> SidelineRequestIdentifier {
        SidelineRequestIdentifier::new()
    }
}

impl fmt::Display for SidelineRequestIdentifier {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.0)
    }
}

impl From<String> for SidelineRequestIdentifier {
    fn from(id: String) -> SidelineRequestIdentifier {
        SidelineRequestIdentifier(id)
    }
}

#[cfg(test)]
mod tests {
    use super::SidelineRequestIdentifier;
    use super::VirtualConsumerId;

    #[test]
    fn request_ids_differ() {
        let a = SidelineRequestIdentifier::new();
        let b = SidelineRequestIdentifier::new();
        assert_ne!(a, b);
    }

    #[test]
    fn firehose_id_is_stable() {
        let id = VirtualConsumerId::firehose("orders");
        assert_eq!(id.to_string(), "orders-firehose");
    }

    #[test]
    fn replay_id_embeds_request() {
        let request = SidelineRequestIdentifier::from(String::from("abc123"));
        let id = VirtualConsumerId::replay("orders", &request);
        assert_eq!(id.to_string(), "orders-sideline-abc123");
    }
}
