/// Container znode under which per-consumer committed offsets are stored.
pub const PREFIX_CONSUMERS: &str = "consumers";

/// Container znode under which sideline request payloads are stored.
pub const PREFIX_SIDELINE: &str = "sideline";

/// Minimum number of hash characters used as the bucket prefix for a hashed key's path.
pub const HASH_MIN_LENGTH: usize = 4;
