use crate::error::Result;

/// Decodes a raw record payload into the field sequence carried by a `Message`.
///
/// Returning `Ok(None)` signals an unparseable record: the caller treats this the same as a
/// filtered message (commit the offset, emit nothing).
pub trait Deserializer: Send {
    fn decode(&self, payload: &[u8]) -> Result<Option<Vec<serde_json::Value>>>;
}

/// Decodes payloads as a JSON array of values, or a single JSON value wrapped in a
/// one-element sequence.
pub struct JsonDeserializer;

impl Deserializer for JsonDeserializer {
    fn decode(&self, payload: &[u8]) -> Result<Option<Vec<serde_json::Value>>> {
        let value: serde_json::Value = match serde_json::from_slice(payload) {
            Ok(value) => value,
            Err(_) => return Ok(None),
        };
        match value {
            serde_json::Value::Array(values) => Ok(Some(values)),
            other => Ok(Some(vec![other])),
        }
    }
}

#[cfg(any(test, debug_assertions))]
pub mod mock {
    use super::Deserializer;
    use crate::error::Result;

    /// Deserializer that always returns the payload as a single string field. Used in tests and
    /// debug builds as a no-op stand-in for a real wire format.
    pub struct MockDeserializer;

    impl Deserializer for MockDeserializer {
        fn decode(&self, payload: &[u8]) -> Result<Option<Vec<serde_json::Value>>> {
            if payload == b"__unparseable__" {
                return Ok(None);
            }
            let text = String::from_utf8_lossy(payload).to_string();
            Ok(Some(vec![serde_json::Value::String(text)]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockDeserializer;
    use super::Deserializer;
    use super::JsonDeserializer;

    #[test]
    fn json_decodes_array() {
        let deserializer = JsonDeserializer;
        let decoded = deserializer.decode(br#"[1, "a", true]"#).unwrap();
        assert_eq!(decoded.unwrap().len(), 3);
    }

    #[test]
    fn json_wraps_scalar() {
        let deserializer = JsonDeserializer;
        let decoded = deserializer.decode(br#"42"#).unwrap().unwrap();
        assert_eq!(decoded, vec![serde_json::json!(42)]);
    }

    #[test]
    fn json_invalid_is_none() {
        let deserializer = JsonDeserializer;
        let decoded = deserializer.decode(b"not json").unwrap();
        assert_eq!(decoded, None);
    }

    #[test]
    fn mock_marks_sentinel_unparseable() {
        let deserializer = MockDeserializer;
        let decoded = deserializer.decode(b"__unparseable__").unwrap();
        assert_eq!(decoded, None);
    }
}
