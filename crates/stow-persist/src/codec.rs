//! Per-subtree serialization.

use serde_json::Value;

use crate::error::{PersistError, PersistResult};

/// Converts one state subtree to and from its stored string form.
///
/// The persistence layer treats the encoded string as opaque. `key` is the
/// top-level state key, for codecs that vary by subtree and for errors.
pub trait Codec: Send + Sync {
    fn serialize(&self, key: &str, value: &Value) -> PersistResult<String>;
    fn deserialize(&self, key: &str, raw: &str) -> PersistResult<Value>;
}

/// Plain JSON, the default codec.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn serialize(&self, key: &str, value: &Value) -> PersistResult<String> {
        serde_json::to_string(value).map_err(|e| PersistError::Codec {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    fn deserialize(&self, key: &str, raw: &str) -> PersistResult<Value> {
        serde_json::from_str(raw).map_err(|e| PersistError::Codec {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn json_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[a-z0-9 ]{0,12}".prop_map(Value::from),
        ];
        leaf.prop_recursive(3, 32, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::from),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn json_round_trip(value in json_value()) {
            let codec = JsonCodec;
            let raw = codec.serialize("k", &value).unwrap();
            prop_assert_eq!(codec.deserialize("k", &raw).unwrap(), value);
        }
    }

    #[test]
    fn string_subtree_is_quoted() {
        assert_eq!(JsonCodec.serialize("a", &json!("1")).unwrap(), "\"1\"");
    }

    #[test]
    fn garbage_names_the_key() {
        let err = JsonCodec.deserialize("settings", "{not json").unwrap_err();
        match err {
            PersistError::Codec { key, .. } => assert_eq!(key, "settings"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
