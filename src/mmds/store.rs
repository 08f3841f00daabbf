//! Size-bounded nested metadata store.
//!
//! The store is a tagged value tree (scalar, mapping, or sequence). PUT
//! replaces the whole tree atomically; PATCH applies a recursive merge.
//! Either write is rejected outright if the resulting tree would exceed
//! the byte limit, leaving the prior tree untouched.

use serde_json::Value;

use super::MmdsError;

/// Administrative data store limit, in bytes.
pub const DEFAULT_STORE_LIMIT: usize = 51_200;

/// Transport-level payload limit, in bytes. Set well above the store
/// limit so requests reach the store check rather than dying in transit.
pub const DEFAULT_API_PAYLOAD_LIMIT: usize = 512_000;

/// Recursive merge: keys present in `patch` are added or overwritten,
/// keys absent from it are left alone. Non-mapping values replace.
pub fn merge(dst: &mut Value, patch: &Value) {
    match (dst, patch) {
        (Value::Object(dst_map), Value::Object(patch_map)) => {
            for (key, patch_val) in patch_map {
                merge(dst_map.entry(key.clone()).or_insert(Value::Null), patch_val);
            }
        }
        (dst_slot, patch_val) => {
            *dst_slot = patch_val.clone();
        }
    }
}

/// Serialized byte length of a value tree.
pub fn serialized_len(value: &Value) -> usize {
    serde_json::to_vec(value).map(|b| b.len()).unwrap_or(usize::MAX)
}

/// Per-instance metadata store.
#[derive(Debug, Clone)]
pub struct DataStore {
    value: Value,
    limit_bytes: usize,
}

impl DataStore {
    pub fn new(limit_bytes: usize) -> Self {
        Self {
            value: Value::Object(serde_json::Map::new()),
            limit_bytes,
        }
    }

    pub fn limit_bytes(&self) -> usize {
        self.limit_bytes
    }

    /// Current tree snapshot.
    pub fn snapshot(&self) -> Value {
        self.value.clone()
    }

    /// Replace the whole tree. Rejected wholesale if oversized.
    pub fn put(&mut self, value: Value) -> Result<(), MmdsError> {
        let size = serialized_len(&value);
        if size > self.limit_bytes {
            return Err(MmdsError::PayloadTooLarge {
                size,
                limit: self.limit_bytes,
            });
        }
        self.value = value;
        Ok(())
    }

    /// Merge `patch` into the tree. The merged candidate is sized before
    /// committing, so a rejected patch leaves no partial mutation behind.
    pub fn patch(&mut self, patch: &Value) -> Result<(), MmdsError> {
        let mut candidate = self.value.clone();
        merge(&mut candidate, patch);
        let size = serialized_len(&candidate);
        if size > self.limit_bytes {
            return Err(MmdsError::PayloadTooLarge {
                size,
                limit: self.limit_bytes,
            });
        }
        self.value = candidate;
        Ok(())
    }

    /// Resolve a dotted or slash-segmented key path. Numeric segments
    /// index into sequences.
    pub fn get(&self, path: &str) -> Result<Value, MmdsError> {
        let mut current = &self.value;
        for segment in path.split(['.', '/']).filter(|s| !s.is_empty()) {
            current = match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment
                    .parse::<usize>()
                    .ok()
                    .and_then(|idx| items.get(idx)),
                _ => None,
            }
            .ok_or_else(|| MmdsError::NotFound {
                path: path.to_string(),
            })?;
        }
        Ok(current.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_overwrites_present_keys_only() {
        let mut base = json!({"a": {"b": 1, "c": 2}, "keep": true});
        merge(&mut base, &json!({"a": {"b": 9, "new": 3}}));
        assert_eq!(base, json!({"a": {"b": 9, "c": 2, "new": 3}, "keep": true}));
    }

    #[test]
    fn merge_replaces_non_mapping_values() {
        let mut base = json!({"a": [1, 2, 3]});
        merge(&mut base, &json!({"a": "scalar"}));
        assert_eq!(base, json!({"a": "scalar"}));
    }

    #[test]
    fn oversized_patch_leaves_store_unchanged() {
        let mut store = DataStore::new(64);
        store.put(json!({"k": "v"})).unwrap();
        let before = store.snapshot();

        let big = json!({"k2": "x".repeat(128)});
        let err = store.patch(&big).unwrap_err();
        assert!(matches!(err, MmdsError::PayloadTooLarge { .. }));
        assert_eq!(store.snapshot(), before, "rejected patch must not mutate");
    }

    #[test]
    fn get_resolves_dotted_and_slash_paths() {
        let mut store = DataStore::new(1024);
        store
            .put(json!({"latest": {"meta-data": {"ami-id": "dummy"}}}))
            .unwrap();
        assert_eq!(store.get("latest.meta-data.ami-id").unwrap(), json!("dummy"));
        assert_eq!(store.get("latest/meta-data/ami-id").unwrap(), json!("dummy"));
        assert!(matches!(
            store.get("latest.absent"),
            Err(MmdsError::NotFound { .. })
        ));
    }
}
