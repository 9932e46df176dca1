//! Deterministic content hashing.
//!
//! Policy hashes are recorded with every revision so a reader can tell
//! which policy produced a state. Short key hashes are exposed to
//! templates as `InstanceId`.

use sha2::{Digest, Sha256};

use crate::policy::Policy;

/// Length of short hashes.
pub const SHORT_HASH_LEN: usize = 8;

/// Hasher for policies and instance keys.
#[derive(Debug, Default)]
pub struct KeyHasher;

impl KeyHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash over every object of a policy.
    ///
    /// Objects are hashed sorted by kind, namespace and name, so the result
    /// does not depend on declaration order across files.
    #[must_use]
    pub fn hash_policy(&self, policy: &Policy) -> String {
        let mut objects: Vec<_> = policy.objects().iter().collect();
        objects.sort_by(|a, b| {
            (a.kind(), &a.metadata().namespace, &a.metadata().name)
                .cmp(&(b.kind(), &b.metadata().namespace, &b.metadata().name))
        });

        let mut hasher = Sha256::new();
        for object in objects {
            // Maps are ordered, so serialization is stable.
            match serde_json::to_vec(object) {
                Ok(bytes) => hasher.update(&bytes),
                Err(_) => hasher.update(object.metadata().name.as_bytes()),
            }
            hasher.update([0u8]);
        }

        hex::encode(hasher.finalize())
    }

    /// Computes the full hash of a string key.
    #[must_use]
    pub fn hash_key(&self, key: &str) -> String {
        hex::encode(Sha256::digest(key.as_bytes()))
    }

    /// Computes the short hash of a string key.
    #[must_use]
    pub fn short_key_hash(&self, key: &str) -> String {
        self.short_hash(&self.hash_key(key))
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(SHORT_HASH_LEN).collect()
    }

    /// Compares two hashes in constant time.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Metadata, PolicyObject, Service};

    fn service(name: &str) -> PolicyObject {
        PolicyObject::Service(Service {
            metadata: Metadata::new("main", name),
            labels: std::collections::BTreeMap::new(),
            components: vec![],
        })
    }

    #[test]
    fn test_policy_hash_ignores_declaration_order() {
        let hasher = KeyHasher::new();
        let a = Policy::from_objects([service("a"), service("b")]).unwrap();
        let b = Policy::from_objects([service("b"), service("a")]).unwrap();
        let c = Policy::from_objects([service("a")]).unwrap();

        assert_eq!(hasher.hash_policy(&a), hasher.hash_policy(&b));
        assert_ne!(hasher.hash_policy(&a), hasher.hash_policy(&c));
    }

    #[test]
    fn test_short_key_hash_is_stable() {
        let hasher = KeyHasher::new();
        let id = hasher.short_key_hash("k8s#ns#main#db#prod#postgres#root");
        assert_eq!(id.len(), SHORT_HASH_LEN);
        assert_eq!(id, hasher.short_key_hash("k8s#ns#main#db#prod#postgres#root"));
    }

    #[test]
    fn test_hashes_match() {
        assert!(KeyHasher::hashes_match("abc123", "abc123"));
        assert!(!KeyHasher::hashes_match("abc123", "abc124"));
        assert!(!KeyHasher::hashes_match("abc123", "abc12"));
    }
}
