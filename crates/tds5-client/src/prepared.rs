//! Prepared-statement registry (§3, §4.6).
//!
//! Maps a statement identifier to the verbatim bytes of the `paramsformat`
//! token the server handed back at `prepare` time. `execute` replays those
//! bytes ahead of the argument values so the server can decode them without
//! a fresh format negotiation. Entries are never evicted by the core —
//! callers drop the whole connection to free them.

use std::collections::HashMap;

use bytes::Bytes;

/// Registry of prepared statements keyed by statement identifier.
#[derive(Debug, Clone, Default)]
pub struct PreparedRegistry {
    entries: HashMap<Vec<u8>, Bytes>,
}

impl PreparedRegistry {
    /// Record a statement's parameter format, created on a successful
    /// `prepare`.
    pub fn insert(&mut self, stmt_id: Vec<u8>, params_format: Bytes) {
        self.entries.insert(stmt_id, params_format);
    }

    /// Look up a previously prepared statement's parameter format.
    #[must_use]
    pub fn get(&self, stmt_id: &[u8]) -> Option<&Bytes> {
        self.entries.get(stmt_id)
    }

    /// Whether a statement identifier has been prepared.
    #[must_use]
    pub fn contains(&self, stmt_id: &[u8]) -> bool {
        self.entries.contains_key(stmt_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn insert_then_get_round_trips() {
        let mut registry = PreparedRegistry::default();
        let format = Bytes::from_static(b"\xEC\x00");
        registry.insert(b"s1".to_vec(), format.clone());

        assert!(registry.contains(b"s1"));
        assert_eq!(registry.get(b"s1"), Some(&format));
        assert_eq!(registry.get(b"unknown"), None);
    }

    #[test]
    fn never_evicted_by_reinsert() {
        let mut registry = PreparedRegistry::default();
        registry.insert(b"s1".to_vec(), Bytes::from_static(b"a"));
        registry.insert(b"s1".to_vec(), Bytes::from_static(b"b"));
        assert_eq!(registry.get(b"s1"), Some(&Bytes::from_static(b"b")));
    }

    proptest! {
        // Property 4 (prepared idempotence), scoped to the registry: once a
        // statement is inserted, any number of `execute`-style lookups for
        // either form (no args or with args both consult the same entry)
        // return the same bytes and never mutate the registry.
        #[test]
        fn insert_once_then_get_is_idempotent(
            stmt_id in prop::collection::vec(any::<u8>(), 1..8),
            format in prop::collection::vec(any::<u8>(), 0..64),
            lookups in 1..20usize,
        ) {
            let mut registry = PreparedRegistry::default();
            let format = Bytes::from(format);
            registry.insert(stmt_id.clone(), format.clone());

            for _ in 0..lookups {
                prop_assert_eq!(registry.get(&stmt_id), Some(&format));
            }
            prop_assert!(registry.contains(&stmt_id));
        }
    }
}
