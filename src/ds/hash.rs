//! The hash index: a two-level dictionary from key to field to value.

use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct HashIndex {
    record: HashMap<Vec<u8>, HashMap<Vec<u8>, Vec<u8>>>,
}

impl HashIndex {
    pub fn new() -> HashIndex {
        HashIndex::default()
    }

    /// Set a field, creating the hash if needed. Returns the field count
    /// after the operation.
    pub fn hset(&mut self, key: &[u8], field: &[u8], value: Vec<u8>) -> usize {
        let fields = self.record.entry(key.to_vec()).or_default();
        fields.insert(field.to_vec(), value);
        fields.len()
    }

    /// Set a field only if it is absent. Returns whether it was set.
    pub fn hset_nx(&mut self, key: &[u8], field: &[u8], value: Vec<u8>) -> bool {
        let fields = self.record.entry(key.to_vec()).or_default();
        if fields.contains_key(field) {
            return false;
        }
        fields.insert(field.to_vec(), value);
        true
    }

    pub fn hget(&self, key: &[u8], field: &[u8]) -> Option<&[u8]> {
        self.record.get(key)?.get(field).map(|v| v.as_slice())
    }

    /// All fields and their values.
    pub fn hget_all(&self, key: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        match self.record.get(key) {
            Some(fields) => fields.iter().map(|(f, v)| (f.clone(), v.clone())).collect(),
            None => Vec::new(),
        }
    }

    /// Remove one field. Returns whether it existed.
    pub fn hdel(&mut self, key: &[u8], field: &[u8]) -> bool {
        let Some(fields) = self.record.get_mut(key) else {
            return false;
        };
        let removed = fields.remove(field).is_some();
        if fields.is_empty() {
            self.record.remove(key);
        }
        removed
    }

    pub fn hexists(&self, key: &[u8], field: &[u8]) -> bool {
        self.record
            .get(key)
            .is_some_and(|fields| fields.contains_key(field))
    }

    pub fn hlen(&self, key: &[u8]) -> usize {
        self.record.get(key).map_or(0, |fields| fields.len())
    }

    pub fn hkeys(&self, key: &[u8]) -> Vec<Vec<u8>> {
        match self.record.get(key) {
            Some(fields) => fields.keys().cloned().collect(),
            None => Vec::new(),
        }
    }

    pub fn hvalues(&self, key: &[u8]) -> Vec<Vec<u8>> {
        match self.record.get(key) {
            Some(fields) => fields.values().cloned().collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hset_hget() {
        let mut h = HashIndex::new();
        assert_eq!(h.hset(b"h", b"f1", b"v1".to_vec()), 1);
        assert_eq!(h.hset(b"h", b"f2", b"v2".to_vec()), 2);
        // Overwriting keeps the count.
        assert_eq!(h.hset(b"h", b"f1", b"v1b".to_vec()), 2);

        assert_eq!(h.hget(b"h", b"f1"), Some(&b"v1b"[..]));
        assert_eq!(h.hget(b"h", b"nope"), None);
        assert_eq!(h.hget(b"missing", b"f1"), None);
    }

    #[test]
    fn test_hset_nx() {
        let mut h = HashIndex::new();
        assert!(h.hset_nx(b"h", b"f", b"v".to_vec()));
        assert!(!h.hset_nx(b"h", b"f", b"other".to_vec()));
        assert_eq!(h.hget(b"h", b"f"), Some(&b"v"[..]));
    }

    #[test]
    fn test_hdel_and_cleanup() {
        let mut h = HashIndex::new();
        h.hset(b"h", b"f", b"v".to_vec());
        assert!(h.hdel(b"h", b"f"));
        assert!(!h.hdel(b"h", b"f"));
        // The empty hash is gone entirely.
        assert_eq!(h.hlen(b"h"), 0);
        assert!(!h.hexists(b"h", b"f"));
    }

    #[test]
    fn test_keys_values() {
        let mut h = HashIndex::new();
        h.hset(b"h", b"f1", b"v1".to_vec());
        h.hset(b"h", b"f2", b"v2".to_vec());

        let mut ks = h.hkeys(b"h");
        ks.sort();
        assert_eq!(ks, vec![b"f1".to_vec(), b"f2".to_vec()]);

        let mut vs = h.hvalues(b"h");
        vs.sort();
        assert_eq!(vs, vec![b"v1".to_vec(), b"v2".to_vec()]);

        assert_eq!(h.hget_all(b"h").len(), 2);
        assert!(h.hget_all(b"missing").is_empty());
    }
}
