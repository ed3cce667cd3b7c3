//! Hash operations.

use crate::error::Result;
use crate::storage::entry::{DataType, Entry, HashMark};

use super::KilnDb;

impl KilnDb {
    /// Set `field` of the hash at `key`, creating the hash if needed.
    /// Returns the field count after the operation. Rewriting a field with
    /// its current value appends nothing.
    pub fn hset(&self, key: &[u8], field: &[u8], value: &[u8]) -> Result<usize> {
        self.check_key_value(key, &[value])?;
        let mut store = self.hashes.write().unwrap();
        if store.idx.hget(key, field) == Some(value) {
            return Ok(store.idx.hlen(key));
        }

        let e = Entry::new(
            key.to_vec(),
            value.to_vec(),
            field.to_vec(),
            DataType::Hash,
            HashMark::HSet as u16,
        );
        self.store(&mut store.files, &e)?;
        Ok(store.idx.hset(key, field, value.to_vec()))
    }

    /// Set `field` only when it is absent. Returns whether it was set.
    pub fn hset_nx(&self, key: &[u8], field: &[u8], value: &[u8]) -> Result<bool> {
        self.check_key_value(key, &[value])?;
        let mut store = self.hashes.write().unwrap();
        if store.idx.hexists(key, field) {
            return Ok(false);
        }

        let e = Entry::new(
            key.to_vec(),
            value.to_vec(),
            field.to_vec(),
            DataType::Hash,
            HashMark::HSet as u16,
        );
        self.store(&mut store.files, &e)?;
        store.idx.hset(key, field, value.to_vec());
        Ok(true)
    }

    /// The value of `field`, or None when the key or field is absent.
    pub fn hget(&self, key: &[u8], field: &[u8]) -> Option<Vec<u8>> {
        if self.check_key_value(key, &[]).is_err() {
            return None;
        }
        let store = self.hashes.read().unwrap();
        store.idx.hget(key, field).map(|v| v.to_vec())
    }

    /// Every field and value of the hash at `key`.
    pub fn hget_all(&self, key: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        if self.check_key_value(key, &[]).is_err() {
            return Vec::new();
        }
        let store = self.hashes.read().unwrap();
        store.idx.hget_all(key)
    }

    /// Remove fields from the hash at `key`, ignoring absent ones. Returns
    /// how many were removed.
    pub fn hdel(&self, key: &[u8], fields: &[&[u8]]) -> Result<usize> {
        self.check_key_value(key, &[])?;
        if fields.is_empty() {
            return Ok(0);
        }

        let mut store = self.hashes.write().unwrap();
        let mut removed = 0;
        for field in fields {
            if !store.idx.hexists(key, field) {
                continue;
            }
            let e = Entry::new(
                key.to_vec(),
                Vec::new(),
                field.to_vec(),
                DataType::Hash,
                HashMark::HDel as u16,
            );
            self.store(&mut store.files, &e)?;
            store.idx.hdel(key, field);
            removed += 1;
        }
        Ok(removed)
    }

    /// Whether `field` exists in the hash at `key`.
    pub fn hexists(&self, key: &[u8], field: &[u8]) -> bool {
        if self.check_key_value(key, &[]).is_err() {
            return false;
        }
        self.hashes.read().unwrap().idx.hexists(key, field)
    }

    /// Number of fields in the hash at `key`.
    pub fn hlen(&self, key: &[u8]) -> usize {
        if self.check_key_value(key, &[]).is_err() {
            return 0;
        }
        self.hashes.read().unwrap().idx.hlen(key)
    }

    /// All fields of the hash at `key`.
    pub fn hkeys(&self, key: &[u8]) -> Vec<Vec<u8>> {
        if self.check_key_value(key, &[]).is_err() {
            return Vec::new();
        }
        self.hashes.read().unwrap().idx.hkeys(key)
    }

    /// All values of the hash at `key`.
    pub fn hvalues(&self, key: &[u8]) -> Vec<Vec<u8>> {
        if self.check_key_value(key, &[]).is_err() {
            return Vec::new();
        }
        self.hashes.read().unwrap().idx.hvalues(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::TempDir;

    fn open_db(dir: &TempDir) -> KilnDb {
        KilnDb::open(Config::new(dir.path())).expect("open db")
    }

    fn active_offset(db: &KilnDb) -> u64 {
        db.hashes.read().unwrap().files.active.offset
    }

    #[test]
    fn test_hset_hget() {
        let dir = TempDir::new().expect("temp dir");
        let db = open_db(&dir);

        assert_eq!(db.hset(b"h", b"f", b"v").expect("hset"), 1);
        assert_eq!(db.hget(b"h", b"f"), Some(b"v".to_vec()));
        assert_eq!(db.hget(b"h", b"nope"), None);

        // Rewriting the same value is a no-op: hlen stays 1 and the log
        // does not grow.
        let before = active_offset(&db);
        assert_eq!(db.hset(b"h", b"f", b"v").expect("hset same"), 1);
        assert_eq!(active_offset(&db), before);

        assert_eq!(db.hset(b"h", b"g", b"w").expect("hset other"), 2);
        assert_eq!(db.hlen(b"h"), 2);
    }

    #[test]
    fn test_hset_nx() {
        let dir = TempDir::new().expect("temp dir");
        let db = open_db(&dir);

        assert!(db.hset_nx(b"h", b"f", b"v").expect("hsetnx"));
        assert!(!db.hset_nx(b"h", b"f", b"other").expect("hsetnx again"));
        assert_eq!(db.hget(b"h", b"f"), Some(b"v".to_vec()));
    }

    #[test]
    fn test_hdel() {
        let dir = TempDir::new().expect("temp dir");
        let db = open_db(&dir);

        db.hset(b"h", b"f1", b"v1").expect("hset");
        db.hset(b"h", b"f2", b"v2").expect("hset");

        let removed = db
            .hdel(b"h", &[b"f1", b"missing", b"f2"])
            .expect("hdel");
        assert_eq!(removed, 2);
        assert_eq!(db.hlen(b"h"), 0);
        assert!(!db.hexists(b"h", b"f1"));
        assert_eq!(db.hdel(b"h", &[]).expect("empty hdel"), 0);
    }

    #[test]
    fn test_keys_values() {
        let dir = TempDir::new().expect("temp dir");
        let db = open_db(&dir);

        db.hset(b"h", b"f1", b"v1").expect("hset");
        db.hset(b"h", b"f2", b"v2").expect("hset");

        let mut keys = db.hkeys(b"h");
        keys.sort();
        assert_eq!(keys, vec![b"f1".to_vec(), b"f2".to_vec()]);

        let mut values = db.hvalues(b"h");
        values.sort();
        assert_eq!(values, vec![b"v1".to_vec(), b"v2".to_vec()]);

        assert_eq!(db.hget_all(b"h").len(), 2);
    }

    #[test]
    fn test_recovery() {
        let dir = TempDir::new().expect("temp dir");
        {
            let db = open_db(&dir);
            db.hset(b"h", b"kept", b"v").expect("hset");
            db.hset(b"h", b"dropped", b"v").expect("hset");
            db.hdel(b"h", &[b"dropped"]).expect("hdel");
            db.close().expect("close");
        }

        let db = KilnDb::reopen(dir.path()).expect("reopen");
        assert_eq!(db.hget(b"h", b"kept"), Some(b"v".to_vec()));
        assert_eq!(db.hget(b"h", b"dropped"), None);
        assert_eq!(db.hlen(b"h"), 1);
    }
}
