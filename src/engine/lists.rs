//! List operations.

use crate::ds::InsertOption;
use crate::error::Result;
use crate::storage::entry::{DataType, Entry, ListMark};

use super::{encode_pair, KilnDb};

impl KilnDb {
    /// Push values at the head, one at a time in argument order, so
    /// `lpush(k, [a, b, c])` leaves the list as `[c, b, a]`. Returns the
    /// length after the pushes.
    pub fn lpush(&self, key: &[u8], values: &[&[u8]]) -> Result<usize> {
        self.check_key_value(key, values)?;
        let mut store = self.lists.write().unwrap();
        for value in values {
            let e = Entry::no_extra(
                key.to_vec(),
                value.to_vec(),
                DataType::List,
                ListMark::LPush as u16,
            );
            self.store(&mut store.files, &e)?;
            store.idx.lpush(key, &[value.to_vec()]);
        }
        Ok(store.idx.llen(key))
    }

    /// Push values at the tail in argument order. Returns the new length.
    pub fn rpush(&self, key: &[u8], values: &[&[u8]]) -> Result<usize> {
        self.check_key_value(key, values)?;
        let mut store = self.lists.write().unwrap();
        for value in values {
            let e = Entry::no_extra(
                key.to_vec(),
                value.to_vec(),
                DataType::List,
                ListMark::RPush as u16,
            );
            self.store(&mut store.files, &e)?;
            store.idx.rpush(key, &[value.to_vec()]);
        }
        Ok(store.idx.llen(key))
    }

    /// Pop the head element.
    pub fn lpop(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_key_value(key, &[])?;
        let mut store = self.lists.write().unwrap();
        let Some(head) = store.idx.lindex(key, 0).map(|v| v.to_vec()) else {
            return Ok(None);
        };
        let e = Entry::no_extra(
            key.to_vec(),
            head,
            DataType::List,
            ListMark::LPop as u16,
        );
        self.store(&mut store.files, &e)?;
        Ok(store.idx.lpop(key))
    }

    /// Pop the tail element.
    pub fn rpop(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_key_value(key, &[])?;
        let mut store = self.lists.write().unwrap();
        let Some(tail) = store.idx.lindex(key, -1).map(|v| v.to_vec()) else {
            return Ok(None);
        };
        let e = Entry::no_extra(
            key.to_vec(),
            tail,
            DataType::List,
            ListMark::RPop as u16,
        );
        self.store(&mut store.files, &e)?;
        Ok(store.idx.rpop(key))
    }

    /// The element at `index`; negative indexes wrap from the tail.
    pub fn lindex(&self, key: &[u8], index: i64) -> Option<Vec<u8>> {
        if self.check_key_value(key, &[]).is_err() {
            return None;
        }
        let store = self.lists.read().unwrap();
        store.idx.lindex(key, index).map(|v| v.to_vec())
    }

    /// Remove elements equal to `value` by the three-sign `count` rule:
    /// the first `count` from the head when positive, the last `-count`
    /// from the tail when negative, all of them when zero. Returns how many
    /// were removed.
    pub fn lrem(&self, key: &[u8], value: &[u8], count: i64) -> Result<usize> {
        self.check_key_value(key, &[value])?;
        let mut store = self.lists.write().unwrap();
        if !store.idx.lval_exists(key, value) {
            return Ok(0);
        }
        let e = Entry::new(
            key.to_vec(),
            value.to_vec(),
            count.to_string().into_bytes(),
            DataType::List,
            ListMark::LRem as u16,
        );
        self.store(&mut store.files, &e)?;
        Ok(store.idx.lrem(key, value, count))
    }

    /// Insert `value` before or after the first occurrence of `pivot`.
    /// Returns the new length, or None when the pivot is absent.
    pub fn linsert(
        &self,
        key: &[u8],
        option: InsertOption,
        pivot: &[u8],
        value: &[u8],
    ) -> Result<Option<usize>> {
        self.check_key_value(key, &[value])?;
        let mut store = self.lists.write().unwrap();
        if !store.idx.lval_exists(key, pivot) {
            return Ok(None);
        }
        let e = Entry::new(
            key.to_vec(),
            value.to_vec(),
            encode_pair(pivot, (option as u8).to_string().as_bytes()),
            DataType::List,
            ListMark::LInsert as u16,
        );
        self.store(&mut store.files, &e)?;
        Ok(store.idx.linsert(key, option, pivot, value.to_vec()))
    }

    /// Replace the element at `index`. Returns whether the index was valid.
    pub fn lset(&self, key: &[u8], index: i64, value: &[u8]) -> Result<bool> {
        self.check_key_value(key, &[value])?;
        let mut store = self.lists.write().unwrap();
        if store.idx.lindex(key, index).is_none() {
            return Ok(false);
        }
        let e = Entry::new(
            key.to_vec(),
            value.to_vec(),
            index.to_string().into_bytes(),
            DataType::List,
            ListMark::LSet as u16,
        );
        self.store(&mut store.files, &e)?;
        Ok(store.idx.lset(key, index, value.to_vec()))
    }

    /// Keep only the elements in `[start, end]`. Returns whether the list
    /// changed.
    pub fn ltrim(&self, key: &[u8], start: i64, end: i64) -> Result<bool> {
        self.check_key_value(key, &[])?;
        let mut store = self.lists.write().unwrap();
        if !store.idx.lkey_exists(key) {
            return Ok(false);
        }
        let e = Entry::new(
            key.to_vec(),
            Vec::new(),
            encode_pair(
                start.to_string().as_bytes(),
                end.to_string().as_bytes(),
            ),
            DataType::List,
            ListMark::LTrim as u16,
        );
        self.store(&mut store.files, &e)?;
        Ok(store.idx.ltrim(key, start, end))
    }

    /// Elements in `[start, end]`; negative bounds wrap and bounds are
    /// clipped to the list.
    pub fn lrange(&self, key: &[u8], start: i64, end: i64) -> Vec<Vec<u8>> {
        if self.check_key_value(key, &[]).is_err() {
            return Vec::new();
        }
        self.lists.read().unwrap().idx.lrange(key, start, end)
    }

    /// Number of elements in the list at `key`.
    pub fn llen(&self, key: &[u8]) -> usize {
        if self.check_key_value(key, &[]).is_err() {
            return 0;
        }
        self.lists.read().unwrap().idx.llen(key)
    }

    /// Whether the list at `key` exists.
    pub fn lkey_exists(&self, key: &[u8]) -> bool {
        if self.check_key_value(key, &[]).is_err() {
            return false;
        }
        self.lists.read().unwrap().idx.lkey_exists(key)
    }

    /// Whether `value` occurs in the list at `key`.
    pub fn lval_exists(&self, key: &[u8], value: &[u8]) -> bool {
        if self.check_key_value(key, &[]).is_err() {
            return false;
        }
        self.lists.read().unwrap().idx.lval_exists(key, value)
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

    #[test]
    fn test_push_pop_order() {
        let dir = TempDir::new().expect("temp dir");
        let db = open_db(&dir);

        assert_eq!(db.lpush(b"k", &[b"a", b"b"]).expect("lpush"), 2);
        assert_eq!(db.lpush(b"k", &[b"c"]).expect("lpush"), 3);
        assert_eq!(
            db.lrange(b"k", 0, -1),
            vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]
        );

        assert_eq!(db.rpush(b"k", &[b"z"]).expect("rpush"), 4);
        assert_eq!(db.lpop(b"k").expect("lpop"), Some(b"c".to_vec()));
        assert_eq!(db.rpop(b"k").expect("rpop"), Some(b"z".to_vec()));
        assert_eq!(db.llen(b"k"), 2);
        assert_eq!(db.lpop(b"empty").expect("lpop"), None);
    }

    #[test]
    fn test_lrem_sign_semantics() {
        let dir = TempDir::new().expect("temp dir");
        let db = open_db(&dir);

        db.rpush(b"k", &[b"a", b"b", b"a", b"c", b"a"]).expect("rpush");
        assert_eq!(db.lrem(b"k", b"a", 2).expect("lrem"), 2);
        assert_eq!(
            db.lrange(b"k", 0, -1),
            vec![b"b".to_vec(), b"c".to_vec(), b"a".to_vec()]
        );
        assert_eq!(db.lrem(b"k", b"missing", 0).expect("lrem"), 0);
    }

    #[test]
    fn test_linsert_lset_ltrim() {
        let dir = TempDir::new().expect("temp dir");
        let db = open_db(&dir);

        db.rpush(b"k", &[b"a", b"c"]).expect("rpush");
        assert_eq!(
            db.linsert(b"k", InsertOption::Before, b"c", b"b").expect("linsert"),
            Some(3)
        );
        assert_eq!(
            db.linsert(b"k", InsertOption::After, b"nope", b"x").expect("linsert"),
            None
        );

        assert!(db.lset(b"k", 0, b"A").expect("lset"));
        assert!(!db.lset(b"k", 9, b"x").expect("lset out of range"));
        assert_eq!(
            db.lrange(b"k", 0, -1),
            vec![b"A".to_vec(), b"b".to_vec(), b"c".to_vec()]
        );

        assert!(db.ltrim(b"k", 1, -1).expect("ltrim"));
        assert_eq!(db.lrange(b"k", 0, -1), vec![b"b".to_vec(), b"c".to_vec()]);
        assert!(!db.ltrim(b"missing", 0, 1).expect("ltrim missing"));
    }

    #[test]
    fn test_lindex() {
        let dir = TempDir::new().expect("temp dir");
        let db = open_db(&dir);

        db.rpush(b"k", &[b"a", b"b", b"c"]).expect("rpush");
        assert_eq!(db.lindex(b"k", 1), Some(b"b".to_vec()));
        assert_eq!(db.lindex(b"k", -1), Some(b"c".to_vec()));
        assert_eq!(db.lindex(b"k", 9), None);
    }

    #[test]
    fn test_recovery_replays_structural_ops() {
        let dir = TempDir::new().expect("temp dir");
        {
            let db = open_db(&dir);
            db.rpush(b"k", &[b"a", b"b", b"a", b"c"]).expect("rpush");
            db.lrem(b"k", b"a", 1).expect("lrem");
            db.linsert(b"k", InsertOption::After, b"b", b"x").expect("linsert");
            db.lset(b"k", 0, b"B").expect("lset");
            db.lpop(b"k").expect("lpop");
            // Now: [x, a, c]
            db.close().expect("close");
        }

        let db = KilnDb::reopen(dir.path()).expect("reopen");
        assert_eq!(
            db.lrange(b"k", 0, -1),
            vec![b"x".to_vec(), b"a".to_vec(), b"c".to_vec()]
        );
        assert!(db.lval_exists(b"k", b"x"));
        assert!(!db.lval_exists(b"k", b"B"));
    }
}
