//! Sorted-set operations.

use crate::error::Result;
use crate::storage::entry::{DataType, Entry, ZSetMark};

use super::KilnDb;

impl KilnDb {
    /// Add `member` with `score`, replacing any previous score. Re-adding
    /// with the current score appends nothing.
    pub fn zadd(&self, key: &[u8], score: f64, member: &[u8]) -> Result<()> {
        self.check_key_value(key, &[member])?;
        let mut store = self.zsets.write().unwrap();
        if store.idx.zscore(key, member) == Some(score) {
            return Ok(());
        }
        let e = Entry::new(
            key.to_vec(),
            member.to_vec(),
            score.to_string().into_bytes(),
            DataType::ZSet,
            ZSetMark::ZAdd as u16,
        );
        self.store(&mut store.files, &e)?;
        store.idx.zadd(key, score, member);
        Ok(())
    }

    /// Remove `member`. Returns whether it was present.
    pub fn zrem(&self, key: &[u8], member: &[u8]) -> Result<bool> {
        self.check_key_value(key, &[member])?;
        let mut store = self.zsets.write().unwrap();
        if !store.idx.zis_member(key, member) {
            return Ok(false);
        }
        let e = Entry::no_extra(
            key.to_vec(),
            member.to_vec(),
            DataType::ZSet,
            ZSetMark::ZRem as u16,
        );
        self.store(&mut store.files, &e)?;
        Ok(store.idx.zrem(key, member))
    }

    /// The score of `member`, or None when absent.
    pub fn zscore(&self, key: &[u8], member: &[u8]) -> Option<f64> {
        if self.check_key_value(key, &[]).is_err() {
            return None;
        }
        self.zsets.read().unwrap().idx.zscore(key, member)
    }

    /// Number of members in the sorted set at `key`.
    pub fn zcard(&self, key: &[u8]) -> usize {
        if self.check_key_value(key, &[]).is_err() {
            return 0;
        }
        self.zsets.read().unwrap().idx.zcard(key)
    }

    /// Whether `member` is in the sorted set at `key`.
    pub fn zis_member(&self, key: &[u8], member: &[u8]) -> bool {
        if self.check_key_value(key, &[]).is_err() {
            return false;
        }
        self.zsets.read().unwrap().idx.zis_member(key, member)
    }

    /// Members and scores in `[start, end]` by ascending rank (score order,
    /// member tie-break); negative ranks wrap from the tail.
    pub fn zrange(&self, key: &[u8], start: i64, end: i64) -> Vec<(Vec<u8>, f64)> {
        if self.check_key_value(key, &[]).is_err() {
            return Vec::new();
        }
        self.zsets.read().unwrap().idx.zrange(key, start, end)
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
        db.zsets.read().unwrap().files.active.offset
    }

    #[test]
    fn test_zadd_zscore() {
        let dir = TempDir::new().expect("temp dir");
        let db = open_db(&dir);

        db.zadd(b"k", 1.5, b"a").expect("zadd");
        db.zadd(b"k", -2.0, b"b").expect("zadd");
        assert_eq!(db.zscore(b"k", b"a"), Some(1.5));
        assert_eq!(db.zscore(b"k", b"b"), Some(-2.0));
        assert_eq!(db.zscore(b"k", b"missing"), None);
        assert_eq!(db.zcard(b"k"), 2);

        // Same-score re-add appends nothing.
        let before = active_offset(&db);
        db.zadd(b"k", 1.5, b"a").expect("zadd same");
        assert_eq!(active_offset(&db), before);

        // A new score replaces the old.
        db.zadd(b"k", 9.0, b"a").expect("rescore");
        assert_eq!(db.zscore(b"k", b"a"), Some(9.0));
        assert_eq!(db.zcard(b"k"), 2);
    }

    #[test]
    fn test_zrem() {
        let dir = TempDir::new().expect("temp dir");
        let db = open_db(&dir);

        db.zadd(b"k", 1.0, b"a").expect("zadd");
        assert!(db.zrem(b"k", b"a").expect("zrem"));
        assert!(!db.zrem(b"k", b"a").expect("zrem again"));
        assert_eq!(db.zcard(b"k"), 0);
    }

    #[test]
    fn test_zrange_ordering() {
        let dir = TempDir::new().expect("temp dir");
        let db = open_db(&dir);

        db.zadd(b"k", 2.0, b"bb").expect("zadd");
        db.zadd(b"k", -1.0, b"neg").expect("zadd");
        db.zadd(b"k", 2.0, b"aa").expect("zadd");

        let members: Vec<Vec<u8>> = db
            .zrange(b"k", 0, -1)
            .into_iter()
            .map(|(m, _)| m)
            .collect();
        assert_eq!(
            members,
            vec![b"neg".to_vec(), b"aa".to_vec(), b"bb".to_vec()]
        );
    }

    #[test]
    fn test_recovery() {
        let dir = TempDir::new().expect("temp dir");
        {
            let db = open_db(&dir);
            db.zadd(b"k", 1.25, b"kept").expect("zadd");
            db.zadd(b"k", 2.0, b"gone").expect("zadd");
            db.zadd(b"k", -3.5, b"rescored").expect("zadd");
            db.zadd(b"k", 7.0, b"rescored").expect("rescore");
            db.zrem(b"k", b"gone").expect("zrem");
            db.close().expect("close");
        }

        let db = KilnDb::reopen(dir.path()).expect("reopen");
        assert_eq!(db.zscore(b"k", b"kept"), Some(1.25));
        assert_eq!(db.zscore(b"k", b"rescored"), Some(7.0));
        assert_eq!(db.zscore(b"k", b"gone"), None);
        assert_eq!(db.zcard(b"k"), 2);
    }
}
