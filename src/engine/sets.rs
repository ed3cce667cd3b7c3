//! Set operations.

use crate::error::Result;
use crate::storage::entry::{DataType, Entry, SetMark};

use super::KilnDb;

impl KilnDb {
    /// Add members to the set at `key`, ignoring ones already present.
    /// Returns the cardinality after the operation.
    pub fn sadd(&self, key: &[u8], members: &[&[u8]]) -> Result<usize> {
        self.check_key_value(key, members)?;
        let mut store = self.sets.write().unwrap();
        for member in members {
            if store.idx.sis_member(key, member) {
                continue;
            }
            let e = Entry::no_extra(
                key.to_vec(),
                member.to_vec(),
                DataType::Set,
                SetMark::SAdd as u16,
            );
            self.store(&mut store.files, &e)?;
            store.idx.sadd(key, member.to_vec());
        }
        Ok(store.idx.scard(key))
    }

    /// Remove members from the set at `key`, ignoring absent ones. Returns
    /// how many were removed.
    pub fn srem(&self, key: &[u8], members: &[&[u8]]) -> Result<usize> {
        self.check_key_value(key, members)?;
        let mut store = self.sets.write().unwrap();
        let mut removed = 0;
        for member in members {
            if !store.idx.sis_member(key, member) {
                continue;
            }
            let e = Entry::no_extra(
                key.to_vec(),
                member.to_vec(),
                DataType::Set,
                SetMark::SRem as u16,
            );
            self.store(&mut store.files, &e)?;
            store.idx.srem(key, member);
            removed += 1;
        }
        Ok(removed)
    }

    /// Whether `member` is in the set at `key`.
    pub fn sis_member(&self, key: &[u8], member: &[u8]) -> bool {
        if self.check_key_value(key, &[]).is_err() {
            return false;
        }
        self.sets.read().unwrap().idx.sis_member(key, member)
    }

    /// Move `member` from `src` to `dst` atomically. Returns false when the
    /// member is not in the source set.
    pub fn smove(&self, src: &[u8], dst: &[u8], member: &[u8]) -> Result<bool> {
        self.check_key_value(src, &[member])?;
        self.check_key_value(dst, &[])?;
        let mut store = self.sets.write().unwrap();
        if !store.idx.sis_member(src, member) {
            return Ok(false);
        }
        let e = Entry::new(
            src.to_vec(),
            member.to_vec(),
            dst.to_vec(),
            DataType::Set,
            SetMark::SMove as u16,
        );
        self.store(&mut store.files, &e)?;
        Ok(store.idx.smove(src, dst, member))
    }

    /// Cardinality of the set at `key`.
    pub fn scard(&self, key: &[u8]) -> usize {
        if self.check_key_value(key, &[]).is_err() {
            return 0;
        }
        self.sets.read().unwrap().idx.scard(key)
    }

    /// All members of the set at `key`, in no particular order.
    pub fn smembers(&self, key: &[u8]) -> Vec<Vec<u8>> {
        if self.check_key_value(key, &[]).is_err() {
            return Vec::new();
        }
        self.sets.read().unwrap().idx.smembers(key)
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
        db.sets.read().unwrap().files.active.offset
    }

    #[test]
    fn test_sadd_srem_membership() {
        let dir = TempDir::new().expect("temp dir");
        let db = open_db(&dir);

        assert_eq!(db.sadd(b"k", &[b"a", b"b"]).expect("sadd"), 2);
        // Duplicate adds neither grow the set nor the log.
        let before = active_offset(&db);
        assert_eq!(db.sadd(b"k", &[b"a"]).expect("sadd dup"), 2);
        assert_eq!(active_offset(&db), before);

        assert!(db.sis_member(b"k", b"a"));
        assert_eq!(db.srem(b"k", &[b"a", b"missing"]).expect("srem"), 1);
        assert!(!db.sis_member(b"k", b"a"));
        assert_eq!(db.scard(b"k"), 1);
    }

    #[test]
    fn test_smove() {
        let dir = TempDir::new().expect("temp dir");
        let db = open_db(&dir);

        db.sadd(b"src", &[b"m"]).expect("sadd");
        assert!(db.smove(b"src", b"dst", b"m").expect("smove"));
        assert!(!db.smove(b"src", b"dst", b"m").expect("smove again"));
        assert!(db.sis_member(b"dst", b"m"));
        assert!(!db.sis_member(b"src", b"m"));
    }

    #[test]
    fn test_smembers() {
        let dir = TempDir::new().expect("temp dir");
        let db = open_db(&dir);

        db.sadd(b"k", &[b"x", b"y"]).expect("sadd");
        let mut members = db.smembers(b"k");
        members.sort();
        assert_eq!(members, vec![b"x".to_vec(), b"y".to_vec()]);
    }

    #[test]
    fn test_recovery() {
        let dir = TempDir::new().expect("temp dir");
        {
            let db = open_db(&dir);
            db.sadd(b"k", &[b"a", b"b", b"c"]).expect("sadd");
            db.srem(b"k", &[b"b"]).expect("srem");
            db.smove(b"k", b"other", b"c").expect("smove");
            db.close().expect("close");
        }

        let db = KilnDb::reopen(dir.path()).expect("reopen");
        let mut members = db.smembers(b"k");
        members.sort();
        assert_eq!(members, vec![b"a".to_vec()]);
        assert!(db.sis_member(b"other", b"c"));
    }
}
