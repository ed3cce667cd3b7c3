//! String operations and the TTL subsystem.

use crate::config::IdxMode;
use crate::errdata;
use crate::error::{Error, Result};
use crate::index::Indexer;
use crate::storage::entry::{DataType, Entry, StrMark};

use super::{unix_now, KilnDb, StrStore};

impl KilnDb {
    /// Associate `value` with `key`, overwriting any previous value and
    /// clearing any expiration deadline.
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_key_value(key, &[value])?;
        let mut store = self.strings.write().unwrap();
        self.do_set(&mut store, key, value)?;
        store.expires.remove(key);
        Ok(())
    }

    /// Set `key` only when it does not already hold a live value. Returns
    /// whether the value was set.
    pub fn set_nx(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        if self.str_exists(key) {
            return Ok(false);
        }
        self.set(key, value)?;
        Ok(true)
    }

    /// The value stored at `key`.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        let store = self.strings.read().unwrap();
        if !store.idx.contains(key) {
            return Err(Error::KeyNotFound);
        }
        if store.is_expired(key, unix_now()) {
            drop(store);
            self.remove_expired(key);
            return Err(Error::KeyExpired);
        }
        self.value_of(&store, key)
    }

    /// Set `key` to `value` and return the value it held before.
    pub fn get_set(&self, key: &[u8], value: &[u8]) -> Result<Vec<u8>> {
        let old = self.get(key)?;
        self.set(key, value)?;
        Ok(old)
    }

    /// Append `value` to the existing value, or set it when absent. An
    /// existing deadline is kept.
    pub fn append(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_key_value(key, &[value])?;
        let mut store = self.strings.write().unwrap();
        if store.is_expired(key, unix_now()) {
            drop(store);
            self.remove_expired(key);
            return Err(Error::KeyExpired);
        }

        let existing = if store.idx.contains(key) {
            Some(self.value_of(&store, key)?)
        } else {
            None
        };
        let had_value = existing.is_some();
        let mut combined = existing.unwrap_or_default();
        combined.extend_from_slice(value);
        if combined.len() as u64 > self.config.max_value_size as u64 {
            return Err(Error::ValueTooLarge);
        }

        self.do_set(&mut store, key, &combined)?;
        if !had_value {
            store.expires.remove(key);
        }
        Ok(())
    }

    /// Length of the value stored at `key`, or 0 when absent or expired.
    pub fn str_len(&self, key: &[u8]) -> usize {
        if self.check_key_value(key, &[]).is_err() {
            return 0;
        }
        let store = self.strings.read().unwrap();
        let Some(size) = store.idx.get(key).map(|idx| idx.value_size as usize) else {
            return 0;
        };
        if store.is_expired(key, unix_now()) {
            drop(store);
            self.remove_expired(key);
            return 0;
        }
        size
    }

    /// Whether `key` holds a live value.
    pub fn str_exists(&self, key: &[u8]) -> bool {
        if self.check_key_value(key, &[]).is_err() {
            return false;
        }
        let store = self.strings.read().unwrap();
        if !store.idx.contains(key) {
            return false;
        }
        if store.is_expired(key, unix_now()) {
            drop(store);
            self.remove_expired(key);
            return false;
        }
        true
    }

    /// Remove `key` and its value, appending a tombstone.
    pub fn str_rem(&self, key: &[u8]) -> Result<()> {
        self.check_key_value(key, &[])?;
        let mut store = self.strings.write().unwrap();
        if store.idx.contains(key) {
            let e = Entry::no_extra(key.to_vec(), Vec::new(), DataType::Str, StrMark::Rem as u16);
            self.store(&mut store.files, &e)?;
            store.idx.remove(key);
            store.expires.remove(key);
        }
        Ok(())
    }

    /// Values of keys starting with `prefix`, in ascending key order.
    /// `offset` skips that many matching keys first; `limit < 0` means
    /// unlimited and `limit == 0` returns nothing.
    pub fn prefix_scan(&self, prefix: &[u8], limit: i64, offset: i64) -> Result<Vec<Vec<u8>>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.check_key_value(prefix, &[])?;

        let mut skip = offset.max(0);
        let mut remaining = limit;
        let now = unix_now();
        let mut values = Vec::new();
        let mut expired = Vec::new();

        let store = self.strings.read().unwrap();
        for (key, idx) in store.idx.iter_from(prefix) {
            if !key.starts_with(prefix) {
                break;
            }
            if skip > 0 {
                skip -= 1;
                continue;
            }
            if store.is_expired(key, now) {
                expired.push(key.to_vec());
                continue;
            }
            values.push(self.indexer_value(&store, idx)?);
            if remaining > 0 {
                remaining -= 1;
                if remaining == 0 {
                    break;
                }
            }
        }
        drop(store);

        for key in expired {
            self.remove_expired(&key);
        }
        Ok(values)
    }

    /// Values of keys between `start` and `end`, both inclusive. Fails with
    /// `KeyNotFound` when `start` itself is absent.
    pub fn range_scan(&self, start: &[u8], end: &[u8]) -> Result<Vec<Vec<u8>>> {
        let store = self.strings.read().unwrap();
        if !store.idx.contains(start) {
            return Err(Error::KeyNotFound);
        }

        let now = unix_now();
        let mut values = Vec::new();
        let mut expired = Vec::new();
        for (key, idx) in store.idx.iter_from(start) {
            if key > end {
                break;
            }
            if store.is_expired(key, now) {
                expired.push(key.to_vec());
                continue;
            }
            values.push(self.indexer_value(&store, idx)?);
        }
        drop(store);

        for key in expired {
            self.remove_expired(&key);
        }
        Ok(values)
    }

    /// Give `key` a deadline `seconds` from now.
    pub fn expire(&self, key: &[u8], seconds: u32) -> Result<()> {
        if !self.str_exists(key) {
            return Err(Error::KeyNotFound);
        }
        if seconds == 0 {
            return Err(Error::InvalidTtl);
        }
        let mut store = self.strings.write().unwrap();
        store.expires.insert(key.to_vec(), unix_now() + seconds);
        Ok(())
    }

    /// Clear any deadline on `key`.
    pub fn persist(&self, key: &[u8]) {
        let mut store = self.strings.write().unwrap();
        store.expires.remove(key);
    }

    /// Seconds until `key` expires; 0 when it has no deadline, does not
    /// exist, or just expired.
    pub fn ttl(&self, key: &[u8]) -> u32 {
        let store = self.strings.read().unwrap();
        let Some(&deadline) = store.expires.get(key) else {
            return 0;
        };
        let now = unix_now();
        if deadline <= now {
            drop(store);
            self.remove_expired(key);
            return 0;
        }
        deadline - now
    }

    /// Append a Set record and install its indexer. In key-value RAM mode
    /// a write equal to the live value appends nothing.
    fn do_set(&self, store: &mut StrStore, key: &[u8], value: &[u8]) -> Result<()> {
        if self.config.idx_mode == IdxMode::KeyValueRam && !store.is_expired(key, unix_now()) {
            if let Some(idx) = store.idx.get(key) {
                if idx.value.as_deref() == Some(value) {
                    return Ok(());
                }
            }
        }

        let e = Entry::no_extra(key.to_vec(), value.to_vec(), DataType::Str, StrMark::Set as u16);
        self.store(&mut store.files, &e)?;

        let indexer = Indexer {
            file_id: store.files.active_id,
            offset: store.files.active.offset - e.size() as u64,
            entry_size: e.size(),
            value_size: value.len() as u32,
            value: (self.config.idx_mode == IdxMode::KeyValueRam).then(|| value.to_vec()),
        };
        store.idx.put(key.to_vec(), indexer);
        Ok(())
    }

    /// Resolve a key's value under the store guard, per index mode.
    fn value_of(&self, store: &StrStore, key: &[u8]) -> Result<Vec<u8>> {
        let idx = store.idx.get(key).ok_or(Error::KeyNotFound)?;
        self.indexer_value(store, idx)
    }

    /// The value an indexer refers to: cached in key-value RAM mode, read
    /// from the referenced segment otherwise.
    fn indexer_value(&self, store: &StrStore, idx: &Indexer) -> Result<Vec<u8>> {
        match &idx.value {
            Some(value) => Ok(value.clone()),
            None => {
                let file = store
                    .files
                    .file_for(idx.file_id)
                    .ok_or_else(|| errdata!("string segment {} not open", idx.file_id))?;
                let e = file.read(idx.offset)?;
                Ok(e.value)
            }
        }
    }

    /// Drop an expired key: delete its deadline and index entry and append
    /// a removal tombstone. Called from read paths after they observe an
    /// expired deadline, so it re-checks under the write lock.
    pub(crate) fn remove_expired(&self, key: &[u8]) {
        let mut store = self.strings.write().unwrap();
        if !store.is_expired(key, unix_now()) {
            return;
        }
        store.expires.remove(key);
        if store.idx.remove(key).is_some() {
            let e = Entry::no_extra(key.to_vec(), Vec::new(), DataType::Str, StrMark::Rem as u16);
            if let Err(err) = self.store(&mut store.files, &e) {
                tracing::warn!(
                    key = %String::from_utf8_lossy(key),
                    "failed to append expiration tombstone: {err}"
                );
            }
        }
    }
}
