//! Index rebuild on open.
//!
//! The log is the source of truth: every segment of every datatype is
//! scanned in ascending id order and its marks are re-executed against the
//! in-memory indexes. The five datatypes replay on independent scoped
//! threads — they touch disjoint stores and segments — and all join before
//! `open` returns.

use std::collections::HashMap;

use crate::config::IdxMode;
use crate::ds::{HashIndex, InsertOption, ListIndex, SetIndex, ZSetIndex};
use crate::errdata;
use crate::error::{Error, Result};
use crate::index::{Indexer, SkipList};
use crate::storage::entry::{
    Entry, HashMark, ListMark, SetMark, StrMark, ZSetMark, ENTRY_HEADER_SIZE,
};
use crate::storage::DataFile;

use super::{decode_pair, parse_f64, parse_i64, unix_now, KilnDb, TypeFiles};

/// Rebuild all five indexes from disk.
pub(crate) fn load_indexes(db: &KilnDb) -> Result<()> {
    std::thread::scope(|s| {
        let tasks = [
            s.spawn(|| db.replay_strings()),
            s.spawn(|| db.replay_lists()),
            s.spawn(|| db.replay_hashes()),
            s.spawn(|| db.replay_sets()),
            s.spawn(|| db.replay_zsets()),
        ];
        for task in tasks {
            task.join().map_err(|_| errdata!("replay task panicked"))??;
        }
        Ok(())
    })
}

/// Scan one segment from offset 0, applying every decoded record.
///
/// A torn or checksum-failing record marks the end of useful data: the
/// segment is truncated at the last good offset and the scan stops, since
/// an append-only tail may legitimately be cut short by a crash. Any other
/// decode failure is real corruption and aborts the open. Returns the end
/// offset of the log.
pub(crate) fn scan_segment(
    file: &mut DataFile,
    block_size: u64,
    mut apply: impl FnMut(Entry, u64),
) -> Result<u64> {
    let mut offset = 0u64;
    while offset + ENTRY_HEADER_SIZE as u64 <= block_size {
        match file.read(offset) {
            Ok(e) => {
                let size = e.size() as u64;
                if !e.key.is_empty() {
                    apply(e, offset);
                }
                offset += size;
            }
            Err(Error::Eof) => break,
            Err(Error::InvalidCrc) => {
                tracing::warn!(
                    path = %file.path().display(),
                    offset,
                    "torn or corrupt record, truncating segment tail"
                );
                file.truncate(offset)?;
                break;
            }
            Err(err) => return Err(err),
        }
    }
    Ok(offset)
}

impl KilnDb {
    /// Replay one datatype's segments in id order, then record the
    /// replay-derived end of the active log.
    fn replay_files(
        &self,
        files: &mut TypeFiles,
        mut apply: impl FnMut(Entry, u32, u64),
    ) -> Result<()> {
        let block_size = self.config.block_size;
        let mut end = 0;
        for id in files.replay_ids() {
            let file = if id == files.active_id {
                &mut files.active
            } else {
                files.archived.get_mut(&id).ok_or_else(|| {
                    errdata!("{} segment {id} listed but not open", files.etype.suffix())
                })?
            };
            end = scan_segment(file, block_size, |e, offset| apply(e, id, offset))?;
        }
        self.set_active_offset(files, end);
        Ok(())
    }

    fn replay_strings(&self) -> Result<()> {
        let mut guard = self.strings.write().unwrap();
        let super::StrStore {
            files,
            idx,
            expires,
        } = &mut *guard;
        let mode = self.config.idx_mode;
        let now = unix_now();
        self.replay_files(files, |e, file_id, offset| {
            build_string_index(idx, expires, mode, now, e, file_id, offset)
        })
    }

    fn replay_lists(&self) -> Result<()> {
        let mut guard = self.lists.write().unwrap();
        let super::ListStore { files, idx } = &mut *guard;
        self.replay_files(files, |e, _, _| build_list_index(idx, e))
    }

    fn replay_hashes(&self) -> Result<()> {
        let mut guard = self.hashes.write().unwrap();
        let super::HashStore { files, idx } = &mut *guard;
        self.replay_files(files, |e, _, _| build_hash_index(idx, e))
    }

    fn replay_sets(&self) -> Result<()> {
        let mut guard = self.sets.write().unwrap();
        let super::SetStore { files, idx } = &mut *guard;
        self.replay_files(files, |e, _, _| build_set_index(idx, e))
    }

    fn replay_zsets(&self) -> Result<()> {
        let mut guard = self.zsets.write().unwrap();
        let super::ZSetStore { files, idx } = &mut *guard;
        self.replay_files(files, |e, _, _| build_zset_index(idx, e))
    }
}

fn build_string_index(
    idx: &mut SkipList<Indexer>,
    expires: &HashMap<Vec<u8>, u32>,
    mode: IdxMode,
    now: u32,
    e: Entry,
    file_id: u32,
    offset: u64,
) {
    // Keys whose deadline already passed are not resurrected.
    if expires.get(&e.key).is_some_and(|&deadline| deadline <= now) {
        return;
    }
    match StrMark::from_u16(e.mark) {
        Some(StrMark::Set) => {
            let indexer = Indexer {
                file_id,
                offset,
                entry_size: e.size(),
                value_size: e.value.len() as u32,
                value: (mode == IdxMode::KeyValueRam).then_some(e.value),
            };
            idx.put(e.key, indexer);
        }
        Some(StrMark::Rem) => {
            idx.remove(&e.key);
        }
        None => tracing::warn!(mark = e.mark, "unknown string mark, skipping record"),
    }
}

pub(crate) fn build_list_index(idx: &mut ListIndex, e: Entry) {
    match ListMark::from_u16(e.mark) {
        Some(ListMark::LPush) => {
            idx.lpush(&e.key, std::slice::from_ref(&e.value));
        }
        Some(ListMark::RPush) => {
            idx.rpush(&e.key, std::slice::from_ref(&e.value));
        }
        Some(ListMark::LPop) => {
            idx.lpop(&e.key);
        }
        Some(ListMark::RPop) => {
            idx.rpop(&e.key);
        }
        Some(ListMark::LRem) => {
            if let Some(count) = parse_i64(&e.extra) {
                idx.lrem(&e.key, &e.value, count);
            }
        }
        Some(ListMark::LInsert) => {
            let parsed = decode_pair(&e.extra).and_then(|(pivot, opt)| {
                let opt = parse_i64(opt)?;
                Some((pivot, InsertOption::from_u8(opt as u8)?))
            });
            if let Some((pivot, option)) = parsed {
                idx.linsert(&e.key, option, pivot, e.value);
            }
        }
        Some(ListMark::LSet) => {
            if let Some(i) = parse_i64(&e.extra) {
                idx.lset(&e.key, i, e.value);
            }
        }
        Some(ListMark::LTrim) => {
            let range = decode_pair(&e.extra)
                .and_then(|(start, end)| Some((parse_i64(start)?, parse_i64(end)?)));
            if let Some((start, end)) = range {
                idx.ltrim(&e.key, start, end);
            }
        }
        None => tracing::warn!(mark = e.mark, "unknown list mark, skipping record"),
    }
}

fn build_hash_index(idx: &mut HashIndex, e: Entry) {
    match HashMark::from_u16(e.mark) {
        Some(HashMark::HSet) => {
            idx.hset(&e.key, &e.extra, e.value);
        }
        Some(HashMark::HDel) => {
            idx.hdel(&e.key, &e.extra);
        }
        None => tracing::warn!(mark = e.mark, "unknown hash mark, skipping record"),
    }
}

pub(crate) fn build_set_index(idx: &mut SetIndex, e: Entry) {
    match SetMark::from_u16(e.mark) {
        Some(SetMark::SAdd) => {
            idx.sadd(&e.key, e.value);
        }
        Some(SetMark::SRem) => {
            idx.srem(&e.key, &e.value);
        }
        Some(SetMark::SMove) => {
            idx.smove(&e.key, &e.extra, &e.value);
        }
        None => tracing::warn!(mark = e.mark, "unknown set mark, skipping record"),
    }
}

pub(crate) fn build_zset_index(idx: &mut ZSetIndex, e: Entry) {
    match ZSetMark::from_u16(e.mark) {
        Some(ZSetMark::ZAdd) => {
            if let Some(score) = parse_f64(&e.extra) {
                idx.zadd(&e.key, score, &e.value);
            }
        }
        Some(ZSetMark::ZRem) => {
            idx.zrem(&e.key, &e.value);
        }
        None => tracing::warn!(mark = e.mark, "unknown zset mark, skipping record"),
    }
}

// Replay behavior is exercised end-to-end by the recovery tests in the
// datatype operation modules.
