//! The reclaim hook: rewrite archived segments, dropping records that no
//! longer contribute to the live state, and renumber them from 0.
//!
//! String and hash records can be judged individually (the index tells us
//! whether a record is still the newest for its key/field), so those types
//! keep only records that pass that check. Structural types (list, set,
//! zset) cannot be judged record-by-record without replaying, so their
//! archived prefix is condensed into a canonical snapshot — one push/add
//! record per live element of the archived-only state — which replays to
//! exactly the same point before the untouched active segment applies.
//!
//! The active segment is never rewritten, and the whole pass runs with all
//! five write locks held.

use std::fs;
use std::path::{Path, PathBuf};

use crate::ds::{ListIndex, SetIndex, ZSetIndex};
use crate::error::{Error, Result};
use crate::storage::entry::{
    DataType, Entry, HashMark, ListMark, SetMark, StrMark, ZSetMark,
};
use crate::storage::{DataFile, RwMethod};

use super::replay::{
    build_list_index, build_set_index, build_zset_index, scan_segment,
};
use super::{unix_now, HashStore, KilnDb, ListStore, SetStore, StrStore, TypeFiles, ZSetStore};

const RECLAIM_DIR: &str = "kiln_reclaim";

/// Appends records across a fresh, rotating sequence of segments numbered
/// from 0, staged in a scratch directory until installed.
struct SegmentWriter {
    tmp: PathBuf,
    etype: DataType,
    method: RwMethod,
    block_size: u64,
    files: Vec<DataFile>,
}

impl SegmentWriter {
    fn new(tmp: &Path, etype: DataType, method: RwMethod, block_size: u64) -> SegmentWriter {
        SegmentWriter {
            tmp: tmp.to_path_buf(),
            etype,
            method,
            block_size,
            files: Vec::new(),
        }
    }

    /// Append one record, rotating when the current segment would overflow.
    /// Returns the record's new location.
    fn append(&mut self, e: &Entry) -> Result<(u32, u64)> {
        let size = e.size() as u64;
        let rotate = match self.files.last() {
            Some(file) => file.offset + size > self.block_size,
            None => true,
        };
        if rotate {
            let id = self.files.len() as u32;
            self.files.push(DataFile::new(
                &self.tmp,
                id,
                self.method,
                self.block_size,
                self.etype,
            )?);
        }
        let file = self.files.last_mut().expect("writer has a segment");
        let offset = file.offset;
        file.write(e)?;
        Ok((file.id, offset))
    }
}

impl KilnDb {
    /// Compact every datatype's archived segments. Fails with
    /// `ReclaimUnreached` until some datatype has accumulated at least
    /// `reclaim_threshold` archived segments.
    pub fn reclaim(&self) -> Result<()> {
        let mut strings = self.strings.write().unwrap();
        let mut lists = self.lists.write().unwrap();
        let mut hashes = self.hashes.write().unwrap();
        let mut sets = self.sets.write().unwrap();
        let mut zsets = self.zsets.write().unwrap();

        let deepest = [
            strings.files.archived.len(),
            lists.files.archived.len(),
            hashes.files.archived.len(),
            sets.files.archived.len(),
            zsets.files.archived.len(),
        ]
        .into_iter()
        .max()
        .unwrap_or(0);
        if deepest < self.config.reclaim_threshold {
            return Err(Error::ReclaimUnreached);
        }

        let tmp = self.config.dir_path.join(RECLAIM_DIR);
        if tmp.exists() {
            fs::remove_dir_all(&tmp)?;
        }
        fs::create_dir_all(&tmp)?;

        self.reclaim_strings(&mut strings, &tmp)?;
        self.reclaim_hashes(&mut hashes, &tmp)?;
        self.reclaim_lists(&mut lists, &tmp)?;
        self.reclaim_sets(&mut sets, &tmp)?;
        self.reclaim_zsets(&mut zsets, &tmp)?;

        let _ = fs::remove_dir_all(&tmp);
        tracing::info!("reclaim finished");
        Ok(())
    }

    /// Keep only Set records the index still points at, then repoint the
    /// index at the rewritten locations.
    fn reclaim_strings(&self, store: &mut StrStore, tmp: &Path) -> Result<()> {
        let StrStore {
            files,
            idx,
            expires,
        } = store;
        if files.archived.is_empty() {
            return Ok(());
        }

        let now = unix_now();
        let mut survivors: Vec<Entry> = Vec::new();
        for (&id, file) in files.archived.iter_mut() {
            scan_segment(file, self.config.block_size, |e, offset| {
                if StrMark::from_u16(e.mark) != Some(StrMark::Set) {
                    return;
                }
                if expires.get(&e.key).is_some_and(|&deadline| deadline <= now) {
                    return;
                }
                let current = idx
                    .get(&e.key)
                    .is_some_and(|ix| ix.file_id == id && ix.offset == offset);
                if current {
                    survivors.push(e);
                }
            })?;
        }

        let mut writer = self.segment_writer(tmp, DataType::Str);
        for e in &survivors {
            let (file_id, offset) = writer.append(e)?;
            if let Some(ix) = idx.get_mut(&e.key) {
                ix.file_id = file_id;
                ix.offset = offset;
                ix.entry_size = e.size();
            }
        }
        self.install_archived(files, writer)
    }

    /// Keep only HSet records whose value is still the field's live value.
    fn reclaim_hashes(&self, store: &mut HashStore, tmp: &Path) -> Result<()> {
        let HashStore { files, idx } = store;
        if files.archived.is_empty() {
            return Ok(());
        }

        let mut survivors: Vec<Entry> = Vec::new();
        for file in files.archived.values_mut() {
            scan_segment(file, self.config.block_size, |e, _| {
                if HashMark::from_u16(e.mark) == Some(HashMark::HSet)
                    && idx.hget(&e.key, &e.extra) == Some(e.value.as_slice())
                {
                    survivors.push(e);
                }
            })?;
        }

        let mut writer = self.segment_writer(tmp, DataType::Hash);
        for e in &survivors {
            writer.append(e)?;
        }
        self.install_archived(files, writer)
    }

    /// Snapshot the archived-only list state as canonical tail pushes.
    fn reclaim_lists(&self, store: &mut ListStore, tmp: &Path) -> Result<()> {
        let ListStore { files, .. } = store;
        if files.archived.is_empty() {
            return Ok(());
        }

        let mut scratch = ListIndex::new();
        for file in files.archived.values_mut() {
            scan_segment(file, self.config.block_size, |e, _| {
                build_list_index(&mut scratch, e)
            })?;
        }

        let mut writer = self.segment_writer(tmp, DataType::List);
        for key in scratch.keys() {
            for value in scratch.lrange(&key, 0, -1) {
                writer.append(&Entry::no_extra(
                    key.clone(),
                    value,
                    DataType::List,
                    ListMark::RPush as u16,
                ))?;
            }
        }
        self.install_archived(files, writer)
    }

    /// Snapshot the archived-only set state as canonical adds.
    fn reclaim_sets(&self, store: &mut SetStore, tmp: &Path) -> Result<()> {
        let SetStore { files, .. } = store;
        if files.archived.is_empty() {
            return Ok(());
        }

        let mut scratch = SetIndex::new();
        for file in files.archived.values_mut() {
            scan_segment(file, self.config.block_size, |e, _| {
                build_set_index(&mut scratch, e)
            })?;
        }

        let mut writer = self.segment_writer(tmp, DataType::Set);
        for key in scratch.keys() {
            for member in scratch.smembers(&key) {
                writer.append(&Entry::no_extra(
                    key.clone(),
                    member,
                    DataType::Set,
                    SetMark::SAdd as u16,
                ))?;
            }
        }
        self.install_archived(files, writer)
    }

    /// Snapshot the archived-only sorted-set state as canonical adds.
    fn reclaim_zsets(&self, store: &mut ZSetStore, tmp: &Path) -> Result<()> {
        let ZSetStore { files, .. } = store;
        if files.archived.is_empty() {
            return Ok(());
        }

        let mut scratch = ZSetIndex::new();
        for file in files.archived.values_mut() {
            scan_segment(file, self.config.block_size, |e, _| {
                build_zset_index(&mut scratch, e)
            })?;
        }

        let mut writer = self.segment_writer(tmp, DataType::ZSet);
        for key in scratch.keys() {
            for (member, score) in scratch.zrange(&key, 0, -1) {
                writer.append(&Entry::new(
                    key.clone(),
                    member,
                    score.to_string().into_bytes(),
                    DataType::ZSet,
                    ZSetMark::ZAdd as u16,
                ))?;
            }
        }
        self.install_archived(files, writer)
    }

    fn segment_writer(&self, tmp: &Path, etype: DataType) -> SegmentWriter {
        SegmentWriter::new(tmp, etype, self.config.rw_method, self.config.block_size)
    }

    /// Swap a type's archived segments for the writer's fresh ones: flush
    /// the fresh files, delete every old sealed segment, move the fresh
    /// ones into the data directory and reopen them.
    fn install_archived(&self, files: &mut TypeFiles, writer: SegmentWriter) -> Result<()> {
        let mut fresh_ids = Vec::with_capacity(writer.files.len());
        for file in &writer.files {
            file.sync()?;
            fresh_ids.push(file.id);
        }
        let tmp = writer.tmp.clone();
        let etype = writer.etype;
        drop(writer); // release handles (and unmap) before the moves

        let old_paths: Vec<PathBuf> = files
            .archived
            .values()
            .map(|f| f.path().to_path_buf())
            .collect();
        files.archived.clear();
        for path in old_paths {
            fs::remove_file(&path)?;
        }

        for id in fresh_ids {
            let name = etype.file_name(id);
            fs::rename(tmp.join(&name), self.config.dir_path.join(&name))?;
            let file = DataFile::new(
                &self.config.dir_path,
                id,
                self.config.rw_method,
                self.config.block_size,
                etype,
            )?;
            files.archived.insert(id, file);
        }
        Ok(())
    }
}
