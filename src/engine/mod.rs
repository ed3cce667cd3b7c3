//! The storage engine.
//!
//! `KilnDb` coordinates five independent datatype stores. Each store bundles
//! its in-memory index with its segment files under a single `RwLock`, so
//! the write path — rotate if full, append, install into the index — runs
//! entirely under that one lock, and readers of other datatypes are never
//! blocked. A separate mutex guards the persisted write-offset metadata,
//! and a coarse file lock on the directory keeps other processes out.

mod hashes;
mod lists;
mod reclaim;
pub(crate) mod replay;
mod sets;
mod strings;
mod zsets;

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::Config;
use crate::ds::{HashIndex, ListIndex, SetIndex, ZSetIndex};
use crate::error::{Error, Result};
use crate::flock::FileLock;
use crate::index::{Indexer, SkipList};
use crate::storage::entry::{DataType, Entry};
use crate::storage::meta::DbMeta;
use crate::storage::{self, expires, DataFile};

const CFG_FILE: &str = "db.cfg";
const META_FILE: &str = "db.meta";
const EXPIRES_FILE: &str = "db.expires";
const LOCK_FILE: &str = "kiln.lock";

/// Seconds since the Unix epoch.
pub(crate) fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// One datatype's segment files: the active segment taking appends plus the
/// sealed, read-only archive.
pub(crate) struct TypeFiles {
    pub etype: DataType,
    pub active: DataFile,
    pub active_id: u32,
    pub archived: BTreeMap<u32, DataFile>,
}

impl TypeFiles {
    /// Look up a segment by id, active or archived.
    pub fn file_for(&self, id: u32) -> Option<&DataFile> {
        if id == self.active_id {
            Some(&self.active)
        } else {
            self.archived.get(&id)
        }
    }

    /// All segment ids in replay order: archived ascending, active last.
    pub fn replay_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.archived.keys().copied().collect();
        ids.push(self.active_id);
        ids
    }

    fn sync_all(&self) -> Result<()> {
        self.active.sync()?;
        for file in self.archived.values() {
            file.sync()?;
        }
        Ok(())
    }
}

pub(crate) struct StrStore {
    pub files: TypeFiles,
    pub idx: SkipList<Indexer>,
    /// Key deadlines in Unix seconds. Owned by the string store and guarded
    /// by its lock, like the index itself.
    pub expires: HashMap<Vec<u8>, u32>,
}

impl StrStore {
    /// Whether the key carries a deadline that has already passed.
    pub fn is_expired(&self, key: &[u8], now: u32) -> bool {
        self.expires.get(key).is_some_and(|&deadline| deadline <= now)
    }
}

pub(crate) struct ListStore {
    pub files: TypeFiles,
    pub idx: ListIndex,
}

pub(crate) struct HashStore {
    pub files: TypeFiles,
    pub idx: HashIndex,
}

pub(crate) struct SetStore {
    pub files: TypeFiles,
    pub idx: SetIndex,
}

pub(crate) struct ZSetStore {
    pub files: TypeFiles,
    pub idx: ZSetIndex,
}

/// An embeddable multi-datatype key-value store on append-only log segments.
pub struct KilnDb {
    config: Config,
    meta: Mutex<DbMeta>,
    pub(crate) strings: RwLock<StrStore>,
    pub(crate) lists: RwLock<ListStore>,
    pub(crate) hashes: RwLock<HashStore>,
    pub(crate) sets: RwLock<SetStore>,
    pub(crate) zsets: RwLock<ZSetStore>,
    _lock: FileLock,
}

impl KilnDb {
    /// Open a database, creating the directory if needed and rebuilding all
    /// in-memory indexes from the segment logs.
    pub fn open(config: Config) -> Result<KilnDb> {
        fs::create_dir_all(&config.dir_path)?;
        let lock = FileLock::lock(config.dir_path.join(LOCK_FILE))?;

        let directory = storage::build(&config.dir_path, config.rw_method, config.block_size)?;
        let meta = DbMeta::load(&config.dir_path.join(META_FILE));
        let expires = expires::load(&config.dir_path.join(EXPIRES_FILE));

        let [str_arch, list_arch, hash_arch, set_arch, zset_arch] = directory.archived;
        let open_type = |etype: DataType, archived: BTreeMap<u32, DataFile>| -> Result<TypeFiles> {
            let id = directory.active_ids[etype as usize];
            let mut active =
                DataFile::new(&config.dir_path, id, config.rw_method, config.block_size, etype)?;
            active.offset = meta.active_write_off[etype as usize];
            Ok(TypeFiles {
                etype,
                active,
                active_id: id,
                archived,
            })
        };

        let db = KilnDb {
            strings: RwLock::new(StrStore {
                files: open_type(DataType::Str, str_arch)?,
                idx: SkipList::new(),
                expires,
            }),
            lists: RwLock::new(ListStore {
                files: open_type(DataType::List, list_arch)?,
                idx: ListIndex::new(),
            }),
            hashes: RwLock::new(HashStore {
                files: open_type(DataType::Hash, hash_arch)?,
                idx: HashIndex::new(),
            }),
            sets: RwLock::new(SetStore {
                files: open_type(DataType::Set, set_arch)?,
                idx: SetIndex::new(),
            }),
            zsets: RwLock::new(ZSetStore {
                files: open_type(DataType::ZSet, zset_arch)?,
                idx: ZSetIndex::new(),
            }),
            config,
            meta: Mutex::new(meta),
            _lock: lock,
        };

        replay::load_indexes(&db)?;
        tracing::info!(dir = %db.config.dir_path.display(), "database opened");
        Ok(db)
    }

    /// Reopen a database from the config it persisted at close.
    pub fn reopen(dir: &Path) -> Result<KilnDb> {
        let cfg_path = dir.join(CFG_FILE);
        if !cfg_path.exists() {
            return Err(Error::CfgNotFound);
        }
        let bytes = fs::read(&cfg_path)?;
        let config: Config = serde_json::from_slice(&bytes)?;
        Self::open(config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Persist config, metadata and deadlines, then flush every segment.
    pub fn close(&self) -> Result<()> {
        self.save_config()?;
        self.meta
            .lock()
            .unwrap()
            .save(&self.config.dir_path.join(META_FILE))?;

        {
            let store = self.strings.read().unwrap();
            expires::save(&store.expires, &self.config.dir_path.join(EXPIRES_FILE))?;
            store.files.sync_all()?;
        }
        self.lists.read().unwrap().files.sync_all()?;
        self.hashes.read().unwrap().files.sync_all()?;
        self.sets.read().unwrap().files.sync_all()?;
        self.zsets.read().unwrap().files.sync_all()?;

        tracing::info!(dir = %self.config.dir_path.display(), "database closed");
        Ok(())
    }

    fn save_config(&self) -> Result<()> {
        let bytes = serde_json::to_vec(&self.config)?;
        fs::write(self.config.dir_path.join(CFG_FILE), bytes)?;
        Ok(())
    }

    /// Append an entry to the datatype's log, rotating the active segment
    /// first when it would overflow. Callers hold the type's write lock.
    pub(crate) fn store(&self, files: &mut TypeFiles, e: &Entry) -> Result<()> {
        let t = files.etype as usize;
        // A record that cannot fit any segment would be unreadable on
        // replay; refuse it here rather than poison the log.
        if e.size() as u64 > self.config.block_size {
            return Err(Error::ValueTooLarge);
        }
        if files.active.offset + e.size() as u64 > self.config.block_size {
            files.active.sync()?;

            let new_id = files.active_id + 1;
            let new_active = DataFile::new(
                &self.config.dir_path,
                new_id,
                self.config.rw_method,
                self.config.block_size,
                files.etype,
            )?;
            let sealed = std::mem::replace(&mut files.active, new_active);
            files.archived.insert(files.active_id, sealed);
            files.active_id = new_id;
            tracing::debug!(
                suffix = files.etype.suffix(),
                id = new_id,
                "rotated active segment"
            );

            // Persist the reset offset so a crash before the next write
            // still reopens cleanly at the new segment.
            let mut meta = self.meta.lock().unwrap();
            meta.active_write_off[t] = 0;
            meta.save(&self.config.dir_path.join(META_FILE))?;
        }

        files.active.write(e)?;
        self.meta.lock().unwrap().active_write_off[t] = files.active.offset;

        if self.config.sync {
            files.active.sync()?;
        }
        Ok(())
    }

    /// Record the replay-derived end of the active log, which is
    /// authoritative over whatever a stale `db.meta` claimed.
    pub(crate) fn set_active_offset(&self, files: &mut TypeFiles, offset: u64) {
        files.active.offset = offset;
        self.meta.lock().unwrap().active_write_off[files.etype as usize] = offset;
    }

    /// Validate key and value sizes. Runs before any lock is taken.
    pub(crate) fn check_key_value(&self, key: &[u8], values: &[&[u8]]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        if key.len() as u64 > self.config.max_key_size as u64 {
            return Err(Error::KeyTooLarge);
        }
        for value in values {
            if value.len() as u64 > self.config.max_value_size as u64 {
                return Err(Error::ValueTooLarge);
            }
        }
        Ok(())
    }
}

/// Pack two byte strings into one extra payload: `[u32 BE len | first |
/// second]`. The length prefix leaves both parts free to contain any byte,
/// separators included.
pub(crate) fn encode_pair(first: &[u8], second: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + first.len() + second.len());
    buf.extend_from_slice(&(first.len() as u32).to_be_bytes());
    buf.extend_from_slice(first);
    buf.extend_from_slice(second);
    buf
}

/// Split an extra payload packed by [`encode_pair`].
pub(crate) fn decode_pair(extra: &[u8]) -> Option<(&[u8], &[u8])> {
    if extra.len() < 4 {
        return None;
    }
    let len = u32::from_be_bytes(extra[0..4].try_into().ok()?) as usize;
    if extra.len() < 4 + len {
        return None;
    }
    Some((&extra[4..4 + len], &extra[4 + len..]))
}

pub(crate) fn parse_i64(bytes: &[u8]) -> Option<i64> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

pub(crate) fn parse_f64(bytes: &[u8]) -> Option<f64> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}
