//! Segment file storage.
//!
//! Each datatype appends to its own sequence of segment files named
//! `{id:09}.data.{suffix}`. The segment with the highest id is active and
//! takes writes; all lower ids are archived and read-only. A `DataFile`
//! wraps one segment with a pluggable backend: positioned file IO, or a
//! writable memory map sized to the block size.

pub mod entry;
pub mod expires;
pub mod meta;

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use serde::{Deserialize, Serialize};

use crate::errdata;
use crate::error::{Error, Result};
use entry::{DataType, Entry, EntryHeader, CRC32, ENTRY_HEADER_SIZE};

/// Segment IO backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RwMethod {
    /// Positioned `pread`/`pwrite` on a plain file.
    FileIo,
    /// The file is truncated to the block size and mapped read-write.
    Mmap,
}

enum Backend {
    FileIo(File),
    // Field order matters: the map must unmap before the file closes.
    Mmap { map: MmapMut, file: File },
}

/// One segment file of a datatype's log.
pub struct DataFile {
    pub id: u32,
    path: PathBuf,
    backend: Backend,
    /// Next write offset; equals the number of bytes appended so far.
    pub offset: u64,
    block_size: u64,
}

impl DataFile {
    /// Open (creating if absent) the segment with the given id.
    pub fn new(
        dir: &Path,
        id: u32,
        method: RwMethod,
        block_size: u64,
        etype: DataType,
    ) -> Result<DataFile> {
        let path = dir.join(etype.file_name(id));
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;

        let backend = match method {
            RwMethod::FileIo => Backend::FileIo(file),
            RwMethod::Mmap => {
                file.set_len(block_size)?;
                // SAFETY: the map is dropped before the file handle (field
                // order in Backend::Mmap), the file is sized to block_size
                // above, and all access goes through bounds-checked slices.
                // Segments are only shared within this process.
                let map = unsafe { MmapMut::map_mut(&file)? };
                Backend::Mmap { map, file }
            }
        };

        Ok(DataFile {
            id,
            path,
            backend,
            offset: 0,
            block_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and verify the record at the given offset.
    ///
    /// Returns `Error::Eof` when the offset is past the end of the written
    /// region (or points at the zero-filled tail of an mmap segment), and
    /// `Error::InvalidCrc` when the record is torn or fails its checksum.
    pub fn read(&self, offset: u64) -> Result<Entry> {
        let mut head = [0u8; ENTRY_HEADER_SIZE];
        self.read_at(&mut head, offset)?;
        if head.iter().all(|&b| b == 0) {
            // Zero-filled tail of a pre-sized mmap segment.
            return Err(Error::Eof);
        }

        let header = EntryHeader::decode(&head)?;
        if header.entry_size() > self.block_size {
            return Err(errdata!(
                "entry at offset {} of {:?} claims {} bytes, larger than the segment",
                offset,
                self.path,
                header.entry_size()
            ));
        }

        let mut pos = offset + ENTRY_HEADER_SIZE as u64;
        let mut read_part = |len: u32| -> Result<Vec<u8>> {
            let mut buf = vec![0u8; len as usize];
            if len > 0 {
                // A short payload read means the record tail was torn off
                // mid-append; surface it as a checksum failure so replay
                // truncates to the previous good offset.
                self.read_at(&mut buf, pos).map_err(|err| match err {
                    Error::Eof => Error::InvalidCrc,
                    other => other,
                })?;
            }
            pos += len as u64;
            Ok(buf)
        };

        let key = read_part(header.key_size)?;
        let value = read_part(header.value_size)?;
        let extra = read_part(header.extra_size)?;

        let mut digest = CRC32.digest();
        digest.update(&head[4..]);
        digest.update(&key);
        digest.update(&value);
        digest.update(&extra);
        if digest.finalize() != header.crc {
            return Err(Error::InvalidCrc);
        }

        Ok(Entry {
            key,
            value,
            extra,
            etype: header.etype,
            mark: header.mark,
        })
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        match &self.backend {
            Backend::FileIo(file) => file.read_exact_at(buf, offset).map_err(|err| {
                if err.kind() == std::io::ErrorKind::UnexpectedEof {
                    Error::Eof
                } else {
                    Error::Io(err.to_string())
                }
            }),
            Backend::Mmap { map, .. } => {
                let end = offset + buf.len() as u64;
                if end > map.len() as u64 {
                    return Err(Error::Eof);
                }
                buf.copy_from_slice(&map[offset as usize..end as usize]);
                Ok(())
            }
        }
    }

    /// Append the record at the current write offset.
    pub fn write(&mut self, e: &Entry) -> Result<()> {
        let buf = e.encode()?;
        let offset = self.offset;
        match &mut self.backend {
            Backend::FileIo(file) => file.write_all_at(&buf, offset)?,
            Backend::Mmap { map, .. } => {
                let end = offset as usize + buf.len();
                if end > map.len() {
                    return Err(errdata!(
                        "write of {} bytes at offset {} overflows segment {:?}",
                        buf.len(),
                        offset,
                        self.path
                    ));
                }
                map[offset as usize..end].copy_from_slice(&buf);
            }
        }
        self.offset += e.size() as u64;
        Ok(())
    }

    /// Flush the segment to disk.
    pub fn sync(&self) -> Result<()> {
        match &self.backend {
            Backend::FileIo(file) => file.sync_all()?,
            Backend::Mmap { map, file } => {
                map.flush()?;
                file.sync_all()?;
            }
        }
        Ok(())
    }

    /// Cut the segment off at the given offset, discarding a torn tail.
    pub fn truncate(&mut self, offset: u64) -> Result<()> {
        match &mut self.backend {
            Backend::FileIo(file) => file.set_len(offset)?,
            Backend::Mmap { map, .. } => {
                map[offset as usize..].fill(0);
                map.flush()?;
            }
        }
        if self.offset > offset {
            self.offset = offset;
        }
        Ok(())
    }

    /// Optionally flush, then close. Dropping without sync is also fine for
    /// archived read-only segments.
    pub fn close(self, sync: bool) -> Result<()> {
        if sync {
            self.sync()?;
        }
        Ok(())
    }
}

/// Per-type archived segments plus the id of each active segment, as
/// discovered by scanning the data directory.
pub struct Directory {
    pub archived: [BTreeMap<u32, DataFile>; 5],
    pub active_ids: [u32; 5],
}

/// Scan the data directory and route segment files by datatype suffix.
///
/// For every type the ids are sorted ascending; all but the highest are
/// opened as archived segments and the highest becomes the active id
/// (0 when the type has no segments yet).
pub fn build(dir: &Path, method: RwMethod, block_size: u64) -> Result<Directory> {
    let mut ids: [Vec<u32>; 5] = Default::default();
    for item in fs::read_dir(dir)? {
        let name = item?.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.contains(".data.") {
            continue;
        }
        let parts: Vec<&str> = name.split('.').collect();
        if parts.len() != 3 {
            continue;
        }
        let Ok(id) = parts[0].parse::<u32>() else {
            continue;
        };
        if let Some(t) = DataType::ALL.iter().find(|t| t.suffix() == parts[2]) {
            ids[*t as usize].push(id);
        }
    }

    let mut archived: [BTreeMap<u32, DataFile>; 5] = Default::default();
    let mut active_ids = [0u32; 5];
    for etype in DataType::ALL {
        let type_ids = &mut ids[etype as usize];
        type_ids.sort_unstable();
        if let Some((&active, rest)) = type_ids.split_last() {
            active_ids[etype as usize] = active;
            for &id in rest {
                let file = DataFile::new(dir, id, method, block_size, etype)?;
                archived[etype as usize].insert(id, file);
            }
        }
    }

    Ok(Directory {
        archived,
        active_ids,
    })
}
