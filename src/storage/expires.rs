//! The persisted expiration table.
//!
//! Deadlines are kept in memory next to the string index and written to
//! `db.expires` at close as a flat stream of records:
//!
//! ```text
//! +--------------+---------------+----------------+
//! | key_size:u32 | deadline: u64 | key (key_size) |
//! +--------------+---------------+----------------+
//! ```
//!
//! Deadlines are Unix seconds. Loading tolerates a torn tail: whatever
//! decoded cleanly before it is kept.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::Result;

const EXPIRE_HEAD_SIZE: u64 = 12;

/// Write the deadline table to the given path, replacing any previous file.
pub fn save(table: &HashMap<Vec<u8>, u32>, path: &Path) -> Result<()> {
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);
    for (key, &deadline) in table {
        w.write_u32::<BigEndian>(key.len() as u32)?;
        w.write_u64::<BigEndian>(deadline as u64)?;
        w.write_all(key)?;
    }
    w.flush()?;
    Ok(())
}

/// Load the deadline table. A missing file yields an empty table; a torn
/// record ends the load with whatever was read so far.
pub fn load(path: &Path) -> HashMap<Vec<u8>, u32> {
    let mut table = HashMap::new();
    let file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return table,
    };

    let mut r = BufReader::new(file);
    loop {
        let key_size = match r.read_u32::<BigEndian>() {
            Ok(n) => n,
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(err) => {
                tracing::warn!("failed to load expiration record: {err}");
                break;
            }
        };
        let record = (|| -> std::io::Result<(Vec<u8>, u64)> {
            let deadline = r.read_u64::<BigEndian>()?;
            let mut key = vec![0u8; key_size as usize];
            r.read_exact(&mut key)?;
            Ok((key, deadline))
        })();
        match record {
            Ok((key, deadline)) => {
                table.insert(key, deadline as u32);
            }
            Err(err) => {
                tracing::warn!("truncated expiration record, stopping load: {err}");
                break;
            }
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("db.expires");

        let mut table = HashMap::new();
        table.insert(b"short".to_vec(), 100u32);
        table.insert(b"a much longer key with spaces".to_vec(), 4_000_000_000u32);

        save(&table, &path).expect("save");
        let loaded = load(&path);
        assert_eq!(loaded, table);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().expect("temp dir");
        assert!(load(&dir.path().join("db.expires")).is_empty());
    }

    #[test]
    fn test_load_torn_tail() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("db.expires");

        let mut table = HashMap::new();
        table.insert(b"kept".to_vec(), 42u32);
        save(&table, &path).expect("save");

        // Append half a record.
        let mut raw = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .expect("reopen");
        raw.write_all(&[0, 0, 0, 9, 0, 0]).expect("append garbage");

        let loaded = load(&path);
        assert_eq!(loaded.get(b"kept".as_slice()), Some(&42));
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn test_record_layout() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("db.expires");

        let mut table = HashMap::new();
        table.insert(b"k".to_vec(), 7u32);
        save(&table, &path).expect("save");

        let bytes = std::fs::read(&path).expect("read back");
        assert_eq!(bytes.len() as u64, EXPIRE_HEAD_SIZE + 1);
        assert_eq!(&bytes[0..4], &[0, 0, 0, 1]); // key_size
        assert_eq!(&bytes[4..12], &[0, 0, 0, 0, 0, 0, 0, 7]); // deadline
        assert_eq!(&bytes[12..], b"k");
    }
}
