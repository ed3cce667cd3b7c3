//! The on-disk record codec.
//!
//! Every mutation is persisted as one `Entry`, the unit of append, replay
//! and checksumming. Records are laid out as:
//!
//! ```text
//! +-------+----------+------------+------------+---------+---------+
//! | crc32 | key_size | value_size | extra_size | type    | mark    |
//! | 4     | 4        | 4          | 4          | 2       | 2       |
//! +-------+----------+------------+------------+---------+---------+
//! | key (key_size) | value (value_size) | extra (extra_size)       |
//! +----------------+--------------------+--------------------------+
//! ```
//!
//! All fixed-width fields are big-endian. The CRC32 (IEEE) covers every
//! byte after the checksum itself: sizes, type, mark, key, value and extra,
//! so a flipped bit anywhere in the record fails verification.

use std::io::Cursor;

use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use crc::{Crc, CRC_32_ISO_HDLC};

use crate::error::{Error, Result};

/// Fixed record header size in bytes.
pub const ENTRY_HEADER_SIZE: usize = 20;

/// IEEE CRC32, matching `crc32`'s default polynomial.
pub const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// The five persisted value datatypes. Each one owns its own segment
/// sequence and in-memory index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum DataType {
    Str = 0,
    List = 1,
    Hash = 2,
    Set = 3,
    ZSet = 4,
}

impl DataType {
    /// All datatypes in ascending discriminant order.
    pub const ALL: [DataType; 5] = [
        DataType::Str,
        DataType::List,
        DataType::Hash,
        DataType::Set,
        DataType::ZSet,
    ];

    pub fn from_u16(v: u16) -> Option<DataType> {
        match v {
            0 => Some(DataType::Str),
            1 => Some(DataType::List),
            2 => Some(DataType::Hash),
            3 => Some(DataType::Set),
            4 => Some(DataType::ZSet),
            _ => None,
        }
    }

    /// Segment file name suffix for this datatype.
    pub fn suffix(self) -> &'static str {
        match self {
            DataType::Str => "str",
            DataType::List => "list",
            DataType::Hash => "hash",
            DataType::Set => "set",
            DataType::ZSet => "zset",
        }
    }

    /// Segment file name for the given id, e.g. `000000012.data.str`.
    pub fn file_name(self, id: u32) -> String {
        format!("{:09}.data.{}", id, self.suffix())
    }
}

/// String operation marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum StrMark {
    Set = 0,
    Rem = 1,
}

impl StrMark {
    pub fn from_u16(v: u16) -> Option<StrMark> {
        match v {
            0 => Some(StrMark::Set),
            1 => Some(StrMark::Rem),
            _ => None,
        }
    }
}

/// List operation marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ListMark {
    LPush = 0,
    RPush = 1,
    LPop = 2,
    RPop = 3,
    LRem = 4,
    LInsert = 5,
    LSet = 6,
    LTrim = 7,
}

impl ListMark {
    pub fn from_u16(v: u16) -> Option<ListMark> {
        match v {
            0 => Some(ListMark::LPush),
            1 => Some(ListMark::RPush),
            2 => Some(ListMark::LPop),
            3 => Some(ListMark::RPop),
            4 => Some(ListMark::LRem),
            5 => Some(ListMark::LInsert),
            6 => Some(ListMark::LSet),
            7 => Some(ListMark::LTrim),
            _ => None,
        }
    }
}

/// Hash operation marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum HashMark {
    HSet = 0,
    HDel = 1,
}

impl HashMark {
    pub fn from_u16(v: u16) -> Option<HashMark> {
        match v {
            0 => Some(HashMark::HSet),
            1 => Some(HashMark::HDel),
            _ => None,
        }
    }
}

/// Set operation marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SetMark {
    SAdd = 0,
    SRem = 1,
    SMove = 2,
}

impl SetMark {
    pub fn from_u16(v: u16) -> Option<SetMark> {
        match v {
            0 => Some(SetMark::SAdd),
            1 => Some(SetMark::SRem),
            2 => Some(SetMark::SMove),
            _ => None,
        }
    }
}

/// Sorted-set operation marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ZSetMark {
    ZAdd = 0,
    ZRem = 1,
}

impl ZSetMark {
    pub fn from_u16(v: u16) -> Option<ZSetMark> {
        match v {
            0 => Some(ZSetMark::ZAdd),
            1 => Some(ZSetMark::ZRem),
            _ => None,
        }
    }
}

/// One record in a segment log.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub extra: Vec<u8>,
    pub etype: DataType,
    pub mark: u16,
}

impl Entry {
    pub fn new(key: Vec<u8>, value: Vec<u8>, extra: Vec<u8>, etype: DataType, mark: u16) -> Entry {
        Entry {
            key,
            value,
            extra,
            etype,
            mark,
        }
    }

    pub fn no_extra(key: Vec<u8>, value: Vec<u8>, etype: DataType, mark: u16) -> Entry {
        Entry::new(key, value, Vec::new(), etype, mark)
    }

    /// Encoded record size in bytes.
    pub fn size(&self) -> u32 {
        ENTRY_HEADER_SIZE as u32
            + self.key.len() as u32
            + self.value.len() as u32
            + self.extra.len() as u32
    }

    /// Encode the record, checksum included.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.key.is_empty() {
            return Err(Error::EmptyEntry);
        }

        let mut buf = Vec::with_capacity(self.size() as usize);
        buf.write_u32::<BigEndian>(0)?; // crc placeholder
        buf.write_u32::<BigEndian>(self.key.len() as u32)?;
        buf.write_u32::<BigEndian>(self.value.len() as u32)?;
        buf.write_u32::<BigEndian>(self.extra.len() as u32)?;
        buf.write_u16::<BigEndian>(self.etype as u16)?;
        buf.write_u16::<BigEndian>(self.mark)?;
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);
        buf.extend_from_slice(&self.extra);

        let crc = CRC32.checksum(&buf[4..]);
        BigEndian::write_u32(&mut buf[0..4], crc);
        Ok(buf)
    }
}

/// The decoded fixed header of a record, before its payloads are read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntryHeader {
    pub crc: u32,
    pub key_size: u32,
    pub value_size: u32,
    pub extra_size: u32,
    pub etype: DataType,
    pub mark: u16,
}

impl EntryHeader {
    pub fn decode(buf: &[u8]) -> Result<EntryHeader> {
        if buf.len() < ENTRY_HEADER_SIZE {
            return Err(Error::InvalidEntry);
        }
        let mut r = Cursor::new(buf);
        let crc = r.read_u32::<BigEndian>()?;
        let key_size = r.read_u32::<BigEndian>()?;
        let value_size = r.read_u32::<BigEndian>()?;
        let extra_size = r.read_u32::<BigEndian>()?;
        let etype = DataType::from_u16(r.read_u16::<BigEndian>()?).ok_or(Error::InvalidEntry)?;
        let mark = r.read_u16::<BigEndian>()?;
        Ok(EntryHeader {
            crc,
            key_size,
            value_size,
            extra_size,
            etype,
            mark,
        })
    }

    /// Total record size this header describes.
    pub fn entry_size(&self) -> u64 {
        ENTRY_HEADER_SIZE as u64
            + self.key_size as u64
            + self.value_size as u64
            + self.extra_size as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_round_trip() {
        let e = Entry::new(
            b"language".to_vec(),
            b"rust".to_vec(),
            b"side".to_vec(),
            DataType::Hash,
            HashMark::HSet as u16,
        );

        let buf = e.encode().expect("encode");
        assert_eq!(buf.len() as u32, e.size());

        let header = EntryHeader::decode(&buf).expect("decode header");
        assert_eq!(header.key_size, 8);
        assert_eq!(header.value_size, 4);
        assert_eq!(header.extra_size, 4);
        assert_eq!(header.etype, DataType::Hash);
        assert_eq!(header.mark, HashMark::HSet as u16);
        assert_eq!(header.entry_size(), buf.len() as u64);

        // The stored checksum matches a recomputation over everything
        // after the crc field.
        assert_eq!(header.crc, CRC32.checksum(&buf[4..]));
    }

    #[test]
    fn test_encode_empty_key() {
        let e = Entry::no_extra(Vec::new(), b"v".to_vec(), DataType::Str, StrMark::Set as u16);
        assert_eq!(e.encode(), Err(Error::EmptyEntry));
    }

    #[test]
    fn test_decode_short_buffer() {
        let buf = vec![0u8; ENTRY_HEADER_SIZE - 1];
        assert_eq!(EntryHeader::decode(&buf), Err(Error::InvalidEntry));
    }

    #[test]
    fn test_decode_unknown_type() {
        let e = Entry::no_extra(b"k".to_vec(), b"v".to_vec(), DataType::Str, 0);
        let mut buf = e.encode().expect("encode");
        // Corrupt the type field.
        buf[16] = 0xff;
        buf[17] = 0xff;
        assert_eq!(EntryHeader::decode(&buf), Err(Error::InvalidEntry));
    }

    #[test]
    fn test_crc_covers_key_bytes() {
        let e = Entry::no_extra(b"key".to_vec(), b"value".to_vec(), DataType::Str, 0);
        let mut buf = e.encode().expect("encode");
        let header = EntryHeader::decode(&buf).expect("decode");
        // Flip a key byte: the checksum must no longer match.
        buf[ENTRY_HEADER_SIZE] ^= 0x01;
        assert_ne!(header.crc, CRC32.checksum(&buf[4..]));
    }

    #[test]
    fn test_file_names() {
        assert_eq!(DataType::Str.file_name(0), "000000000.data.str");
        assert_eq!(DataType::ZSet.file_name(42), "000000042.data.zset");
    }
}
