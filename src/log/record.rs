use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc::{Crc, CRC_32_ISO_HDLC};

use crate::errdata;
use crate::error::Result;

/// Fixed record header size in bytes: crc32(4), timestamp(8), tx_id(8),
/// key_size(4), value_size(4), flag(2), ttl(4), bucket_size(4), ds(2),
/// status(2).
pub const HEADER_SIZE: usize = 42;

/// IEEE CRC-32, computed over everything after the crc32 field itself.
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Record not yet finalized; recovery discards its group unless a committed
/// trailer follows.
pub const STATUS_UNCOMMITTED: u16 = 0;
/// Final record of a transaction group; its presence commits the group.
pub const STATUS_COMMITTED: u16 = 1;

/// Operation tag carried by every record. The set is closed and stable;
/// records with tags outside it are skipped during replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Flag {
    Put = 0,
    Delete = 1,
    ListRPush = 2,
    ListLPush = 3,
    ListLPop = 4,
    ListRPop = 5,
    ListLRem = 6,
    ListLSet = 7,
    ListLTrim = 8,
    SetAdd = 16,
    SetRem = 17,
    SetPop = 18,
    SetMove = 19,
    ZAdd = 32,
    ZRem = 33,
    ZPopMin = 34,
    ZPopMax = 35,
    ZRemRangeByRank = 36,
}

impl Flag {
    pub fn from_u16(raw: u16) -> Option<Flag> {
        let flag = match raw {
            0 => Flag::Put,
            1 => Flag::Delete,
            2 => Flag::ListRPush,
            3 => Flag::ListLPush,
            4 => Flag::ListLPop,
            5 => Flag::ListRPop,
            6 => Flag::ListLRem,
            7 => Flag::ListLSet,
            8 => Flag::ListLTrim,
            16 => Flag::SetAdd,
            17 => Flag::SetRem,
            18 => Flag::SetPop,
            19 => Flag::SetMove,
            32 => Flag::ZAdd,
            33 => Flag::ZRem,
            34 => Flag::ZPopMin,
            35 => Flag::ZPopMax,
            36 => Flag::ZRemRangeByRank,
            _ => return None,
        };
        Some(flag)
    }
}

/// Which logical data structure a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum DataKind {
    Kv = 0,
    List = 1,
    Set = 2,
    ZSet = 3,
}

impl DataKind {
    pub fn from_u16(raw: u16) -> Option<DataKind> {
        match raw {
            0 => Some(DataKind::Kv),
            1 => Some(DataKind::List),
            2 => Some(DataKind::Set),
            3 => Some(DataKind::ZSet),
            _ => None,
        }
    }
}

/// The on-disk position of a record: segment id, byte offset, total length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub segment_id: u64,
    pub offset: u64,
    pub length: u32,
}

/// A single log record, the only persisted unit. Body layout on disk is
/// `bucket || key || value` after the fixed header.
///
/// `flag` and `ds` are kept raw so that a structurally valid record with an
/// unknown tag still decodes; replay decides whether to skip it.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub timestamp: u64,
    pub tx_id: u64,
    pub flag: u16,
    pub ttl: u32,
    pub ds: u16,
    pub status: u16,
    pub bucket: Vec<u8>,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Record {
    /// Total serialized length, header included.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.bucket.len() + self.key.len() + self.value.len()
    }

    /// Serializes the record, computing the checksum over everything after
    /// the crc32 field.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.write_u32::<LittleEndian>(0).unwrap(); // crc placeholder
        buf.write_u64::<LittleEndian>(self.timestamp).unwrap();
        buf.write_u64::<LittleEndian>(self.tx_id).unwrap();
        buf.write_u32::<LittleEndian>(self.key.len() as u32).unwrap();
        buf.write_u32::<LittleEndian>(self.value.len() as u32)
            .unwrap();
        buf.write_u16::<LittleEndian>(self.flag).unwrap();
        buf.write_u32::<LittleEndian>(self.ttl).unwrap();
        buf.write_u32::<LittleEndian>(self.bucket.len() as u32)
            .unwrap();
        buf.write_u16::<LittleEndian>(self.ds).unwrap();
        buf.write_u16::<LittleEndian>(self.status).unwrap();
        buf.extend_from_slice(&self.bucket);
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);

        let crc = CRC32.checksum(&buf[4..]);
        buf[0..4].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes one record from the front of `buf`.
    ///
    /// Any failure (short header, declared sizes past the end of the
    /// buffer, checksum mismatch) returns `Corrupted`. Callers scanning a
    /// segment treat that as the end of readable data (crash-tail
    /// semantics).
    pub fn decode(buf: &[u8]) -> Result<Record> {
        if buf.len() < HEADER_SIZE {
            return Err(errdata!(
                "truncated header: {} of {} bytes",
                buf.len(),
                HEADER_SIZE
            ));
        }

        let mut cursor = Cursor::new(&buf[..HEADER_SIZE]);
        let crc = cursor.read_u32::<LittleEndian>()?;
        let timestamp = cursor.read_u64::<LittleEndian>()?;
        let tx_id = cursor.read_u64::<LittleEndian>()?;
        let key_size = cursor.read_u32::<LittleEndian>()? as usize;
        let value_size = cursor.read_u32::<LittleEndian>()? as usize;
        let flag = cursor.read_u16::<LittleEndian>()?;
        let ttl = cursor.read_u32::<LittleEndian>()?;
        let bucket_size = cursor.read_u32::<LittleEndian>()? as usize;
        let ds = cursor.read_u16::<LittleEndian>()?;
        let status = cursor.read_u16::<LittleEndian>()?;

        let total = HEADER_SIZE
            .checked_add(bucket_size)
            .and_then(|n| n.checked_add(key_size))
            .and_then(|n| n.checked_add(value_size))
            .ok_or_else(|| errdata!("record sizes overflow"))?;
        if buf.len() < total {
            return Err(errdata!(
                "truncated body: {} of {} bytes",
                buf.len(),
                total
            ));
        }

        let computed = CRC32.checksum(&buf[4..total]);
        if computed != crc {
            return Err(errdata!(
                "checksum mismatch: computed {computed:#010x}, stored {crc:#010x}"
            ));
        }

        let bucket_start = HEADER_SIZE;
        let key_start = bucket_start + bucket_size;
        let value_start = key_start + key_size;

        Ok(Record {
            timestamp,
            tx_id,
            flag,
            ttl,
            ds,
            status,
            bucket: buf[bucket_start..key_start].to_vec(),
            key: buf[key_start..value_start].to_vec(),
            value: buf[value_start..total].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn sample() -> Record {
        Record {
            timestamp: 1_700_000_000_000_000_000,
            tx_id: 7,
            flag: Flag::Put as u16,
            ttl: 30,
            ds: DataKind::Kv as u16,
            status: STATUS_COMMITTED,
            bucket: b"accounts".to_vec(),
            key: b"user_001".to_vec(),
            value: b"hello".to_vec(),
        }
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let record = sample();
        let encoded = record.encode();
        assert_eq!(encoded.len(), record.encoded_len());

        let decoded = Record::decode(&encoded).expect("decode failed");
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_decode_trailing_bytes_ignored() {
        // A decode only consumes encoded_len bytes; garbage after a valid
        // record must not affect it.
        let record = sample();
        let mut encoded = record.encode();
        encoded.extend_from_slice(b"garbage garbage");

        let decoded = Record::decode(&encoded).expect("decode failed");
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_decode_detects_flipped_byte() {
        let record = sample();
        let mut encoded = record.encode();
        let mid = encoded.len() / 2;
        encoded[mid] ^= 0xFF;

        match Record::decode(&encoded) {
            Err(Error::Corrupted(_)) => {}
            other => panic!("expected Corrupted, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_truncated_header() {
        let record = sample();
        let encoded = record.encode();

        assert!(Record::decode(&encoded[..HEADER_SIZE - 1]).is_err());
    }

    #[test]
    fn test_decode_truncated_body() {
        let record = sample();
        let encoded = record.encode();

        assert!(Record::decode(&encoded[..encoded.len() - 1]).is_err());
    }

    #[test]
    fn test_unknown_flag_still_decodes() {
        // Structural validity is independent of the flag table; replay is
        // responsible for skipping tags it does not know.
        let mut record = sample();
        record.flag = 999;
        let encoded = record.encode();

        let decoded = Record::decode(&encoded).expect("decode failed");
        assert_eq!(decoded.flag, 999);
        assert!(Flag::from_u16(decoded.flag).is_none());
    }

    #[test]
    fn test_empty_value_and_key() {
        let mut record = sample();
        record.key = Vec::new();
        record.value = Vec::new();
        let encoded = record.encode();
        let decoded = Record::decode(&encoded).expect("decode failed");
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_flag_table_is_stable() {
        for raw in [0u16, 1, 2, 3, 4, 5, 6, 7, 8, 16, 17, 18, 19, 32, 33, 34, 35, 36] {
            let flag = Flag::from_u16(raw).expect("known flag");
            assert_eq!(flag as u16, raw);
        }
        for raw in [9u16, 15, 20, 31, 37, u16::MAX] {
            assert!(Flag::from_u16(raw).is_none());
        }

        for raw in [0u16, 1, 2, 3] {
            let ds = DataKind::from_u16(raw).expect("known tag");
            assert_eq!(ds as u16, raw);
        }
        assert!(DataKind::from_u16(4).is_none());
    }
}
