use std::collections::BTreeMap;
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::errdata;
use crate::error::Result;
use crate::log::record::Location;

/// Sequence numbers are minted outward from the middle of the u64 space so
/// that left pushes can decrement indefinitely.
pub const SEQ_ORIGIN: u64 = u64::MAX / 2;

/// A reference to one list element's bytes.
///
/// `Stored` points into the log; `skip` is the length of the operation
/// payload prefix inside the record's value field (an lset record stores
/// `position || element`, so its element starts at `skip`). `Staged` holds
/// bytes pushed inside a still-uncommitted transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueRef {
    Stored {
        loc: Location,
        skip: u32,
        cached: Option<Vec<u8>>,
    },
    Staged(Vec<u8>),
}

/// In-memory state of one list: an ordered mapping from sequence number to
/// element reference, plus head/tail counters for minting new sequence
/// numbers. After lrem/ltrim the live sequence numbers may be sparse, so
/// positional addressing walks the ordered map rather than doing head
/// arithmetic.
#[derive(Debug, Clone, PartialEq)]
pub struct ListState {
    items: BTreeMap<u64, ValueRef>,
    head: u64,
    tail: u64,
}

impl Default for ListState {
    fn default() -> Self {
        Self {
            items: BTreeMap::new(),
            head: SEQ_ORIGIN,
            tail: SEQ_ORIGIN - 1,
        }
    }
}

impl ListState {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn lpush(&mut self, value: ValueRef) {
        if self.items.is_empty() {
            self.head = SEQ_ORIGIN;
            self.tail = SEQ_ORIGIN;
        } else {
            self.head -= 1;
        }
        self.items.insert(self.head, value);
    }

    pub fn rpush(&mut self, value: ValueRef) {
        if self.items.is_empty() {
            self.head = SEQ_ORIGIN;
            self.tail = SEQ_ORIGIN;
        } else {
            self.tail += 1;
        }
        self.items.insert(self.tail, value);
    }

    pub fn lpop(&mut self) -> Option<ValueRef> {
        let (_, value) = self.items.pop_first()?;
        self.reset_bounds();
        Some(value)
    }

    pub fn rpop(&mut self) -> Option<ValueRef> {
        let (_, value) = self.items.pop_last()?;
        self.reset_bounds();
        Some(value)
    }

    pub fn lpeek(&self) -> Option<&ValueRef> {
        self.items.first_key_value().map(|(_, v)| v)
    }

    pub fn rpeek(&self) -> Option<&ValueRef> {
        self.items.last_key_value().map(|(_, v)| v)
    }

    /// Elements in head-to-tail order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (u64, &ValueRef)> {
        self.items.iter().map(|(seq, v)| (*seq, v))
    }

    /// Sequence number of the element at ordinal `pos` from the head.
    pub fn nth_seq(&self, pos: usize) -> Option<u64> {
        self.items.keys().nth(pos).copied()
    }

    pub fn set(&mut self, seq: u64, value: ValueRef) {
        self.items.insert(seq, value);
    }

    pub fn remove_seqs(&mut self, seqs: &[u64]) {
        for seq in seqs {
            self.items.remove(seq);
        }
        self.reset_bounds();
    }

    /// Retains only the elements at ordinal positions `start..=end`.
    pub fn trim_positions(&mut self, start: usize, end: usize) {
        let keep: Vec<u64> = self
            .items
            .keys()
            .enumerate()
            .filter(|(i, _)| *i >= start && *i <= end)
            .map(|(_, seq)| *seq)
            .collect();
        let mut kept = BTreeMap::new();
        for seq in keep {
            if let Some(v) = self.items.remove(&seq) {
                kept.insert(seq, v);
            }
        }
        self.items = kept;
        self.reset_bounds();
    }

    /// Maps a possibly negative index (negative counts from the tail) to an
    /// ordinal position, rejecting out-of-bounds.
    pub fn resolve_index(&self, index: i64) -> Option<usize> {
        let len = self.len() as i64;
        let pos = if index < 0 { len + index } else { index };
        if pos < 0 || pos >= len {
            None
        } else {
            Some(pos as usize)
        }
    }

    /// Maps a possibly negative inclusive index pair to clamped ordinal
    /// positions, or None when the window is empty.
    pub fn resolve_range(&self, start: i64, end: i64) -> Option<(usize, usize)> {
        let len = self.len() as i64;
        if len == 0 {
            return None;
        }
        let mut s = if start < 0 { len + start } else { start };
        let mut e = if end < 0 { len + end } else { end };
        if s < 0 {
            s = 0;
        }
        if e >= len {
            e = len - 1;
        }
        if s > e || s >= len {
            None
        } else {
            Some((s as usize, e as usize))
        }
    }

    fn reset_bounds(&mut self) {
        match (self.items.first_key_value(), self.items.last_key_value()) {
            (Some((&first, _)), Some((&last, _))) => {
                self.head = first;
                self.tail = last;
            }
            _ => {
                self.head = SEQ_ORIGIN;
                self.tail = SEQ_ORIGIN - 1;
            }
        }
    }
}

/// Which sequence numbers `lrem(count, value)` removes: positive counts
/// scan head-to-tail, negative tail-to-head, zero removes every match.
pub fn lrem_seqs(
    list: &ListState,
    count: i64,
    target: &[u8],
    mut resolve: impl FnMut(&ValueRef) -> Result<Vec<u8>>,
) -> Result<Vec<u64>> {
    let limit = if count == 0 {
        usize::MAX
    } else {
        count.unsigned_abs() as usize
    };
    let mut seqs = Vec::new();

    if count >= 0 {
        for (seq, vref) in list.iter() {
            if seqs.len() == limit {
                break;
            }
            if resolve(vref)? == target {
                seqs.push(seq);
            }
        }
    } else {
        for (seq, vref) in list.iter().rev() {
            if seqs.len() == limit {
                break;
            }
            if resolve(vref)? == target {
                seqs.push(seq);
            }
        }
    }
    Ok(seqs)
}

pub fn encode_lrem(count: i64, value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + value.len());
    buf.write_i64::<LittleEndian>(count).unwrap();
    buf.extend_from_slice(value);
    buf
}

pub fn decode_lrem(buf: &[u8]) -> Result<(i64, &[u8])> {
    if buf.len() < 8 {
        return Err(errdata!("short lrem payload"));
    }
    let count = Cursor::new(buf).read_i64::<LittleEndian>()?;
    Ok((count, &buf[8..]))
}

pub fn encode_lset(pos: u64, value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + value.len());
    buf.write_u64::<LittleEndian>(pos).unwrap();
    buf.extend_from_slice(value);
    buf
}

/// Payload prefix length of an lset record; the element bytes follow it.
pub const LSET_SKIP: u32 = 8;

pub fn decode_lset(buf: &[u8]) -> Result<(u64, &[u8])> {
    if buf.len() < 8 {
        return Err(errdata!("short lset payload"));
    }
    let pos = Cursor::new(buf).read_u64::<LittleEndian>()?;
    Ok((pos, &buf[8..]))
}

pub fn encode_ltrim(start: u64, end: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16);
    buf.write_u64::<LittleEndian>(start).unwrap();
    buf.write_u64::<LittleEndian>(end).unwrap();
    buf
}

pub fn decode_ltrim(buf: &[u8]) -> Result<(u64, u64)> {
    if buf.len() < 16 {
        return Err(errdata!("short ltrim payload"));
    }
    let mut cursor = Cursor::new(buf);
    let start = cursor.read_u64::<LittleEndian>()?;
    let end = cursor.read_u64::<LittleEndian>()?;
    Ok((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staged(bytes: &[u8]) -> ValueRef {
        ValueRef::Staged(bytes.to_vec())
    }

    fn bytes_of(vref: &ValueRef) -> Vec<u8> {
        match vref {
            ValueRef::Staged(v) => v.clone(),
            ValueRef::Stored { cached, .. } => cached.clone().unwrap(),
        }
    }

    fn contents(list: &ListState) -> Vec<Vec<u8>> {
        list.iter().map(|(_, v)| bytes_of(v)).collect()
    }

    #[test]
    fn test_push_order() {
        let mut list = ListState::default();
        list.rpush(staged(b"a"));
        list.rpush(staged(b"b"));
        list.lpush(staged(b"z"));

        assert_eq!(contents(&list), vec![b"z".to_vec(), b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_pop_both_ends() {
        let mut list = ListState::default();
        for v in [b"a", b"b", b"c"] {
            list.rpush(staged(v));
        }

        assert_eq!(bytes_of(&list.lpop().unwrap()), b"a");
        assert_eq!(bytes_of(&list.rpop().unwrap()), b"c");
        assert_eq!(bytes_of(&list.lpop().unwrap()), b"b");
        assert!(list.lpop().is_none());
        assert!(list.rpop().is_none());
    }

    #[test]
    fn test_reuse_after_drain() {
        let mut list = ListState::default();
        list.rpush(staged(b"a"));
        list.lpop();

        // Sequence counters reset once the list drains.
        list.lpush(staged(b"b"));
        assert_eq!(list.nth_seq(0), Some(SEQ_ORIGIN));
    }

    #[test]
    fn test_resolve_index_negative() {
        let mut list = ListState::default();
        for v in [b"a", b"b", b"c"] {
            list.rpush(staged(v));
        }

        assert_eq!(list.resolve_index(0), Some(0));
        assert_eq!(list.resolve_index(-1), Some(2));
        assert_eq!(list.resolve_index(-3), Some(0));
        assert_eq!(list.resolve_index(3), None);
        assert_eq!(list.resolve_index(-4), None);
    }

    #[test]
    fn test_resolve_range_clamps() {
        let mut list = ListState::default();
        for v in [b"a", b"b", b"c"] {
            list.rpush(staged(v));
        }

        assert_eq!(list.resolve_range(0, -1), Some((0, 2)));
        assert_eq!(list.resolve_range(-100, 100), Some((0, 2)));
        assert_eq!(list.resolve_range(1, 1), Some((1, 1)));
        assert_eq!(list.resolve_range(2, 1), None);
        assert_eq!(ListState::default().resolve_range(0, -1), None);
    }

    #[test]
    fn test_trim_positions() {
        let mut list = ListState::default();
        for v in [b"a", b"b", b"c", b"d"] {
            list.rpush(staged(v));
        }
        list.trim_positions(1, 2);
        assert_eq!(contents(&list), vec![b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn test_lrem_directions() -> Result<()> {
        let mut list = ListState::default();
        for v in [b"x", b"y", b"x", b"y", b"x"] {
            list.rpush(staged(v));
        }

        // Head-to-tail, limited.
        let seqs = lrem_seqs(&list, 2, b"x", |v| Ok(bytes_of(v)))?;
        assert_eq!(seqs.len(), 2);
        let mut forward = list.clone();
        forward.remove_seqs(&seqs);
        assert_eq!(
            contents(&forward),
            vec![b"y".to_vec(), b"y".to_vec(), b"x".to_vec()]
        );

        // Tail-to-head, limited.
        let seqs = lrem_seqs(&list, -2, b"x", |v| Ok(bytes_of(v)))?;
        let mut backward = list.clone();
        backward.remove_seqs(&seqs);
        assert_eq!(
            contents(&backward),
            vec![b"x".to_vec(), b"y".to_vec(), b"y".to_vec()]
        );

        // Zero removes all matches.
        let seqs = lrem_seqs(&list, 0, b"x", |v| Ok(bytes_of(v)))?;
        let mut all = list.clone();
        all.remove_seqs(&seqs);
        assert_eq!(contents(&all), vec![b"y".to_vec(), b"y".to_vec()]);
        Ok(())
    }

    #[test]
    fn test_payload_codecs() -> Result<()> {
        let lrem_buf = encode_lrem(-3, b"needle");
        let (count, value) = decode_lrem(&lrem_buf)?;
        assert_eq!((count, value), (-3, b"needle".as_slice()));

        let lset_buf = encode_lset(9, b"elem");
        let (pos, value) = decode_lset(&lset_buf)?;
        assert_eq!((pos, value), (9, b"elem".as_slice()));

        assert_eq!(decode_ltrim(&encode_ltrim(2, 5))?, (2, 5));

        assert!(decode_lrem(b"short").is_err());
        assert!(decode_ltrim(&[0u8; 15]).is_err());
        Ok(())
    }
}
