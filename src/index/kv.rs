use std::collections::BTreeMap;

use crate::errinput;
use crate::error::Result;
use crate::log::record::Location;

/// What the primary index holds per key: the record's location and enough
/// metadata to answer reads and TTL checks without touching disk. In
/// RamCache mode `value` carries the full value bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub location: Location,
    pub timestamp: u64,
    pub ttl: u32,
    pub value: Option<Vec<u8>>,
}

impl IndexEntry {
    /// TTL is measured in whole seconds from the record's commit timestamp;
    /// 0 means persistent.
    pub fn is_expired(&self, now_ns: u64) -> bool {
        self.ttl != 0
            && now_ns.saturating_sub(self.timestamp) >= self.ttl as u64 * 1_000_000_000
    }
}

/// A key/value entry as returned to readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub timestamp: u64,
    pub ttl: u32,
}

/// The primary index of one bucket: an ordered map from raw key bytes to
/// record locations, lexicographic over the bytes. Ordered iteration makes
/// prefix and range scans linear in result size.
#[derive(Debug, Default, Clone)]
pub struct KeyIndex {
    map: BTreeMap<Vec<u8>, IndexEntry>,
}

impl KeyIndex {
    pub fn get(&self, key: &[u8]) -> Option<&IndexEntry> {
        self.map.get(key)
    }

    pub fn put(&mut self, key: Vec<u8>, entry: IndexEntry) {
        self.map.insert(key, entry);
    }

    pub fn delete(&mut self, key: &[u8]) -> Option<IndexEntry> {
        self.map.remove(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &IndexEntry)> {
        self.map.iter()
    }

    /// Up to `limit` entries whose keys start with `prefix`, ascending.
    /// A zero limit returns nothing.
    pub fn prefix_scan(
        &self,
        prefix: &[u8],
        limit: usize,
    ) -> impl Iterator<Item = (&Vec<u8>, &IndexEntry)> {
        let prefix = prefix.to_vec();
        self.map
            .range(prefix.clone()..)
            .take_while(move |(key, _)| key.starts_with(&prefix))
            .take(limit)
    }

    /// All entries with keys in `[start, end]`, both ends inclusive,
    /// ascending.
    pub fn range_scan(
        &self,
        start: &[u8],
        end: &[u8],
    ) -> Result<impl Iterator<Item = (&Vec<u8>, &IndexEntry)>> {
        if start > end {
            return Err(errinput!("range start after end"));
        }
        Ok(self.map.range(start.to_vec()..=end.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ts: u64, ttl: u32) -> IndexEntry {
        IndexEntry {
            location: Location {
                segment_id: 0,
                offset: ts,
                length: 64,
            },
            timestamp: ts,
            ttl,
            value: None,
        }
    }

    fn index_with(keys: &[&[u8]]) -> KeyIndex {
        let mut index = KeyIndex::default();
        for (i, key) in keys.iter().enumerate() {
            index.put(key.to_vec(), entry(i as u64, 0));
        }
        index
    }

    #[test]
    fn test_get_put_delete() {
        let mut index = KeyIndex::default();
        index.put(b"k".to_vec(), entry(1, 0));
        assert!(index.get(b"k").is_some());

        index.put(b"k".to_vec(), entry(2, 0));
        assert_eq!(index.get(b"k").unwrap().timestamp, 2);

        assert!(index.delete(b"k").is_some());
        assert!(index.get(b"k").is_none());
        assert!(index.delete(b"k").is_none());
    }

    #[test]
    fn test_prefix_scan_ordered_subset() {
        let index = index_with(&[b"user_001", b"user_002", b"user_010", b"veh_001", b"u"]);

        let keys: Vec<_> = index
            .prefix_scan(b"user_", 100)
            .map(|(k, _)| k.clone())
            .collect();
        assert_eq!(keys, vec![b"user_001".to_vec(), b"user_002".to_vec(), b"user_010".to_vec()]);

        // Limit applies after ordering.
        let keys: Vec<_> = index
            .prefix_scan(b"user_", 2)
            .map(|(k, _)| k.clone())
            .collect();
        assert_eq!(keys, vec![b"user_001".to_vec(), b"user_002".to_vec()]);

        assert_eq!(index.prefix_scan(b"user_", 0).count(), 0);
        assert_eq!(index.prefix_scan(b"zzz", 10).count(), 0);
    }

    #[test]
    fn test_range_scan_inclusive() {
        let index = index_with(&[b"a", b"b", b"c", b"d"]);

        let keys: Vec<_> = index
            .range_scan(b"b", b"c")
            .unwrap()
            .map(|(k, _)| k.clone())
            .collect();
        assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec()]);

        assert!(index.range_scan(b"c", b"b").is_err());
    }

    #[test]
    fn test_expiry_boundaries() {
        let e = entry(1_000_000_000, 2); // committed at t=1s, ttl 2s
        assert!(!e.is_expired(1_000_000_000));
        assert!(!e.is_expired(2_999_999_999));
        assert!(e.is_expired(3_000_000_000));

        let persistent = entry(1_000_000_000, 0);
        assert!(!persistent.is_expired(u64::MAX));
    }
}
