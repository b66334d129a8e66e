use std::collections::BTreeMap;

use super::{committed_value, validate_bucket, validate_key, KvPending, Tx};
use crate::db::now_ns;
use crate::error::{Error, Result};
use crate::index::kv::{Entry, IndexEntry};
use crate::log::record::{DataKind, Flag};

impl<'db> Tx<'db> {
    /// Stores `value` under `(bucket, key)` with a TTL in seconds
    /// (0 = persistent). Buckets are created implicitly on first write.
    pub fn put(&mut self, bucket: &[u8], key: &[u8], value: &[u8], ttl: u32) -> Result<()> {
        self.check_writable()?;
        validate_bucket(bucket)?;
        validate_key(key)?;

        self.stage(DataKind::Kv, Flag::Put, bucket, key, value.to_vec(), ttl)?;
        self.ws.kv.insert(
            (bucket.to_vec(), key.to_vec()),
            KvPending::Put {
                value: value.to_vec(),
                ttl,
            },
        );
        Ok(())
    }

    /// Looks up `(bucket, key)`, observing this transaction's staged writes
    /// first. Expired entries surface as `Expired`.
    pub fn get(&self, bucket: &[u8], key: &[u8]) -> Result<Entry> {
        validate_bucket(bucket)?;
        validate_key(key)?;

        if let Some(pending) = self.ws.kv.get(&(bucket.to_vec(), key.to_vec())) {
            return match pending {
                KvPending::Put { value, ttl } => Ok(Entry {
                    key: key.to_vec(),
                    value: value.clone(),
                    timestamp: 0, // assigned at commit
                    ttl: *ttl,
                }),
                KvPending::Delete => Err(Error::NotFound),
            };
        }

        let core = self.core()?;
        let index = core.state.kv_index(bucket).ok_or(Error::NotFound)?;
        let entry = index.get(key).ok_or(Error::NotFound)?;
        if entry.is_expired(now_ns()) {
            return Err(Error::Expired);
        }
        Ok(Entry {
            key: key.to_vec(),
            value: committed_value(core, entry)?,
            timestamp: entry.timestamp,
            ttl: entry.ttl,
        })
    }

    /// Removes `(bucket, key)`. Deleting an absent (or expired) key returns
    /// `NotFound`.
    pub fn delete(&mut self, bucket: &[u8], key: &[u8]) -> Result<()> {
        self.check_writable()?;
        validate_bucket(bucket)?;
        validate_key(key)?;

        let wkey = (bucket.to_vec(), key.to_vec());
        match self.ws.kv.get(&wkey) {
            Some(KvPending::Delete) => return Err(Error::NotFound),
            Some(KvPending::Put { .. }) => {}
            None => {
                let live = self
                    .core()?
                    .state
                    .kv_index(bucket)
                    .and_then(|index| index.get(key))
                    .map(|entry| !entry.is_expired(now_ns()))
                    .unwrap_or(false);
                if !live {
                    return Err(Error::NotFound);
                }
            }
        }

        self.stage(DataKind::Kv, Flag::Delete, bucket, key, Vec::new(), 0)?;
        self.ws.kv.insert(wkey, KvPending::Delete);
        Ok(())
    }

    /// Up to `limit` live entries whose keys start with `prefix`, in
    /// ascending key order. `NotFound` when the bucket does not exist.
    pub fn prefix_scan(&self, bucket: &[u8], prefix: &[u8], limit: usize) -> Result<Vec<Entry>> {
        validate_bucket(bucket)?;
        let core = self.known_bucket(bucket)?;

        let merged = match core.state.kv_index(bucket) {
            Some(index) => self.merged_entries(
                core,
                index.prefix_scan(prefix, usize::MAX),
                bucket,
                |key: &[u8]| key.starts_with(prefix),
            )?,
            None => self.merged_entries(core, std::iter::empty(), bucket, |key: &[u8]| {
                key.starts_with(prefix)
            })?,
        };
        Ok(merged.into_values().take(limit).collect())
    }

    /// All live entries with keys in `[start, end]`, both ends inclusive,
    /// ascending. `NotFound` when the bucket does not exist.
    pub fn range_scan(&self, bucket: &[u8], start: &[u8], end: &[u8]) -> Result<Vec<Entry>> {
        validate_bucket(bucket)?;
        if start > end {
            return Err(crate::errinput!("range start after end"));
        }
        let core = self.known_bucket(bucket)?;

        let merged = match core.state.kv_index(bucket) {
            Some(index) => self.merged_entries(
                core,
                index.range_scan(start, end)?,
                bucket,
                |key: &[u8]| key >= start && key <= end,
            )?,
            None => self.merged_entries(core, std::iter::empty(), bucket, |key: &[u8]| {
                key >= start && key <= end
            })?,
        };
        Ok(merged.into_values().collect())
    }

    /// The core, provided the bucket exists in the committed index or in
    /// this transaction's staged writes.
    fn known_bucket(&self, bucket: &[u8]) -> Result<&crate::db::Core> {
        let core = self.core()?;
        if core.state.kv_index(bucket).is_none() && !self.ws.kv.keys().any(|(b, _)| b == bucket) {
            return Err(Error::NotFound);
        }
        Ok(core)
    }

    /// Committed scan results with this transaction's staged puts and
    /// deletes (those passing `matches`) layered on top.
    fn merged_entries<'a>(
        &self,
        core: &crate::db::Core,
        committed: impl Iterator<Item = (&'a Vec<u8>, &'a IndexEntry)>,
        bucket: &[u8],
        matches: impl Fn(&[u8]) -> bool,
    ) -> Result<BTreeMap<Vec<u8>, Entry>> {
        let now = now_ns();

        let mut merged = BTreeMap::new();
        for (key, entry) in committed {
            if entry.is_expired(now) {
                continue;
            }
            merged.insert(
                key.clone(),
                Entry {
                    key: key.clone(),
                    value: committed_value(core, entry)?,
                    timestamp: entry.timestamp,
                    ttl: entry.ttl,
                },
            );
        }
        for ((b, key), pending) in &self.ws.kv {
            if b != bucket || !matches(key) {
                continue;
            }
            match pending {
                KvPending::Put { value, ttl } => {
                    merged.insert(
                        key.clone(),
                        Entry {
                            key: key.clone(),
                            value: value.clone(),
                            timestamp: 0,
                            ttl: *ttl,
                        },
                    );
                }
                KvPending::Delete => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged)
    }
}
