pub mod kv;
pub mod list;
pub mod set;
pub mod zset;

use std::collections::HashMap;

use crate::config::EntryIdxMode;
use crate::error::Result;
use crate::log::record::{Flag, Location, Record};
use crate::log::LogManager;
use kv::{IndexEntry, KeyIndex};
use list::{ListState, ValueRef};
use set::SetState;
use zset::ZSetState;

/// The whole in-memory picture of the database: per-bucket primary indexes
/// and data-structure states. Mutated only during a commit's critical
/// section (or during single-threaded recovery and merge); read under the
/// database read lock.
#[derive(Default)]
pub struct StateIndex {
    pub(crate) kv: HashMap<Vec<u8>, KeyIndex>,
    pub(crate) lists: HashMap<Vec<u8>, HashMap<Vec<u8>, ListState>>,
    pub(crate) sets: HashMap<Vec<u8>, HashMap<Vec<u8>, SetState>>,
    pub(crate) zsets: HashMap<Vec<u8>, ZSetState>,
}

impl StateIndex {
    pub fn kv_index(&self, bucket: &[u8]) -> Option<&KeyIndex> {
        self.kv.get(bucket)
    }

    pub fn kv_index_mut(&mut self, bucket: &[u8]) -> &mut KeyIndex {
        self.kv.entry(bucket.to_vec()).or_default()
    }

    pub fn list(&self, bucket: &[u8], key: &[u8]) -> Option<&ListState> {
        self.lists.get(bucket)?.get(key)
    }

    fn list_get_mut(&mut self, bucket: &[u8], key: &[u8]) -> Option<&mut ListState> {
        self.lists.get_mut(bucket)?.get_mut(key)
    }

    pub fn list_mut(&mut self, bucket: &[u8], key: &[u8]) -> &mut ListState {
        self.lists
            .entry(bucket.to_vec())
            .or_default()
            .entry(key.to_vec())
            .or_default()
    }

    /// A private copy of the list for transaction staging; default when the
    /// list does not exist yet.
    pub fn list_snapshot(&self, bucket: &[u8], key: &[u8]) -> ListState {
        self.list(bucket, key).cloned().unwrap_or_default()
    }

    pub fn set(&self, bucket: &[u8], key: &[u8]) -> Option<&SetState> {
        self.sets.get(bucket)?.get(key)
    }

    fn set_get_mut(&mut self, bucket: &[u8], key: &[u8]) -> Option<&mut SetState> {
        self.sets.get_mut(bucket)?.get_mut(key)
    }

    pub fn set_mut(&mut self, bucket: &[u8], key: &[u8]) -> &mut SetState {
        self.sets
            .entry(bucket.to_vec())
            .or_default()
            .entry(key.to_vec())
            .or_default()
    }

    pub fn set_snapshot(&self, bucket: &[u8], key: &[u8]) -> SetState {
        self.set(bucket, key).cloned().unwrap_or_default()
    }

    pub fn zset(&self, bucket: &[u8]) -> Option<&ZSetState> {
        self.zsets.get(bucket)
    }

    pub fn zset_mut(&mut self, bucket: &[u8]) -> &mut ZSetState {
        self.zsets.entry(bucket.to_vec()).or_default()
    }

    pub fn zset_snapshot(&self, bucket: &[u8]) -> ZSetState {
        self.zset(bucket).cloned().unwrap_or_default()
    }

    /// Applies one committed record to the in-memory state. This is the
    /// single mutation path: commit runs it for freshly appended records
    /// and recovery runs it for replayed ones, so both arrive at the same
    /// state by construction.
    ///
    /// Records with unknown flags are skipped with a warning; the flag set
    /// is closed, so these only appear when a newer format version wrote
    /// the log.
    pub fn apply(
        &mut self,
        rec: &Record,
        loc: Location,
        mode: EntryIdxMode,
        log: &LogManager,
    ) -> Result<()> {
        let Some(flag) = Flag::from_u16(rec.flag) else {
            tracing::warn!(flag = rec.flag, "skipping record with unknown flag");
            return Ok(());
        };
        let cache = mode == EntryIdxMode::RamCache;

        match flag {
            Flag::Put => {
                let entry = IndexEntry {
                    location: loc,
                    timestamp: rec.timestamp,
                    ttl: rec.ttl,
                    value: cache.then(|| rec.value.clone()),
                };
                self.kv_index_mut(&rec.bucket).put(rec.key.clone(), entry);
            }
            Flag::Delete => {
                if let Some(index) = self.kv.get_mut(rec.bucket.as_slice()) {
                    index.delete(&rec.key);
                }
            }
            Flag::ListRPush => {
                let value = stored(loc, 0, cache, &rec.value);
                self.list_mut(&rec.bucket, &rec.key).rpush(value);
            }
            Flag::ListLPush => {
                let value = stored(loc, 0, cache, &rec.value);
                self.list_mut(&rec.bucket, &rec.key).lpush(value);
            }
            Flag::ListLPop => {
                if let Some(list) = self.list_get_mut(&rec.bucket, &rec.key) {
                    list.lpop();
                }
            }
            Flag::ListRPop => {
                if let Some(list) = self.list_get_mut(&rec.bucket, &rec.key) {
                    list.rpop();
                }
            }
            Flag::ListLRem => {
                let (count, target) = list::decode_lrem(&rec.value)?;
                let target = target.to_vec();
                let seqs = match self.list(&rec.bucket, &rec.key) {
                    Some(list) => {
                        list::lrem_seqs(list, count, &target, |vref| resolve(log, vref))?
                    }
                    None => Vec::new(),
                };
                if !seqs.is_empty() {
                    if let Some(list) = self.list_get_mut(&rec.bucket, &rec.key) {
                        list.remove_seqs(&seqs);
                    }
                }
            }
            Flag::ListLSet => {
                let (pos, element) = list::decode_lset(&rec.value)?;
                let value = stored(loc, list::LSET_SKIP, cache, element);
                if let Some(list) = self.list_get_mut(&rec.bucket, &rec.key) {
                    if let Some(seq) = list.nth_seq(pos as usize) {
                        list.set(seq, value);
                    }
                }
            }
            Flag::ListLTrim => {
                let (start, end) = list::decode_ltrim(&rec.value)?;
                if let Some(list) = self.list_get_mut(&rec.bucket, &rec.key) {
                    list.trim_positions(start as usize, end as usize);
                }
            }
            Flag::SetAdd => {
                self.set_mut(&rec.bucket, &rec.key).insert(rec.value.clone());
            }
            Flag::SetRem | Flag::SetPop => {
                if let Some(set) = self.set_get_mut(&rec.bucket, &rec.key) {
                    set.remove(&rec.value);
                }
            }
            Flag::SetMove => {
                let (dst_bucket, dst_key, member) = set::decode_smove(&rec.value)?;
                let (dst_bucket, dst_key, member) =
                    (dst_bucket.to_vec(), dst_key.to_vec(), member.to_vec());
                let moved = self
                    .set_get_mut(&rec.bucket, &rec.key)
                    .map(|set| set.remove(&member))
                    .unwrap_or(false);
                if moved {
                    self.set_mut(&dst_bucket, &dst_key).insert(member);
                }
            }
            Flag::ZAdd => {
                let (score, value) = zset::decode_zadd(&rec.value)?;
                self.zset_mut(&rec.bucket)
                    .insert(rec.key.clone(), score, value.to_vec());
            }
            Flag::ZRem | Flag::ZPopMin | Flag::ZPopMax => {
                if let Some(zset) = self.zsets.get_mut(rec.bucket.as_slice()) {
                    zset.remove(&rec.key);
                }
            }
            Flag::ZRemRangeByRank => {
                let (start, end) = zset::decode_rank_range(&rec.value)?;
                if let Some(zset) = self.zsets.get_mut(rec.bucket.as_slice()) {
                    zset.remove_rank_range(start as usize, end as usize);
                }
            }
        }
        Ok(())
    }
}

fn stored(loc: Location, skip: u32, cache: bool, bytes: &[u8]) -> ValueRef {
    ValueRef::Stored {
        loc,
        skip,
        cached: cache.then(|| bytes.to_vec()),
    }
}

/// Fetches the element bytes behind a committed list reference, from the
/// cache when present or from the log otherwise.
pub fn resolve(log: &LogManager, vref: &ValueRef) -> Result<Vec<u8>> {
    match vref {
        ValueRef::Staged(bytes) => Ok(bytes.clone()),
        ValueRef::Stored {
            cached: Some(bytes),
            ..
        } => Ok(bytes.clone()),
        ValueRef::Stored { loc, skip, .. } => {
            let record = log.read(*loc)?;
            Ok(record.value[*skip as usize..].to_vec())
        }
    }
}
