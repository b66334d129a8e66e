use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{Config, EntryIdxMode};
use crate::db::{now_ns, Core};
use crate::error::{Error, Result};
use crate::index::kv::IndexEntry;
use crate::index::list::ValueRef;
use crate::index::{self, zset, StateIndex};
use crate::log::record::{DataKind, Flag, Location, Record, STATUS_COMMITTED};
use crate::log::segment::ActiveSegment;
use crate::log::{segment_file_name, LogManager};

/// Rewrites all live entries into a fresh generation of segments and
/// retires the old ones.
///
/// Stop-the-world: the caller holds the write lock for the duration, so no
/// reader or writer observes a half-swapped state. Live kv entries keep
/// their original timestamp and ttl (expired ones are dropped here); list
/// elements are rewritten in order as pushes; set and sorted-set members as
/// adds. Every merged record is its own committed unit under a single merge
/// tx id, which keeps replay linear. After the new chain is synced, the
/// in-memory state swaps to the new locations and the old files are
/// unlinked, leaving ids contiguous from the new generation's start.
pub(crate) fn run(core: &mut Core, config: &Config, tx_id: u64) -> Result<()> {
    core.log.flush()?;
    let old_ids = core.log.segment_ids();
    let old_paths: Vec<PathBuf> = old_ids.iter().map(|id| core.log.segment_path(*id)).collect();
    let start_id = core.log.active_id() + 1;
    let cache = config.entry_idx_mode == EntryIdxMode::RamCache;
    let now = now_ns();

    let mut writer = GenerationWriter::new(&config.dir, start_id, config.segment_size)?;
    let mut state = StateIndex::default();

    {
        let Core {
            ref log,
            state: ref old_state,
            ref mut clock,
        } = *core;

        for (bucket, index) in &old_state.kv {
            for (key, entry) in index.iter() {
                if entry.is_expired(now) {
                    continue;
                }
                let value = match &entry.value {
                    Some(value) => value.clone(),
                    None => log.read(entry.location)?.value,
                };
                let record = Record {
                    timestamp: entry.timestamp,
                    tx_id,
                    flag: Flag::Put as u16,
                    ttl: entry.ttl,
                    ds: DataKind::Kv as u16,
                    status: STATUS_COMMITTED,
                    bucket: bucket.clone(),
                    key: key.clone(),
                    value,
                };
                let loc = writer.append(&record.encode())?;
                state.kv_index_mut(bucket).put(
                    key.clone(),
                    IndexEntry {
                        location: loc,
                        timestamp: entry.timestamp,
                        ttl: entry.ttl,
                        value: cache.then(|| record.value.clone()),
                    },
                );
            }
        }

        for (bucket, lists) in &old_state.lists {
            for (key, list) in lists {
                for (_, vref) in list.iter() {
                    let value = index::resolve(log, vref)?;
                    let record = Record {
                        timestamp: clock.next(),
                        tx_id,
                        flag: Flag::ListRPush as u16,
                        ttl: 0,
                        ds: DataKind::List as u16,
                        status: STATUS_COMMITTED,
                        bucket: bucket.clone(),
                        key: key.clone(),
                        value,
                    };
                    let loc = writer.append(&record.encode())?;
                    state.list_mut(bucket, key).rpush(ValueRef::Stored {
                        loc,
                        skip: 0,
                        cached: cache.then(|| record.value.clone()),
                    });
                }
            }
        }

        for (bucket, sets) in &old_state.sets {
            for (key, set) in sets {
                for member in set.iter() {
                    let record = Record {
                        timestamp: clock.next(),
                        tx_id,
                        flag: Flag::SetAdd as u16,
                        ttl: 0,
                        ds: DataKind::Set as u16,
                        status: STATUS_COMMITTED,
                        bucket: bucket.clone(),
                        key: key.clone(),
                        value: member.clone(),
                    };
                    writer.append(&record.encode())?;
                    state.set_mut(bucket, key).insert(member.clone());
                }
            }
        }

        for (bucket, set) in &old_state.zsets {
            for member in set.members() {
                let record = Record {
                    timestamp: clock.next(),
                    tx_id,
                    flag: Flag::ZAdd as u16,
                    ttl: 0,
                    ds: DataKind::ZSet as u16,
                    status: STATUS_COMMITTED,
                    bucket: bucket.clone(),
                    key: member.key.clone(),
                    value: zset::encode_zadd(member.score, &member.value),
                };
                writer.append(&record.encode())?;
                state
                    .zset_mut(bucket)
                    .insert(member.key, member.score, member.value);
            }
        }
    }

    let new_ids = writer.finish()?;
    let new_log = LogManager::from_generation(config, &new_ids)?;

    // Swap before unlinking: handles (and mmap regions) on the old chain
    // must be closed first.
    let old_log = std::mem::replace(&mut core.log, new_log);
    core.state = state;
    drop(old_log);
    for path in &old_paths {
        fs::remove_file(path)?;
    }

    tracing::info!(
        retired = old_ids.len(),
        written = new_ids.len(),
        "merge complete"
    );
    Ok(())
}

/// Appends the merge generation's records, rotating on the size cap. The
/// chain starts past every existing segment id so a crash mid-merge leaves
/// the old generation authoritative.
struct GenerationWriter {
    dir: PathBuf,
    cap: u64,
    ids: Vec<u64>,
    active: ActiveSegment,
}

impl GenerationWriter {
    fn new(dir: &Path, start_id: u64, cap: u64) -> Result<Self> {
        let active = ActiveSegment::open(dir.join(segment_file_name(start_id)), start_id)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            cap,
            ids: vec![start_id],
            active,
        })
    }

    fn append(&mut self, bytes: &[u8]) -> Result<Location> {
        let len = bytes.len() as u64;
        if len > self.cap {
            return Err(Error::ValueTooLarge);
        }
        if self.active.offset() + len > self.cap {
            let next = self.active.id() + 1;
            let new = ActiveSegment::open(self.dir.join(segment_file_name(next)), next)?;
            let old = std::mem::replace(&mut self.active, new);
            old.seal(false, false)?;
            self.ids.push(next);
        }
        let offset = self.active.append(bytes)?;
        Ok(Location {
            segment_id: self.active.id(),
            offset,
            length: bytes.len() as u32,
        })
    }

    fn finish(mut self) -> Result<Vec<u64>> {
        self.active.sync()?;
        Ok(self.ids)
    }
}
