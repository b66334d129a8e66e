pub mod record;
pub mod segment;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{Config, EntryIdxMode, StartFileLoadingMode};
use crate::error::{Error, Result};
use record::{Location, Record};
use segment::{ActiveSegment, SealedSegment};

const SEGMENT_SUFFIX: &str = "dat";

/// File name of the segment with the given id: nine-digit zero-padded.
pub fn segment_file_name(id: u64) -> String {
    format!("{id:09}.{SEGMENT_SUFFIX}")
}

/// The ordered set of segment files making up the log.
///
/// Exactly one segment is open for append at any moment; all others are
/// sealed and read-only. Appends that would push the active segment past
/// the configured size cap rotate first, and a single record (or a
/// transaction group, via [`LogManager::ensure_room`]) larger than the cap
/// is rejected outright.
#[derive(Debug)]
pub struct LogManager {
    dir: PathBuf,
    cap: u64,
    mode: EntryIdxMode,
    loading: StartFileLoadingMode,
    sealed: BTreeMap<u64, SealedSegment>,
    active: ActiveSegment,
}

impl LogManager {
    /// Opens the log in `config.dir`, picking up existing segment files in
    /// ascending id order. The highest-numbered segment becomes the active
    /// one; an empty directory starts at segment 0.
    pub fn open(config: &Config) -> Result<Self> {
        let ids = list_segment_ids(&config.dir)?;
        let mmap = config.entry_idx_mode == EntryIdxMode::Mmap;
        let populate = config.start_file_loading_mode == StartFileLoadingMode::Populate;

        let mut sealed = BTreeMap::new();
        let active = match ids.split_last() {
            Some((last, rest)) => {
                for &id in rest {
                    let path = config.dir.join(segment_file_name(id));
                    sealed.insert(id, SealedSegment::open(path, id, mmap, populate)?);
                }
                ActiveSegment::open(config.dir.join(segment_file_name(*last)), *last)?
            }
            None => ActiveSegment::open(config.dir.join(segment_file_name(0)), 0)?,
        };

        Ok(Self {
            dir: config.dir.clone(),
            cap: config.segment_size,
            mode: config.entry_idx_mode,
            loading: config.start_file_loading_mode,
            sealed,
            active,
        })
    }

    /// Assembles a manager over a freshly written merge generation. The
    /// last id in `ids` becomes the active segment.
    pub(crate) fn from_generation(config: &Config, ids: &[u64]) -> Result<Self> {
        let mmap = config.entry_idx_mode == EntryIdxMode::Mmap;
        let populate = config.start_file_loading_mode == StartFileLoadingMode::Populate;

        let (last, rest) = ids
            .split_last()
            .ok_or_else(|| Error::IO("empty merge generation".to_string()))?;
        let mut sealed = BTreeMap::new();
        for &id in rest {
            let path = config.dir.join(segment_file_name(id));
            sealed.insert(id, SealedSegment::open(path, id, mmap, populate)?);
        }
        let active = ActiveSegment::open(config.dir.join(segment_file_name(*last)), *last)?;

        Ok(Self {
            dir: config.dir.clone(),
            cap: config.segment_size,
            mode: config.entry_idx_mode,
            loading: config.start_file_loading_mode,
            sealed,
            active,
        })
    }

    /// All segment ids in ascending order, active last.
    pub fn segment_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.sealed.keys().copied().collect();
        ids.push(self.active.id());
        ids
    }

    pub fn active_id(&self) -> u64 {
        self.active.id()
    }

    pub fn active_offset(&self) -> u64 {
        self.active.offset()
    }

    pub fn segment_path(&self, id: u64) -> PathBuf {
        self.dir.join(segment_file_name(id))
    }

    /// Rotates now if appending `group_len` more bytes would push the
    /// active segment over the cap. A group larger than the cap itself can
    /// never fit in one segment and is rejected.
    pub fn ensure_room(&mut self, group_len: u64) -> Result<()> {
        if group_len > self.cap {
            return Err(Error::ValueTooLarge);
        }
        if self.active.offset() + group_len > self.cap {
            self.rotate()?;
        }
        Ok(())
    }

    /// Appends a serialized record, rotating first if it would not fit,
    /// and returns its location.
    pub fn append(&mut self, bytes: &[u8]) -> Result<Location> {
        let len = bytes.len() as u64;
        if len > self.cap {
            return Err(Error::ValueTooLarge);
        }
        if self.active.offset() + len > self.cap {
            self.rotate()?;
        }
        let offset = self.active.append(bytes)?;
        Ok(Location {
            segment_id: self.active.id(),
            offset,
            length: bytes.len() as u32,
        })
    }

    /// Seals the active segment and starts a new one with the next id.
    pub fn rotate(&mut self) -> Result<()> {
        let next_id = self.active.id() + 1;
        tracing::debug!(segment = next_id, "rotating active segment");

        let new_active = ActiveSegment::open(self.dir.join(segment_file_name(next_id)), next_id)?;
        let old = std::mem::replace(&mut self.active, new_active);
        let sealed = old.seal(
            self.mode == EntryIdxMode::Mmap,
            self.loading == StartFileLoadingMode::Populate,
        )?;
        self.sealed.insert(sealed.id(), sealed);
        Ok(())
    }

    /// Flushes the userspace write buffer to the page cache.
    pub fn flush(&mut self) -> Result<()> {
        self.active.flush()
    }

    /// Flushes and fdatasyncs the active segment.
    pub fn sync(&mut self) -> Result<()> {
        self.active.sync()
    }

    /// Reads and decodes the record at `loc`.
    pub fn read(&self, loc: Location) -> Result<Record> {
        let bytes = self.read_bytes(loc)?;
        Record::decode(&bytes)
    }

    fn read_bytes(&self, loc: Location) -> Result<Vec<u8>> {
        if loc.segment_id == self.active.id() {
            let end = loc.offset + loc.length as u64;
            if end > self.active.offset() {
                return Err(Error::OutOfRange(format!(
                    "segment {}: {}..{} past size {}",
                    loc.segment_id,
                    loc.offset,
                    end,
                    self.active.offset()
                )));
            }
            let mut buf = vec![0u8; loc.length as usize];
            self.active.read_at(&mut buf, loc.offset)?;
            return Ok(buf);
        }
        match self.sealed.get(&loc.segment_id) {
            Some(segment) => segment.read(loc.offset, loc.length),
            None => Err(Error::OutOfRange(format!(
                "no segment {}",
                loc.segment_id
            ))),
        }
    }

    /// Reads a whole segment file. Recovery scans with this before any new
    /// appends happen, so the userspace buffer is never bypassed.
    pub fn read_segment_bytes(&self, id: u64) -> Result<Vec<u8>> {
        Ok(fs::read(self.segment_path(id))?)
    }

    /// Abandons everything appended to the active segment past `offset`,
    /// discarding bytes still sitting in the write buffer. Used when a
    /// commit fails after some of its records were handed to the writer.
    pub fn abort_active_to(&mut self, offset: u64) -> Result<()> {
        self.active.abort_to(offset)
    }

    /// Truncates the active segment to the last valid record boundary.
    pub fn truncate_active(&mut self, len: u64) -> Result<()> {
        if len < self.active.offset() {
            tracing::warn!(
                segment = self.active.id(),
                from = self.active.offset(),
                to = len,
                "truncating active segment tail"
            );
        }
        self.active.truncate(len)
    }
}

/// Segment ids present in `dir`, ascending.
fn list_segment_ids(dir: &Path) -> Result<Vec<u64>> {
    let mut ids: Vec<u64> = fs::read_dir(dir)?
        .filter_map(|entry| {
            let path = entry.ok()?.path();
            if path.extension()?.to_str()? != SEGMENT_SUFFIX {
                return None;
            }
            path.file_stem()?.to_str()?.parse::<u64>().ok()
        })
        .collect();
    ids.sort_unstable();
    Ok(ids)
}
