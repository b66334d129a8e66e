use crate::config::EntryIdxMode;
use crate::error::Result;
use crate::index::StateIndex;
use crate::log::record::{Location, Record, STATUS_COMMITTED};
use crate::log::LogManager;

/// What a full log scan rebuilds: the in-memory state plus the high-water
/// marks the tx-id counter and timestamp clock must resume past.
pub(crate) struct Recovered {
    pub state: StateIndex,
    pub max_tx_id: u64,
    pub max_timestamp: u64,
}

/// Scans every segment in ascending id order and replays committed
/// transaction groups into a fresh state index.
///
/// Records sharing a tx_id form a group; the group applies only when its
/// final record carries the committed status. A record that fails to
/// decode ends the scan of that segment, since everything after it is a
/// crash tail, and the active segment is truncated back to the last valid
/// record boundary. Runs single-threaded and blocks open until done.
pub(crate) fn replay(log: &mut LogManager, mode: EntryIdxMode) -> Result<Recovered> {
    let mut state = StateIndex::default();
    let mut max_tx_id = 0u64;
    let mut max_timestamp = 0u64;
    let mut applied = 0usize;
    let active_id = log.active_id();
    let mut active_valid = log.active_offset();

    for id in log.segment_ids() {
        let bytes = log.read_segment_bytes(id)?;
        let mut offset = 0usize;
        let mut pending: Vec<(Record, Location)> = Vec::new();
        let mut pending_tx = 0u64;

        while offset < bytes.len() {
            let record = match Record::decode(&bytes[offset..]) {
                Ok(record) => record,
                Err(err) => {
                    tracing::warn!(segment = id, offset, %err, "discarding segment tail");
                    break;
                }
            };
            let loc = Location {
                segment_id: id,
                offset: offset as u64,
                length: record.encoded_len() as u32,
            };
            offset += record.encoded_len();
            max_tx_id = max_tx_id.max(record.tx_id);
            max_timestamp = max_timestamp.max(record.timestamp);

            // A single writer appends groups contiguously; a new tx_id
            // while a group is still open means the old group never got
            // its trailer.
            if !pending.is_empty() && record.tx_id != pending_tx {
                tracing::warn!(
                    segment = id,
                    tx_id = pending_tx,
                    records = pending.len(),
                    "discarding group without commit trailer"
                );
                pending.clear();
            }
            pending_tx = record.tx_id;
            let committed = record.status == STATUS_COMMITTED;
            pending.push((record, loc));

            if committed {
                for (record, loc) in pending.drain(..) {
                    if let Err(err) = state.apply(&record, loc, mode, log) {
                        tracing::warn!(segment = id, %err, "skipping unreplayable record");
                        continue;
                    }
                    applied += 1;
                }
            }
        }

        if !pending.is_empty() {
            tracing::warn!(
                segment = id,
                tx_id = pending_tx,
                records = pending.len(),
                "discarding group without commit trailer"
            );
        }
        if id == active_id {
            active_valid = offset as u64;
        }
    }

    log.truncate_active(active_valid)?;
    tracing::info!(records = applied, "recovery complete");

    Ok(Recovered {
        state,
        max_tx_id,
        max_timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::log::record::{DataKind, Flag, STATUS_UNCOMMITTED};

    fn record(tx_id: u64, ts: u64, key: &[u8], value: &[u8], status: u16) -> Record {
        Record {
            timestamp: ts,
            tx_id,
            flag: Flag::Put as u16,
            ttl: 0,
            ds: DataKind::Kv as u16,
            status,
            bucket: b"b".to_vec(),
            key: key.to_vec(),
            value: value.to_vec(),
        }
    }

    fn key_of(state: &StateIndex, key: &[u8]) -> bool {
        state
            .kv_index(b"b")
            .map(|index| index.get(key).is_some())
            .unwrap_or(false)
    }

    #[test]
    fn test_replay_applies_committed_groups() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config::new(dir.path());
        let mut log = LogManager::open(&config)?;

        // Two records in one transaction, trailer present.
        log.append(&record(1, 1, b"k1", b"v1", STATUS_UNCOMMITTED).encode())?;
        log.append(&record(1, 2, b"k2", b"v2", STATUS_COMMITTED).encode())?;
        log.sync()?;

        let recovered = replay(&mut log, EntryIdxMode::RamCache)?;
        assert!(key_of(&recovered.state, b"k1"));
        assert!(key_of(&recovered.state, b"k2"));
        assert_eq!(recovered.max_tx_id, 1);
        assert_eq!(recovered.max_timestamp, 2);
        Ok(())
    }

    #[test]
    fn test_replay_discards_group_without_trailer() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config::new(dir.path());
        let mut log = LogManager::open(&config)?;

        log.append(&record(1, 1, b"k1", b"v1", STATUS_COMMITTED).encode())?;
        // Transaction 2 never got its trailer.
        log.append(&record(2, 2, b"k2", b"v2", STATUS_UNCOMMITTED).encode())?;
        log.append(&record(2, 3, b"k3", b"v3", STATUS_UNCOMMITTED).encode())?;
        log.sync()?;

        let recovered = replay(&mut log, EntryIdxMode::RamCache)?;
        assert!(key_of(&recovered.state, b"k1"));
        assert!(!key_of(&recovered.state, b"k2"));
        assert!(!key_of(&recovered.state, b"k3"));
        Ok(())
    }

    #[test]
    fn test_replay_truncates_corrupt_tail() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config::new(dir.path());

        let valid_len;
        {
            let mut log = LogManager::open(&config)?;
            let bytes = record(1, 1, b"k1", b"v1", STATUS_COMMITTED).encode();
            valid_len = bytes.len() as u64;
            log.append(&bytes)?;
            log.append(b"garbage bytes that decode nowhere")?;
            log.sync()?;
        }

        let mut log = LogManager::open(&config)?;
        let recovered = replay(&mut log, EntryIdxMode::RamCache)?;
        assert!(key_of(&recovered.state, b"k1"));
        assert_eq!(log.active_offset(), valid_len);
        Ok(())
    }

    #[test]
    fn test_replay_later_timestamp_wins() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config::new(dir.path());
        let mut log = LogManager::open(&config)?;

        log.append(&record(1, 1, b"k", b"old", STATUS_COMMITTED).encode())?;
        log.append(&record(2, 2, b"k", b"new", STATUS_COMMITTED).encode())?;
        log.sync()?;

        let recovered = replay(&mut log, EntryIdxMode::RamCache)?;
        let entry = recovered.state.kv_index(b"b").unwrap().get(b"k").unwrap();
        assert_eq!(entry.value.as_deref(), Some(b"new".as_slice()));
        assert_eq!(entry.timestamp, 2);
        Ok(())
    }
}
