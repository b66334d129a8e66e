pub mod kv;
pub mod list;
pub mod set;
pub mod zset;

use std::collections::HashMap;
use std::sync::{RwLockReadGuard, RwLockWriteGuard};

use crate::config::EntryIdxMode;
use crate::db::Core;
use crate::errinput;
use crate::error::{Error, Result};
use crate::index::kv::IndexEntry;
use crate::index::list::{ListState, ValueRef};
use crate::index::set::SetState;
use crate::index::zset::ZSetState;
use crate::log::record::{
    DataKind, Flag, Record, HEADER_SIZE, STATUS_COMMITTED, STATUS_UNCOMMITTED,
};

pub(crate) enum TxGuard<'db> {
    Read(RwLockReadGuard<'db, Core>),
    Write(RwLockWriteGuard<'db, Core>),
}

/// A staged kv overwrite, layered over the committed index by reads within
/// the same write transaction.
pub(crate) enum KvPending {
    Put { value: Vec<u8>, ttl: u32 },
    Delete,
}

/// Private working copies of every structure the transaction has touched.
/// Cloned from committed state on first touch; discarded on commit (the
/// committed state is rebuilt by applying the staged records) or rollback.
#[derive(Default)]
pub(crate) struct Workspace {
    pub kv: HashMap<(Vec<u8>, Vec<u8>), KvPending>,
    pub lists: HashMap<(Vec<u8>, Vec<u8>), ListState>,
    pub sets: HashMap<(Vec<u8>, Vec<u8>), SetState>,
    pub zsets: HashMap<Vec<u8>, ZSetState>,
}

/// One buffered mutation, in staging order. Serialized to a log record at
/// commit; `value` already carries the operation payload encoding.
pub(crate) struct StagedOp {
    pub ds: DataKind,
    pub flag: Flag,
    pub bucket: Vec<u8>,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub ttl: u32,
}

/// A transaction over the database.
///
/// A write transaction holds the database write lock exclusively from
/// `begin` to `commit`/`rollback`; read transactions share the read lock.
/// Dropping an unfinished transaction releases the lock and discards any
/// staged mutations.
pub struct Tx<'db> {
    id: u64,
    guard: Option<TxGuard<'db>>,
    pub(crate) ws: Workspace,
    pub(crate) staged: Vec<StagedOp>,
    mode: EntryIdxMode,
    sync: bool,
    cap: u64,
}

impl<'db> Tx<'db> {
    pub(crate) fn new(
        id: u64,
        guard: TxGuard<'db>,
        mode: EntryIdxMode,
        sync: bool,
        cap: u64,
    ) -> Self {
        Self {
            id,
            guard: Some(guard),
            ws: Workspace::default(),
            staged: Vec::new(),
            mode,
            sync,
            cap,
        }
    }

    /// The monotonic id assigned at begin.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn writable(&self) -> bool {
        matches!(self.guard, Some(TxGuard::Write(_)))
    }

    pub(crate) fn core(&self) -> Result<&Core> {
        match &self.guard {
            Some(TxGuard::Read(guard)) => Ok(&**guard),
            Some(TxGuard::Write(guard)) => Ok(&**guard),
            None => Err(Error::TxClosed),
        }
    }

    pub(crate) fn check_writable(&self) -> Result<()> {
        match &self.guard {
            Some(TxGuard::Write(_)) => Ok(()),
            Some(TxGuard::Read(_)) => Err(Error::TxReadOnly),
            None => Err(Error::TxClosed),
        }
    }

    /// Buffers one mutation, rejecting records that could never fit in a
    /// segment.
    pub(crate) fn stage(
        &mut self,
        ds: DataKind,
        flag: Flag,
        bucket: &[u8],
        key: &[u8],
        value: Vec<u8>,
        ttl: u32,
    ) -> Result<()> {
        let header_and_key = (HEADER_SIZE + bucket.len() + key.len()) as u64;
        if header_and_key > self.cap {
            return Err(Error::KeyTooLarge);
        }
        if header_and_key + value.len() as u64 > self.cap {
            return Err(Error::ValueTooLarge);
        }
        self.staged.push(StagedOp {
            ds,
            flag,
            bucket: bucket.to_vec(),
            key: key.to_vec(),
            value,
            ttl,
        });
        Ok(())
    }

    /// Serializes the staged buffer to the log (every record carrying this
    /// transaction's id, only the last one flagged committed), fsyncs per
    /// policy, then applies the mutations to the in-memory state and
    /// releases the lock. An error aborts the transaction: the lock is
    /// released, nothing is applied, and any of the group's bytes that
    /// reached the active segment are truncated back out, so a reopen
    /// cannot see the trailer of a commit that was reported failed.
    pub fn commit(&mut self) -> Result<()> {
        match &self.guard {
            None => return Err(Error::TxClosed),
            Some(TxGuard::Read(_)) => {
                self.guard = None;
                return Ok(());
            }
            Some(TxGuard::Write(_)) => {}
        }
        if self.staged.is_empty() {
            self.guard = None;
            return Ok(());
        }

        let result = self.commit_inner();
        self.guard = None;
        self.ws = Workspace::default();
        self.staged.clear();
        result
    }

    fn commit_inner(&mut self) -> Result<()> {
        let id = self.id;
        let sync = self.sync;
        let mode = self.mode;
        let ops = std::mem::take(&mut self.staged);

        let core = match &mut self.guard {
            Some(TxGuard::Write(guard)) => &mut **guard,
            _ => unreachable!("commit_inner requires the write guard"),
        };

        let total = ops.len();
        let mut records = Vec::with_capacity(total);
        for (i, op) in ops.into_iter().enumerate() {
            let status = if i == total - 1 {
                STATUS_COMMITTED
            } else {
                STATUS_UNCOMMITTED
            };
            records.push(Record {
                timestamp: core.clock.next(),
                tx_id: id,
                flag: op.flag as u16,
                ttl: op.ttl,
                ds: op.ds as u16,
                status,
                bucket: op.bucket,
                key: op.key,
                value: op.value,
            });
        }

        // All records of one transaction live in a single segment: rotate
        // up front if the group would overflow the active one.
        let group_len: u64 = records.iter().map(|r| r.encoded_len() as u64).sum();
        core.log.ensure_room(group_len)?;
        let group_start = core.log.active_offset();

        let mut locations = Vec::with_capacity(records.len());
        let appended = (|| -> Result<()> {
            for record in &records {
                locations.push(core.log.append(&record.encode())?);
            }
            core.log.flush()?;
            if sync {
                core.log.sync()?;
            }
            Ok(())
        })();
        if let Err(err) = appended {
            // Part of the group, trailer possibly included, may already
            // have reached the file. Cut it back out so a later reopen
            // cannot resurrect a transaction reported as failed here.
            if let Err(abort) = core.log.abort_active_to(group_start) {
                tracing::error!(%abort, "could not roll back aborted commit group");
            }
            return Err(err);
        }

        // Only now does the transaction become visible: the trailer is on
        // stable storage, so replaying these records into the committed
        // state cannot diverge from what recovery would rebuild.
        let Core {
            ref mut state,
            ref log,
            ..
        } = *core;
        for (record, loc) in records.iter().zip(locations) {
            state.apply(record, loc, mode, log)?;
        }
        Ok(())
    }

    /// Discards all staged mutations and releases the lock.
    pub fn rollback(&mut self) -> Result<()> {
        if self.guard.is_none() {
            return Err(Error::TxClosed);
        }
        self.guard = None;
        self.ws = Workspace::default();
        self.staged.clear();
        Ok(())
    }

    /// Fetches the bytes behind a list element reference, staged or stored.
    pub(crate) fn resolve_ref(&self, vref: &ValueRef) -> Result<Vec<u8>> {
        match vref {
            ValueRef::Staged(bytes) => Ok(bytes.clone()),
            _ => crate::index::resolve(&self.core()?.log, vref),
        }
    }
}

pub(crate) fn validate_bucket(bucket: &[u8]) -> Result<()> {
    if bucket.is_empty() {
        return Err(errinput!("empty bucket name"));
    }
    Ok(())
}

pub(crate) fn validate_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(errinput!("empty key"));
    }
    Ok(())
}

/// The committed value for an index entry: cached in RamCache mode, read
/// through the log otherwise.
pub(crate) fn committed_value(core: &Core, entry: &IndexEntry) -> Result<Vec<u8>> {
    match &entry.value {
        Some(value) => Ok(value.clone()),
        None => Ok(core.log.read(entry.location)?.value),
    }
}
