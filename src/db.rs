use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::Config;
use crate::errinput;
use crate::error::{Error, Result};
use crate::flock::DirLock;
use crate::index::StateIndex;
use crate::log::record::HEADER_SIZE;
use crate::log::LogManager;
use crate::tx::{Tx, TxGuard};
use crate::{merge, recovery};

/// Wall-clock nanoseconds since the Unix epoch.
pub(crate) fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Hands out strictly increasing commit timestamps: wall clock when it has
/// advanced, last + 1 otherwise. No two records ever share a timestamp,
/// even within one nanosecond or across a reopen (the floor is the highest
/// timestamp recovered from the log).
pub(crate) struct Clock {
    last: u64,
}

impl Clock {
    pub fn with_floor(floor: u64) -> Self {
        Self { last: floor }
    }

    pub fn next(&mut self) -> u64 {
        let now = now_ns();
        self.last = if now > self.last { now } else { self.last + 1 };
        self.last
    }
}

/// Everything guarded by the database-wide reader-writer lock: the log, the
/// in-memory indexes and data-structure states, and the commit clock.
pub(crate) struct Core {
    pub log: LogManager,
    pub state: StateIndex,
    pub clock: Clock,
}

/// An embeddable, persistent key/value store on an append-only segmented
/// log with fully in-memory ordered indexes.
///
/// All access goes through transactions: [`Db::begin`] hands out a write
/// transaction (exclusive) or a read transaction (shared). Recovery replays
/// the whole log on open, so opening blocks until the in-memory state is
/// rebuilt.
pub struct Db {
    config: Config,
    core: RwLock<Core>,
    tx_counter: AtomicU64,
    _lock: DirLock,
}

impl Db {
    /// Opens (creating if needed) the database in `config.dir`, locking the
    /// directory against concurrent opens and replaying the log.
    pub fn open(config: Config) -> Result<Db> {
        if config.segment_size <= HEADER_SIZE as u64 {
            return Err(errinput!("segment size smaller than a record header"));
        }
        fs::create_dir_all(&config.dir)?;
        let lock = DirLock::acquire(&config.dir)?;

        let mut log = LogManager::open(&config)?;
        let recovered = recovery::replay(&mut log, config.entry_idx_mode)?;
        tracing::info!(dir = %config.dir.display(), "database open");

        Ok(Db {
            tx_counter: AtomicU64::new(recovered.max_tx_id + 1),
            core: RwLock::new(Core {
                log,
                state: recovered.state,
                clock: Clock::with_floor(recovered.max_timestamp),
            }),
            config,
            _lock: lock,
        })
    }

    /// Begins a transaction. A write transaction takes the database lock
    /// exclusively (a second writer blocks here until the first resolves);
    /// read transactions share it.
    pub fn begin(&self, writable: bool) -> Result<Tx<'_>> {
        let guard = if writable {
            TxGuard::Write(self.core.write().map_err(Error::from)?)
        } else {
            TxGuard::Read(self.core.read().map_err(Error::from)?)
        };
        let id = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        Ok(Tx::new(
            id,
            guard,
            self.config.entry_idx_mode,
            self.config.sync_enable,
            self.config.segment_size,
        ))
    }

    /// Runs `f` in a write transaction: commits on `Ok`, rolls back on
    /// `Err`. The lock is released on every exit path.
    pub fn update<T>(&self, f: impl FnOnce(&mut Tx) -> Result<T>) -> Result<T> {
        let mut tx = self.begin(true)?;
        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                let _ = tx.rollback();
                Err(err)
            }
        }
    }

    /// Runs `f` in a read transaction.
    pub fn view<T>(&self, f: impl FnOnce(&Tx) -> Result<T>) -> Result<T> {
        let mut tx = self.begin(false)?;
        let result = f(&tx);
        let _ = tx.commit();
        result
    }

    /// Rewrites all live entries into a fresh segment generation and
    /// unlinks the old one. Holds the write lock for the duration; also
    /// reclaims expired entries and superseded records.
    pub fn merge(&self) -> Result<()> {
        let mut core = self.core.write().map_err(Error::from)?;
        // Like begin, the id is taken only once the lock is held, so merge
        // records sort after every transaction committed before them.
        let tx_id = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        merge::run(&mut core, &self.config, tx_id)
    }

    /// Copies every segment file in ascending id order into `dest` under
    /// the read lock. No writer can commit meanwhile, so the copy is a
    /// coherent log prefix that recovers identically to the source.
    pub fn backup(&self, dest: impl AsRef<Path>) -> Result<()> {
        let core = self.core.read().map_err(Error::from)?;
        let dest = dest.as_ref();
        fs::create_dir_all(dest)?;
        for id in core.log.segment_ids() {
            let src = core.log.segment_path(id);
            let name = src.file_name().ok_or_else(|| Error::IO("unnamed segment".into()))?;
            fs::copy(&src, dest.join(name))?;
        }
        Ok(())
    }

    /// Flushes and syncs the log. The directory lock releases on drop.
    pub fn close(self) -> Result<()> {
        let mut core = self.core.write().map_err(Error::from)?;
        core.log.sync()?;
        Ok(())
    }
}
