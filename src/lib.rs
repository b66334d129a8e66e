pub mod config;
pub mod db;
pub mod error;
pub mod tx;

mod flock;
mod index;
mod log;
mod merge;
mod recovery;

pub use config::{Config, EntryIdxMode, StartFileLoadingMode};
pub use db::Db;
pub use error::{Error, Result};
pub use index::kv::Entry;
pub use index::zset::{ScoreOpts, SortedSetMember};
pub use tx::Tx;
