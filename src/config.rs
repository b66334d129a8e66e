use std::path::PathBuf;

/// How the primary index holds record values.
///
/// Fixed at open; switching requires a merge and reopen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryIdxMode {
    /// Cache full value bytes in the index. Reads never touch disk; memory
    /// footprint is bounded by total live data.
    RamCache,
    /// Keep only record locations in the index and memory-map sealed
    /// segments. Footprint is bounded by index size plus OS page cache.
    Mmap,
}

/// How sealed segment mappings are primed at open in [`EntryIdxMode::Mmap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartFileLoadingMode {
    /// Pages fault in on first access.
    OnDemand,
    /// Advise the OS to fault the whole mapping in eagerly.
    Populate,
}

/// Configuration for an emberdb database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory path for the database; created if missing.
    pub dir: PathBuf,

    /// Maximum bytes per segment file (default: 64MB). Fixed after first open.
    pub segment_size: u64,

    /// Index read mode (default: RamCache). Fixed after first open.
    pub entry_idx_mode: EntryIdxMode,

    /// Call fdatasync on the active segment after every commit (default: true).
    /// When false, durability is reduced to OS writeback policy.
    pub sync_enable: bool,

    /// Page-cache priming policy for mmap mode (default: OnDemand).
    pub start_file_loading_mode: StartFileLoadingMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./emberdb"),
            segment_size: 64 * 1024 * 1024, // 64MB
            entry_idx_mode: EntryIdxMode::RamCache,
            sync_enable: true,
            start_file_loading_mode: StartFileLoadingMode::OnDemand,
        }
    }
}

impl Config {
    /// Create a new config with the given directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set maximum segment size
    pub fn segment_size(mut self, size: u64) -> Self {
        self.segment_size = size;
        self
    }

    /// Set the index read mode
    pub fn entry_idx_mode(mut self, mode: EntryIdxMode) -> Self {
        self.entry_idx_mode = mode;
        self
    }

    /// Enable or disable fdatasync on commit
    pub fn sync_enable(mut self, enabled: bool) -> Self {
        self.sync_enable = enabled;
        self
    }

    /// Set the mmap priming policy
    pub fn start_file_loading_mode(mut self, mode: StartFileLoadingMode) -> Self {
        self.start_file_loading_mode = mode;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.dir, PathBuf::from("./emberdb"));
        assert_eq!(config.segment_size, 64 * 1024 * 1024);
        assert_eq!(config.entry_idx_mode, EntryIdxMode::RamCache);
        assert!(config.sync_enable);
    }

    #[test]
    fn test_config_builder() {
        let config = Config::new("/tmp/test")
            .segment_size(8 * 1024 * 1024)
            .entry_idx_mode(EntryIdxMode::Mmap)
            .sync_enable(false)
            .start_file_loading_mode(StartFileLoadingMode::Populate);

        assert_eq!(config.dir, PathBuf::from("/tmp/test"));
        assert_eq!(config.segment_size, 8 * 1024 * 1024);
        assert_eq!(config.entry_idx_mode, EntryIdxMode::Mmap);
        assert!(!config.sync_enable);
        assert_eq!(
            config.start_file_loading_mode,
            StartFileLoadingMode::Populate
        );
    }
}
