use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::storage::RwMethod;

/// How much of a string entry the in-memory index keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdxMode {
    /// Keys and values both live in the index; reads never touch disk.
    KeyValueRam,
    /// Only keys live in the index; reads fault the value from its segment.
    KeyOnlyRam,
}

/// Configuration for a kilndb instance.
///
/// Serialized as JSON into `db.cfg` at close so that `KilnDb::reopen` can
/// restore the exact same settings, and deserialized from TOML by the server
/// binary's `--config` flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding segments and sidecar files. Created if absent.
    pub dir_path: PathBuf,

    /// Maximum segment size in bytes; exceeding it triggers rotation.
    pub block_size: u64,

    /// Segment IO backend.
    pub rw_method: RwMethod,

    /// String index mode.
    pub idx_mode: IdxMode,

    /// Fsync the active segment after every write.
    pub sync: bool,

    /// Hard limit on key length in bytes.
    pub max_key_size: u32,

    /// Hard limit on value length in bytes.
    pub max_value_size: u32,

    /// TCP bind address for the server.
    pub addr: String,

    /// Minimum archived segment count (for any one datatype) before
    /// `reclaim` will run.
    pub reclaim_threshold: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir_path: std::env::temp_dir().join("kilndb"),
            block_size: 16 * 1024 * 1024, // 16MB
            rw_method: RwMethod::FileIo,
            idx_mode: IdxMode::KeyValueRam,
            sync: false,
            max_key_size: 1024,
            max_value_size: 8 * 1024 * 1024,
            addr: "127.0.0.1:5200".to_string(),
            reclaim_threshold: 4,
        }
    }
}

impl Config {
    /// Create a new config rooted at the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir_path: dir.into(),
            ..Default::default()
        }
    }

    /// Set the maximum segment size.
    pub fn block_size(mut self, size: u64) -> Self {
        self.block_size = size;
        self
    }

    /// Set the segment IO backend.
    pub fn rw_method(mut self, method: RwMethod) -> Self {
        self.rw_method = method;
        self
    }

    /// Set the string index mode.
    pub fn idx_mode(mut self, mode: IdxMode) -> Self {
        self.idx_mode = mode;
        self
    }

    /// Fsync after every write.
    pub fn sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    /// Set the key length limit.
    pub fn max_key_size(mut self, size: u32) -> Self {
        self.max_key_size = size;
        self
    }

    /// Set the value length limit.
    pub fn max_value_size(mut self, size: u32) -> Self {
        self.max_value_size = size;
        self
    }

    /// Set the server bind address.
    pub fn addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }

    /// Set the reclaim threshold.
    pub fn reclaim_threshold(mut self, threshold: usize) -> Self {
        self.reclaim_threshold = threshold;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.block_size, 16 * 1024 * 1024);
        assert_eq!(config.rw_method, RwMethod::FileIo);
        assert_eq!(config.idx_mode, IdxMode::KeyValueRam);
        assert!(!config.sync);
        assert_eq!(config.addr, "127.0.0.1:5200");
    }

    #[test]
    fn test_config_builder() {
        let config = Config::new("/tmp/kiln_cfg")
            .block_size(4096)
            .rw_method(RwMethod::Mmap)
            .idx_mode(IdxMode::KeyOnlyRam)
            .sync(true);

        assert_eq!(config.dir_path, PathBuf::from("/tmp/kiln_cfg"));
        assert_eq!(config.block_size, 4096);
        assert_eq!(config.rw_method, RwMethod::Mmap);
        assert_eq!(config.idx_mode, IdxMode::KeyOnlyRam);
        assert!(config.sync);
    }

    #[test]
    fn test_config_json_round_trip() {
        let config = Config::new("/tmp/kiln_cfg_json").sync(true);
        let json = serde_json::to_string(&config).expect("serialize config");
        let back: Config = serde_json::from_str(&json).expect("deserialize config");
        assert_eq!(back.dir_path, config.dir_path);
        assert_eq!(back.sync, config.sync);
        assert_eq!(back.block_size, config.block_size);
    }
}
