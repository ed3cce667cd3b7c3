//! Engine metadata persisted in `db.meta`.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Durable per-type write positions, so reopening resumes appending where
/// the last clean run left off. Rewritten after every rotation and at close;
/// replay corrects it if a crash left it stale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DbMeta {
    /// Active segment write offset, indexed by datatype discriminant.
    pub active_write_off: [u64; 5],
}

impl DbMeta {
    /// Load metadata, falling back to defaults when the file is missing or
    /// unreadable (a fresh directory has no metadata yet).
    pub fn load(path: &Path) -> DbMeta {
        match fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => DbMeta::default(),
        }
    }

    /// Persist metadata as JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec(self)?;
        fs::write(path, bytes)?;
        Ok(())
    }
}
