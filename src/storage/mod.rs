//! Local persistence: activity baselines and replay capture.
//!
//! Both stores live in the sled database under `paths.data_dir`. The
//! static catalog is read-only and is never written here.

mod baselines;
mod replay;

pub use baselines::{BaselineRecord, BaselineStore};
pub use replay::{ReplayRecord, ReplayStore};

use std::path::Path;

/// Open (or create) the local state database under the data directory.
pub fn open_data_db(data_dir: &Path) -> Result<sled::Db, StorageError> {
    std::fs::create_dir_all(data_dir)?;
    Ok(sled::open(data_dir.join("killwatch.sled"))?)
}

/// Storage errors shared by both stores.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Db(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("compression error: {0}")]
    Compression(String),
}
