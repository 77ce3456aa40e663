//! Store handle for the pool's persistent state.
//!
//! A `Store` is constructed once at startup and passed by reference to every
//! service. It owns the database broker, so write serialization is scoped to
//! the store rather than the process.

use crate::core::broker::DbBroker;
use crate::core::error::PoolError;
use crate::subsystems;
use std::fs;
use std::path::{Path, PathBuf};

pub struct Store {
    /// Absolute path to the store root directory
    pub root: PathBuf,
    broker: DbBroker,
}

impl Store {
    /// Open (and initialize, if needed) the store rooted at `root`.
    pub fn open(root: &Path) -> Result<Self, PoolError> {
        fs::create_dir_all(root)?;
        let store = Self {
            root: root.to_path_buf(),
            broker: DbBroker::new(root),
        };
        subsystems::initialize_all(&store)?;
        Ok(store)
    }

    pub fn broker(&self) -> &DbBroker {
        &self.broker
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("root", &self.root).finish()
    }
}
