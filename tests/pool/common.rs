#![allow(dead_code)]

use drivepool::core::config::PoolConfig;
use drivepool::core::logging::setup_test_log;
use drivepool::core::store::Store;
use drivepool::core::time::{Clock, ManualClock};
use drivepool::google::memory::InMemoryGoogle;
use drivepool::pool::{Collaborators, Engine, EngineOptions};
use std::sync::Arc;
use tempfile::TempDir;

pub const GB: u64 = 1_000_000_000;

pub struct Harness {
    pub tmp: TempDir,
    pub google: Arc<InMemoryGoogle>,
    pub clock: Arc<ManualClock>,
    pub engine: Engine,
}

pub fn harness() -> Harness {
    harness_with(PoolConfig::default())
}

pub fn harness_with(config: PoolConfig) -> Harness {
    setup_test_log();
    let tmp = tempfile::tempdir().unwrap();
    let store = Store::open(tmp.path()).unwrap();
    let google = Arc::new(InMemoryGoogle::new());
    let clock = Arc::new(ManualClock::starting_at(1_700_000_000));
    let engine = Engine::new(
        store,
        Collaborators::from_provider(google.clone()),
        config,
        EngineOptions {
            clock: Some(clock.clone() as Arc<dyn Clock>),
            rng_seed: Some(7),
            indexer: None,
        },
    )
    .unwrap();
    Harness {
        tmp,
        google,
        clock,
        engine,
    }
}

/// Admin key for `project_ref`, as the blob an operator would upload.
pub fn admin_blob(google: &InMemoryGoogle, project_ref: &str) -> String {
    google.admin_credential(project_ref).expose().to_string()
}
