//! On-disk store for tests that need a write to fail part-way.

use smr_core::store::SmrStore;
use std::path::PathBuf;
use tempfile::TempDir;

/// A store file in a temp dir. `execute` runs SQL over a second
/// connection, so tests can install and drop failing triggers while the
/// store under test stays open.
pub struct DiskStore {
    _dir: TempDir,
    path: PathBuf,
}

impl DiskStore {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("smr.db");
        Self { _dir: dir, path }
    }

    pub fn open(&self) -> SmrStore {
        let store = SmrStore::open(self.path.to_str().expect("utf-8 temp path")).expect("open store");
        store.migrate().expect("migration");
        store
    }

    pub fn execute(&self, sql: &str) {
        rusqlite::Connection::open(&self.path)
            .expect("second connection")
            .execute_batch(sql)
            .expect("side statement");
    }
}
