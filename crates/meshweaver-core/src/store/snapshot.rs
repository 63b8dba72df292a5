//! JSON snapshot of the store, written atomically (temp file + rename).

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use super::{StoreError, TaskStore};
use crate::domain::task::Task;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    tasks: Vec<&'a Task>,
}

#[derive(Deserialize)]
struct SnapshotOwned {
    version: u32,
    tasks: Vec<Task>,
}

pub fn save(store: &TaskStore, path: &Path) -> Result<(), StoreError> {
    let snapshot = SnapshotRef {
        version: SNAPSHOT_VERSION,
        tasks: store.iter().collect(),
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, &snapshot)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

/// Load a snapshot; a missing file is an empty store.
pub fn load(path: &Path) -> Result<TaskStore, StoreError> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(TaskStore::new()),
        Err(e) => return Err(e.into()),
    };
    let snapshot: SnapshotOwned = serde_json::from_slice(&raw)?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(StoreError::UnsupportedVersion(snapshot.version));
    }

    let mut store = TaskStore::new();
    for task in snapshot.tasks {
        store.insert(task)?;
    }
    Ok(store)
}
