//! Result Importer - 生成結果の取り込み
//!
//! Two halves:
//! - `fetch_all` runs off the host thread: download every handle and stage
//!   it in a temp file.
//! - `apply` runs on the host thread during `tick`: hand each staged asset to
//!   the `AssetSink`.
//!
//! One failing handle never stops the others. Temp files are removed when
//! the `StagedAsset` drops, on every path.

use std::io::Write;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::errors::ImportError;
use crate::domain::ids::TaskId;
use crate::domain::outcome::ResultHandle;
use crate::ports::{AssetSink, StagedAsset, Transport};

/// Result of fetching one handle.
#[derive(Debug)]
pub enum Fetched {
    Staged(StagedAsset),
    Failed {
        handle: ResultHandle,
        error: ImportError,
    },
}

/// What happened to one handle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandleOutcome {
    pub handle: ResultHandle,
    #[serde(serialize_with = "serialize_outcome")]
    pub result: Result<(), ImportError>,
}

fn serialize_outcome<S: serde::Serializer>(
    result: &Result<(), ImportError>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match result {
        Ok(()) => s.serialize_str("ok"),
        Err(e) => s.serialize_str(&e.to_string()),
    }
}

/// Per-handle outcome list of one import run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportReport {
    pub task_id: TaskId,
    pub outcomes: Vec<HandleOutcome>,
}

impl ImportReport {
    pub fn all_ok(&self) -> bool {
        !self.outcomes.is_empty() && self.outcomes.iter().all(|o| o.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &HandleOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    /// One line summary of the failures, for `Task::import_error`.
    pub fn failure_summary(&self) -> Option<String> {
        let parts: Vec<String> = self
            .failures()
            .map(|o| match &o.result {
                Err(e) => format!("{}: {e}", o.handle.url),
                Ok(()) => String::new(),
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("; "))
        }
    }
}

/// Download and stage every handle, in order.
pub async fn fetch_all(
    transport: Arc<dyn Transport>,
    task_id: TaskId,
    handles: Vec<ResultHandle>,
) -> Vec<Fetched> {
    let mut fetched = Vec::with_capacity(handles.len());
    for handle in handles {
        let result = match transport.fetch_asset(&handle).await {
            Ok(bytes) => {
                let staging_handle = handle.clone();
                tokio::task::spawn_blocking(move || stage(task_id, staging_handle, bytes))
                    .await
                    .unwrap_or_else(|e| Err(ImportError::Stage(e.to_string())))
            }
            Err(e) => Err(ImportError::Fetch(e)),
        };
        match result {
            Ok(asset) => {
                debug!(url = %handle.url, path = %asset.path().display(), "asset staged");
                fetched.push(Fetched::Staged(asset));
            }
            Err(error) => {
                warn!(url = %handle.url, %error, "asset fetch failed");
                fetched.push(Fetched::Failed { handle, error });
            }
        }
    }
    fetched
}

/// Write `bytes` to a temp file whose suffix matches the asset format.
pub fn stage(task_id: TaskId, handle: ResultHandle, bytes: Vec<u8>) -> Result<StagedAsset, ImportError> {
    let suffix = format!(".{}", handle.format.extension());
    let mut file = tempfile::Builder::new()
        .prefix("meshweaver-")
        .suffix(&suffix)
        .tempfile()
        .map_err(|e| ImportError::Stage(e.to_string()))?;
    file.write_all(&bytes)
        .and_then(|()| file.flush())
        .map_err(|e| ImportError::Stage(e.to_string()))?;
    Ok(StagedAsset::new(task_id, handle, bytes, file))
}

/// Hand staged assets to the host. Consumes them, so their temp files are
/// gone once this returns.
pub fn apply(task_id: TaskId, fetched: Vec<Fetched>, sink: &mut dyn AssetSink) -> ImportReport {
    let outcomes = fetched
        .into_iter()
        .map(|f| match f {
            Fetched::Staged(asset) => {
                let result = sink.apply_asset(&asset).map_err(ImportError::Apply);
                if let Err(error) = &result {
                    warn!(%task_id, url = %asset.handle.url, %error, "host rejected asset");
                }
                HandleOutcome {
                    handle: asset.handle.clone(),
                    result,
                }
            }
            Fetched::Failed { handle, error } => HandleOutcome {
                handle,
                result: Err(error),
            },
        })
        .collect();
    ImportReport { task_id, outcomes }
}
