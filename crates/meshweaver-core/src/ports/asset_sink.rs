//! AssetSink port - ホスト側のシーン統合ポイント
//!
//! Called on the host thread during `tick`, one staged asset at a time.

use std::path::Path;

use tempfile::NamedTempFile;

use crate::domain::ids::TaskId;
use crate::domain::outcome::ResultHandle;

/// A downloaded asset sitting in a temporary file.
///
/// The file is removed when this value is dropped, whatever the sink did
/// with it. Sinks that want to keep the data must copy it.
#[derive(Debug)]
pub struct StagedAsset {
    pub task_id: TaskId,
    pub handle: ResultHandle,
    pub bytes: Vec<u8>,
    file: NamedTempFile,
}

impl StagedAsset {
    pub(crate) fn new(task_id: TaskId, handle: ResultHandle, bytes: Vec<u8>, file: NamedTempFile) -> Self {
        Self {
            task_id,
            handle,
            bytes,
            file,
        }
    }

    /// Path of the staged file (suffix matches the asset format).
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

pub trait AssetSink {
    /// Place the asset into the host scene.
    fn apply_asset(&mut self, asset: &StagedAsset) -> Result<(), String>;
}

impl<S: AssetSink + ?Sized> AssetSink for &mut S {
    fn apply_asset(&mut self, asset: &StagedAsset) -> Result<(), String> {
        (**self).apply_asset(asset)
    }
}
