//! RecordingSink - 取り込まれたアセットを記録するだけの AssetSink

use std::path::PathBuf;

use crate::domain::ids::TaskId;
use crate::domain::outcome::ResultHandle;
use crate::ports::{AssetSink, StagedAsset};

#[derive(Debug, Clone, PartialEq)]
pub struct AppliedAsset {
    pub task_id: TaskId,
    pub handle: ResultHandle,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    pub applied: Vec<AppliedAsset>,
    /// Staged paths handed in, accepted or not.
    pub seen_paths: Vec<PathBuf>,
    reject_with: Option<String>,
}

impl RecordingSink {
    /// A sink that refuses every asset with `reason`.
    pub fn rejecting(reason: impl Into<String>) -> Self {
        Self {
            reject_with: Some(reason.into()),
            ..Self::default()
        }
    }
}

impl AssetSink for RecordingSink {
    fn apply_asset(&mut self, asset: &StagedAsset) -> Result<(), String> {
        self.seen_paths.push(asset.path().to_path_buf());
        if let Some(reason) = &self.reject_with {
            return Err(reason.clone());
        }
        self.applied.push(AppliedAsset {
            task_id: asset.task_id,
            handle: asset.handle.clone(),
            bytes: asset.bytes.clone(),
        });
        Ok(())
    }
}
