//! DirectorySink - 取り込んだアセットをディレクトリに書き出す
//!
//! Stands in for a scene integration when there is no host application:
//! each asset lands as `<task id>-<role>.<ext>`.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::domain::outcome::HandleRole;
use crate::ports::{AssetSink, StagedAsset};

#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
    written: Vec<PathBuf>,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            written: Vec::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Files written so far.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    fn target(&self, asset: &StagedAsset) -> PathBuf {
        let role = match asset.handle.role {
            HandleRole::Model => "model",
            HandleRole::Preview => "preview",
        };
        self.dir.join(format!(
            "{}-{role}.{}",
            asset.task_id,
            asset.handle.format.extension()
        ))
    }
}

impl AssetSink for DirectorySink {
    fn apply_asset(&mut self, asset: &StagedAsset) -> Result<(), String> {
        std::fs::create_dir_all(&self.dir).map_err(|e| format!("{}: {e}", self.dir.display()))?;
        let target = self.target(asset);
        std::fs::copy(asset.path(), &target).map_err(|e| format!("{}: {e}", target.display()))?;
        info!(path = %target.display(), bytes = asset.bytes.len(), "asset written");
        if !self.written.contains(&target) {
            self.written.push(target);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::importer::stage;
    use crate::domain::ids::TaskId;
    use crate::domain::outcome::{AssetFormat, ResultHandle};
    use ulid::Ulid;

    #[test]
    fn writes_one_file_per_role_and_overwrites_on_reimport() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = DirectorySink::new(dir.path().join("out"));
        let task_id = TaskId::from_ulid(Ulid::new());

        let model = ResultHandle::model("https://cdn/m.glb", AssetFormat::Glb);
        let preview = ResultHandle::preview("https://cdn/p.webp");
        for _ in 0..2 {
            sink.apply_asset(&stage(task_id, model.clone(), b"mesh".to_vec()).unwrap())
                .unwrap();
        }
        sink.apply_asset(&stage(task_id, preview, b"img".to_vec()).unwrap())
            .unwrap();

        assert_eq!(sink.written().len(), 2);
        let model_path = dir.path().join("out").join(format!("{task_id}-model.glb"));
        assert_eq!(std::fs::read(model_path).unwrap(), b"mesh");
    }
}
