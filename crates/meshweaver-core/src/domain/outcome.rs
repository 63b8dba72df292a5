//! Outcome model: what the remote service reports back.
//!
//! Shapes here are transport-agnostic; the HTTP wire decoding lives in
//! `transport::wire`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Remote task status as reported by a poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    Queued,
    Running,
    Success,
    Failed,
    Cancelled,
    Banned,
    Expired,
    /// Anything this client does not know; treated as a failure.
    Unknown(String),
}

impl RemoteStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "queued" => RemoteStatus::Queued,
            "running" => RemoteStatus::Running,
            "success" | "completed" => RemoteStatus::Success,
            "failed" => RemoteStatus::Failed,
            "cancelled" => RemoteStatus::Cancelled,
            "banned" => RemoteStatus::Banned,
            "expired" => RemoteStatus::Expired,
            other => RemoteStatus::Unknown(other.to_string()),
        }
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, RemoteStatus::Queued | RemoteStatus::Running)
    }
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteStatus::Queued => f.write_str("queued"),
            RemoteStatus::Running => f.write_str("running"),
            RemoteStatus::Success => f.write_str("success"),
            RemoteStatus::Failed => f.write_str("failed"),
            RemoteStatus::Cancelled => f.write_str("cancelled"),
            RemoteStatus::Banned => f.write_str("banned"),
            RemoteStatus::Expired => f.write_str("expired"),
            RemoteStatus::Unknown(s) => write!(f, "unknown ({s})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetFormat {
    Glb,
    Fbx,
    Obj,
    Stl,
    Usdz,
    Png,
    Jpeg,
    Webp,
    Other,
}

impl AssetFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "glb" | "gltf" => AssetFormat::Glb,
            "fbx" => AssetFormat::Fbx,
            "obj" => AssetFormat::Obj,
            "stl" => AssetFormat::Stl,
            "usdz" => AssetFormat::Usdz,
            "png" => AssetFormat::Png,
            "jpg" | "jpeg" => AssetFormat::Jpeg,
            "webp" => AssetFormat::Webp,
            _ => AssetFormat::Other,
        }
    }

    /// Guess from the path part of a (possibly presigned) URL.
    pub fn from_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        path.rsplit_once('.')
            .map(|(_, ext)| AssetFormat::parse(ext))
            .unwrap_or(AssetFormat::Other)
    }

    pub fn extension(self) -> &'static str {
        match self {
            AssetFormat::Glb => "glb",
            AssetFormat::Fbx => "fbx",
            AssetFormat::Obj => "obj",
            AssetFormat::Stl => "stl",
            AssetFormat::Usdz => "usdz",
            AssetFormat::Png => "png",
            AssetFormat::Jpeg => "jpg",
            AssetFormat::Webp => "webp",
            AssetFormat::Other => "bin",
        }
    }

    pub fn is_mesh(self) -> bool {
        matches!(
            self,
            AssetFormat::Glb | AssetFormat::Fbx | AssetFormat::Obj | AssetFormat::Stl | AssetFormat::Usdz
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleRole {
    /// The generated mesh bundle.
    Model,
    /// Rendered preview image.
    Preview,
}

/// Opaque reference to a downloadable generated asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResultHandle {
    pub url: String,
    pub format: AssetFormat,
    pub role: HandleRole,
}

impl ResultHandle {
    pub fn model(url: impl Into<String>, format: AssetFormat) -> Self {
        Self {
            url: url.into(),
            format,
            role: HandleRole::Model,
        }
    }

    pub fn preview(url: impl Into<String>) -> Self {
        let url = url.into();
        let format = AssetFormat::from_url(&url);
        Self {
            url,
            format,
            role: HandleRole::Preview,
        }
    }
}

/// One poll of a remote task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollReport {
    pub status: RemoteStatus,
    /// 0-100 as reported.
    pub progress: u8,
    /// Ordered: model first, then previews. Empty unless `status` is success.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub result_handles: Vec<ResultHandle>,
    /// Remote failure description, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Service estimate of the seconds left, while in progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_secs: Option<u32>,
}

impl PollReport {
    pub fn in_progress(status: RemoteStatus, progress: u8) -> Self {
        Self {
            status,
            progress,
            result_handles: Vec::new(),
            message: None,
            eta_secs: None,
        }
    }

    pub fn with_eta(mut self, secs: u32) -> Self {
        self.eta_secs = Some(secs);
        self
    }

    pub fn success(result_handles: Vec<ResultHandle>) -> Self {
        Self {
            status: RemoteStatus::Success,
            progress: 100,
            result_handles,
            message: None,
            eta_secs: None,
        }
    }

    pub fn failed(status: RemoteStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            progress: 0,
            result_handles: Vec::new(),
            message: Some(message.into()),
            eta_secs: None,
        }
    }
}

/// Account balance in credits.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Balance {
    pub balance: f64,
    /// Credits held by running tasks.
    #[serde(default)]
    pub frozen: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_status_parses_known_and_unknown() {
        assert_eq!(RemoteStatus::parse("queued"), RemoteStatus::Queued);
        assert_eq!(RemoteStatus::parse("completed"), RemoteStatus::Success);
        assert_eq!(
            RemoteStatus::parse("exploded"),
            RemoteStatus::Unknown("exploded".into())
        );
        assert!(RemoteStatus::Running.is_in_progress());
        assert!(!RemoteStatus::Success.is_in_progress());
    }

    #[test]
    fn asset_format_from_presigned_url() {
        assert_eq!(
            AssetFormat::from_url("https://cdn.example/x/model.glb?sig=abc.def"),
            AssetFormat::Glb
        );
        assert_eq!(AssetFormat::from_url("https://cdn.example/x/preview.webp"), AssetFormat::Webp);
        assert_eq!(AssetFormat::from_url("https://cdn.example/blob"), AssetFormat::Other);
        assert!(AssetFormat::Fbx.is_mesh());
        assert!(!AssetFormat::Png.is_mesh());
    }
}
