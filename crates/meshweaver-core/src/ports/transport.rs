//! Transport port - リモート生成サービスへの抽象化
//!
//! Every method returns a classified `TransportError`; the scheduler is the
//! only place that turns those into state transitions. Implementations must
//! put a bounded timeout on every call.

use std::path::Path;

use async_trait::async_trait;

use crate::domain::errors::TransportError;
use crate::domain::ids::RemoteTaskId;
use crate::domain::outcome::{Balance, PollReport, ResultHandle};
use crate::domain::request::{FileToken, GenerationRequest};

#[async_trait]
pub trait Transport: Send + Sync {
    /// Create a remote task. `request` must have no unresolved local images.
    async fn create(&self, request: &GenerationRequest) -> Result<RemoteTaskId, TransportError>;

    async fn poll(&self, remote_id: &RemoteTaskId) -> Result<PollReport, TransportError>;

    async fn get_balance(&self) -> Result<Balance, TransportError>;

    /// Upload a local image, returning the token create refers to.
    async fn upload(&self, path: &Path) -> Result<FileToken, TransportError>;

    async fn fetch_asset(&self, handle: &ResultHandle) -> Result<Vec<u8>, TransportError>;

    /// Best-effort remote cancel. `Ok(false)` means the service has no way to
    /// cancel (the default).
    async fn cancel(&self, _remote_id: &RemoteTaskId) -> Result<bool, TransportError> {
        Ok(false)
    }
}
