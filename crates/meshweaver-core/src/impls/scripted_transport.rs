//! ScriptedTransport - テスト・デモ用のインメモリ Transport
//!
//! # 学習ポイント
//! - 結果をキューで事前に仕込む（remote id ごと）
//! - 呼び出しログで「何回呼ばれたか」を検証する
//!
//! Unscripted calls fall back to harmless defaults: create hands out
//! `remote-N`, poll reports `queued`, balance is 1000 credits.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::domain::errors::TransportError;
use crate::domain::ids::RemoteTaskId;
use crate::domain::outcome::{Balance, PollReport, RemoteStatus, ResultHandle};
use crate::domain::request::{FileToken, GenerationRequest, ImageFormat};
use crate::ports::Transport;

/// One recorded call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Create,
    Poll(RemoteTaskId),
    Balance,
    Upload(PathBuf),
    FetchAsset(String),
    Cancel(RemoteTaskId),
}

struct Script {
    creates: VecDeque<Result<RemoteTaskId, TransportError>>,
    polls: HashMap<String, VecDeque<Result<PollReport, TransportError>>>,
    balances: VecDeque<Result<Balance, TransportError>>,
    balance: Balance,
    assets: HashMap<String, Result<Vec<u8>, TransportError>>,
    cancel_supported: bool,
    next_remote: u32,
    created: Vec<GenerationRequest>,
    calls: Vec<Call>,
}

pub struct ScriptedTransport {
    script: Mutex<Script>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script {
                creates: VecDeque::new(),
                polls: HashMap::new(),
                balances: VecDeque::new(),
                balance: Balance {
                    balance: 1000.0,
                    frozen: 0.0,
                },
                assets: HashMap::new(),
                cancel_supported: false,
                next_remote: 1,
                created: Vec::new(),
                calls: Vec::new(),
            }),
        }
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push_create(&self, result: Result<RemoteTaskId, TransportError>) {
        self.script().creates.push_back(result);
    }

    pub fn push_poll(&self, remote_id: &str, result: Result<PollReport, TransportError>) {
        self.script()
            .polls
            .entry(remote_id.to_string())
            .or_default()
            .push_back(result);
    }

    /// One-shot balance result; afterwards the standing balance applies.
    pub fn push_balance(&self, result: Result<Balance, TransportError>) {
        self.script().balances.push_back(result);
    }

    /// Standing balance.
    pub fn set_balance(&self, balance: f64) {
        self.script().balance.balance = balance;
    }

    pub fn asset(&self, url: &str, bytes: Vec<u8>) {
        self.script().assets.insert(url.to_string(), Ok(bytes));
    }

    pub fn asset_error(&self, url: &str, error: TransportError) {
        self.script().assets.insert(url.to_string(), Err(error));
    }

    pub fn with_cancel_support(self) -> Self {
        self.script().cancel_supported = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script().calls.clone()
    }

    /// Requests exactly as create saw them (uploads resolved).
    pub fn created_requests(&self) -> Vec<GenerationRequest> {
        self.script().created.clone()
    }

    pub fn create_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::Create))
    }

    pub fn balance_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::Balance))
    }

    pub fn poll_calls(&self, remote_id: &str) -> usize {
        self.count(|c| matches!(c, Call::Poll(r) if r.as_str() == remote_id))
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.script().calls.iter().filter(|c| pred(c)).count()
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn create(&self, request: &GenerationRequest) -> Result<RemoteTaskId, TransportError> {
        let mut s = self.script();
        s.calls.push(Call::Create);
        s.created.push(request.clone());
        match s.creates.pop_front() {
            Some(result) => result,
            None => {
                let id = RemoteTaskId::new(format!("remote-{}", s.next_remote));
                s.next_remote += 1;
                Ok(id)
            }
        }
    }

    async fn poll(&self, remote_id: &RemoteTaskId) -> Result<PollReport, TransportError> {
        let mut s = self.script();
        s.calls.push(Call::Poll(remote_id.clone()));
        s.polls
            .get_mut(remote_id.as_str())
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(PollReport::in_progress(RemoteStatus::Queued, 0)))
    }

    async fn get_balance(&self) -> Result<Balance, TransportError> {
        let mut s = self.script();
        s.calls.push(Call::Balance);
        let standing = s.balance;
        s.balances.pop_front().unwrap_or(Ok(standing))
    }

    async fn upload(&self, path: &Path) -> Result<FileToken, TransportError> {
        let mut s = self.script();
        s.calls.push(Call::Upload(path.to_path_buf()));
        let format = path
            .extension()
            .and_then(|e| ImageFormat::from_extension(&e.to_string_lossy()))
            .ok_or_else(|| TransportError::Validation(format!("not an image: {}", path.display())))?;
        let stem = path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(FileToken {
            token: format!("token-{stem}"),
            format,
        })
    }

    async fn fetch_asset(&self, handle: &ResultHandle) -> Result<Vec<u8>, TransportError> {
        let mut s = self.script();
        s.calls.push(Call::FetchAsset(handle.url.clone()));
        s.assets
            .get(&handle.url)
            .cloned()
            .unwrap_or_else(|| Err(TransportError::NotFound(handle.url.clone())))
    }

    async fn cancel(&self, remote_id: &RemoteTaskId) -> Result<bool, TransportError> {
        let mut s = self.script();
        s.calls.push(Call::Cancel(remote_id.clone()));
        Ok(s.cancel_supported)
    }
}
