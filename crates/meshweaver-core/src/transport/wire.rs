//! Wire format of the generation API.
//!
//! Every response is wrapped in `{ "code": 0, "data": ..., "message": ... }`.
//! Unknown fields are ignored throughout.

use std::str::FromStr;

use serde::Deserialize;
use serde_json::Value;

use crate::domain::errors::TransportError;
use crate::domain::ids::RemoteTaskId;
use crate::domain::outcome::{AssetFormat, Balance, PollReport, RemoteStatus, ResultHandle};
use crate::domain::request::{FileToken, ImageFormat, ModelVersion};

/// Candidate result fields, best first for v2 and later models.
const MODEL_FIELDS: [&str; 3] = ["pbr_model", "base_model", "model"];

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

/// Envelope code for an internal server error.
const CODE_SERVER_ERROR: i64 = 1000;
/// Envelope code for "generation rate limit exceeded".
const CODE_RATE_LIMITED: i64 = 2000;
/// Envelope code for "task not found".
const CODE_NOT_FOUND: i64 = 2001;

/// Unwrap the envelope of a 2xx body into its `data`.
pub fn unwrap_envelope(body: &str) -> Result<Value, TransportError> {
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| TransportError::Protocol(format!("invalid JSON body: {e}")))?;
    if envelope.code != 0 {
        let message = envelope
            .message
            .unwrap_or_else(|| format!("error code {}", envelope.code));
        return Err(classify_code(envelope.code, message));
    }
    envelope
        .data
        .ok_or_else(|| TransportError::Protocol("response has no `data`".into()))
}

/// Map a non-zero envelope code onto the transport taxonomy. Codes this
/// client does not know are treated as a rejected request.
pub fn classify_code(code: i64, message: String) -> TransportError {
    match code {
        CODE_SERVER_ERROR => TransportError::ServerError { status: 500, message },
        CODE_RATE_LIMITED => TransportError::RateLimited { retry_after: None },
        CODE_NOT_FOUND => TransportError::NotFound(message),
        _ => TransportError::Validation(message),
    }
}

pub fn parse_task_id(data: &Value) -> Result<RemoteTaskId, TransportError> {
    data.get("task_id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(RemoteTaskId::new)
        .ok_or_else(|| TransportError::Protocol("create response has no `task_id`".into()))
}

pub fn parse_balance(data: &Value) -> Result<Balance, TransportError> {
    serde_json::from_value(data.clone())
        .map_err(|e| TransportError::Protocol(format!("invalid balance: {e}")))
}

pub fn parse_upload(data: &Value, format: ImageFormat) -> Result<FileToken, TransportError> {
    ["image_token", "file_token", "token"]
        .iter()
        .find_map(|k| data.get(*k).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
        .map(|token| FileToken {
            token: token.to_string(),
            format,
        })
        .ok_or_else(|| TransportError::Protocol("upload response has no token".into()))
}

/// Decode the `data` of a task lookup.
pub fn parse_task(data: &Value) -> Result<PollReport, TransportError> {
    let status = data
        .get("status")
        .and_then(Value::as_str)
        .map(RemoteStatus::parse)
        .ok_or_else(|| TransportError::Protocol("task has no `status`".into()))?;
    let progress = data
        .get("progress")
        .and_then(Value::as_f64)
        .map(|p| p.clamp(0.0, 100.0) as u8)
        .unwrap_or(0);

    match status {
        RemoteStatus::Success => {
            let version = data
                .pointer("/input/model_version")
                .and_then(Value::as_str)
                .and_then(|v| ModelVersion::from_str(v).ok())
                .unwrap_or_default();
            Ok(PollReport::success(result_handles(data, version)))
        }
        s if s.is_in_progress() => {
            let report = PollReport::in_progress(s, progress);
            let eta = data
                .get("running_left_time")
                .and_then(Value::as_f64)
                .filter(|t| t.is_finite() && *t >= 0.0);
            Ok(match eta {
                Some(t) => report.with_eta(t.min(f64::from(u32::MAX)) as u32),
                None => report,
            })
        }
        s => {
            let message = ["error_msg", "message", "error"]
                .iter()
                .find_map(|k| data.get(*k).and_then(Value::as_str))
                .unwrap_or("no details given")
                .to_string();
            Ok(PollReport::failed(s, message))
        }
    }
}

/// Model handle (by version preference) followed by the rendered preview.
///
/// Reads both the `output` shape (plain URL strings) and the older `result`
/// shape (`{ "url": ..., "type": ... }` objects).
pub fn result_handles(data: &Value, version: ModelVersion) -> Vec<ResultHandle> {
    let mut fields = MODEL_FIELDS;
    if !version.supports_advanced() {
        fields.reverse();
    }

    let mut handles = Vec::new();
    if let Some(model) = fields.iter().find_map(|f| model_handle(data, f)) {
        handles.push(model);
    }
    let preview = data
        .pointer("/output/rendered_image")
        .and_then(Value::as_str)
        .or_else(|| data.pointer("/result/rendered_image/url").and_then(Value::as_str));
    if let Some(url) = preview.filter(|u| !u.is_empty()) {
        handles.push(ResultHandle::preview(url));
    }
    handles
}

fn model_handle(data: &Value, field: &str) -> Option<ResultHandle> {
    if let Some(url) = data
        .get("output")
        .and_then(|o| o.get(field))
        .and_then(Value::as_str)
        .filter(|u| !u.is_empty())
    {
        return Some(ResultHandle::model(url, AssetFormat::from_url(url)));
    }

    let entry = data.get("result")?.get(field)?;
    let url = entry.get("url").and_then(Value::as_str).filter(|u| !u.is_empty())?;
    let format = entry
        .get("type")
        .and_then(Value::as_str)
        .map(AssetFormat::parse)
        .filter(|f| *f != AssetFormat::Other)
        .unwrap_or_else(|| AssetFormat::from_url(url));
    Some(ResultHandle::model(url, format))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::outcome::HandleRole;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn envelope_with_error_code_is_rejected() {
        let err = unwrap_envelope(r#"{"code":2010,"message":"prompt rejected"}"#).unwrap_err();
        assert_eq!(err, TransportError::Validation("prompt rejected".into()));

        let err = unwrap_envelope("not json").unwrap_err();
        assert!(matches!(err, TransportError::Protocol(_)));

        let data = unwrap_envelope(r#"{"code":0,"data":{"task_id":"T1"},"extra":1}"#).unwrap();
        assert_eq!(parse_task_id(&data).unwrap(), RemoteTaskId::new("T1"));
    }

    #[rstest]
    #[case(1000, TransportError::ServerError { status: 500, message: "busy".into() })]
    #[case(2000, TransportError::RateLimited { retry_after: None })]
    #[case(2001, TransportError::NotFound("busy".into()))]
    #[case(2010, TransportError::Validation("busy".into()))]
    fn envelope_codes_keep_their_class(#[case] code: i64, #[case] expected: TransportError) {
        let body = json!({"code": code, "message": "busy"}).to_string();
        assert_eq!(unwrap_envelope(&body).unwrap_err(), expected);
    }

    #[test]
    fn transient_envelope_codes_are_retried() {
        assert!(classify_code(1000, "x".into()).is_transient());
        assert!(classify_code(2000, "x".into()).is_transient());
        assert!(!classify_code(2001, "x".into()).is_transient());
        assert!(!classify_code(2010, "x".into()).is_transient());
    }

    #[test]
    fn running_task_reports_progress() {
        let report = parse_task(&json!({"task_id": "T1", "status": "running", "progress": 40})).unwrap();
        assert_eq!(report, PollReport::in_progress(RemoteStatus::Running, 40));
    }

    #[test]
    fn running_task_reports_time_left() {
        let report = parse_task(&json!({"status": "running", "progress": 10, "running_left_time": 37.6})).unwrap();
        assert_eq!(report.eta_secs, Some(37));

        let queued = parse_task(&json!({"status": "queued", "running_left_time": -1})).unwrap();
        assert_eq!(queued.eta_secs, None);

        let done = parse_task(&json!({"status": "success", "running_left_time": 5, "output": {}})).unwrap();
        assert_eq!(done.eta_secs, None);
    }

    #[test]
    fn v2_prefers_pbr_model_and_adds_preview() {
        let data = json!({
            "status": "success",
            "input": {"model_version": "v2.5-20250123"},
            "output": {
                "model": "https://cdn/x/model.glb",
                "pbr_model": "https://cdn/x/pbr.glb?sig=1",
                "rendered_image": "https://cdn/x/preview.webp"
            }
        });
        let report = parse_task(&data).unwrap();
        assert_eq!(report.status, RemoteStatus::Success);
        assert_eq!(report.result_handles.len(), 2);
        assert_eq!(report.result_handles[0].url, "https://cdn/x/pbr.glb?sig=1");
        assert_eq!(report.result_handles[0].format, AssetFormat::Glb);
        assert_eq!(report.result_handles[1].role, HandleRole::Preview);
        assert_eq!(report.result_handles[1].format, AssetFormat::Webp);
    }

    #[test]
    fn v1_prefers_plain_model_in_legacy_shape() {
        let data = json!({
            "status": "success",
            "input": {"model_version": "v1.4-20240625"},
            "result": {
                "pbr_model": {"url": "https://cdn/x/pbr", "type": "glb"},
                "model": {"url": "https://cdn/x/base", "type": "fbx"}
            }
        });
        let handles = parse_task(&data).unwrap().result_handles;
        assert_eq!(handles, vec![ResultHandle::model("https://cdn/x/base", AssetFormat::Fbx)]);
    }

    #[test]
    fn success_without_urls_has_no_handles() {
        let handles = parse_task(&json!({"status": "success", "output": {}})).unwrap().result_handles;
        assert!(handles.is_empty());
    }

    #[test]
    fn failure_carries_message() {
        let report = parse_task(&json!({"status": "banned", "error_msg": "content policy"})).unwrap();
        assert_eq!(report.status, RemoteStatus::Banned);
        assert_eq!(report.message.as_deref(), Some("content policy"));
    }

    #[test]
    fn upload_and_balance_shapes() {
        let token = parse_upload(&json!({"image_token": "tok"}), ImageFormat::Png).unwrap();
        assert_eq!(token.token, "tok");
        assert!(parse_upload(&json!({}), ImageFormat::Png).is_err());

        let balance = parse_balance(&json!({"balance": 120.5, "frozen": 20})).unwrap();
        assert_eq!(balance.balance, 120.5);
        assert_eq!(balance.frozen, 20.0);
    }
}
