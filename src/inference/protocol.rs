//! Image-Inference Wire Protocol
//!
//! Single responsibility: Build outgoing task messages and classify inbound frames.
//!
//! # Wire Format
//!
//! Every frame in either direction is a JSON document. Outgoing frames are arrays
//! of task items:
//!
//! ```text
//! [{ "taskType": "authentication", "apiKey": "...", "connectionSessionUUID": "..." }]
//! [{ "taskType": "imageInference", "taskUUID": "...", "positivePrompt": "...", ... }]
//! ```
//!
//! Inbound frames batch results under `data`, or report failures under `errors`:
//!
//! ```text
//! { "data":   [{ "taskType": "authentication", "connectionSessionUUID": "..." }] }
//! { "data":   [{ "taskType": "imageInference", "taskUUID": "...", "imageURL": "...", ... }] }
//! { "errors": [{ "code": "...", "message": "...", "taskUUID": "..." }] }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::AdforgeError;

pub const TASK_TYPE_AUTHENTICATION: &str = "authentication";
pub const TASK_TYPE_IMAGE_INFERENCE: &str = "imageInference";

pub const DEFAULT_MODEL: &str = "runware:100@1";
pub const DEFAULT_DIMENSION: u32 = 1024;
pub const DEFAULT_RESULT_COUNT: u32 = 1;
pub const DEFAULT_OUTPUT_FORMAT: &str = "WEBP";
pub const DEFAULT_STEPS: u32 = 4;
pub const DEFAULT_CFG_SCALE: f64 = 1.0;
pub const DEFAULT_SCHEDULER: &str = "FlowMatchEulerDiscreteScheduler";
pub const DEFAULT_STRENGTH: f64 = 0.8;

/// Models that reject the `promptWeighting` field.
const MODELS_WITHOUT_PROMPT_WEIGHTING: &[&str] = &[DEFAULT_MODEL];

/// Prompt weighting syntax understood by the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PromptWeighting {
    Compel,
    SdEmbeds,
    None,
}

/// A caller's image request. Every field except `prompt` is optional and
/// falls back to the protocol defaults when composed into a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageRequest {
    pub prompt: String,
    pub model: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub result_count: Option<u32>,
    pub output_format: Option<String>,
    pub guidance_scale: Option<f64>,
    pub scheduler: Option<String>,
    pub strength: Option<f64>,
    pub steps: Option<u32>,
    pub seed: Option<u64>,
    pub lora: Option<Vec<String>>,
    pub prompt_weighting: Option<PromptWeighting>,
}

impl ImageRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_prompt_weighting(mut self, weighting: PromptWeighting) -> Self {
        self.prompt_weighting = Some(weighting);
        self
    }
}

/// An `imageInference` task exactly as it goes on the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageInferenceTask {
    pub task_type: &'static str,
    #[serde(rename = "taskUUID")]
    pub task_uuid: Uuid,
    pub positive_prompt: String,
    pub model: String,
    pub width: u32,
    pub height: u32,
    pub number_results: u32,
    pub output_format: String,
    pub steps: u32,
    #[serde(rename = "CFGScale")]
    pub cfg_scale: f64,
    pub scheduler: String,
    pub strength: f64,
    pub lora: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_weighting: Option<PromptWeighting>,
}

impl ImageInferenceTask {
    /// Merge a caller request with the protocol defaults.
    ///
    /// Caller values win unless zero or empty, which count as unset. A zero
    /// or absent seed is omitted, and `promptWeighting` is omitted for
    /// models that reject it.
    pub fn compose(task_uuid: Uuid, request: &ImageRequest) -> Self {
        let model = request
            .model
            .clone()
            .filter(|model| !model.is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let prompt_weighting = if MODELS_WITHOUT_PROMPT_WEIGHTING.contains(&model.as_str()) {
            None
        } else {
            request.prompt_weighting
        };

        Self {
            task_type: TASK_TYPE_IMAGE_INFERENCE,
            task_uuid,
            positive_prompt: request.prompt.clone(),
            model,
            width: nonzero(request.width).unwrap_or(DEFAULT_DIMENSION),
            height: nonzero(request.height).unwrap_or(DEFAULT_DIMENSION),
            number_results: nonzero(request.result_count).unwrap_or(DEFAULT_RESULT_COUNT),
            output_format: request
                .output_format
                .clone()
                .filter(|format| !format.is_empty())
                .unwrap_or_else(|| DEFAULT_OUTPUT_FORMAT.to_string()),
            steps: nonzero(request.steps).unwrap_or(DEFAULT_STEPS),
            cfg_scale: request
                .guidance_scale
                .filter(|scale| *scale != 0.0)
                .unwrap_or(DEFAULT_CFG_SCALE),
            scheduler: request
                .scheduler
                .clone()
                .filter(|scheduler| !scheduler.is_empty())
                .unwrap_or_else(|| DEFAULT_SCHEDULER.to_string()),
            strength: request
                .strength
                .filter(|strength| *strength != 0.0)
                .unwrap_or(DEFAULT_STRENGTH),
            lora: request.lora.clone().unwrap_or_default(),
            seed: request.seed.filter(|seed| *seed != 0),
            prompt_weighting,
        }
    }
}

fn nonzero(value: Option<u32>) -> Option<u32> {
    value.filter(|v| *v != 0)
}

/// The `authentication` task sent once per fresh connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationTask<'a> {
    pub task_type: &'static str,
    pub api_key: &'a str,
    #[serde(
        rename = "connectionSessionUUID",
        skip_serializing_if = "Option::is_none"
    )]
    pub session_token: Option<&'a str>,
}

impl<'a> AuthenticationTask<'a> {
    pub fn new(api_key: &'a str, session_token: Option<&'a str>) -> Self {
        Self {
            task_type: TASK_TYPE_AUTHENTICATION,
            api_key,
            session_token,
        }
    }
}

/// A successfully generated image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    #[serde(rename = "taskUUID")]
    pub task_uuid: Uuid,
    #[serde(rename = "imageURL")]
    pub image_url: String,
    #[serde(rename = "positivePrompt", default)]
    pub prompt: String,
    #[serde(default)]
    pub seed: u64,
    #[serde(rename = "NSFWContent", default)]
    pub flagged_content: bool,
}

/// One logical item extracted from an inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundItem {
    /// Authentication acknowledged with a session token.
    Authenticated { session_token: String },
    /// Authentication explicitly rejected or malformed.
    AuthenticationFailed { message: String },
    /// Result for one task, success or explicit failure.
    TaskResult {
        task_uuid: Uuid,
        outcome: Result<GeneratedImage, String>,
    },
    /// Carries neither an authentication result nor a task identifier.
    Unroutable { reason: String },
}

/// Serialize a single task item as a one-element batch.
pub fn encode_batch<T: Serialize>(item: &T) -> Result<String, AdforgeError> {
    Ok(serde_json::to_string(&[item])?)
}

/// Parse an inbound frame into its logical items.
///
/// A frame that is not JSON, or has neither `data` nor `errors`, is a protocol error.
pub fn parse_frame(raw: &str) -> Result<Vec<InboundItem>, AdforgeError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| AdforgeError::Protocol(format!("Invalid JSON frame: {}", e)))?;

    let frame = value
        .as_object()
        .ok_or_else(|| AdforgeError::Protocol("Frame is not an object".into()))?;

    let mut items = Vec::new();
    let mut recognised = false;

    if let Some(data) = frame.get("data") {
        recognised = true;
        let entries = data
            .as_array()
            .ok_or_else(|| AdforgeError::Protocol("'data' is not an array".into()))?;
        items.extend(entries.iter().map(classify_data_item));
    }

    for key in ["errors", "error"] {
        match frame.get(key) {
            Some(Value::Array(entries)) => {
                recognised = true;
                items.extend(entries.iter().map(classify_error_entry));
            }
            Some(Value::Bool(false)) | Some(Value::Null) | None => {}
            Some(other) => {
                recognised = true;
                items.push(classify_error_entry(other));
            }
        }
    }

    if !recognised {
        return Err(AdforgeError::Protocol(
            "Frame has neither 'data' nor 'errors'".into(),
        ));
    }

    Ok(items)
}

fn classify_data_item(item: &Value) -> InboundItem {
    if task_type(item) == Some(TASK_TYPE_AUTHENTICATION) {
        return match item.get("connectionSessionUUID").and_then(Value::as_str) {
            Some(token) if !token.is_empty() => InboundItem::Authenticated {
                session_token: token.to_string(),
            },
            _ => InboundItem::AuthenticationFailed {
                message: "Acknowledgement carried no session token".into(),
            },
        };
    }

    let Some(task_uuid) = task_uuid(item) else {
        return InboundItem::Unroutable {
            reason: format!("Item has no usable taskUUID: {}", item),
        };
    };

    let failed = item.get("error").map(is_truthy).unwrap_or(false);
    let outcome = if failed {
        Err(error_message(item))
    } else {
        serde_json::from_value::<GeneratedImage>(item.clone())
            .map_err(|e| format!("Malformed task result: {}", e))
    };

    InboundItem::TaskResult { task_uuid, outcome }
}

fn classify_error_entry(entry: &Value) -> InboundItem {
    let message = error_message(entry);

    if task_type(entry) == Some(TASK_TYPE_AUTHENTICATION) {
        return InboundItem::AuthenticationFailed { message };
    }

    match task_uuid(entry) {
        Some(task_uuid) => InboundItem::TaskResult {
            task_uuid,
            outcome: Err(message),
        },
        None => InboundItem::Unroutable { reason: message },
    }
}

fn task_type(item: &Value) -> Option<&str> {
    item.get("taskType").and_then(Value::as_str)
}

fn task_uuid(item: &Value) -> Option<Uuid> {
    item.get("taskUUID")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

fn error_message(entry: &Value) -> String {
    if let Some(text) = entry.as_str() {
        return text.to_string();
    }

    let message = ["errorMessage", "message"]
        .iter()
        .find_map(|key| entry.get(*key).and_then(Value::as_str))
        .unwrap_or("Unknown error");

    match entry.get("code").and_then(Value::as_str) {
        Some(code) => format!("{}: {}", code, message),
        None => message.to_string(),
    }
}
