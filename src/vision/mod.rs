//! Vision-model call contract shared by the generation and judging passes.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

pub mod openai;

/// Quality hint attached to an image block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageDetail {
    /// Low-resolution pass (cheapest).
    #[default]
    Low,
    /// High-resolution pass.
    High,
    /// Provider decides.
    Auto,
}

/// One block of user content.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    /// Plain text.
    Text(String),
    /// Reference to a remote image.
    Image {
        /// Dereferenceable image locator.
        url: String,
        /// Resolution hint.
        detail: ImageDetail,
    },
}

/// Shape the caller expects back.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseFormat {
    /// Free text.
    Text,
    /// A JSON object matching `schema`.
    JsonSchema {
        /// Schema name reported to the provider.
        name: &'static str,
        /// JSON Schema document.
        schema: Value,
    },
}

/// A single model call.
#[derive(Debug, Clone, PartialEq)]
pub struct VisionRequest {
    /// System instruction.
    pub system: String,
    /// User content blocks, in order.
    pub content: Vec<ContentBlock>,
    /// Output token budget.
    pub max_tokens: u32,
    /// Sampling temperature; `None` leaves the provider default.
    pub temperature: Option<f32>,
    /// Expected response shape.
    pub format: ResponseFormat,
}

impl VisionRequest {
    /// Concatenates the text blocks, mostly useful for inspection in tests.
    pub fn user_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text(text) => Some(text.as_str()),
                ContentBlock::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// First image locator in the request, if any.
    pub fn image_url(&self) -> Option<&str> {
        self.content.iter().find_map(|block| match block {
            ContentBlock::Image { url, .. } => Some(url.as_str()),
            ContentBlock::Text(_) => None,
        })
    }
}

/// Failures raised by a model transport.
#[derive(Debug)]
pub enum VisionError {
    /// Connection, timeout or other transport problem.
    Transport(String),
    /// Non-success HTTP status.
    Status {
        /// Status code returned by the provider.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },
    /// Response body could not be decoded.
    Decode(String),
    /// The provider answered without any content.
    EmptyResponse,
    /// Structured output did not satisfy the declared schema.
    Schema(String),
}

impl fmt::Display for VisionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VisionError::Transport(err) => write!(f, "transport error: {err}"),
            VisionError::Status { status, body } => {
                write!(f, "provider returned {status}: {body}")
            }
            VisionError::Decode(err) => write!(f, "failed to decode response: {err}"),
            VisionError::EmptyResponse => f.write_str("response contained no content"),
            VisionError::Schema(err) => write!(f, "structured response rejected: {err}"),
        }
    }
}

impl std::error::Error for VisionError {}

/// Anything that can answer a [`VisionRequest`] with text.
pub trait VisionModel: Sync {
    /// Issues one call and returns the raw text of the model's answer.
    fn complete(&self, request: &VisionRequest) -> Result<String, VisionError>;
}

impl<F> VisionModel for F
where
    F: Fn(&VisionRequest) -> Result<String, VisionError> + Sync,
{
    fn complete(&self, request: &VisionRequest) -> Result<String, VisionError> {
        self(request)
    }
}

/// Identifies a call in diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    /// Record identity.
    pub image_id: &'a str,
    /// Pipeline phase (`generation`, `refinement`, `judging`).
    pub phase: &'a str,
    /// Variant label for judging calls.
    pub variant: Option<&'a str>,
}

/// Calls the model for free text. Failures are logged and reported as `None`;
/// they never propagate past this point.
pub fn request_text<M>(model: &M, request: &VisionRequest, ctx: CallContext<'_>) -> Option<String>
where
    M: VisionModel + ?Sized,
{
    match model.complete(request) {
        Ok(text) => {
            let text = text.trim();
            if text.is_empty() {
                log_failure(&VisionError::EmptyResponse, ctx);
                None
            } else {
                Some(text.to_string())
            }
        }
        Err(err) => {
            log_failure(&err, ctx);
            None
        }
    }
}

/// Calls the model for a structured answer and decodes it into `T`.
///
/// `validate` runs after decoding; a rejected value is treated like any other
/// failed call.
pub fn request_structured<M, T, V>(
    model: &M,
    request: &VisionRequest,
    ctx: CallContext<'_>,
    validate: V,
) -> Option<T>
where
    M: VisionModel + ?Sized,
    T: DeserializeOwned,
    V: FnOnce(&T) -> Result<(), String>,
{
    let parsed = model.complete(request).and_then(|raw| {
        let value: T = serde_json::from_str(strip_code_fence(&raw))
            .map_err(|err| VisionError::Decode(err.to_string()))?;
        validate(&value).map_err(VisionError::Schema)?;
        Ok(value)
    });
    match parsed {
        Ok(value) => Some(value),
        Err(err) => {
            log_failure(&err, ctx);
            None
        }
    }
}

fn log_failure(err: &VisionError, ctx: CallContext<'_>) {
    match ctx.variant {
        Some(variant) => tracing::error!(
            image_id = ctx.image_id,
            phase = ctx.phase,
            variant,
            "{} call failed: {}",
            ctx.phase,
            err
        ),
        None => tracing::error!(
            image_id = ctx.image_id,
            phase = ctx.phase,
            "{} call failed: {}",
            ctx.phase,
            err
        ),
    }
}

/// Models occasionally wrap JSON in a Markdown fence even when asked not to.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
