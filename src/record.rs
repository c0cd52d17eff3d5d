//! Article/image records flowing through the generation and judging passes.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Prefix prepended to a variant field name to form its judging key.
pub const JUDGING_PREFIX: &str = "judging_";

/// Processing state persisted alongside each record so re-runs can resume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Nothing has been produced for this record yet.
    #[default]
    Pending,
    /// Initial and refined alt text are present.
    Generated,
    /// Every present variant carries a judging result.
    Judged,
    /// The last pass over this record failed and it is eligible for retry.
    Failed,
}

impl RecordStatus {
    /// True for the default state, which is not written to disk.
    pub fn is_pending(&self) -> bool {
        matches!(self, RecordStatus::Pending)
    }

    /// Stable lowercase label used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Generated => "generated",
            RecordStatus::Judged => "judged",
            RecordStatus::Failed => "failed",
        }
    }
}

/// One article/image unit of work.
///
/// Fields the pipeline does not know about are kept in `extra` and written back
/// untouched, so loading and saving a record set never drops data. Variant texts
/// (`generated_<variant>`) and judging results (`judging_<variant>`) live there
/// too, because their names depend on the configured variants.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawRecord", into = "RawRecord")]
pub struct Record {
    /// Stable identity across the dataset.
    pub image_id: Option<String>,
    /// Article headline.
    pub headline: Option<String>,
    /// Article abstract (`abstract` on disk).
    pub abstract_text: Option<String>,
    /// Original image caption.
    pub caption: Option<String>,
    /// Image locator with the query string removed.
    pub image_url_clean: Option<String>,
    /// First-pass alt text.
    pub openai_alt_text_initial: Option<String>,
    /// Refined alt text (equals the initial text when refinement failed).
    pub openai_alt_text_refined: Option<String>,
    /// Resume marker.
    pub pipeline_status: RecordStatus,
    /// Typed fields that were present as an explicit `null` in the source.
    /// They are written back as `null` while they stay unset.
    pub null_fields: BTreeSet<String>,
    /// Every other field of the source record.
    pub extra: Map<String, Value>,
}

/// On-disk shape of a [`Record`]: the outer option is key presence, the inner
/// one is `null` vs. a string.
#[derive(Serialize, Deserialize)]
struct RawRecord {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    image_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    headline: Option<Option<String>>,
    #[serde(
        rename = "abstract",
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    abstract_text: Option<Option<String>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    caption: Option<Option<String>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    image_url_clean: Option<Option<String>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    openai_alt_text_initial: Option<Option<String>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    openai_alt_text_refined: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "RecordStatus::is_pending")]
    pipeline_status: RecordStatus,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

impl From<RawRecord> for Record {
    fn from(raw: RawRecord) -> Self {
        let mut null_fields = BTreeSet::new();
        let mut take = |key: &str, field: Option<Option<String>>| match field {
            Some(None) => {
                null_fields.insert(key.to_string());
                None
            }
            Some(value) => value,
            None => None,
        };
        let image_id = take("image_id", raw.image_id);
        let headline = take("headline", raw.headline);
        let abstract_text = take("abstract", raw.abstract_text);
        let caption = take("caption", raw.caption);
        let image_url_clean = take("image_url_clean", raw.image_url_clean);
        let openai_alt_text_initial = take("openai_alt_text_initial", raw.openai_alt_text_initial);
        let openai_alt_text_refined = take("openai_alt_text_refined", raw.openai_alt_text_refined);
        Record {
            image_id,
            headline,
            abstract_text,
            caption,
            image_url_clean,
            openai_alt_text_initial,
            openai_alt_text_refined,
            pipeline_status: raw.pipeline_status,
            null_fields,
            extra: raw.extra,
        }
    }
}

impl From<Record> for RawRecord {
    fn from(record: Record) -> Self {
        let nulls = &record.null_fields;
        let put = |key: &str, value: Option<String>| match value {
            Some(text) => Some(Some(text)),
            None if nulls.contains(key) => Some(None),
            None => None,
        };
        RawRecord {
            image_id: put("image_id", record.image_id),
            headline: put("headline", record.headline),
            abstract_text: put("abstract", record.abstract_text),
            caption: put("caption", record.caption),
            image_url_clean: put("image_url_clean", record.image_url_clean),
            openai_alt_text_initial: put("openai_alt_text_initial", record.openai_alt_text_initial),
            openai_alt_text_refined: put("openai_alt_text_refined", record.openai_alt_text_refined),
            pipeline_status: record.pipeline_status,
            extra: record.extra,
        }
    }
}

impl Record {
    /// Identity used in log lines; falls back to a placeholder when absent.
    pub fn id(&self) -> &str {
        self.image_id.as_deref().unwrap_or("<no image_id>")
    }

    /// Headline or an empty string.
    pub fn headline(&self) -> &str {
        self.headline.as_deref().unwrap_or_default()
    }

    /// Abstract or an empty string.
    pub fn abstract_text(&self) -> &str {
        self.abstract_text.as_deref().unwrap_or_default()
    }

    /// Caption or an empty string.
    pub fn caption(&self) -> &str {
        self.caption.as_deref().unwrap_or_default()
    }

    /// Returns the cleaned image URL when it is present and non-blank.
    pub fn image_url(&self) -> Option<&str> {
        self.image_url_clean
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// True once both alt-text fields have been written.
    pub fn has_alt_text(&self) -> bool {
        self.openai_alt_text_initial.is_some() && self.openai_alt_text_refined.is_some()
    }

    /// Reads a string field from the untyped remainder of the record.
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }

    /// Returns the generated text stored under `field`, treating absent, null
    /// and blank values as "not generated".
    pub fn generated_text(&self, field: &str) -> Result<Option<&str>, RecordError> {
        match self.extra.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(text)) if text.trim().is_empty() => Ok(None),
            Some(Value::String(text)) => Ok(Some(text.as_str())),
            Some(other) => Err(RecordError::MalformedField {
                image_id: self.id().to_string(),
                field: field.to_string(),
                found: value_kind(other),
            }),
        }
    }

    /// Raw judging entry for a variant: `None` when never attempted,
    /// `Some(Value::Null)` when attempted and failed.
    pub fn judging_entry(&self, variant_field: &str) -> Option<&Value> {
        self.extra.get(&judging_key(variant_field))
    }

    /// Writes the judging outcome for a variant; `None` is stored as an explicit null.
    pub fn set_judging(&mut self, variant_field: &str, value: Option<Value>) {
        self.extra
            .insert(judging_key(variant_field), value.unwrap_or(Value::Null));
    }
}

/// Key under which a variant's judging result is stored.
pub fn judging_key(variant_field: &str) -> String {
    format!("{JUDGING_PREFIX}{variant_field}")
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Record shapes the pipeline cannot process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// A field expected to hold text holds another JSON type.
    MalformedField {
        /// Record identity.
        image_id: String,
        /// Offending field name.
        field: String,
        /// JSON type actually found.
        found: &'static str,
    },
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordError::MalformedField {
                image_id,
                field,
                found,
            } => write!(
                f,
                "record {image_id}: field `{field}` must be a string, found {found}"
            ),
        }
    }
}

impl std::error::Error for RecordError {}
