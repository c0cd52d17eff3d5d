//! Rubric-based scoring of generated alt text, one structured call per variant.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::driver::{RecordOperation, RecordOutcome};
use crate::prompts::context_block;
use crate::record::{Record, RecordError, RecordStatus};
use crate::vision::{
    request_structured, CallContext, ContentBlock, ImageDetail, ResponseFormat, VisionModel,
    VisionRequest,
};

/// Output token budget for one judging response.
pub const DEFAULT_JUDGING_MAX_TOKENS: u32 = 200;

/// Score names in rubric order, `total` last.
pub const SCORE_FIELDS: [&str; 7] = [
    "visibility_principle",
    "context_relevance",
    "entity_naming",
    "informativeness",
    "redundancy_avoidance",
    "style_readability",
    "total",
];

/// System prompt for every judging call.
pub const JUDGING_RUBRIC: &str = "You are an accessibility auditor for news-image alt texts.
Rate each criterion on a 1-5 Likert scale (1 = poor, 5 = excellent).
Anchors: 1 = fails, 3 = partly meets, 5 = fully meets.

Criteria:
1. visibility_principle - describe only what is directly visible OR explicitly named in caption/headline. Penalise:
   - speculative emotions/intentions (e.g. 'angry', 'celebrates')
   - unseen events (future, past, off-screen)
   - context facts that are not visually verifiable (e.g. exact location if no sign)
2. context_relevance - context must clarify or disambiguate a visible element; irrelevant context = 1.
3. entity_naming - reward correct, context-supported names; wrong or omitted key entity = 1.
4. informativeness - concise, image-specific; generic = 1.
5. redundancy_avoidance - no >30 % verbatim copy of caption/headline.
6. style_readability - clear grammar; awkward/unreadable = 1.

Return ONLY valid JSON (nothing else):
{\"visibility_principle\":<1-5>,\"context_relevance\":<1-5>,\"entity_naming\":<1-5>,\"informativeness\":<1-5>,\"redundancy_avoidance\":<1-5>,\"style_readability\":<1-5>,\"total\":<1-5>,\"justification\":\"<max 2 sentences>\"}";

const CANDIDATE_INSTRUCTION: &str = "IMPORTANT: Deduct points for any interpretation, emotion, \
symbolism or context fact that cannot be visually confirmed.";

/// Scores for one alt-text candidate. Either fully present or not stored at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgingResult {
    /// Only visible or explicitly named content.
    pub visibility_principle: u8,
    /// Context used to disambiguate visible elements.
    pub context_relevance: u8,
    /// Correct naming of key entities.
    pub entity_naming: u8,
    /// Concise and image-specific.
    pub informativeness: u8,
    /// No verbatim copying of caption or headline.
    pub redundancy_avoidance: u8,
    /// Grammar and readability.
    pub style_readability: u8,
    /// Overall score.
    pub total: u8,
    /// Short rationale.
    pub justification: String,
}

impl JudgingResult {
    /// Scores paired with their names, in rubric order.
    pub fn scores(&self) -> [(&'static str, u8); 7] {
        [
            (SCORE_FIELDS[0], self.visibility_principle),
            (SCORE_FIELDS[1], self.context_relevance),
            (SCORE_FIELDS[2], self.entity_naming),
            (SCORE_FIELDS[3], self.informativeness),
            (SCORE_FIELDS[4], self.redundancy_avoidance),
            (SCORE_FIELDS[5], self.style_readability),
            (SCORE_FIELDS[6], self.total),
        ]
    }

    /// Checks every score lies in 1..=5.
    pub fn validate(&self) -> Result<(), String> {
        match self
            .scores()
            .into_iter()
            .find(|(_, score)| !(1..=5).contains(score))
        {
            Some((name, score)) => Err(format!("{name} = {score} is outside 1-5")),
            None => Ok(()),
        }
    }

    /// Parses a stored judging object, ignoring nulls and malformed entries.
    pub fn from_value(value: &Value) -> Option<Self> {
        if value.is_null() {
            return None;
        }
        let result: Self = serde_json::from_value(value.clone()).ok()?;
        result.validate().ok().map(|_| result)
    }

    fn to_value(&self) -> Value {
        json!({
            "visibility_principle": self.visibility_principle,
            "context_relevance": self.context_relevance,
            "entity_naming": self.entity_naming,
            "informativeness": self.informativeness,
            "redundancy_avoidance": self.redundancy_avoidance,
            "style_readability": self.style_readability,
            "total": self.total,
            "justification": self.justification,
        })
    }
}

/// JSON Schema sent with structured judging requests.
pub fn judging_schema() -> Value {
    let mut properties = serde_json::Map::new();
    for name in SCORE_FIELDS {
        properties.insert(name.to_string(), json!({ "type": "integer" }));
    }
    properties.insert("justification".into(), json!({ "type": "string" }));
    let mut required: Vec<&str> = SCORE_FIELDS.to_vec();
    required.push("justification");
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

/// One named model/context configuration whose output gets judged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    /// Record field holding the generated text.
    pub field: String,
    /// Human-readable label for logs and reports.
    pub label: String,
}

impl Variant {
    /// Builds a variant from its field and label.
    pub fn new(field: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            label: label.into(),
        }
    }

    /// Parses `field` or `field=label`.
    pub fn parse(entry: &str) -> Option<Self> {
        let (field, label) = match entry.split_once('=') {
            Some((field, label)) => (field.trim(), label.trim()),
            None => (entry.trim(), entry.trim()),
        };
        if field.is_empty() {
            return None;
        }
        let label = if label.is_empty() { field } else { label };
        Some(Self::new(field, label))
    }
}

/// The four configurations compared in the evaluation.
pub fn default_variants() -> Vec<Variant> {
    vec![
        Variant::new("generated_baseline", "baseline with context"),
        Variant::new("generated_baseline_no_context", "baseline without context"),
        Variant::new("generated_finetuned", "fine-tuned with context"),
        Variant::new("generated_finetuned_no_context", "fine-tuned without context"),
    ]
}

/// Parses a comma-separated variant list, falling back to the defaults when empty.
pub fn parse_variants(list: &str) -> Vec<Variant> {
    let parsed: Vec<Variant> = list.split(',').filter_map(Variant::parse).collect();
    if parsed.is_empty() {
        default_variants()
    } else {
        parsed
    }
}

/// Call parameters for judging.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgingSettings {
    /// Output token budget per call.
    pub max_tokens: u32,
    /// Image resolution hint.
    pub detail: ImageDetail,
}

impl Default for JudgingSettings {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_JUDGING_MAX_TOKENS,
            detail: ImageDetail::Low,
        }
    }
}

/// Per-record tally of variant outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JudgingReport {
    /// Variants judged in this pass.
    pub judged: usize,
    /// Variants whose call failed (stored as null).
    pub failed: usize,
    /// Variants without generated text (left unset).
    pub not_generated: usize,
    /// Variants that already carried a valid result.
    pub already_judged: usize,
}

/// Issues one judging call per present variant of each record.
pub struct JudgingOrchestrator<M> {
    model: M,
    variants: Vec<Variant>,
    settings: JudgingSettings,
}

impl<M: VisionModel> JudgingOrchestrator<M> {
    /// Creates an orchestrator for a fixed variant list.
    pub fn new(model: M, variants: Vec<Variant>, settings: JudgingSettings) -> Self {
        Self {
            model,
            variants,
            settings,
        }
    }

    /// Configured variants.
    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    /// Judges every variant of `record` that has generated text.
    ///
    /// Variant fields are validated before any call is made, so a malformed
    /// record is rejected without partial writes.
    pub fn judge(&self, position: usize, record: &mut Record) -> Result<JudgingReport, RecordError> {
        let mut candidates = Vec::with_capacity(self.variants.len());
        for variant in &self.variants {
            let text = record.generated_text(&variant.field)?.map(str::to_string);
            candidates.push((variant, text));
        }
        let image_url = record.image_url().unwrap_or_default().to_string();

        let mut report = JudgingReport::default();
        for (variant, text) in candidates {
            let Some(text) = text else {
                report.not_generated += 1;
                tracing::info!(position, variant = %variant.label, " -> {}: not generated", variant.label);
                continue;
            };
            if record
                .judging_entry(&variant.field)
                .and_then(JudgingResult::from_value)
                .is_some()
            {
                report.already_judged += 1;
                tracing::info!(position, variant = %variant.label, " -> {}: already judged", variant.label);
                continue;
            }

            let request = self.request(record, &image_url, &text);
            let ctx = CallContext {
                image_id: record.id(),
                phase: "judging",
                variant: Some(variant.label.as_str()),
            };
            let result: Option<JudgingResult> =
                request_structured(&self.model, &request, ctx, JudgingResult::validate);
            match &result {
                Some(scores) => {
                    report.judged += 1;
                    tracing::info!(
                        position,
                        variant = %variant.label,
                        total = scores.total,
                        " -> {}: total {} (entity naming {})",
                        variant.label,
                        scores.total,
                        scores.entity_naming
                    );
                }
                None => {
                    report.failed += 1;
                    tracing::warn!(position, variant = %variant.label, " -> {}: failed", variant.label);
                }
            }
            record.set_judging(&variant.field, result.as_ref().map(JudgingResult::to_value));
        }
        Ok(report)
    }

    fn request(&self, record: &Record, image_url: &str, candidate: &str) -> VisionRequest {
        VisionRequest {
            system: JUDGING_RUBRIC.to_string(),
            content: vec![
                ContentBlock::Image {
                    url: image_url.to_string(),
                    detail: self.settings.detail,
                },
                ContentBlock::Text(format!(
                    "{}\n\nAlt-Text candidate:\n{candidate}\n\n{CANDIDATE_INSTRUCTION}",
                    context_block(record)
                )),
            ],
            max_tokens: self.settings.max_tokens,
            temperature: Some(0.0),
            format: ResponseFormat::JsonSchema {
                name: "alt_text_judgement",
                schema: judging_schema(),
            },
        }
    }
}

impl<M: VisionModel> RecordOperation for JudgingOrchestrator<M> {
    fn name(&self) -> &'static str {
        "judging"
    }

    fn is_complete(&self, record: &Record) -> bool {
        record.pipeline_status == RecordStatus::Judged
    }

    fn apply(
        &self,
        position: usize,
        total: usize,
        record: &mut Record,
    ) -> Result<RecordOutcome, RecordError> {
        if record.image_url().is_none() {
            tracing::warn!(
                position,
                image_id = record.id(),
                "[{}/{}] no image found, skipped",
                position,
                total
            );
            return Ok(RecordOutcome::Skipped);
        }
        tracing::info!(
            position,
            image_id = record.id(),
            "[{}/{}] judging entry {}",
            position,
            total,
            record.id()
        );
        let report = self.judge(position, record)?;
        record.pipeline_status = if report.failed > 0 {
            RecordStatus::Failed
        } else {
            RecordStatus::Judged
        };
        Ok(match report {
            JudgingReport { failed: 0, .. } => RecordOutcome::Completed,
            JudgingReport {
                judged: 0,
                already_judged: 0,
                ..
            } => RecordOutcome::Failed,
            _ => RecordOutcome::Degraded,
        })
    }
}
