//! Two-phase alt-text production: generate a first description, then refine it.

use crate::driver::{RecordOperation, RecordOutcome};
use crate::logging::preview;
use crate::prompts::{generation_message, refinement_message, GenerationPrompts};
use crate::record::{Record, RecordError, RecordStatus};
use crate::vision::{
    request_text, CallContext, ContentBlock, ImageDetail, ResponseFormat, VisionModel,
    VisionRequest,
};

/// Output token budget for free-text alt text.
pub const DEFAULT_GENERATION_MAX_TOKENS: u32 = 75;

/// Call parameters for both phases.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    /// Output token budget per call.
    pub max_tokens: u32,
    /// Sampling temperature; `None` keeps the provider default.
    pub temperature: Option<f32>,
    /// Image resolution hint.
    pub detail: ImageDetail,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_GENERATION_MAX_TOKENS,
            temperature: None,
            detail: ImageDetail::Low,
        }
    }
}

/// Result of running the state machine over one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// No image reference; nothing was attempted.
    Skipped,
    /// The generation call failed; the record was not modified.
    Failed,
    /// Both calls succeeded.
    Refined,
    /// Refinement failed and the initial text was kept as the refined value.
    RefinementFallback,
}

enum Phase {
    Generating,
    Refining { initial: String },
    Done { fallback: bool },
    Failed,
}

/// Drives the generate/refine calls for each record.
pub struct AltTextGenerator<M> {
    model: M,
    prompts: GenerationPrompts,
    settings: GenerationSettings,
}

impl<M: VisionModel> AltTextGenerator<M> {
    /// Creates a generator around a model client.
    pub fn new(model: M, prompts: GenerationPrompts, settings: GenerationSettings) -> Self {
        Self {
            model,
            prompts,
            settings,
        }
    }

    /// Runs GENERATING then REFINING for one record, writing each field as soon
    /// as its phase succeeds.
    pub fn generate(&self, position: usize, total: usize, record: &mut Record) -> GenerationOutcome {
        let Some(image_url) = record.image_url().map(str::to_string) else {
            tracing::warn!(
                position,
                image_id = record.id(),
                "[{}/{}] no image found, skipped",
                position,
                total
            );
            return GenerationOutcome::Skipped;
        };
        tracing::info!(
            position,
            image_id = record.id(),
            "[{}/{}] generating alt text for: {}",
            position,
            total,
            preview(record.headline(), 60)
        );

        let mut phase = Phase::Generating;
        loop {
            phase = match phase {
                Phase::Generating => {
                    let request =
                        self.request(&self.prompts.generation, generation_message(record), &image_url);
                    match request_text(&self.model, &request, context(record, "generation")) {
                        Some(initial) => {
                            record.openai_alt_text_initial = Some(initial.clone());
                            tracing::info!(position, "[{}] initial: {}", position, preview(&initial, 50));
                            Phase::Refining { initial }
                        }
                        None => Phase::Failed,
                    }
                }
                Phase::Refining { initial } => {
                    let request = self.request(
                        &self.prompts.refinement,
                        refinement_message(record, &initial),
                        &image_url,
                    );
                    let refined = request_text(&self.model, &request, context(record, "refinement"));
                    let fallback = refined.is_none();
                    if fallback {
                        tracing::warn!(
                            position,
                            image_id = record.id(),
                            "[{}] refinement failed, keeping initial alt text",
                            position
                        );
                    }
                    let refined = refined.unwrap_or(initial);
                    tracing::info!(position, "[{}] refined: {}", position, preview(&refined, 50));
                    record.openai_alt_text_refined = Some(refined);
                    Phase::Done { fallback }
                }
                Phase::Done { fallback } => {
                    record.pipeline_status = RecordStatus::Generated;
                    return if fallback {
                        GenerationOutcome::RefinementFallback
                    } else {
                        GenerationOutcome::Refined
                    };
                }
                Phase::Failed => {
                    tracing::warn!(
                        position,
                        image_id = record.id(),
                        "[{}] generation failed, record left for retry",
                        position
                    );
                    record.pipeline_status = RecordStatus::Failed;
                    return GenerationOutcome::Failed;
                }
            };
        }
    }

    fn request(&self, system: &str, text: String, image_url: &str) -> VisionRequest {
        VisionRequest {
            system: system.to_string(),
            content: vec![
                ContentBlock::Text(text),
                ContentBlock::Image {
                    url: image_url.to_string(),
                    detail: self.settings.detail,
                },
            ],
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            format: ResponseFormat::Text,
        }
    }
}

fn context<'a>(record: &'a Record, phase: &'a str) -> CallContext<'a> {
    CallContext {
        image_id: record.id(),
        phase,
        variant: None,
    }
}

impl<M: VisionModel> RecordOperation for AltTextGenerator<M> {
    fn name(&self) -> &'static str {
        "generation"
    }

    fn is_complete(&self, record: &Record) -> bool {
        record.has_alt_text()
            || matches!(
                record.pipeline_status,
                RecordStatus::Generated | RecordStatus::Judged
            )
    }

    fn apply(
        &self,
        position: usize,
        total: usize,
        record: &mut Record,
    ) -> Result<RecordOutcome, RecordError> {
        Ok(match self.generate(position, total, record) {
            GenerationOutcome::Skipped => RecordOutcome::Skipped,
            GenerationOutcome::Failed => RecordOutcome::Failed,
            GenerationOutcome::Refined => RecordOutcome::Completed,
            GenerationOutcome::RefinementFallback => RecordOutcome::Degraded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::VisionError;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    fn prompts() -> GenerationPrompts {
        GenerationPrompts {
            generation: "GEN".into(),
            refinement: "REF".into(),
        }
    }

    fn record() -> Record {
        Record {
            image_id: Some("img-7".into()),
            headline: Some("Flood waters rise".into()),
            abstract_text: Some("Rivers crest.".into()),
            caption: Some("A flooded street.".into()),
            image_url_clean: Some("https://img/7.jpg".into()),
            ..Record::default()
        }
    }

    #[test]
    fn both_phases_populate_fields() {
        let calls = Mutex::new(Vec::new());
        let model = |req: &VisionRequest| {
            calls.lock().unwrap().push(req.system.clone());
            Ok::<_, VisionError>(match req.system.as_str() {
                "GEN" => "Cars in brown water.".to_string(),
                _ => "Cars stand in brown floodwater on a street.".to_string(),
            })
        };
        let generator = AltTextGenerator::new(&model, prompts(), GenerationSettings::default());
        let mut record = record();

        let outcome = generator.generate(1, 1, &mut record);

        assert_eq!(outcome, GenerationOutcome::Refined);
        assert_eq!(record.openai_alt_text_initial.as_deref(), Some("Cars in brown water."));
        assert_eq!(
            record.openai_alt_text_refined.as_deref(),
            Some("Cars stand in brown floodwater on a street.")
        );
        assert_eq!(record.pipeline_status, RecordStatus::Generated);
        assert_eq!(*calls.lock().unwrap(), vec!["GEN".to_string(), "REF".to_string()]);
    }

    #[test]
    fn refinement_request_carries_initial_text_and_image() {
        let seen = Mutex::new(None);
        let model = |req: &VisionRequest| {
            if req.system == "REF" {
                *seen.lock().unwrap() = Some(req.clone());
            }
            Ok::<_, VisionError>("A flooded street with cars.".to_string())
        };
        let generator = AltTextGenerator::new(&model, prompts(), GenerationSettings::default());
        generator.generate(1, 1, &mut record());

        let request = seen.lock().unwrap().take().unwrap();
        assert!(request
            .user_text()
            .contains("Initial Alt-Text: A flooded street with cars."));
        assert_eq!(request.image_url(), Some("https://img/7.jpg"));
        assert_eq!(request.max_tokens, 75);
        assert_eq!(request.temperature, None);
    }

    #[test]
    fn refinement_failure_falls_back_to_initial() {
        let model = |req: &VisionRequest| match req.system.as_str() {
            "GEN" => Ok("Ein Mann läuft über die Brücke.".to_string()),
            _ => Err(VisionError::Status {
                status: 429,
                body: "rate limited".into(),
            }),
        };
        let generator = AltTextGenerator::new(&model, prompts(), GenerationSettings::default());
        let mut record = record();

        let outcome = generator.generate(3, 9, &mut record);

        assert_eq!(outcome, GenerationOutcome::RefinementFallback);
        assert_eq!(record.openai_alt_text_refined, record.openai_alt_text_initial);
        assert_eq!(
            record.openai_alt_text_refined.as_deref().map(str::as_bytes),
            Some("Ein Mann läuft über die Brücke.".as_bytes())
        );
    }

    #[test]
    fn generation_failure_leaves_record_untouched_and_skips_refinement() {
        let calls = Mutex::new(0usize);
        let model = |_: &VisionRequest| {
            *calls.lock().unwrap() += 1;
            Err::<String, _>(VisionError::Transport("connection reset".into()))
        };
        let generator = AltTextGenerator::new(&model, prompts(), GenerationSettings::default());
        let mut record = record();

        assert_eq!(generator.generate(1, 1, &mut record), GenerationOutcome::Failed);
        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(record.openai_alt_text_initial, None);
        assert_eq!(record.openai_alt_text_refined, None);
        assert_eq!(record.pipeline_status, RecordStatus::Failed);
        assert!(!generator.is_complete(&record));
    }

    #[test]
    fn missing_image_is_skipped_without_calls() {
        let model = |_: &VisionRequest| -> Result<String, VisionError> {
            panic!("no call expected for a record without an image")
        };
        let generator = AltTextGenerator::new(&model, prompts(), GenerationSettings::default());
        let mut record = record();
        record.image_url_clean = Some(String::new());
        let before = record.clone();

        assert_eq!(
            generator.apply(1, 1, &mut record).unwrap(),
            RecordOutcome::Skipped
        );
        assert_eq!(record, before);
    }
}
