#![warn(missing_docs)]
//! Core library for the alt-text generation and judging pipeline.

pub mod config;
pub mod dataset;
pub mod driver;
pub mod generator;
pub mod judging;
pub mod logging;
pub mod prompts;
pub mod record;
pub mod store;
pub mod summary;
pub mod vision;

pub use config::{ClientSettings, ModelArgs, RunArgs};
pub use driver::{
    CheckpointDriver, DriverConfig, RecordOperation, RecordOutcome, RunSummary,
    DEFAULT_CHECKPOINT_EVERY,
};
pub use generator::{AltTextGenerator, GenerationOutcome, GenerationSettings};
pub use judging::{
    default_variants, parse_variants, JudgingOrchestrator, JudgingReport, JudgingResult,
    JudgingSettings, Variant,
};
pub use prompts::GenerationPrompts;
pub use record::{Record, RecordError, RecordStatus};
pub use store::{
    load_for_run, load_prior, load_records, overlay_prior, save_records, LoadedRecords,
};
pub use summary::ScoreSummary;
pub use vision::openai::OpenAiVisionClient;
pub use vision::{VisionError, VisionModel, VisionRequest};
