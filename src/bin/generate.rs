use std::path::PathBuf;

use alttext_pipeline::logging::init_run_logging;
use alttext_pipeline::prompts::{DEFAULT_GENERATION_PROMPT, DEFAULT_REFINEMENT_PROMPT};
use alttext_pipeline::{
    load_for_run, AltTextGenerator, CheckpointDriver, GenerationPrompts, GenerationSettings,
    ModelArgs, OpenAiVisionClient, RunArgs,
};
use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "alttext-generate",
    about = "Generate and refine alt text for every record with an image"
)]
struct GenerateCli {
    /// Record set to augment (JSON array or JSON lines)
    #[arg(
        long,
        env = "ALTTEXT_GENERATE_INPUT",
        default_value = "data/processed/full_sampled_with_image_url_clean.json"
    )]
    input: PathBuf,

    /// Artifact receiving the augmented records
    #[arg(
        long,
        env = "ALTTEXT_GENERATE_OUTPUT",
        default_value = "data/processed/full_sampled_with_alttext_augmented.json"
    )]
    output: PathBuf,

    /// System prompt for the first description
    #[arg(long, env = "ALTTEXT_GENERATION_PROMPT", default_value = DEFAULT_GENERATION_PROMPT)]
    generation_prompt: PathBuf,

    /// System prompt for the refinement pass
    #[arg(long, env = "ALTTEXT_REFINEMENT_PROMPT", default_value = DEFAULT_REFINEMENT_PROMPT)]
    refinement_prompt: PathBuf,

    /// Maximum tokens per alt-text response
    #[arg(long, default_value_t = alttext_pipeline::generator::DEFAULT_GENERATION_MAX_TOKENS)]
    max_tokens: u32,

    /// Sampling temperature (provider default when unset)
    #[arg(long)]
    temperature: Option<f32>,

    #[command(flatten)]
    model: ModelArgs,

    #[command(flatten)]
    run: RunArgs,
}

fn main() -> Result<()> {
    let cli = GenerateCli::parse();
    let settings = cli.model.client_settings()?;
    let log_path = init_run_logging(&cli.run.log_dir, "alt_text_pipeline")?;
    tracing::info!("logging to {:?}", log_path);

    let prompts = GenerationPrompts::load(&cli.generation_prompt, &cli.refinement_prompt)?;
    let loaded = load_for_run(&cli.input, &cli.output, !cli.run.fresh)?;
    let mut records = loaded.records;
    let client = OpenAiVisionClient::new(&settings)?;
    let driver = CheckpointDriver::new(cli.run.driver_config(cli.output.clone(), loaded.restored));
    tracing::info!(
        model = client.model(),
        workers = driver.config().workers,
        "starting alt-text processing of {} articles",
        records.len()
    );

    let generator = AltTextGenerator::new(
        client,
        prompts,
        GenerationSettings {
            max_tokens: cli.max_tokens,
            temperature: cli.temperature,
            ..GenerationSettings::default()
        },
    );
    let summary = driver.run(&mut records, &generator)?;
    tracing::info!(
        "processing complete: {} generated, {} with refinement fallback, {} failed, {} skipped, {} already done; results saved to {:?}",
        summary.completed,
        summary.degraded,
        summary.failed,
        summary.skipped,
        summary.already_complete,
        cli.output
    );
    Ok(())
}
