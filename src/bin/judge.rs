use std::path::PathBuf;

use alttext_pipeline::judging::DEFAULT_JUDGING_MAX_TOKENS;
use alttext_pipeline::logging::init_run_logging;
use alttext_pipeline::{
    load_for_run, parse_variants, CheckpointDriver, JudgingOrchestrator, JudgingSettings,
    ModelArgs, OpenAiVisionClient, RunArgs,
};
use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "alttext-judge",
    about = "Score every generated alt-text variant against the accessibility rubric"
)]
struct JudgeCli {
    /// Record set carrying the variant predictions
    #[arg(
        long,
        env = "ALTTEXT_JUDGE_INPUT",
        default_value = "data/processed/merged_predictions_with_no_context.json"
    )]
    input: PathBuf,

    /// Artifact receiving the judged records
    #[arg(
        long,
        env = "ALTTEXT_JUDGE_OUTPUT",
        default_value = "data/processed/full_sampled_with_judging.json"
    )]
    output: PathBuf,

    /// Comma-separated variant fields, each optionally `field=label`
    #[arg(long, env = "ALTTEXT_JUDGE_VARIANTS", default_value = "")]
    variants: String,

    /// Maximum tokens per judging response
    #[arg(long, default_value_t = DEFAULT_JUDGING_MAX_TOKENS)]
    max_tokens: u32,

    #[command(flatten)]
    model: ModelArgs,

    #[command(flatten)]
    run: RunArgs,
}

fn main() -> Result<()> {
    let cli = JudgeCli::parse();
    let settings = cli.model.client_settings()?;
    let log_path = init_run_logging(&cli.run.log_dir, "judging_pipeline")?;
    tracing::info!("logging to {:?}", log_path);

    let loaded = load_for_run(&cli.input, &cli.output, !cli.run.fresh)?;
    let mut records = loaded.records;
    let client = OpenAiVisionClient::new(&settings)?;
    let model = client.model().to_string();
    let judge = JudgingOrchestrator::new(
        client,
        parse_variants(&cli.variants),
        JudgingSettings {
            max_tokens: cli.max_tokens,
            ..JudgingSettings::default()
        },
    );
    let labels: Vec<&str> = judge.variants().iter().map(|v| v.label.as_str()).collect();
    tracing::info!(
        model = %model,
        "judging {} variants ({}) across {} records",
        labels.len(),
        labels.join(", "),
        records.len()
    );

    let driver = CheckpointDriver::new(cli.run.driver_config(cli.output.clone(), loaded.restored));
    let summary = driver.run(&mut records, &judge)?;
    tracing::info!(
        "judging complete: {} fully judged, {} partial, {} failed, {} skipped, {} already judged; results saved to {:?}",
        summary.completed,
        summary.degraded,
        summary.failed,
        summary.skipped,
        summary.already_complete,
        cli.output
    );
    Ok(())
}
