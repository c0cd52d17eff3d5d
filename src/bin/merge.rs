use std::path::PathBuf;

use alttext_pipeline::dataset::merge_no_context;
use alttext_pipeline::{load_records, save_records};
use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "alttext-merge",
    about = "Attach no-context predictions to the with-context record set"
)]
struct MergeCli {
    /// Predictions made with article context
    #[arg(long, default_value = "data/processed/merged_predictions.json")]
    primary: PathBuf,

    /// Predictions made from the image alone
    #[arg(long, default_value = "data/processed/merged_predictions_no_context.json")]
    secondary: PathBuf,

    /// Merged output
    #[arg(
        long,
        default_value = "data/processed/merged_predictions_with_no_context.json"
    )]
    output: PathBuf,

    /// Prediction fields to copy with a `_no_context` suffix
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "generated_baseline,generated_finetuned"
    )]
    fields: Vec<String>,
}

fn main() -> Result<()> {
    let cli = MergeCli::parse();
    let mut primary = load_records(&cli.primary)?;
    let secondary = load_records(&cli.secondary)?;
    let report = merge_no_context(&mut primary, &secondary, &cli.fields);
    save_records(&cli.output, &primary)?;
    eprintln!(
        "merged {} records ({} without a no-context match) -> {}",
        report.matched,
        report.unmatched,
        cli.output.display()
    );
    Ok(())
}
