use std::path::PathBuf;

use alttext_pipeline::{load_records, parse_variants, ScoreSummary};
use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "alttext-summary",
    about = "Print mean judging scores per variant and per section"
)]
struct SummaryCli {
    /// Judged record set
    #[arg(long, default_value = "data/processed/full_sampled_with_judging.json")]
    input: PathBuf,

    /// Comma-separated variant fields, each optionally `field=label`
    #[arg(long, default_value = "")]
    variants: String,

    /// Skip the per-section breakdown
    #[arg(long, default_value_t = false)]
    overall_only: bool,
}

fn main() -> Result<()> {
    let cli = SummaryCli::parse();
    let records = load_records(&cli.input)?;
    let variants = parse_variants(&cli.variants);
    let summary = ScoreSummary::collect(&records, &variants);

    println!("## Overall ({} records)\n", records.len());
    print!("{}", summary.overall_table());
    if !cli.overall_only {
        println!("\n## By section\n");
        print!("{}", summary.section_table());
    }
    Ok(())
}
