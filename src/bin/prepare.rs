use std::path::PathBuf;

use alttext_pipeline::dataset::fill_clean_urls;
use alttext_pipeline::{load_records, save_records};
use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "alttext-prepare",
    about = "Add query-free image URLs to a sampled record set"
)]
struct PrepareCli {
    /// Sampled records with a raw `image` field
    #[arg(long, default_value = "data/processed/full_sampled.json")]
    input: PathBuf,

    /// Destination for the records with `image_url_clean`
    #[arg(
        long,
        default_value = "data/processed/full_sampled_with_image_url_clean.json"
    )]
    output: PathBuf,
}

fn main() -> Result<()> {
    let cli = PrepareCli::parse();
    let mut records = load_records(&cli.input)?;
    let updated = fill_clean_urls(&mut records);
    save_records(&cli.output, &records)?;
    eprintln!(
        "cleaned {} of {} image URLs -> {}",
        updated,
        records.len(),
        cli.output.display()
    );
    Ok(())
}
