//! Instruction templates and the user messages built around them.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::record::Record;

/// Default location of the generation instructions.
pub const DEFAULT_GENERATION_PROMPT: &str = "prompts/alt_text_generation_prompt.txt";
/// Default location of the refinement instructions.
pub const DEFAULT_REFINEMENT_PROMPT: &str = "prompts/alt_text_refinement_prompt.txt";

/// Reads one template verbatim.
pub fn load_prompt(path: &Path) -> Result<String> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read prompt template {:?}", path))?;
    anyhow::ensure!(
        !text.trim().is_empty(),
        "prompt template {:?} is empty",
        path
    );
    Ok(text)
}

/// System prompts for the two alt-text phases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationPrompts {
    /// Instructions for the first description.
    pub generation: String,
    /// Instructions for rewriting the first description.
    pub refinement: String,
}

impl GenerationPrompts {
    /// Loads both templates from disk.
    pub fn load(generation: &Path, refinement: &Path) -> Result<Self> {
        Ok(Self {
            generation: load_prompt(generation)?,
            refinement: load_prompt(refinement)?,
        })
    }
}

/// Article context shared by every message.
pub fn context_block(record: &Record) -> String {
    format!(
        "Headline: {}\nAbstract: {}\nCaption: {}",
        record.headline(),
        record.abstract_text(),
        record.caption()
    )
}

/// User text for the generation phase.
pub fn generation_message(record: &Record) -> String {
    format!(
        "{}\n\nPlease describe this image following the guidelines above.",
        context_block(record)
    )
}

/// User text for the refinement phase.
pub fn refinement_message(record: &Record, initial: &str) -> String {
    format!(
        "{}\n\nInitial Alt-Text: {initial}\n\nPlease refine this alt text according to the rules above.",
        context_block(record)
    )
}
