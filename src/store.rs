//! On-disk record set: JSON array or JSON lines in, pretty JSON array out.

use std::collections::HashMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use tempfile::NamedTempFile;

use crate::record::Record;

/// Reads a whole record set into memory.
///
/// Accepts either a JSON array of objects or one JSON object per line.
pub fn load_records(path: &Path) -> Result<Vec<Record>> {
    let raw = fs::read_to_string(path).with_context(|| format!("failed to read {:?}", path))?;
    parse_records(&raw).with_context(|| format!("invalid record set in {:?}", path))
}

/// Parses a record set from text, detecting array vs. JSON-lines layout.
pub fn parse_records(raw: &str) -> Result<Vec<Record>> {
    let trimmed = raw.trim_start();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).context("failed to parse JSON array");
    }
    let mut records = Vec::new();
    for (line_no, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: Record = serde_json::from_str(line)
            .with_context(|| format!("invalid record at line {}", line_no + 1))?;
        records.push(record);
    }
    Ok(records)
}

/// Replaces the artifact at `path` with `records`.
///
/// The set is written to a temporary file next to the destination and renamed
/// over it, so readers only ever see a previous snapshot or the complete new one.
/// Non-ASCII text is written literally.
pub fn save_records(path: &Path, records: &[Record]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).with_context(|| format!("failed to create {:?}", dir))?;
    let tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temporary file in {:?}", dir))?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        serde_json::to_writer_pretty(&mut writer, records)
            .with_context(|| format!("failed to serialize records for {:?}", path))?;
        writer.write_all(b"\n")?;
        writer.flush()?;
    }
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("failed to sync temporary file for {:?}", path))?;
    tmp.persist(path)
        .with_context(|| format!("failed to move snapshot into place at {:?}", path))?;
    Ok(())
}

/// Loads a previous output artifact when one exists.
pub fn load_prior(path: &Path) -> Result<Option<Vec<Record>>> {
    if !path.exists() {
        return Ok(None);
    }
    load_records(path).map(Some)
}

/// Replaces input records with their counterparts from a previous run, matched
/// by `image_id`. Returns how many records were restored.
///
/// Records without an `image_id` cannot be matched and are left as loaded.
pub fn overlay_prior(records: &mut [Record], prior: Vec<Record>) -> usize {
    let mut by_id: HashMap<String, Record> = prior
        .into_iter()
        .filter_map(|record| record.image_id.clone().map(|id| (id, record)))
        .collect();
    let mut restored = 0usize;
    for record in records.iter_mut() {
        let Some(id) = record.image_id.as_deref() else {
            continue;
        };
        if let Some(previous) = by_id.remove(id) {
            *record = previous;
            restored += 1;
        }
    }
    restored
}

/// Record set prepared for a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedRecords {
    /// Input records, with restored ones replaced by their previous output.
    pub records: Vec<Record>,
    /// How many records came from the previous output.
    pub restored: usize,
}

/// Loads the input set and, when `resume` is set, overlays records from an
/// existing output artifact so finished work is not redone.
pub fn load_for_run(input: &Path, output: &Path, resume: bool) -> Result<LoadedRecords> {
    let mut records = load_records(input)?;
    tracing::info!("loaded {} records from {:?}", records.len(), input);
    let mut restored = 0;
    if resume {
        if let Some(prior) = load_prior(output)? {
            restored = overlay_prior(&mut records, prior);
            tracing::info!("restored {} records from previous output {:?}", restored, output);
        }
    }
    Ok(LoadedRecords { records, restored })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordStatus;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(id: &str) -> Record {
        Record {
            image_id: Some(id.to_string()),
            headline: Some(format!("headline {id}")),
            ..Record::default()
        }
    }

    #[test]
    fn parses_array_and_json_lines_alike() {
        let array = r#"[{"image_id":"a"},{"image_id":"b"}]"#;
        let lines = "{\"image_id\":\"a\"}\n\n{\"image_id\":\"b\"}\n";
        assert_eq!(parse_records(array).unwrap(), parse_records(lines).unwrap());
        assert_eq!(parse_records("  \n").unwrap(), Vec::new());
    }

    #[test]
    fn reports_bad_line_number() {
        let err = parse_records("{\"image_id\":\"a\"}\nnot json\n").unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
    }

    #[test]
    fn save_then_load_is_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.json");
        let mut first = record("a");
        first.caption = Some("Café on the Seine, 東京".into());
        first.pipeline_status = RecordStatus::Generated;
        first.extra.insert("judging_generated_baseline".into(), json!(null));
        let records = vec![first, record("b")];

        save_records(&path, &records).unwrap();
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("Café on the Seine, 東京"));
        assert!(raw.starts_with("[\n"));
        assert_eq!(load_records(&path).unwrap(), records);

        save_records(&path, &records[..1]).unwrap();
        assert_eq!(load_records(&path).unwrap().len(), 1);
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn overlay_restores_by_identity() {
        let mut records = vec![record("a"), record("b"), Record::default()];
        let mut done = record("b");
        done.openai_alt_text_initial = Some("x".into());
        done.openai_alt_text_refined = Some("x".into());
        done.pipeline_status = RecordStatus::Generated;

        let restored = overlay_prior(&mut records, vec![done.clone(), record("zzz")]);
        assert_eq!(restored, 1);
        assert_eq!(records[1], done);
        assert_eq!(records[0], record("a"));
    }

    #[test]
    fn missing_prior_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_prior(&dir.path().join("absent.json")).unwrap().is_none());
    }
}
