//! Record-set preparation helpers that run before the model passes.

use std::collections::HashMap;

use serde_json::Value;
use url::Url;

use crate::record::Record;

/// Field holding the raw image URL in the source dataset.
pub const RAW_IMAGE_FIELD: &str = "image";
/// Suffix appended to variant fields copied from a no-context prediction run.
pub const NO_CONTEXT_SUFFIX: &str = "_no_context";

/// Strips the query string and fragment from an image URL.
pub fn clean_image_url(raw: &str) -> String {
    let raw = raw.trim();
    match Url::parse(raw) {
        Ok(mut url) => {
            url.set_query(None);
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => raw.split(|c: char| c == '?' || c == '#').next().unwrap_or_default().to_string(),
    }
}

/// Fills `image_url_clean` from the raw `image` field where it is missing.
/// Returns how many records were updated.
pub fn fill_clean_urls(records: &mut [Record]) -> usize {
    let mut updated = 0usize;
    for record in records.iter_mut() {
        if record.image_url().is_some() {
            continue;
        }
        let Some(raw) = record.field_str(RAW_IMAGE_FIELD) else {
            continue;
        };
        let cleaned = clean_image_url(raw);
        if cleaned.is_empty() {
            continue;
        }
        record.image_url_clean = Some(cleaned);
        updated += 1;
    }
    updated
}

/// Counters from [`merge_no_context`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Primary records that found a secondary match.
    pub matched: usize,
    /// Primary records without a match (left unchanged).
    pub unmatched: usize,
}

/// Copies `fields` from a no-context prediction run into the primary records,
/// stored as `<field>_no_context` and matched by `image_id`. A field missing
/// on the secondary side is written as an empty string.
pub fn merge_no_context(
    primary: &mut [Record],
    secondary: &[Record],
    fields: &[String],
) -> MergeReport {
    let by_id: HashMap<&str, &Record> = secondary
        .iter()
        .filter_map(|record| record.image_id.as_deref().map(|id| (id, record)))
        .collect();
    let mut report = MergeReport::default();
    for record in primary.iter_mut() {
        let matched = record
            .image_id
            .as_deref()
            .and_then(|id| by_id.get(id).copied());
        let Some(other) = matched else {
            report.unmatched += 1;
            continue;
        };
        for field in fields {
            let value = other
                .extra
                .get(field)
                .cloned()
                .unwrap_or_else(|| Value::String(String::new()));
            record
                .extra
                .insert(format!("{field}{NO_CONTEXT_SUFFIX}"), value);
        }
        report.matched += 1;
    }
    report
}
