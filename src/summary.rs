//! Mean rubric scores per variant and per section, rendered as Markdown.

use std::collections::BTreeMap;

use crate::judging::{JudgingResult, Variant, SCORE_FIELDS};
use crate::record::Record;

/// Section name used when a record carries none.
pub const UNKNOWN_SECTION: &str = "Unknown";

#[derive(Debug, Clone, Default, PartialEq)]
struct Accumulator {
    sums: [u64; 7],
    count: usize,
}

impl Accumulator {
    fn add(&mut self, result: &JudgingResult) {
        for (slot, (_, score)) in self.sums.iter_mut().zip(result.scores()) {
            *slot += u64::from(score);
        }
        self.count += 1;
    }

    fn means(&self) -> Option<[f64; 7]> {
        if self.count == 0 {
            return None;
        }
        Some(self.sums.map(|sum| sum as f64 / self.count as f64))
    }
}

/// Aggregated judging scores for a record set.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreSummary {
    variants: Vec<Variant>,
    overall: Vec<Accumulator>,
    sections: BTreeMap<String, Vec<Accumulator>>,
}

impl ScoreSummary {
    /// Collects every non-null judging result of the given variants.
    pub fn collect(records: &[Record], variants: &[Variant]) -> Self {
        let mut overall = vec![Accumulator::default(); variants.len()];
        let mut sections: BTreeMap<String, Vec<Accumulator>> = BTreeMap::new();
        for record in records {
            let section = record.field_str("section").unwrap_or(UNKNOWN_SECTION);
            for (slot, variant) in variants.iter().enumerate() {
                let Some(result) = record
                    .judging_entry(&variant.field)
                    .and_then(JudgingResult::from_value)
                else {
                    continue;
                };
                overall[slot].add(&result);
                sections
                    .entry(section.to_string())
                    .or_insert_with(|| vec![Accumulator::default(); variants.len()])[slot]
                    .add(&result);
            }
        }
        Self {
            variants: variants.to_vec(),
            overall,
            sections,
        }
    }

    /// Mean of each score for a variant, `None` when it was never judged.
    pub fn variant_means(&self, field: &str) -> Option<[f64; 7]> {
        let slot = self.variants.iter().position(|v| v.field == field)?;
        self.overall[slot].means()
    }

    /// Number of judged results counted for a variant.
    pub fn judged_count(&self, field: &str) -> usize {
        self.variants
            .iter()
            .position(|v| v.field == field)
            .map(|slot| self.overall[slot].count)
            .unwrap_or(0)
    }

    /// Mean of each score for a variant within one section.
    pub fn section_means(&self, section: &str, field: &str) -> Option<[f64; 7]> {
        let slot = self.variants.iter().position(|v| v.field == field)?;
        self.sections.get(section)?[slot].means()
    }

    /// Markdown table with one row per variant.
    pub fn overall_table(&self) -> String {
        let mut out = format!("| model_variant | n | {} |\n", SCORE_FIELDS.join(" | "));
        out.push_str(&format!("|---|---:|{}\n", "---:|".repeat(SCORE_FIELDS.len())));
        for (variant, acc) in self.variants.iter().zip(&self.overall) {
            out.push_str(&format!(
                "| {} | {} | {} |\n",
                variant.label,
                acc.count,
                render_means(acc.means())
            ));
        }
        out
    }

    /// Markdown table with one row per section and variant, sorted by section.
    pub fn section_table(&self) -> String {
        let mut out = format!(
            "| section | model_variant | n | {} |\n",
            SCORE_FIELDS.join(" | ")
        );
        out.push_str(&format!("|---|---|---:|{}\n", "---:|".repeat(SCORE_FIELDS.len())));
        for (section, accs) in &self.sections {
            let rows = self.variants.iter().zip(accs).filter(|(_, acc)| acc.count > 0);
            for (variant, acc) in rows {
                out.push_str(&format!(
                    "| {} | {} | {} | {} |\n",
                    section,
                    variant.label,
                    acc.count,
                    render_means(acc.means())
                ));
            }
        }
        out
    }
}

fn render_means(means: Option<[f64; 7]>) -> String {
    match means {
        Some(values) => values
            .iter()
            .map(|value| format!("{value:.2}"))
            .collect::<Vec<_>>()
            .join(" | "),
        None => vec!["-"; SCORE_FIELDS.len()].join(" | "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn scores(total: u8) -> Value {
        json!({
            "visibility_principle": 5, "context_relevance": 4, "entity_naming": 3,
            "informativeness": 4, "redundancy_avoidance": 5, "style_readability": 5,
            "total": total, "justification": "ok"
        })
    }

    fn record(section: &str, baseline: Option<Value>) -> Record {
        let mut record = Record::default();
        record.extra.insert("section".into(), json!(section));
        if let Some(value) = baseline {
            record.extra.insert("judging_generated_baseline".into(), value);
        }
        record
    }

    fn variants() -> Vec<Variant> {
        vec![
            Variant::new("generated_baseline", "baseline"),
            Variant::new("generated_finetuned", "finetuned"),
        ]
    }

    #[test]
    fn averages_skip_nulls_and_missing() {
        let records = vec![
            record("sports", Some(scores(4))),
            record("sports", Some(scores(2))),
            record("arts", Some(Value::Null)),
            record("arts", None),
        ];
        let summary = ScoreSummary::collect(&records, &variants());

        assert_eq!(summary.judged_count("generated_baseline"), 2);
        assert_eq!(summary.variant_means("generated_baseline").unwrap()[6], 3.0);
        assert_eq!(summary.variant_means("generated_finetuned"), None);
        assert_eq!(summary.section_means("sports", "generated_baseline").unwrap()[6], 3.0);
        assert_eq!(summary.section_means("arts", "generated_baseline"), None);
    }

    #[test]
    fn renders_markdown_rows() {
        let records = vec![record("sports", Some(scores(4)))];
        let summary = ScoreSummary::collect(&records, &variants());

        let overall = summary.overall_table();
        assert!(overall.starts_with("| model_variant | n | visibility_principle |"));
        assert!(overall.contains("| baseline | 1 | 5.00 | 4.00 | 3.00 | 4.00 | 5.00 | 5.00 | 4.00 |"));
        assert!(overall.contains("| finetuned | 0 | - | - | - | - | - | - | - |"));
        assert_eq!(overall.lines().count(), 4);
        assert!(overall.ends_with("|\n"));

        let sections = summary.section_table();
        assert!(sections.contains("| sports | baseline | 1 |"));
        assert!(!sections.contains("finetuned"));
        assert_eq!(sections.lines().count(), 3);
    }
}
