use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use alttext_pipeline::{
    load_for_run, load_records, save_records, AltTextGenerator, CheckpointDriver, DriverConfig,
    GenerationPrompts, GenerationSettings, JudgingOrchestrator, JudgingSettings, Record,
    RecordStatus, Variant, VisionError, VisionRequest,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

const GENERATION_SYSTEM: &str = "Describe the image.";
const REFINEMENT_SYSTEM: &str = "Tighten the description.";

fn prompts() -> GenerationPrompts {
    GenerationPrompts {
        generation: GENERATION_SYSTEM.to_string(),
        refinement: REFINEMENT_SYSTEM.to_string(),
    }
}

fn article(n: usize) -> Record {
    Record {
        image_id: Some(format!("img-{n:03}")),
        headline: Some(format!("Headline {n}")),
        abstract_text: Some(format!("Abstract {n}")),
        caption: Some(format!("Caption {n}")),
        image_url_clean: Some(format!("https://static.example.com/{n}.jpg")),
        ..Record::default()
    }
}

fn driver(output: &Path) -> CheckpointDriver {
    CheckpointDriver::new(DriverConfig {
        output: output.to_path_buf(),
        checkpoint_every: 25,
        workers: 1,
        keep_unvisited: false,
    })
}

fn valid_scores() -> Value {
    json!({
        "visibility_principle": 4, "context_relevance": 4, "entity_naming": 3,
        "informativeness": 4, "redundancy_avoidance": 5, "style_readability": 4,
        "total": 4, "justification": "Accurate and concise."
    })
}

#[test]
fn generation_checkpoints_prefix_then_writes_full_set() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("augmented.json");
    let mut records: Vec<Record> = (1..=30).map(article).collect();
    let snapshot_len = Mutex::new(None);

    let model = |req: &VisionRequest| -> Result<String, VisionError> {
        if req.system == GENERATION_SYSTEM && req.user_text().contains("Headline 26\n") {
            let seen = load_records(&output).map(|r| r.len()).ok();
            *snapshot_len.lock().unwrap() = seen;
        }
        if req.system == REFINEMENT_SYSTEM {
            Ok("Refined description.".to_string())
        } else {
            Ok("Initial description.".to_string())
        }
    };
    let generator = AltTextGenerator::new(model, prompts(), GenerationSettings::default());
    let summary = driver(&output).run(&mut records, &generator).unwrap();

    assert_eq!(*snapshot_len.lock().unwrap(), Some(25));
    assert_eq!(summary.completed, 30);
    let saved = load_records(&output).unwrap();
    assert_eq!(saved.len(), 30);
    for record in &saved {
        assert_eq!(record.openai_alt_text_initial.as_deref(), Some("Initial description."));
        assert_eq!(record.openai_alt_text_refined.as_deref(), Some("Refined description."));
        assert_eq!(record.pipeline_status, RecordStatus::Generated);
    }
}

#[test]
fn records_without_image_are_left_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("augmented.json");
    let mut blank = article(1);
    blank.image_url_clean = Some("   ".into());
    let mut missing = article(2);
    missing.image_url_clean = None;
    let mut records = vec![blank.clone(), missing.clone()];
    let calls = AtomicUsize::new(0);

    let model = |_: &VisionRequest| -> Result<String, VisionError> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok("unused".to_string())
    };
    let generator = AltTextGenerator::new(model, prompts(), GenerationSettings::default());
    let summary = driver(&output).run(&mut records, &generator).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(summary.skipped, 2);
    assert_eq!(load_records(&output).unwrap(), vec![blank, missing]);
}

#[test]
fn failed_refinement_keeps_initial_text_byte_for_byte() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("augmented.json");
    let initial = "A firefighter sprays water on a burning façade at dusk.";
    let mut records = vec![article(1)];

    let model = |req: &VisionRequest| -> Result<String, VisionError> {
        if req.system == REFINEMENT_SYSTEM {
            Err(VisionError::Status {
                status: 500,
                body: "upstream".into(),
            })
        } else {
            Ok(initial.to_string())
        }
    };
    let generator = AltTextGenerator::new(model, prompts(), GenerationSettings::default());
    let summary = driver(&output).run(&mut records, &generator).unwrap();

    assert_eq!(summary.degraded, 1);
    let saved = load_records(&output).unwrap();
    assert_eq!(saved[0].openai_alt_text_initial.as_deref(), Some(initial));
    assert_eq!(saved[0].openai_alt_text_refined.as_deref(), Some(initial));
}

#[test]
fn judging_writes_one_key_per_generated_variant() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("judged.json");
    let mut record = article(1);
    record.extra.insert("generated_baseline".into(), json!("A dog runs."));
    record.extra.insert("generated_finetuned".into(), json!(""));
    let mut records = vec![record];
    let calls = AtomicUsize::new(0);

    let model = |req: &VisionRequest| -> Result<String, VisionError> {
        calls.fetch_add(1, Ordering::SeqCst);
        assert!(req.user_text().contains("A dog runs."));
        assert_eq!(req.temperature, Some(0.0));
        Ok(valid_scores().to_string())
    };
    let variants = vec![
        Variant::new("generated_baseline", "baseline"),
        Variant::new("generated_finetuned", "finetuned"),
    ];
    let judge = JudgingOrchestrator::new(model, variants, JudgingSettings::default());
    driver(&output).run(&mut records, &judge).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let saved = load_records(&output).unwrap();
    let judging_keys: Vec<&String> = saved[0]
        .extra
        .keys()
        .filter(|key| key.starts_with("judging_"))
        .collect();
    assert_eq!(judging_keys, vec!["judging_generated_baseline"]);
    assert_eq!(saved[0].extra["judging_generated_baseline"], valid_scores());
    assert_eq!(saved[0].pipeline_status, RecordStatus::Judged);
}

#[test]
fn failed_judging_call_is_stored_as_null() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("judged.json");
    let mut record = article(1);
    record.extra.insert("generated_baseline".into(), json!("A dog runs."));
    let mut records = vec![record];

    let model = |_: &VisionRequest| -> Result<String, VisionError> {
        Ok(r#"{"visibility_principle": 9}"#.to_string())
    };
    let judge = JudgingOrchestrator::new(
        model,
        vec![Variant::new("generated_baseline", "baseline")],
        JudgingSettings::default(),
    );
    driver(&output).run(&mut records, &judge).unwrap();

    let raw: Value = serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(raw[0]["judging_generated_baseline"], Value::Null);
    assert_eq!(raw[0]["pipeline_status"], json!("failed"));
}

#[test]
fn unknown_fields_survive_a_full_pass() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("augmented.json");
    let mut record = article(1);
    record.extra.insert("section".into(), json!("Opinion"));
    record.extra.insert("keywords".into(), json!(["city", "rain"]));
    let mut records = vec![record];

    let model = |_: &VisionRequest| -> Result<String, VisionError> {
        Ok("Rain on a city street.".to_string())
    };
    let generator = AltTextGenerator::new(model, prompts(), GenerationSettings::default());
    driver(&output).run(&mut records, &generator).unwrap();

    let saved = load_records(&output).unwrap();
    assert_eq!(saved[0].extra["section"], json!("Opinion"));
    assert_eq!(saved[0].extra["keywords"], json!(["city", "rain"]));
    assert_eq!(saved, records);
}

#[test]
fn resumed_run_skips_finished_records() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.json");
    let output = dir.path().join("augmented.json");
    let originals: Vec<Record> = (1..=4).map(article).collect();
    save_records(&input, &originals).unwrap();

    let mut done = article(2);
    done.openai_alt_text_initial = Some("earlier".into());
    done.openai_alt_text_refined = Some("earlier refined".into());
    done.pipeline_status = RecordStatus::Generated;
    save_records(&output, &[article(1), done.clone()]).unwrap();

    let loaded = load_for_run(&input, &output, true).unwrap();
    assert_eq!(loaded.restored, 2);
    let mut records = loaded.records;
    let calls = AtomicUsize::new(0);
    let model = |_: &VisionRequest| -> Result<String, VisionError> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok("fresh".to_string())
    };
    let generator = AltTextGenerator::new(model, prompts(), GenerationSettings::default());
    let summary = driver(&output).run(&mut records, &generator).unwrap();

    assert_eq!(summary.already_complete, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 6);
    let saved = load_records(&output).unwrap();
    assert_eq!(saved.len(), 4);
    assert_eq!(saved[1], done);
    assert_eq!(saved[0].openai_alt_text_refined.as_deref(), Some("fresh"));
}

fn generated(n: usize) -> Record {
    let mut record = article(n);
    record.openai_alt_text_initial = Some(format!("Earlier {n}."));
    record.openai_alt_text_refined = Some(format!("Earlier refined {n}."));
    record.pipeline_status = RecordStatus::Generated;
    record
}

#[test]
fn resumed_checkpoint_keeps_restored_records_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.json");
    let output = dir.path().join("augmented.json");
    let originals: Vec<Record> = (1..=40).map(article).collect();
    save_records(&input, &originals).unwrap();

    let mut prior: Vec<Record> = (1..=40).map(generated).collect();
    prior[0] = article(1);
    prior[0].pipeline_status = RecordStatus::Failed;
    prior[29] = article(30);
    save_records(&output, &prior).unwrap();

    let loaded = load_for_run(&input, &output, true).unwrap();
    assert_eq!(loaded.restored, 40);
    let mut records = loaded.records;
    let on_disk = Mutex::new(None);
    let model = |req: &VisionRequest| -> Result<String, VisionError> {
        if req.system == GENERATION_SYSTEM && req.user_text().contains("Headline 30\n") {
            let saved = load_records(&output).unwrap();
            let finished = saved.iter().filter(|r| r.has_alt_text()).count();
            *on_disk.lock().unwrap() = Some((saved.len(), finished));
        }
        Ok("Fresh description.".to_string())
    };
    let generator = AltTextGenerator::new(model, prompts(), GenerationSettings::default());
    let driver = CheckpointDriver::new(DriverConfig {
        output: output.clone(),
        checkpoint_every: 25,
        workers: 1,
        keep_unvisited: loaded.restored > 0,
    });
    let summary = driver.run(&mut records, &generator).unwrap();

    // Checkpoint 25 ran before record 30; record 1 was regenerated by then.
    assert_eq!(*on_disk.lock().unwrap(), Some((40, 39)));
    assert_eq!(summary.checkpoints, 1);
    assert_eq!(summary.already_complete, 38);
    let saved = load_records(&output).unwrap();
    assert_eq!(saved.len(), 40);
    assert_eq!(saved[10], generated(11));
    assert_eq!(saved[39], generated(40));
    assert_eq!(saved[29].openai_alt_text_refined.as_deref(), Some("Fresh description."));
}
