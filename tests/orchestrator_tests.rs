mod common;

use chrono::{Local, TimeZone};
use serde_json::json;
use std::sync::Arc;

use common::{FakeLauncher, Workspace, FAIL_CONVERSION, MISSING_LIBRARY, NOT_A_PDF};
use tender_docgen::engine::{pdf, EngineState, A4_HEIGHT_PT, A4_WIDTH_PT};
use tender_docgen::{GenerationRequest, GeneratorError};

const TS_MILLIS: i64 = 1_700_000_000_000;

fn timestamp() -> chrono::DateTime<Local> {
    Local.timestamp_millis_opt(TS_MILLIS).unwrap()
}

fn letters_workspace() -> Workspace {
    let ws = Workspace::new();
    ws.write_template("letters", "first", "<p>First for {{data.name}}</p>");
    ws.write_template("letters", "second", "<p>Amount {{formatCurrency data.amount}}</p>");
    ws.write_template("letters", "third", "<p>Dated {{formatDate data.date}}</p>");
    ws
}

fn letters_payload() -> serde_json::Value {
    json!({ "name": "Acme Infra", "amount": 125000, "date": "2024-03-05" })
}

// All sub-templates succeed

#[tokio::test]
async fn test_generate_all_sub_templates_in_order() {
    let ws = letters_workspace();
    let launcher = Arc::new(FakeLauncher::healthy());
    let (generator, engine) = ws.generator(launcher.clone());

    let result = generator
        .generate_at(GenerationRequest::new("letters", letters_payload()), timestamp())
        .await
        .unwrap();

    assert_eq!(
        result.produced_paths,
        vec![
            format!("out/letters/letters_first_{}.pdf", TS_MILLIS),
            format!("out/letters/letters_second_{}.pdf", TS_MILLIS),
            format!("out/letters/letters_third_{}.pdf", TS_MILLIS),
        ]
    );
    assert!(!result.is_partial());
    assert_eq!(ws.stored_files().len(), 3);

    for relative in &result.produced_paths {
        let bytes = std::fs::read(ws.storage.join(relative)).unwrap();
        assert!(pdf::is_pdf(&bytes));
    }

    let html = launcher.stats.html();
    assert!(html[0].contains("First for Acme Infra"));
    assert!(html[1].contains("₹1,25,000.00"));
    assert!(html[2].contains("5 March 2024"));

    assert_eq!(launcher.launches(), 1);
    assert_eq!(engine.state(), EngineState::Ready);
}

#[tokio::test]
async fn test_every_context_is_released() {
    let ws = letters_workspace();
    ws.write_template("letters", "second", &format!("<p>{}</p>", FAIL_CONVERSION));
    let launcher = Arc::new(FakeLauncher::healthy());
    let (generator, _engine) = ws.generator(launcher.clone());

    generator
        .generate_at(GenerationRequest::new("letters", letters_payload()), timestamp())
        .await
        .unwrap();

    assert_eq!(launcher.stats.opened(), 3);
    assert_eq!(launcher.stats.released(), 3);
    // Closed before generate returned, not left to drop.
    assert_eq!(launcher.stats.awaited(), 3);
}

#[tokio::test]
async fn test_silently_crashed_engine_is_relaunched() {
    let ws = Workspace::new();
    ws.write_template("cheque", "cheque_print", "<p>Pay {{data.payee}}</p>");
    let launcher = Arc::new(FakeLauncher::healthy());
    let (generator, engine) = ws.generator(launcher.clone());

    let request = || GenerationRequest::new("cheque", json!({ "payee": "Acme" })).with_instrument_id(7);
    generator.generate_at(request(), timestamp()).await.unwrap();
    launcher.last_engine().unwrap().crash();

    let result = generator.generate(request()).await.unwrap();

    assert_eq!(result.produced_paths.len(), 1);
    assert!(result.failures.is_empty());
    assert_eq!(launcher.launches(), 2);
    assert_eq!(engine.state(), EngineState::Ready);
}

// Partial failures

#[tokio::test]
async fn test_render_failure_is_recorded_and_batch_continues() {
    let ws = letters_workspace();
    let launcher = Arc::new(FakeLauncher::healthy());
    let (generator, _engine) = ws.generator(launcher.clone());

    let payload = json!({ "name": "Acme Infra", "amount": "abc", "date": "2024-03-05" });
    let result = generator
        .generate_at(GenerationRequest::new("letters", payload), timestamp())
        .await
        .unwrap();

    assert!(result.is_partial());
    assert_eq!(result.produced_paths.len(), 2);
    assert!(result.produced_paths[0].contains("letters_first_"));
    assert!(result.produced_paths[1].contains("letters_third_"));
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].template, "second");
    assert!(result.failures[0].error.contains("formatCurrency"));

    // The failed template never reached the engine.
    assert_eq!(launcher.stats.opened(), 2);
    assert_eq!(ws.stored_files().len(), 2);
}

#[tokio::test]
async fn test_conversion_failure_is_recorded() {
    let ws = letters_workspace();
    ws.write_template("letters", "third", &format!("<p>{}</p>", FAIL_CONVERSION));
    let launcher = Arc::new(FakeLauncher::healthy());
    let (generator, _engine) = ws.generator(launcher.clone());

    let result = generator
        .generate_at(GenerationRequest::new("letters", letters_payload()), timestamp())
        .await
        .unwrap();

    assert_eq!(result.produced_paths.len(), 2);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].template, "third");
    assert!(result.failures[0].error.contains("page crashed"));
    assert_eq!(ws.stored_files().len(), 2);
}

#[tokio::test]
async fn test_non_pdf_output_is_rejected() {
    let ws = letters_workspace();
    ws.write_template("letters", "first", &format!("<p>{}</p>", NOT_A_PDF));
    let launcher = Arc::new(FakeLauncher::healthy());
    let (generator, _engine) = ws.generator(launcher.clone());

    let result = generator
        .generate_at(GenerationRequest::new("letters", letters_payload()), timestamp())
        .await
        .unwrap();

    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].template, "first");
    assert!(result.failures[0].error.contains("not a PDF"));
}

#[tokio::test]
async fn test_missing_template_is_recorded() {
    let ws = Workspace::new();
    ws.write_template("letters", "first", "<p>only one</p>");
    let launcher = Arc::new(FakeLauncher::healthy());
    let (generator, _engine) = ws.generator(launcher.clone());

    let result = generator
        .generate_at(GenerationRequest::new("letters", json!({})), timestamp())
        .await
        .unwrap();

    assert_eq!(result.produced_paths.len(), 1);
    let failed: Vec<&str> = result.failures.iter().map(|f| f.template.as_str()).collect();
    assert_eq!(failed, vec!["second", "third"]);
    assert!(result.failures[0].error.contains("template not found"));
}

// Total failure

#[tokio::test]
async fn test_engine_unavailable_fails_whole_batch() {
    let ws = letters_workspace();
    let launcher = Arc::new(FakeLauncher::broken(MISSING_LIBRARY));
    let (generator, engine) = ws.generator(launcher.clone());

    let err = generator
        .generate_at(GenerationRequest::new("letters", letters_payload()), timestamp())
        .await
        .unwrap_err();

    match err {
        GeneratorError::AllTemplatesFailed { category, failures } => {
            assert_eq!(category, "letters");
            assert_eq!(failures.len(), 3);
            for failure in &failures {
                assert!(failure.error.contains("unavailable"));
                assert!(failure.error.contains("libnss3.so"));
            }
        }
        other => panic!("expected AllTemplatesFailed, got {:?}", other),
    }

    // Each sub-template makes its own bounded attempt sequence.
    assert_eq!(launcher.launches(), 9);
    assert_eq!(engine.state(), EngineState::Unavailable);
    assert!(ws.stored_files().is_empty());
}

#[tokio::test]
async fn test_all_renders_failing_writes_nothing() {
    let ws = Workspace::new();
    for name in ["first", "second", "third"] {
        ws.write_template("letters", name, "{{formatDate data.date}}");
    }
    let launcher = Arc::new(FakeLauncher::healthy());
    let (generator, _engine) = ws.generator(launcher.clone());

    let err = generator
        .generate_at(
            GenerationRequest::new("letters", json!({ "date": "not a date" })),
            timestamp(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, GeneratorError::AllTemplatesFailed { ref failures, .. } if failures.len() == 3));
    assert!(ws.stored_files().is_empty());
    assert_eq!(launcher.launches(), 0);
}

#[tokio::test]
async fn test_unknown_category_has_no_side_effects() {
    let ws = letters_workspace();
    let launcher = Arc::new(FakeLauncher::healthy());
    let (generator, engine) = ws.generator(launcher.clone());

    let err = generator
        .generate_at(GenerationRequest::new("no-such-category", json!({})), timestamp())
        .await
        .unwrap_err();

    assert!(matches!(err, GeneratorError::UnknownCategory(ref c) if c == "no-such-category"));
    assert!(!ws.storage.exists());
    assert_eq!(launcher.launches(), 0);
    assert_eq!(engine.state(), EngineState::Uninitialized);
}

// Page geometry

#[tokio::test]
async fn test_custom_geometry_sets_page_size() {
    let ws = Workspace::new();
    ws.write_template("cheque", "cheque_print", "<p>Pay {{data.payee}}</p>");
    let launcher = Arc::new(FakeLauncher::healthy());
    let (generator, _engine) = ws.generator(launcher.clone());

    let result = generator
        .generate_at(
            GenerationRequest::new("cheque", json!({ "payee": "Acme" })).with_instrument_id(1001),
            timestamp(),
        )
        .await
        .unwrap();

    assert_eq!(
        result.produced_paths,
        vec![format!("cheques/cheque_1001_cheque_print_{}.pdf", TS_MILLIS)]
    );
    let bytes = std::fs::read(ws.storage.join(&result.produced_paths[0])).unwrap();
    assert_eq!(pdf::media_box(&bytes), Some((900.0, 500.0)));
}

#[tokio::test]
async fn test_default_geometry_is_a4() {
    let ws = letters_workspace();
    let launcher = Arc::new(FakeLauncher::healthy());
    let (generator, _engine) = ws.generator(launcher.clone());

    let result = generator
        .generate_at(GenerationRequest::new("letters", letters_payload()), timestamp())
        .await
        .unwrap();

    let bytes = std::fs::read(ws.storage.join(&result.produced_paths[0])).unwrap();
    let (width, height) = pdf::media_box(&bytes).unwrap();
    assert!((width - A4_WIDTH_PT).abs() < 0.01);
    assert!((height - A4_HEIGHT_PT).abs() < 0.01);
}

// Variants and naming

#[tokio::test]
async fn test_variant_selects_alias_directory() {
    let ws = Workspace::new();
    ws.write_template("guarantee", "request_letter", "<p>BASE</p>");
    ws.write_template("guarantee/emd", "request_letter", "<p>EMD</p>");
    let launcher = Arc::new(FakeLauncher::healthy());
    let (generator, _engine) = ws.generator(launcher.clone());

    generator
        .generate_at(
            GenerationRequest::new("guarantee", json!({})).with_variant("emd"),
            timestamp(),
        )
        .await
        .unwrap();
    generator
        .generate_at(
            GenerationRequest::new("guarantee", json!({})).with_variant("unknown"),
            timestamp(),
        )
        .await
        .unwrap();

    let html = launcher.stats.html();
    assert!(html[0].contains("EMD"));
    assert!(html[1].contains("BASE"));
}

#[tokio::test]
async fn test_same_timestamp_does_not_overwrite() {
    let ws = Workspace::new();
    ws.write_template("guarantee", "request_letter", "<p>{{data.n}}</p>");
    let launcher = Arc::new(FakeLauncher::healthy());
    let (generator, _engine) = ws.generator(launcher.clone());

    let first = generator
        .generate_at(GenerationRequest::new("guarantee", json!({ "n": 1 })), timestamp())
        .await
        .unwrap();
    let second = generator
        .generate_at(GenerationRequest::new("guarantee", json!({ "n": 2 })), timestamp())
        .await
        .unwrap();

    assert_ne!(first.produced_paths, second.produced_paths);
    assert_eq!(
        second.produced_paths[0],
        format!("guarantees/guarantees_request_letter_{}-1.pdf", TS_MILLIS)
    );
    assert_eq!(ws.stored_files().len(), 2);
}

#[tokio::test]
async fn test_generate_uses_current_time() {
    let ws = letters_workspace();
    let launcher = Arc::new(FakeLauncher::healthy());
    let (generator, _engine) = ws.generator(launcher.clone());

    let before = Local::now().timestamp_millis();
    let result = generator
        .generate(GenerationRequest::new("letters", letters_payload()))
        .await
        .unwrap();
    let after = Local::now().timestamp_millis();

    let stamps: Vec<i64> = result
        .produced_paths
        .iter()
        .map(|p| {
            let stem = p.trim_end_matches(".pdf");
            stem.rsplit('_').next().unwrap().parse::<i64>().unwrap()
        })
        .collect();

    // One timestamp for the whole batch.
    assert!(stamps.iter().all(|s| *s == stamps[0]));
    assert!(stamps[0] >= before && stamps[0] <= after);
}
