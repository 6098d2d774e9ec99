//! Contract Invariant Tests
//!
//! These tests verify the guarantees consumers of the engine rely on.

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use certforge_core::{
    convert::parse_timestamp,
    image::{Fetched, ResolveError, SINGLE_WHITE_PIXEL},
    BatchIngestor, CertificateDraft, CertificateMerger, FieldKind, FieldType, FieldValue,
    ImageFetcher, ImageResolver, StaticRoots, Submission, Template, TemplateDoc,
    TemplateValidator, ValidationError, Value,
};
use chrono::Utc;
use serde_json::json;

/// Serves PNG bytes for `.png` URLs and plain text for everything else.
struct FakeWeb {
    calls: Arc<AtomicUsize>,
}

impl ImageFetcher for FakeWeb {
    fn fetch(&self, url: &str) -> Result<Fetched, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if url.contains("unreachable") {
            return Err(ResolveError::Fetch("connection refused".into()));
        }
        let content_type = if url.ends_with(".png") { "image/png" } else { "text/plain" };
        Ok(Fetched {
            content_type: Some(content_type.to_string()),
            bytes: b"\x89PNG\r\n\x1a\n".to_vec(),
        })
    }
}

struct Env {
    dir: tempfile::TempDir,
    calls: Arc<AtomicUsize>,
    resolver: ImageResolver,
}

fn create_env() -> Env {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("static/stock")).unwrap();
    fs::write(dir.path().join("static/background.png"), b"png").unwrap();
    fs::write(dir.path().join("static/stock/seal.png"), b"png").unwrap();

    let roots = StaticRoots::new()
        .with_static_dir(dir.path().join("static"))
        .with_tmp_static_dir(dir.path().join("tmp/static"));
    let calls = Arc::new(AtomicUsize::new(0));
    let resolver = ImageResolver::new(roots, Box::new(FakeWeb { calls: calls.clone() }));
    Env { dir, calls, resolver }
}

fn template_doc(fields: serde_json::Value) -> TemplateDoc {
    serde_json::from_value(json!({
        "name": "participation",
        "title": "Certificate of Participation",
        "uid": "tpl-1",
        "background": "background.png",
        "dimensions": {"width": 2000, "height": 1414},
        "fields": fields,
    }))
    .unwrap()
}

fn create_test_template(env: &Env) -> Template {
    TemplateValidator::new(&env.resolver)
        .validate(template_doc(json!([
            {"name": "Name", "required": true, "x": 1000, "y": 600},
            {"name": "Age", "type": "Number"},
            {"name": "Photo", "type": "Image", "image": {"w": 100, "h": 100},
             "defaultValue": "stock/seal.png"},
            {"name": "Issued", "type": "Date", "defaultValue": "now"},
            {"name": "Organizer", "placeholder": true, "value": "ACME"},
            {"name": "Motto", "fixed": true, "value": "Per aspera ad astra"}
        ])))
        .unwrap()
}

fn draft(values: Vec<Submission>) -> CertificateDraft {
    CertificateDraft {
        uid: "cert-1".into(),
        template: "participation".into(),
        title: "Certificate of Participation".into(),
        date: "2024-01-01T00:00:00.000Z".into(),
        values,
    }
}

fn age_template(env: &Env) -> Template {
    TemplateValidator::new(&env.resolver)
        .validate(template_doc(json!([{"name": "Age", "type": "Number", "required": true}])))
        .unwrap()
}

#[test]
fn invariant_validation_is_idempotent() {
    let env = create_env();
    let doc = template_doc(json!([
        {"name": "Name"},
        {"name": "Photo", "type": "Image", "image": {"w": 10, "h": 10},
         "value": SINGLE_WHITE_PIXEL, "defaultValue": "https://cdn.example.com/seal.png"},
        {"name": "Issued", "type": "Date", "value": "now", "defaultValue": "2023-12-31"},
        {"name": "Shade", "textFormat": {"style": {"type": "gradient", "gradient": {"stops": ["#000", "#fff"]}}}}
    ]));

    let validator = TemplateValidator::new(&env.resolver);
    let first = validator.validate(doc).unwrap();

    let reread: TemplateDoc = serde_json::from_value(serde_json::to_value(&first).unwrap()).unwrap();
    let second = validator.validate(reread).unwrap();

    assert_eq!(first, second);
}

#[test]
fn invariant_missing_type_becomes_string() {
    let env = create_env();
    let template = create_test_template(&env);
    assert_eq!(template.field("Name").unwrap().field_type(), FieldType::String);

    let wire = serde_json::to_value(&template).unwrap();
    assert_eq!(wire["fields"][0]["type"], json!("String"));
    assert_eq!(wire["fields"][0]["textFormat"], json!({}));
    assert_eq!(wire["fields"][0]["x"], json!(1000));
}

#[test]
fn invariant_now_is_not_in_the_past() {
    let env = create_env();
    let before = Utc::now();
    let template = TemplateValidator::new(&env.resolver)
        .validate(template_doc(json!([{"name": "Issued", "type": "Date", "value": "now"}])))
        .unwrap();

    let FieldKind::Date { value: Some(stamp), .. } = &template.fields[0].kind else {
        panic!("expected a resolved date");
    };
    assert!(parse_timestamp(stamp).unwrap() >= before);
}

#[test]
fn invariant_inline_png_exists_after_resolution() {
    let env = create_env();
    let resolved = env.resolver.resolve(SINGLE_WHITE_PIXEL).unwrap();
    assert!(env.resolver.roots().exists(&resolved));
    assert!(env.dir.path().join("tmp/static").join(&resolved).is_file());
}

#[test]
fn invariant_hidden_value_is_type_default() {
    let env = create_env();
    let template = create_test_template(&env);
    let merger = CertificateMerger::new(&env.resolver);

    for submitted in [json!(99), json!("x"), json!(null)] {
        let cert = merger
            .merge(
                draft(vec![
                    Submission::new("Name", "Ada"),
                    Submission::hidden("Age", Some(submitted)),
                ]),
                &template,
            )
            .unwrap();
        let age = cert.value("Age").unwrap();
        assert_eq!(age.value, FieldValue::Number(0.into()));
        assert!(!age.visible);
    }
}

#[test]
fn invariant_placeholder_visibility() {
    let env = create_env();
    let template = create_test_template(&env);
    let merger = CertificateMerger::new(&env.resolver);

    let shown = merger
        .merge(draft(vec![Submission::new("Name", "Ada")]), &template)
        .unwrap();
    assert!(shown.value("Organizer").is_none());

    let hidden = merger
        .merge(
            draft(vec![Submission::new("Name", "Ada"), Submission::hidden("Organizer", None)]),
            &template,
        )
        .unwrap();
    assert_eq!(
        hidden.value("Organizer"),
        Some(&Value {
            name: "Organizer".into(),
            value: FieldValue::String("ACME".into()),
            visible: false,
        })
    );
}

#[test]
fn invariant_output_follows_template_order() {
    let env = create_env();
    let template = create_test_template(&env);
    let cert = CertificateMerger::new(&env.resolver)
        .merge(
            draft(vec![
                Submission::new("Issued", "2024-06-01"),
                Submission::new("Motto", "overridden?"),
                Submission::new("Age", 7),
                Submission::new("Name", "Ada"),
            ]),
            &template,
        )
        .unwrap();
    let names: Vec<_> = cert.values.iter().map(|v| v.name.as_str()).collect();
    assert_eq!(names, vec!["Name", "Age", "Issued"]);
}

#[test]
fn invariant_bad_row_does_not_abort_batch() {
    let env = create_env();
    let template = create_test_template(&env);
    let csv = "\
Name,Photo,TITLE,uid
Ada,stock/seal.png,,old-1
Alan,https://cdn.example.com/alan.png,Dr.,old-2
Grace,https://cdn.example.com/unreachable.png,,old-3
Edsger,,,old-4
";
    let report = BatchIngestor::new(&template, &env.resolver)
        .ingest_reader(csv.as_bytes())
        .unwrap();

    assert_eq!(report.certificates.len(), 4);
    assert_eq!(report.failed, 1);

    let third = &report.certificates[2];
    assert!(third.error.as_deref().unwrap().contains("Photo"));
    assert!(third.values.is_empty());

    for (idx, cert) in report.certificates.iter().enumerate() {
        assert!(cert.uid.len() == 36 && !cert.uid.starts_with("old-"));
        if idx != 2 {
            assert!(cert.error.is_none());
            assert!(!cert.values.is_empty());
        }
    }

    assert_eq!(report.certificates[1].title, "Dr.");
    assert_eq!(report.certificates[0].title, "Certificate of Participation");
    assert_ne!(report.certificates[0].uid, report.certificates[1].uid);

    let FieldValue::Image(path) = &report.certificates[1].value("Photo").unwrap().value else {
        panic!("expected an image value");
    };
    assert!(path.starts_with("downloaded/"));
}

#[test]
fn invariant_remote_images_are_fetched_per_occurrence() {
    let env = create_env();
    let template = create_test_template(&env);
    let csv = "Name,Photo\nA,https://cdn.example.com/p.png\nB,https://cdn.example.com/p.png\n";
    let report = BatchIngestor::new(&template, &env.resolver)
        .ingest_reader(csv.as_bytes())
        .unwrap();
    assert_eq!(report.failed, 0);
    assert_eq!(env.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn scenario_age_is_coerced_from_text() {
    let env = create_env();
    let template = age_template(&env);
    let report = BatchIngestor::new(&template, &env.resolver)
        .ingest_reader("Age\n42\n".as_bytes())
        .unwrap();
    assert_eq!(
        report.certificates[0].values,
        vec![Value { name: "Age".into(), value: FieldValue::Number(42.into()), visible: true }]
    );
}

#[test]
fn scenario_missing_age_fails() {
    let env = create_env();
    let template = age_template(&env);
    let err = CertificateMerger::new(&env.resolver)
        .merge(draft(vec![]), &template)
        .unwrap_err();
    assert_eq!(err, ValidationError::MissingValue("Age".into()));

    // The same record through ingestion becomes an annotated certificate
    let report = BatchIngestor::new(&template, &env.resolver)
        .ingest_rows(vec![vec![("Age".to_string(), String::new())]]);
    assert_eq!(report.failed, 1);
    assert_eq!(report.certificates[0].error.as_deref(), Some("Received no value for field 'Age'!"));
}

#[test]
fn scenario_unusable_number_is_dropped() {
    let env = create_env();
    let template = age_template(&env);
    let report = BatchIngestor::new(&template, &env.resolver)
        .ingest_reader("Age\nforty-two\n".as_bytes())
        .unwrap();
    assert_eq!(report.certificates[0].error.as_deref(), Some("Received no value for field 'Age'!"));
}

#[test]
fn scenario_text_url_is_not_an_image() {
    let env = create_env();
    let template = TemplateValidator::new(&env.resolver)
        .validate(template_doc(json!([
            {"name": "Photo", "type": "Image", "image": {"w": 100, "h": 100}}
        ])))
        .unwrap();
    let err = CertificateMerger::new(&env.resolver)
        .merge(
            draft(vec![Submission::new("Photo", "https://example.com/not-an-image.txt")]),
            &template,
        )
        .unwrap_err();
    assert!(matches!(err, ValidationError::ImageUnavailable { .. }));
}

#[test]
fn invariant_certificates_survive_serialization() {
    let env = create_env();
    let template = create_test_template(&env);
    let report = BatchIngestor::new(&template, &env.resolver)
        .ingest_reader("Name,Age,Issued\nAda,36,now\n".as_bytes())
        .unwrap();
    let cert = &report.certificates[0];
    let json = serde_json::to_string(cert).unwrap();
    let back: certforge_core::Certificate = serde_json::from_str(&json).unwrap();
    assert_eq!(&back, cert);
    assert_eq!(back.value("Issued").unwrap().value.field_type(), FieldType::Date);
}
