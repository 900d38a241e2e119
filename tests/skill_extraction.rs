//! Skill extraction against a mock classification endpoint.
//!
//! Every failure mode must land on the keyword fallback with the matching
//! note; only a well-formed reply is returned as-is.

use std::time::Duration;

use helpdesk_flow::{
    config::SkillExtractorConfig,
    skills::{SkillExtractor, NO_CREDENTIAL_NOTE, UNPARSABLE_OUTPUT_NOTE},
};
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MODEL_PATH: &str = "/models/gemini-2.0-flash:generateContent";

fn extractor_for(server: &MockServer) -> SkillExtractor {
    let config = SkillExtractorConfig {
        base_url: server.uri(),
        timeout: Duration::from_secs(5),
        ..SkillExtractorConfig::default()
    }
    .with_api_key(Some("test-key".to_string()));
    SkillExtractor::new(config).expect("extractor")
}

fn model_reply(text: &str) -> Value {
    json!({
        "candidates": [{ "content": { "parts": [{ "text": text }] } }]
    })
}

async fn mount_reply(server: &MockServer, template: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path(MODEL_PATH))
        .respond_with(template)
        .mount(server)
        .await;
}

#[tokio::test]
async fn well_formed_reply_is_returned_unmodified() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(MODEL_PATH))
        .and(header("X-goog-api-key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(model_reply(
            r#"{"requiredSkills":["React"," Redux "],"notes":"Frontend work"}"#,
        )))
        .expect(1)
        .mount(&server)
        .await;

    let extraction = extractor_for(&server)
        .extract_skills("Dashboard", "Build it with React")
        .await;

    assert_eq!(extraction.required_skills, vec!["React", " Redux "]);
    assert_eq!(extraction.notes, "Frontend work");
}

#[tokio::test]
async fn prompt_carries_ticket_text() {
    let server = MockServer::start().await;
    mount_reply(
        &server,
        ResponseTemplate::new(200).set_body_json(model_reply(r#"{"requiredSkills":[]}"#)),
    )
    .await;

    extractor_for(&server)
        .extract_skills("Style the homepage", "Update CSS and HTML layout")
        .await;

    let requests = server.received_requests().await.expect("recording enabled");
    assert_eq!(requests.len(), 1);
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap();
    assert!(prompt.contains("Title: Style the homepage"));
    assert!(prompt.contains("Description: Update CSS and HTML layout"));
}

#[tokio::test]
async fn fenced_reply_is_unwrapped() {
    let server = MockServer::start().await;
    mount_reply(
        &server,
        ResponseTemplate::new(200).set_body_json(model_reply(
            "```json\n{\"requiredSkills\":[\"css\"],\"notes\":\"\"}\n```",
        )),
    )
    .await;

    let extraction = extractor_for(&server).extract_skills("t", "d").await;
    assert_eq!(extraction.required_skills, vec!["css"]);
    assert_eq!(extraction.notes, "");
}

#[tokio::test]
async fn http_error_falls_back_with_status_and_excerpt() {
    let server = MockServer::start().await;
    let body = "x".repeat(500);
    mount_reply(&server, ResponseTemplate::new(500).set_body_string(body)).await;

    let extraction = extractor_for(&server)
        .extract_skills("Dashboard", "Build a React dashboard with Node and MongoDB")
        .await;

    assert_eq!(extraction.required_skills, vec!["react", "node", "mongodb"]);
    assert_eq!(
        extraction.notes,
        format!("Fallback (HTTP 500): {}...", "x".repeat(120))
    );
}

#[tokio::test]
async fn non_json_reply_falls_back_with_unparsable_marker() {
    let server = MockServer::start().await;
    mount_reply(
        &server,
        ResponseTemplate::new(200).set_body_json(model_reply("not json")),
    )
    .await;

    let extraction = extractor_for(&server)
        .extract_skills("Homepage", "HTML and CSS tweaks")
        .await;

    assert_eq!(extraction.notes, UNPARSABLE_OUTPUT_NOTE);
    assert_eq!(extraction.required_skills, vec!["css", "html"]);
}

#[tokio::test]
async fn non_array_skills_fall_back_with_unparsable_marker() {
    let server = MockServer::start().await;
    mount_reply(
        &server,
        ResponseTemplate::new(200)
            .set_body_json(model_reply(r#"{"requiredSkills":"typescript","notes":"x"}"#)),
    )
    .await;

    let extraction = extractor_for(&server)
        .extract_skills("Types", "Migrate to TypeScript")
        .await;

    assert_eq!(extraction.notes, UNPARSABLE_OUTPUT_NOTE);
    assert_eq!(extraction.required_skills, vec!["typescript"]);
}

#[tokio::test]
async fn empty_candidate_list_is_unparsable() {
    let server = MockServer::start().await;
    mount_reply(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({ "candidates": [] })),
    )
    .await;

    let extraction = extractor_for(&server).extract_skills("t", "d").await;
    assert_eq!(extraction.notes, UNPARSABLE_OUTPUT_NOTE);
    assert!(extraction.required_skills.is_empty());
}

#[tokio::test]
async fn slow_endpoint_times_out_into_exception_fallback() {
    let server = MockServer::start().await;
    mount_reply(
        &server,
        ResponseTemplate::new(200)
            .set_body_json(model_reply(r#"{"requiredSkills":["late"]}"#))
            .set_delay(Duration::from_secs(5)),
    )
    .await;

    let config = SkillExtractorConfig {
        base_url: server.uri(),
        timeout: Duration::from_millis(200),
        ..SkillExtractorConfig::default()
    }
    .with_api_key(Some("test-key".to_string()));
    let extractor = SkillExtractor::new(config).unwrap();

    let extraction = extractor.extract_skills("React app", "").await;
    assert!(extraction.notes.starts_with("Fallback (exception): "));
    assert!(extraction.notes.ends_with("..."));
    assert_eq!(extraction.required_skills, vec!["react"]);
}

#[tokio::test]
async fn unreachable_endpoint_falls_back_with_exception_note() {
    // Nothing listens on port 9 (discard) in the test environment.
    let config = SkillExtractorConfig {
        base_url: "http://127.0.0.1:9".to_string(),
        timeout: Duration::from_secs(2),
        ..SkillExtractorConfig::default()
    }
    .with_api_key(Some("test-key".to_string()));
    let extractor = SkillExtractor::new(config).unwrap();

    let extraction = extractor.extract_skills("Express API", "").await;
    assert!(extraction.notes.starts_with("Fallback (exception): "));
    let excerpt = extraction
        .notes
        .trim_start_matches("Fallback (exception): ")
        .trim_end_matches("...");
    assert!(excerpt.chars().count() <= 120);
    assert_eq!(extraction.required_skills, vec!["express"]);
}

#[tokio::test]
async fn missing_credential_never_calls_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let config = SkillExtractorConfig {
        base_url: server.uri(),
        ..SkillExtractorConfig::default()
    }
    .with_api_key(Some("   ".to_string()));
    let extraction = SkillExtractor::new(config)
        .unwrap()
        .extract_skills("Dashboard", "Build a React dashboard with Node and MongoDB")
        .await;

    assert_eq!(extraction.notes, NO_CREDENTIAL_NOTE);
    assert!(extraction.required_skills.contains(&"react".to_string()));
    assert!(!extraction.required_skills.contains(&"typescript".to_string()));
}
