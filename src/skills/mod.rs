//! Skill extraction from ticket text.
//!
//! [`SkillExtractor::extract_skills`] asks the classification endpoint for a
//! `{requiredSkills, notes}` object and degrades to a local keyword scan on
//! every failure path, so callers always receive a usable value.

pub mod gemini;
pub mod parse;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SkillExtractorConfig;
use gemini::{GenerateContentRequest, GenerateContentResponse, API_KEY_HEADER};

pub use parse::parse_model_output;

pub const NO_CREDENTIAL_NOTE: &str = "Fallback skill extraction (no GEMINI_API_KEY).";
pub const UNPARSABLE_OUTPUT_NOTE: &str = "Fallback (unparsable model output).";

/// Longest excerpt of a response body or error quoted in fallback notes.
const NOTE_EXCERPT_CHARS: usize = 120;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillExtraction {
    pub required_skills: Vec<String>,
    pub notes: String,
}

/// What came back from the endpoint before parsing.
enum ModelReply {
    Text(String),
    HttpError { status: u16, body: String },
}

pub struct SkillExtractor {
    config: SkillExtractorConfig,
    http_client: reqwest::Client,
}

impl SkillExtractor {
    pub fn new(config: SkillExtractorConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(format!("helpdesk-flow/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        if config.api_key.is_some() {
            info!(model = %config.model, "Skill extraction uses the classification endpoint");
        } else {
            info!("No classification credential configured, skill extraction uses the keyword fallback");
        }

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Never fails; every error path returns the keyword fallback with an
    /// annotated note.
    pub async fn extract_skills(&self, title: &str, description: &str) -> SkillExtraction {
        let Some(api_key) = self.config.api_key.as_deref() else {
            debug!("Using keyword fallback: no credential");
            return self.fallback(title, description, NO_CREDENTIAL_NOTE.to_string());
        };

        let reply = tokio::time::timeout(
            self.config.timeout,
            self.request_classification(api_key, title, description),
        )
        .await;

        match reply {
            Ok(Ok(ModelReply::Text(text))) => match parse_model_output(&text) {
                Some(extraction) => {
                    debug!(skills = ?extraction.required_skills, "Classification succeeded");
                    extraction
                }
                None => {
                    warn!("Classification output was not usable JSON, using keyword fallback");
                    self.fallback(title, description, UNPARSABLE_OUTPUT_NOTE.to_string())
                }
            },
            Ok(Ok(ModelReply::HttpError { status, body })) => {
                warn!(status, "Classification endpoint returned an error, using keyword fallback");
                self.fallback(
                    title,
                    description,
                    format!("Fallback (HTTP {}): {}...", status, excerpt(&body)),
                )
            }
            Ok(Err(e)) => {
                warn!("Classification request failed, using keyword fallback: {:#}", e);
                self.fallback(
                    title,
                    description,
                    format!("Fallback (exception): {}...", excerpt(&format!("{:#}", e))),
                )
            }
            Err(_) => {
                warn!(timeout = ?self.config.timeout, "Classification request timed out, using keyword fallback");
                let message = format!(
                    "request timed out after {}",
                    humantime::format_duration(self.config.timeout)
                );
                self.fallback(
                    title,
                    description,
                    format!("Fallback (exception): {}...", excerpt(&message)),
                )
            }
        }
    }

    async fn request_classification(
        &self,
        api_key: &str,
        title: &str,
        description: &str,
    ) -> Result<ModelReply> {
        let url = gemini::endpoint_url(&self.config.base_url, &self.config.model);
        let body = GenerateContentRequest::from_prompt(gemini::build_prompt(title, description));

        let response = self
            .http_client
            .post(&url)
            .header(API_KEY_HEADER, api_key)
            .json(&body)
            .send()
            .await
            .context("Classification request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Ok(ModelReply::HttpError {
                status: status.as_u16(),
                body,
            });
        }

        let reply: GenerateContentResponse = response
            .json()
            .await
            .context("Failed to decode classification response")?;
        Ok(ModelReply::Text(reply.first_text()))
    }

    /// Keyword scan over the lowercased title and description. Skills are
    /// reported in vocabulary order.
    pub fn scan_vocabulary(&self, title: &str, description: &str) -> Vec<String> {
        let text = format!("{} {}", title, description).to_lowercase();
        self.config
            .vocabulary
            .iter()
            .filter(|keyword| text.contains(keyword.as_str()))
            .cloned()
            .collect()
    }

    fn fallback(&self, title: &str, description: &str, notes: String) -> SkillExtraction {
        SkillExtraction {
            required_skills: self.scan_vocabulary(title, description),
            notes,
        }
    }
}

fn excerpt(text: &str) -> String {
    text.chars().take(NOTE_EXCERPT_CHARS).collect()
}
