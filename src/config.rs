use std::time::Duration;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Skill keywords scanned by the local fallback, in reporting order.
pub const DEFAULT_SKILL_VOCABULARY: &[&str] = &[
    "react",
    "node",
    "express",
    "mongodb",
    "css",
    "html",
    "typescript",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_expires_in: Duration,
    pub bcrypt_cost: u32,
    pub no_recover: bool,
    pub skills: SkillExtractorConfig,
    pub dispatcher: DispatcherConfig,
}

impl Config {
    pub fn database_url(&self) -> String {
        format!("sqlite:{}?mode=rwc", self.database_path)
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Settings for the external classification call and its local fallback.
#[derive(Debug, Clone)]
pub struct SkillExtractorConfig {
    /// Credential for the classification endpoint. `None` selects the local fallback.
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
    pub vocabulary: Vec<String>,
}

impl Default for SkillExtractorConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_GEMINI_MODEL.to_string(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            timeout: Duration::from_secs(20),
            vocabulary: DEFAULT_SKILL_VOCABULARY
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl SkillExtractorConfig {
    /// Blank credentials count as absent.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|key| !key.trim().is_empty());
        self
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub channel_capacity: usize,
    pub max_concurrent_runs: usize,
    pub max_delivery_attempts: u32,
    pub redelivery_backoff: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            max_concurrent_runs: 8,
            max_delivery_attempts: 3,
            redelivery_backoff: Duration::from_millis(500),
        }
    }
}

/// Split a comma-separated list into trimmed, lowercased, non-empty entries.
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}
