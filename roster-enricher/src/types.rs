use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

// Use the interfaces crate for the stage vocabulary
pub use interfaces::defs::{ClassifyStage, Entity, ResearchStage, StageContext, StageError, StageFactory, StageResult};

pub const UNKNOWN: &str = "Unknown";

/// Whether the entity's current position counts as a key position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyPosition {
    Yes,
    No,
    #[default]
    Unknown,
}

impl KeyPosition {
    /// Lenient reading of a classifier answer; anything unrecognised is `Unknown`.
    pub fn from_answer(answer: &str) -> Self {
        match answer.trim().to_ascii_lowercase().as_str() {
            "yes" | "y" | "true" => Self::Yes,
            "no" | "n" | "false" => Self::No,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yes => "Yes",
            Self::No => "No",
            Self::Unknown => UNKNOWN,
        }
    }
}

impl fmt::Display for KeyPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OutcomeStatus {
    Success,
    ParseFailure,
    OperationError,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Success => "success",
            Self::ParseFailure => "parse_failure",
            Self::OperationError => "operation_error",
        };
        f.write_str(label)
    }
}

/// The terminal record for one entity. Created once, persisted once, never edited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub entity: Entity,
    pub role: String,
    pub organization: String,
    pub key_position: KeyPosition,
    pub reason: String,
    pub reference_link: String,
    pub status: OutcomeStatus,
}

impl Outcome {
    pub const PARSE_ERROR_ROLE: &'static str = "Parse Error";
    pub const SCRIPT_ERROR_ROLE: &'static str = "Script Error";

    /// Keeps the raw classifier text so nothing is silently dropped.
    pub fn parse_failure(entity: Entity, raw: impl Into<String>) -> Self {
        Self {
            entity,
            role: Self::PARSE_ERROR_ROLE.to_string(),
            organization: UNKNOWN.to_string(),
            key_position: KeyPosition::Unknown,
            reason: raw.into(),
            reference_link: String::new(),
            status: OutcomeStatus::ParseFailure,
        }
    }

    pub fn operation_error(entity: Entity, description: impl Into<String>) -> Self {
        Self {
            entity,
            role: Self::SCRIPT_ERROR_ROLE.to_string(),
            organization: description.into(),
            key_position: KeyPosition::Unknown,
            reason: String::new(),
            reference_link: String::new(),
            status: OutcomeStatus::OperationError,
        }
    }
}

/// Run parameters for the scheduler and the batch loop.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub backoff_interval: Duration,
    pub pacing_interval: Duration,
    pub max_entities: Option<usize>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            backoff_interval: Duration::from_secs(60),
            pacing_interval: Duration::from_secs(5),
            max_entities: None,
        }
    }
}

/// Settings for the HTTP-backed stages.
#[derive(Debug, Clone)]
pub struct StageConfig {
    pub openai_api_key: String,
    pub serper_api_key: String,
    pub model: String,
    pub openai_base_url: String,
    pub serper_url: String,
    pub subject: String,
    pub search_results: usize,
    pub timeout_seconds: u64,
    pub user_agent: String,
}

impl StageConfig {
    pub const DEFAULT_MODEL: &'static str = "gpt-4o-mini";
    pub const DEFAULT_SUBJECT: &'static str = "former Israeli competitive swimmer";

    pub fn new(openai_api_key: impl Into<String>, serper_api_key: impl Into<String>) -> Self {
        Self {
            openai_api_key: openai_api_key.into(),
            serper_api_key: serper_api_key.into(),
            model: Self::DEFAULT_MODEL.to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            serper_url: "https://google.serper.dev/search".to_string(),
            subject: Self::DEFAULT_SUBJECT.to_string(),
            search_results: 10,
            timeout_seconds: 60,
            user_agent: "Roster-Enricher/1.0".to_string(),
        }
    }

    /// Reads `OPENAI_API_KEY` and `SERPER_API_KEY`. Call `dotenvy::dotenv()` first
    /// if keys live in a `.env` file.
    pub fn from_env() -> Result<Self> {
        let openai_api_key = require_env("OPENAI_API_KEY")?;
        let serper_api_key = require_env("SERPER_API_KEY")?;
        Ok(Self::new(openai_api_key, serper_api_key))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.openai_base_url)?;
        Url::parse(&self.serper_url)?;
        if self.model.trim().is_empty() {
            return Err(EnricherError::Config("model must not be empty".to_string()));
        }
        Ok(())
    }
}

fn require_env(key: &str) -> Result<String> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(EnricherError::Config(format!("{} not set", key))),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnricherError {
    #[error("Entity source '{source_name}' is unavailable: {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    #[error("Result store {} failed: {reason}", .path.display())]
    Store { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EnricherError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_config_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.backoff_interval, Duration::from_secs(60));
        assert_eq!(config.pacing_interval, Duration::from_secs(5));
        assert_eq!(config.max_entities, None);
    }

    #[test]
    fn key_position_reads_loose_answers() {
        assert_eq!(KeyPosition::from_answer(" YES "), KeyPosition::Yes);
        assert_eq!(KeyPosition::from_answer("no"), KeyPosition::No);
        assert_eq!(KeyPosition::from_answer("maybe"), KeyPosition::Unknown);
    }
}
