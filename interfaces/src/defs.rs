use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// A named subject to enrich. Always non-empty, on one line, with single
/// spaces between words; the display name doubles as the ledger key and is
/// persisted exactly as held here.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity(String);

impl Entity {
    /// Normalizes a raw upstream name: strips a byte order mark and folds any
    /// run of whitespace, line breaks included, into one space. Returns `None`
    /// for blank input.
    pub fn parse(raw: &str) -> Option<Self> {
        let name = raw
            .trim_start_matches('\u{feff}')
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        if name.is_empty() {
            None
        } else {
            Some(Self(name))
        }
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Free-text output of the research stage. Lives only as long as the
/// invocation that produced it.
#[derive(Clone, Debug, Default)]
pub struct StageContext {
    pub text: String,
}

impl StageContext {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// The external operation asked us to slow down. Always retryable.
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    /// Anything else: network, timeout, rejected request, unexpected fault.
    #[error("operation failed: {0}")]
    Operation(String),
}

impl StageError {
    pub fn operation(message: impl Into<String>) -> Self {
        Self::Operation(message.into())
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

pub type StageResult<T> = std::result::Result<T, StageError>;

/// First stage: gather whatever is publicly known about an entity.
#[async_trait]
pub trait ResearchStage: Send + Sync {
    async fn research(&self, entity: &Entity) -> StageResult<StageContext>;
}

/// Second stage: turn the research context into a classification reply,
/// expected to be a JSON object (possibly fenced).
#[async_trait]
pub trait ClassifyStage: Send + Sync {
    async fn classify(&self, entity: &Entity, context: &StageContext) -> StageResult<String>;
}

// Object style note:
// Stages are built fresh for every entity and dropped afterwards, so an
// implementation never sees two entities. Anything shared between entities
// (HTTP connection pools, credentials) belongs to the factory and must be
// immutable.

/// Builds a fresh pair of stages for each entity.
pub trait StageFactory: Send + Sync {
    fn factory_name(&self) -> String;

    fn research_stage(&self) -> Box<dyn ResearchStage>;

    fn classify_stage(&self) -> Box<dyn ClassifyStage>;
}
