use crate::parser::{Classification, ReplyParser};
use crate::types::{Entity, Outcome, StageError, StageFactory};
use std::sync::Arc;
use tracing::{debug, info};

/// What happened to one entity. Every variant becomes exactly one persisted row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityResult {
    Success(Outcome),
    ParseFailure { entity: Entity, raw: String },
    OperationError { entity: Entity, description: String },
}

impl EntityResult {
    /// Both stages ran to completion (even if the reply was unusable).
    pub fn reached_classifier(&self) -> bool {
        !matches!(self, Self::OperationError { .. })
    }

    pub fn into_outcome(self) -> Outcome {
        match self {
            Self::Success(outcome) => outcome,
            Self::ParseFailure { entity, raw } => Outcome::parse_failure(entity, raw),
            Self::OperationError { entity, description } => Outcome::operation_error(entity, description),
        }
    }
}

/// Research, then classify with the research output as context.
#[derive(Clone)]
pub struct TwoStagePipeline {
    factory: Arc<dyn StageFactory>,
}

impl TwoStagePipeline {
    pub fn new(factory: Arc<dyn StageFactory>) -> Self {
        Self { factory }
    }

    pub fn factory_name(&self) -> String {
        self.factory.factory_name()
    }

    /// Runs both stages for one entity. Stage errors propagate untouched so the
    /// scheduler can tell rate limits from everything else; a reply that does not
    /// parse is still a result.
    pub async fn run(&self, entity: &Entity) -> Result<EntityResult, StageError> {
        // Fresh stages per entity so nothing carries over between names.
        let researcher = self.factory.research_stage();
        let classifier = self.factory.classify_stage();

        debug!(entity = %entity, "Research stage");
        let context = researcher.research(entity).await?;
        info!(entity = %entity, context_chars = context.text.len(), "Research complete");

        debug!(entity = %entity, "Classify stage");
        let raw = classifier.classify(entity, &context).await?;

        Ok(match ReplyParser::parse(entity, &raw) {
            Classification::Parsed(outcome) => EntityResult::Success(outcome),
            Classification::Unparsed { raw } => EntityResult::ParseFailure {
                entity: entity.clone(),
                raw,
            },
        })
    }
}
