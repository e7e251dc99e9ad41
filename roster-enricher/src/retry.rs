use crate::pipeline::{EntityResult, TwoStagePipeline};
use crate::types::{Entity, StageError};
use backoff::backoff::{Backoff, Constant};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Per-entity retry states.
#[derive(Debug)]
pub enum AttemptState {
    Attempting { attempt: u32 },
    RateLimited { attempt: u32, retry_after: Option<Duration> },
    OperationFailed { description: String },
    Success(EntityResult),
}

/// Drives one pipeline invocation per entity: rate limits are retried after
/// the backoff policy's delay for as long as it keeps yielding delays, any
/// other stage error ends the entity with an error result.
pub struct RetryScheduler<B = Constant> {
    backoff: B,
    pacing: Duration,
}

impl RetryScheduler<Constant> {
    /// Fixed backoff, retried without limit.
    pub fn fixed(backoff_interval: Duration, pacing: Duration) -> Self {
        Self::new(Constant::new(backoff_interval), pacing)
    }
}

impl<B: Backoff> RetryScheduler<B> {
    pub fn new(backoff: B, pacing: Duration) -> Self {
        Self { backoff, pacing }
    }

    pub async fn run(&mut self, entity: &Entity, pipeline: &TwoStagePipeline) -> EntityResult {
        self.backoff.reset();
        let mut state = AttemptState::Attempting { attempt: 1 };

        loop {
            state = match state {
                AttemptState::Attempting { attempt } => {
                    debug!(entity = %entity, attempt, "Attempting");
                    match pipeline.run(entity).await {
                        Ok(result) => AttemptState::Success(result),
                        Err(StageError::RateLimited { retry_after }) => AttemptState::RateLimited { attempt, retry_after },
                        Err(StageError::Operation(description)) => AttemptState::OperationFailed { description },
                    }
                }
                AttemptState::RateLimited { attempt, retry_after } => match self.backoff.next_backoff() {
                    Some(wait) => {
                        warn!(
                            entity = %entity,
                            attempt,
                            wait_secs = wait.as_secs_f64(),
                            retry_after_secs = retry_after.map(|d| d.as_secs()),
                            "Rate limited, backing off"
                        );
                        tokio::time::sleep(wait).await;
                        AttemptState::Attempting { attempt: attempt + 1 }
                    }
                    None => AttemptState::OperationFailed {
                        description: format!("rate limited after {} attempts, backoff policy gave up", attempt),
                    },
                },
                AttemptState::OperationFailed { description } => {
                    warn!(entity = %entity, error = %description, "Entity failed");
                    return EntityResult::OperationError {
                        entity: entity.clone(),
                        description,
                    };
                }
                AttemptState::Success(result) => {
                    info!(entity = %entity, "Entity completed");
                    return result;
                }
            };
        }
    }

    /// Pause between entities on the success path.
    pub async fn pace(&self) {
        if !self.pacing.is_zero() {
            debug!(pacing_secs = self.pacing.as_secs_f64(), "Pacing before next entity");
            tokio::time::sleep(self.pacing).await;
        }
    }
}
