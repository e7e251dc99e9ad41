use crate::pipeline::TwoStagePipeline;
use crate::retry::RetryScheduler;
use crate::source::EntitySource;
use crate::store::{Ledger, ResultStore};
use crate::types::{Entity, OutcomeStatus, Result};
use backoff::backoff::Backoff;
use chrono::{DateTime, Utc};
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

/// The work set for one invocation.
#[derive(Debug)]
pub struct WorkPlan {
    pub source_total: usize,
    pub ledger: Ledger,
    /// Source order, ledger entries removed, before the batch cap.
    pub pending: Vec<Entity>,
}

impl WorkPlan {
    pub fn already_recorded(&self) -> usize {
        self.source_total - self.pending.len()
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub source_total: usize,
    pub already_recorded: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub parse_failures: usize,
    pub operation_errors: usize,
    /// Pending entities left for a later run because of the batch cap.
    pub deferred: usize,
}

impl RunReport {
    fn count(&mut self, status: OutcomeStatus) {
        self.attempted += 1;
        match status {
            OutcomeStatus::Success => self.succeeded += 1,
            OutcomeStatus::ParseFailure => self.parse_failures += 1,
            OutcomeStatus::OperationError => self.operation_errors += 1,
        }
    }
}

/// Loads the source and the ledger and computes what is left to do, keeping
/// source order. Creates the output file if it does not exist yet.
pub fn plan_work<S: EntitySource + ?Sized>(source: &S, store: &ResultStore) -> Result<WorkPlan> {
    let entities = source.load()?;
    let ledger = store.load_ledger()?;
    Ok(build_plan(source, entities, ledger))
}

/// Read-only variant of [`plan_work`] for reporting.
pub fn survey_work<S: EntitySource + ?Sized>(source: &S, store: &ResultStore) -> Result<WorkPlan> {
    let entities = source.load()?;
    let ledger = store.read_ledger()?;
    Ok(build_plan(source, entities, ledger))
}

fn build_plan<S: EntitySource + ?Sized>(source: &S, entities: Vec<Entity>, ledger: Ledger) -> WorkPlan {
    let source_total = entities.len();
    let pending: Vec<Entity> = entities.into_iter().filter(|entity| !ledger.contains(entity)).collect();

    info!(
        source = %source.source_name(),
        source_total,
        recorded = ledger.len(),
        pending = pending.len(),
        "Computed work set"
    );

    WorkPlan {
        source_total,
        ledger,
        pending,
    }
}

/// Top-level loop: everything in the source that is not yet in the ledger,
/// one entity at a time, each outcome appended as soon as it exists.
pub struct BatchRunner<S, B> {
    source: S,
    store: ResultStore,
    pipeline: TwoStagePipeline,
    scheduler: RetryScheduler<B>,
    max_entities: Option<usize>,
}

impl<S, B> BatchRunner<S, B>
where
    S: EntitySource,
    B: Backoff,
{
    pub fn new(source: S, store: ResultStore, pipeline: TwoStagePipeline, scheduler: RetryScheduler<B>) -> Self {
        Self {
            source,
            store,
            pipeline,
            scheduler,
            max_entities: None,
        }
    }

    pub fn with_max_entities(mut self, max_entities: Option<usize>) -> Self {
        self.max_entities = max_entities;
        self
    }

    pub fn plan(&self) -> Result<WorkPlan> {
        plan_work(&self.source, &self.store)
    }

    pub async fn run(&mut self) -> Result<RunReport> {
        let WorkPlan {
            source_total,
            mut ledger,
            pending,
        } = self.plan()?;

        let run_id = Uuid::new_v4();
        let limit = self.max_entities.unwrap_or(usize::MAX);
        let deferred = pending.len().saturating_sub(limit);
        let batch: Vec<Entity> = pending.into_iter().take(limit).collect();

        let mut report = RunReport {
            run_id,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            source_total,
            already_recorded: source_total - batch.len() - deferred,
            attempted: 0,
            succeeded: 0,
            parse_failures: 0,
            operation_errors: 0,
            deferred,
        };

        info!(
            %run_id,
            stages = %self.pipeline.factory_name(),
            batch = batch.len(),
            deferred,
            "Starting run"
        );

        let total = batch.len();
        for (index, entity) in batch.into_iter().enumerate() {
            // Source is deduplicated, but never write a second row for a name.
            if ledger.contains(&entity) {
                continue;
            }

            let span = info_span!("entity", %run_id, name = %entity, position = index + 1, total);
            let result = self.scheduler.run(&entity, &self.pipeline).instrument(span).await;
            let reached_classifier = result.reached_classifier();

            let outcome = result.into_outcome();
            self.store.append(&outcome)?;
            ledger.record(outcome.entity.clone(), outcome.status);
            report.count(outcome.status);

            info!(
                entity = %outcome.entity,
                status = %outcome.status,
                key_position = %outcome.key_position,
                "Recorded outcome"
            );

            if reached_classifier && index + 1 < total {
                self.scheduler.pace().await;
            }
        }

        report.finished_at = Utc::now();
        info!(
            %run_id,
            attempted = report.attempted,
            succeeded = report.succeeded,
            parse_failures = report.parse_failures,
            operation_errors = report.operation_errors,
            deferred = report.deferred,
            "Run finished"
        );
        Ok(report)
    }
}
