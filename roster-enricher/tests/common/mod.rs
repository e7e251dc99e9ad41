#![allow(dead_code)]

use async_trait::async_trait;
use backoff::backoff::{Backoff, Zero};
use roster_enricher::{
    BatchRunner, ClassifyStage, Entity, ResearchStage, ResultStore, RetryScheduler, StageContext, StageError,
    StageFactory, StageResult, StaticSource, TwoStagePipeline,
};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// What the scripted research stage does on its next call for a name.
#[derive(Clone, Debug)]
pub enum Step {
    RateLimited,
    Fail(String),
    Reply(String),
}

pub fn success_reply(name: &str) -> String {
    format!(
        "```json\n{{\"name\": \"{}\", \"role\": \"Engineer\", \"company\": \"Acme\", \"is_key\": \"No\", \"reason\": \"scripted\", \"linkedin_url\": \"\"}}\n```",
        name
    )
}

/// Stage factory driven by per-name scripts. Research plays the next step;
/// a reply step travels to the classifier through the research context.
#[derive(Clone, Default)]
pub struct ScriptedStages {
    scripts: Arc<Mutex<HashMap<String, VecDeque<Step>>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedStages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, name: &str, steps: Vec<Step>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(name.to_string(), steps.into_iter().collect());
        self
    }

    /// Names passed to the research stage, one entry per attempt.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn next_step(&self, entity: &Entity) -> Step {
        self.calls.lock().unwrap().push(entity.name().to_string());
        self.scripts
            .lock()
            .unwrap()
            .get_mut(entity.name())
            .and_then(|steps| steps.pop_front())
            .unwrap_or_else(|| Step::Reply(success_reply(entity.name())))
    }
}

struct ScriptedResearch {
    stages: ScriptedStages,
}

#[async_trait]
impl ResearchStage for ScriptedResearch {
    async fn research(&self, entity: &Entity) -> StageResult<StageContext> {
        match self.stages.next_step(entity) {
            Step::RateLimited => Err(StageError::RateLimited { retry_after: None }),
            Step::Fail(message) => Err(StageError::Operation(message)),
            Step::Reply(reply) => Ok(StageContext::new(reply)),
        }
    }
}

struct EchoClassify;

#[async_trait]
impl ClassifyStage for EchoClassify {
    async fn classify(&self, _entity: &Entity, context: &StageContext) -> StageResult<String> {
        Ok(context.text.clone())
    }
}

impl StageFactory for ScriptedStages {
    fn factory_name(&self) -> String {
        "scripted".to_string()
    }

    fn research_stage(&self) -> Box<dyn ResearchStage> {
        Box::new(ScriptedResearch { stages: self.clone() })
    }

    fn classify_stage(&self) -> Box<dyn ClassifyStage> {
        Box::new(EchoClassify)
    }
}

/// Runner with zero backoff and zero pacing so tests never sleep.
pub fn runner(names: &[&str], stages: &ScriptedStages, output: &Path) -> BatchRunner<StaticSource, Zero> {
    runner_with(names, stages, output, RetryScheduler::new(Zero {}, Duration::ZERO))
}

pub fn runner_with<B: Backoff>(
    names: &[&str],
    stages: &ScriptedStages,
    output: &Path,
    scheduler: RetryScheduler<B>,
) -> BatchRunner<StaticSource, B> {
    BatchRunner::new(
        StaticSource::new(names.iter().copied()),
        ResultStore::new(output),
        TwoStagePipeline::new(Arc::new(stages.clone())),
        scheduler,
    )
}

/// Data rows of the output file (header excluded).
pub fn read_rows(path: &Path) -> Vec<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .unwrap();
    reader
        .records()
        .map(|record| record.unwrap().iter().map(str::to_string).collect())
        .collect()
}

pub fn rows_for(path: &Path, name: &str) -> usize {
    read_rows(path).iter().filter(|row| row[0] == name).count()
}
