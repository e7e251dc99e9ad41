pub mod types;
pub mod source;
pub mod store;
pub mod parser;
pub mod pipeline;
pub mod retry;
pub mod runner;
pub mod llm_adapter;

pub use types::*;
pub use source::{source_for_path, CsvNameSource, EntitySource, NameListSource, StaticSource};
pub use store::{Ledger, ResultStore};
pub use parser::{Classification, ReplyParser};
pub use pipeline::{EntityResult, TwoStagePipeline};
pub use retry::{AttemptState, RetryScheduler};
pub use runner::{plan_work, survey_work, BatchRunner, RunReport, WorkPlan};
pub use llm_adapter::HttpStageFactory;
pub use interfaces::BaselineStages;
