pub mod baseline;
pub mod defs;

pub use baseline::BaselineStages;
pub use defs::{ClassifyStage, Entity, ResearchStage, StageContext, StageError, StageFactory, StageResult};
