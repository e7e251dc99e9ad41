use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use crate::defs::ClassifyStage;
use crate::defs::Entity;
use crate::defs::ResearchStage;
use crate::defs::StageContext;
use crate::defs::StageFactory;
use crate::defs::StageResult;

/// Offline stage pair. Research echoes the entity back, classification
/// always answers "Unknown" with a fenced JSON reply, the same shape the
/// real classifier tends to produce.
#[derive(Clone, Debug, Default)]
pub struct BaselineStages {
    response_delay: Duration,
}

impl BaselineStages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.response_delay = delay;
        self
    }

    async fn simulate_processing(&self) {
        if !self.response_delay.is_zero() {
            tokio::time::sleep(self.response_delay).await;
        }
    }
}

struct BaselineResearch {
    stages: BaselineStages,
}

#[async_trait]
impl ResearchStage for BaselineResearch {
    async fn research(&self, entity: &Entity) -> StageResult<StageContext> {
        self.stages.simulate_processing().await;
        Ok(StageContext::new(format!("No research performed for {}.", entity)))
    }
}

struct BaselineClassify {
    stages: BaselineStages,
}

#[async_trait]
impl ClassifyStage for BaselineClassify {
    async fn classify(&self, entity: &Entity, context: &StageContext) -> StageResult<String> {
        self.stages.simulate_processing().await;
        let reply = json!({
            "name": entity.name(),
            "role": "Unknown",
            "company": "Unknown",
            "is_key": "No",
            "reason": context.text,
            "linkedin_url": "",
        });
        Ok(format!("```json\n{:#}\n```", reply))
    }
}

impl StageFactory for BaselineStages {
    fn factory_name(&self) -> String {
        "baseline".to_owned()
    }

    fn research_stage(&self) -> Box<dyn ResearchStage> {
        Box::new(BaselineResearch { stages: self.clone() })
    }

    fn classify_stage(&self) -> Box<dyn ClassifyStage> {
        Box::new(BaselineClassify { stages: self.clone() })
    }
}
