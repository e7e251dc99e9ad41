use crate::types::{
    ClassifyStage, EnricherError, Entity, ResearchStage, Result, StageConfig, StageContext, StageError, StageFactory,
    StageResult,
};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const RESEARCH_SYSTEM_PROMPT: &str = "You are a senior career researcher and expert headhunter. \
You track down people who used to compete in sport and find out which companies they work for \
and what their current job titles are. Never confuse two people who share a name.";

const CLASSIFY_SYSTEM_PROMPT: &str = "You are an analyst who classifies professional profiles. \
Answer with a single JSON object and nothing else.";

/// Builds fresh HTTP-backed stages for each entity. Only the connection pool
/// and the immutable settings are shared.
pub struct HttpStageFactory {
    client: Client,
    config: Arc<StageConfig>,
}

impl HttpStageFactory {
    pub fn new(config: StageConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .build()
            .map_err(EnricherError::Http)?;

        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }
}

impl StageFactory for HttpStageFactory {
    fn factory_name(&self) -> String {
        format!("search + {}", self.config.model)
    }

    fn research_stage(&self) -> Box<dyn ResearchStage> {
        Box::new(SearchResearchStage {
            client: self.client.clone(),
            config: self.config.clone(),
        })
    }

    fn classify_stage(&self) -> Box<dyn ClassifyStage> {
        Box::new(ChatClassifyStage {
            client: self.client.clone(),
            config: self.config.clone(),
        })
    }
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    q: &'a str,
    num: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    organic: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Web search followed by a researcher-style summary of the hits.
struct SearchResearchStage {
    client: Client,
    config: Arc<StageConfig>,
}

impl SearchResearchStage {
    async fn search(&self, entity: &Entity) -> StageResult<Vec<SearchHit>> {
        let query = format!("{} {} LinkedIn", entity, self.config.subject);
        let request = SearchRequest {
            q: &query,
            num: self.config.search_results,
        };

        let response = self
            .client
            .post(&self.config.serper_url)
            .header("X-API-KEY", &self.config.serper_api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error("search", e))?;

        let response = check_status("search", response).await?;
        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| StageError::operation(format!("search response undecodable: {}", e)))?;
        Ok(body.organic)
    }
}

#[async_trait]
impl ResearchStage for SearchResearchStage {
    async fn research(&self, entity: &Entity) -> StageResult<StageContext> {
        let hits = self.search(entity).await?;
        debug!(entity = %entity, hits = hits.len(), "Search results");

        let results = if hits.is_empty() {
            "No search results were found.".to_string()
        } else {
            hits.iter()
                .enumerate()
                .map(|(i, hit)| format!("{}. {}\n   {}\n   {}", i + 1, hit.title, hit.link, hit.snippet))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let task = format!(
            "1. Research the {subject} '{name}'.\n\
             2. Verification: the person MUST be the {subject}. Do not accept results for other people named {name}.\n\
             3. Find the current professional role (job title) and the company they work for.\n\
             4. Look especially for roles in tech, startups or sports-tech.\n\
             5. If several profiles match, prefer the one that mentions their sport.\n\n\
             Search results:\n{results}\n\n\
             Reply with: Name, Current Job Title, Company, LinkedIn URL if seen, and a one-sentence \
             verification (e.g. 'Confirmed this is the right person because...'). \
             If nothing can be verified, say so plainly.",
            subject = self.config.subject,
            name = entity,
            results = results,
        );

        let summary = chat_completion(&self.client, &self.config, RESEARCH_SYSTEM_PROMPT, &task).await?;
        Ok(StageContext::new(summary))
    }
}

/// One chat completion turning the research summary into the JSON verdict.
struct ChatClassifyStage {
    client: Client,
    config: Arc<StageConfig>,
}

#[async_trait]
impl ClassifyStage for ChatClassifyStage {
    async fn classify(&self, entity: &Entity, context: &StageContext) -> StageResult<String> {
        let prompt = format!(
            "Research notes about '{name}', a {subject}:\n{notes}\n\n\
             Decide whether their current position is a key position (founder, C-level, VP, director, \
             head of a team, or partner). Return JSON with exactly these keys:\n\
             {{\"name\": string, \"role\": string, \"company\": string, \"is_key\": \"Yes\" or \"No\", \
             \"reason\": string, \"linkedin_url\": string}}\n\
             Use \"Unknown\" for role or company when the notes do not say.",
            name = entity,
            subject = self.config.subject,
            notes = context.text,
        );

        chat_completion(&self.client, &self.config, CLASSIFY_SYSTEM_PROMPT, &prompt).await
    }
}

async fn chat_completion(client: &Client, config: &StageConfig, system: &str, user: &str) -> StageResult<String> {
    let start = Instant::now();
    let request = ChatRequest {
        model: &config.model,
        messages: vec![
            ChatMessage {
                role: "system",
                content: system,
            },
            ChatMessage {
                role: "user",
                content: user,
            },
        ],
        temperature: 0.0,
    };

    let response = client
        .post(format!("{}/chat/completions", config.openai_base_url.trim_end_matches('/')))
        .bearer_auth(&config.openai_api_key)
        .json(&request)
        .send()
        .await
        .map_err(|e| transport_error("chat completion", e))?;

    let response = check_status("chat completion", response).await?;
    let body: ChatResponse = response
        .json()
        .await
        .map_err(|e| StageError::operation(format!("chat completion undecodable: {}", e)))?;

    let content = body
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| StageError::operation("chat completion returned no content"))?;

    debug!(
        model = %config.model,
        duration_ms = start.elapsed().as_millis() as u64,
        "Chat completion"
    );
    Ok(content)
}

fn transport_error(operation: &str, err: reqwest::Error) -> StageError {
    warn!(operation, error = %err, "Request failed");
    if err.is_timeout() {
        StageError::operation(format!("{} timed out", operation))
    } else {
        StageError::operation(format!("{} request failed: {}", operation, err))
    }
}

async fn check_status(operation: &str, response: Response) -> StageResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();
    warn!(operation, status = %status, "API error");
    Err(classify_http_failure(operation, status, retry_after, &body))
}

/// 429 is a rate limit unless the account is out of quota, which no amount of
/// waiting fixes.
fn classify_http_failure(operation: &str, status: StatusCode, retry_after: Option<Duration>, body: &str) -> StageError {
    if status == StatusCode::TOO_MANY_REQUESTS && !body.contains("insufficient_quota") {
        return StageError::RateLimited { retry_after };
    }
    StageError::operation(format!("{} failed with HTTP {}: {}", operation, status, body.trim()))
}
