//! Retrieval-augmented chat over the diary index.
//!
//! [`ChatSession::ask`] retrieves the `top_k` diary passages nearest to the
//! question, renders them into the user template, and sends the system
//! prompt plus the rendered message to a [`ChatModel`]. The only shipped
//! model is [`GeminiChat`] (`generateContent` on the Gemini API).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{ChatConfig, GeminiCredentials};
use crate::error::{PipelineError, Service};
use crate::models::SearchHit;
use crate::retry::RetryPolicy;
use crate::vector_client::VectorIndexClient;

/// A hosted text-generation model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn generate(&self, system: &str, user: &str) -> Result<String, PipelineError>;
}

pub struct GeminiChat {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<TextPart<'a>>,
}

#[derive(Debug, Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

impl GeminiChat {
    pub fn new(config: &ChatConfig, credentials: GeminiCredentials) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/v1beta/models/{}:generateContent",
                config.base_url.trim_end_matches('/'),
                config.model
            ),
            api_key: credentials.api_key,
            max_output_tokens: config.max_output_tokens,
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl ChatModel for GeminiChat {
    async fn generate(&self, system: &str, user: &str) -> Result<String, PipelineError> {
        let request = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![TextPart { text: system }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![TextPart { text: user }],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: self.max_output_tokens,
                temperature: self.temperature,
            },
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::from_transport(Service::Chat, &e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PipelineError::from_status(Service::Chat, status, &body));
        }

        let parsed: GenerateResponse = resp.json().await.map_err(|e| {
            PipelineError::service(Service::Chat, format!("invalid response: {}", e), false)
        })?;
        answer_text(parsed)
    }
}

/// Concatenated text parts of the first candidate.
fn answer_text(response: GenerateResponse) -> Result<String, PipelineError> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.is_empty() {
        return Err(PipelineError::service(
            Service::Chat,
            "no candidates returned",
            false,
        ));
    }
    Ok(text)
}

/// Diary passages joined into the `{context}` block.
pub fn format_context(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|hit| hit.content.trim())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Fill `{question}` and `{context}` in `template`.
pub fn render_prompt(template: &str, question: &str, context: &str) -> String {
    // substituted text is never rescanned for placeholders
    template
        .split("{context}")
        .map(|piece| piece.replace("{question}", question))
        .collect::<Vec<_>>()
        .join(context)
}

/// An answer and the passages it was grounded on.
#[derive(Debug, Clone)]
pub struct ChatAnswer {
    pub text: String,
    pub sources: Vec<SearchHit>,
}

pub struct ChatSession<'a> {
    retriever: &'a VectorIndexClient,
    model: &'a dyn ChatModel,
    system_prompt: String,
    user_template: String,
    top_k: usize,
    retry: RetryPolicy,
}

impl<'a> ChatSession<'a> {
    pub fn new(
        retriever: &'a VectorIndexClient,
        model: &'a dyn ChatModel,
        config: &ChatConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            retriever,
            model,
            system_prompt: config.system_prompt.clone(),
            user_template: config.user_template.clone(),
            top_k: config.top_k,
            retry,
        }
    }

    pub async fn ask(&self, question: &str) -> Result<ChatAnswer, PipelineError> {
        let sources = self
            .retriever
            .similarity_search(question, self.top_k)
            .await?;
        tracing::debug!(hits = sources.len(), "retrieved diary passages");

        let user = render_prompt(&self.user_template, question, &format_context(&sources));
        let text = self
            .retry
            .run("chat", || self.model.generate(&self.system_prompt, &user))
            .await?;
        Ok(ChatAnswer { text, sources })
    }
}
