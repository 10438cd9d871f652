//! LLM API client for semantic extraction.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use codegraph_core::PipelineError;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::parse;
use crate::prompt;

/// A POI as reported by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmPoi {
    pub name: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub line: i64,
    #[serde(default)]
    pub is_exported: bool,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// A relationship as reported by the model. Within a file pass, `source`
/// and `target` are plain names; in directory and POI passes they are
/// qualified names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRelationship {
    pub source: String,
    pub target: String,
    pub kind: String,
    /// Directory passes re-evaluate known candidates and may answer "no".
    #[serde(default = "default_found")]
    pub found: bool,
    #[serde(default)]
    pub confidence: Option<f64>,
}

fn default_found() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileAnalysis {
    #[serde(default)]
    pub pois: Vec<LlmPoi>,
    #[serde(default)]
    pub relationships: Vec<LlmRelationship>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryAnalysis {
    #[serde(default)]
    pub relationships: Vec<LlmRelationship>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoiAnalysis {
    #[serde(default)]
    pub relationships: Vec<LlmRelationship>,
}

/// Compact POI description handed to directory and POI prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoiSummary {
    pub qualified_name: String,
    pub name: String,
    pub kind: String,
    pub file_path: String,
}

/// A known candidate the directory pass must confirm or deny.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipSketch {
    pub source_qualified_name: String,
    pub target_qualified_name: String,
    pub kind: String,
}

/// The capability set the pipeline consumes. Everything else in this crate
/// exists to implement it.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn analyze_file(
        &self,
        file_path: &str,
        content: &str,
    ) -> Result<FileAnalysis, PipelineError>;

    async fn analyze_directory(
        &self,
        directory: &str,
        summaries: &[PoiSummary],
        known: &[RelationshipSketch],
    ) -> Result<DirectoryAnalysis, PipelineError>;

    async fn analyze_poi(
        &self,
        poi: &PoiSummary,
        context: &[PoiSummary],
    ) -> Result<PoiAnalysis, PipelineError>;
}

/// LLM provider configuration.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    OpenAi {
        api_key: String,
        model: String,
        base_url: String,
    },
    Anthropic {
        api_key: String,
        model: String,
    },
}

/// HTTP-backed language model. Transient API errors (429/5xx, network) are
/// retried with backoff before surfacing; unparseable output surfaces as
/// `LlmParse` so the caller can apply the regex fallback.
pub struct HttpLanguageModel {
    provider: LlmProvider,
    client: reqwest::Client,
    max_retries: u32,
}

impl HttpLanguageModel {
    pub fn new(provider: LlmProvider, timeout_ms: u64) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| PipelineError::Config(format!("http client: {}", e)))?;
        Ok(Self {
            provider,
            client,
            max_retries: 3,
        })
    }

    /// Create a client from environment variables.
    pub fn from_env(timeout_ms: u64) -> Result<Self, PipelineError> {
        if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
            let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
            let base_url = std::env::var("OPENAI_API_BASE")
                .unwrap_or_else(|_| "https://api.openai.com".to_string());
            Self::new(
                LlmProvider::OpenAi {
                    api_key,
                    model,
                    base_url,
                },
                timeout_ms,
            )
        } else if let Ok(api_key) = std::env::var("ANTHROPIC_API_KEY") {
            let model = std::env::var("ANTHROPIC_MODEL")
                .unwrap_or_else(|_| "claude-sonnet-4-20250514".to_string());
            Self::new(LlmProvider::Anthropic { api_key, model }, timeout_ms)
        } else {
            Err(PipelineError::Config(
                "no LLM API key found; set OPENAI_API_KEY or ANTHROPIC_API_KEY".into(),
            ))
        }
    }

    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String, PipelineError> {
        let mut attempt = 0u32;
        loop {
            let result = match &self.provider {
                LlmProvider::OpenAi {
                    api_key,
                    model,
                    base_url,
                } => {
                    self.call_openai(api_key, model, base_url, system_prompt, user_prompt)
                        .await
                }
                LlmProvider::Anthropic { api_key, model } => {
                    self.call_anthropic(api_key, model, system_prompt, user_prompt)
                        .await
                }
            };
            match result {
                Ok(text) => return Ok(text),
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    let delay = Duration::from_millis(250 * (1 << attempt));
                    warn!(attempt, "model call failed ({}); retrying in {:?}", e, delay);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn call_openai(
        &self,
        api_key: &str,
        model: &str,
        base_url: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, PipelineError> {
        #[derive(Serialize)]
        struct Request {
            model: String,
            messages: Vec<Message>,
            temperature: f32,
        }

        #[derive(Serialize)]
        struct Message {
            role: String,
            content: String,
        }

        #[derive(Deserialize)]
        struct Response {
            choices: Vec<Choice>,
        }

        #[derive(Deserialize)]
        struct Choice {
            message: MessageContent,
        }

        #[derive(Deserialize)]
        struct MessageContent {
            content: String,
        }

        let request = Request {
            model: model.to_string(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: system_prompt.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: user_prompt.to_string(),
                },
            ],
            temperature: 0.1,
        };

        debug!("calling OpenAI-compatible API at {} with model {}", base_url, model);

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::Llm(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Llm(format!("openai error ({}): {}", status, body)));
        }

        let response: Response = response
            .json()
            .await
            .map_err(|e| PipelineError::Llm(e.to_string()))?;
        response
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| PipelineError::Llm("empty response from model".into()))
    }

    async fn call_anthropic(
        &self,
        api_key: &str,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, PipelineError> {
        #[derive(Serialize)]
        struct Request {
            model: String,
            max_tokens: u32,
            system: String,
            messages: Vec<Message>,
        }

        #[derive(Serialize)]
        struct Message {
            role: String,
            content: String,
        }

        #[derive(Deserialize)]
        struct Response {
            content: Vec<Content>,
        }

        #[derive(Deserialize)]
        struct Content {
            text: String,
        }

        let request = Request {
            model: model.to_string(),
            max_tokens: 4096,
            system: system_prompt.to_string(),
            messages: vec![Message {
                role: "user".to_string(),
                content: user_prompt.to_string(),
            }],
        };

        debug!("calling Anthropic API with model {}", model);

        let response = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::Llm(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Llm(format!(
                "anthropic error ({}): {}",
                status, body
            )));
        }

        let response: Response = response
            .json()
            .await
            .map_err(|e| PipelineError::Llm(e.to_string()))?;
        response
            .content
            .first()
            .map(|c| c.text.clone())
            .ok_or_else(|| PipelineError::Llm("empty response from model".into()))
    }
}

#[async_trait]
impl LanguageModel for HttpLanguageModel {
    async fn analyze_file(
        &self,
        file_path: &str,
        content: &str,
    ) -> Result<FileAnalysis, PipelineError> {
        let user = prompt::build_file_prompt(file_path, content);
        let text = self.generate(prompt::FILE_SYSTEM_PROMPT, &user).await?;
        parse::parse_file_analysis(&text)
    }

    async fn analyze_directory(
        &self,
        directory: &str,
        summaries: &[PoiSummary],
        known: &[RelationshipSketch],
    ) -> Result<DirectoryAnalysis, PipelineError> {
        let user = prompt::build_directory_prompt(directory, summaries, known);
        let text = self.generate(prompt::DIRECTORY_SYSTEM_PROMPT, &user).await?;
        parse::parse_directory_analysis(&text)
    }

    async fn analyze_poi(
        &self,
        poi: &PoiSummary,
        context: &[PoiSummary],
    ) -> Result<PoiAnalysis, PipelineError> {
        let user = prompt::build_poi_prompt(poi, context);
        let text = self.generate(prompt::POI_SYSTEM_PROMPT, &user).await?;
        parse::parse_poi_analysis(&text)
    }
}

/// Enforces the global cap on in-flight model requests. Workers block here
/// regardless of how many of them are running.
pub struct LlmLimiter {
    inner: Arc<dyn LanguageModel>,
    semaphore: Semaphore,
}

impl LlmLimiter {
    pub fn new(inner: Arc<dyn LanguageModel>, concurrency: usize) -> Self {
        Self {
            inner,
            semaphore: Semaphore::new(concurrency.max(1)),
        }
    }
}

#[async_trait]
impl LanguageModel for LlmLimiter {
    async fn analyze_file(
        &self,
        file_path: &str,
        content: &str,
    ) -> Result<FileAnalysis, PipelineError> {
        let _permit = self.semaphore.acquire().await.expect("semaphore closed");
        self.inner.analyze_file(file_path, content).await
    }

    async fn analyze_directory(
        &self,
        directory: &str,
        summaries: &[PoiSummary],
        known: &[RelationshipSketch],
    ) -> Result<DirectoryAnalysis, PipelineError> {
        let _permit = self.semaphore.acquire().await.expect("semaphore closed");
        self.inner.analyze_directory(directory, summaries, known).await
    }

    async fn analyze_poi(
        &self,
        poi: &PoiSummary,
        context: &[PoiSummary],
    ) -> Result<PoiAnalysis, PipelineError> {
        let _permit = self.semaphore.acquire().await.expect("semaphore closed");
        self.inner.analyze_poi(poi, context).await
    }
}
