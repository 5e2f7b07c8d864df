use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uwchat_core::{ChatMessage, Role};

pub use uwchat_error::{ChatError, Result};

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Run a completion over an already assembled message sequence and
    /// return the raw model output text. No retry; the caller decides on
    /// fallback behavior.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

#[async_trait]
pub trait EmbedModel: Send + Sync {
    /// Embed each input text into a fixed-length vector. The chat path
    /// passes a single element; ingestion batches for efficiency.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Fixed generation parameters; configuration, not computed per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 500,
        }
    }
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
    }
}

// ========== OpenAI-compatible (covers OpenAI, DeepSeek, some Qwen proxies) ==========

#[derive(Clone)]
pub struct OpenAiCompatConfig {
    pub base_url: String,                // e.g. https://api.openai.com
    pub api_key: String,                 // Bearer token
    pub chat_model: String,              // e.g. gpt-4o-mini
    pub embedding_model: Option<String>, // e.g. text-embedding-3-small
    pub generation: GenerationParams,
}

#[derive(Clone)]
pub struct OpenAiCompatClient {
    http: Client,
    cfg: OpenAiCompatConfig,
}

impl OpenAiCompatClient {
    pub fn new(cfg: OpenAiCompatConfig) -> Self {
        Self {
            http: Client::new(),
            cfg,
        }
    }
}

#[derive(Serialize)]
struct OaiChatReqMsg {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct OaiChatReq {
    model: String,
    messages: Vec<OaiChatReqMsg>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct OaiChatRespChoiceMsg {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OaiChatRespChoice {
    message: OaiChatRespChoiceMsg,
}

#[derive(Deserialize)]
struct OaiChatResp {
    choices: Vec<OaiChatRespChoice>,
}

#[async_trait]
impl ChatModel for OpenAiCompatClient {
    #[instrument(skip(self, messages))]
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let url = format!(
            "{}/v1/chat/completions",
            self.cfg.base_url.trim_end_matches('/')
        );
        let body = OaiChatReq {
            model: self.cfg.chat_model.clone(),
            messages: messages
                .iter()
                .map(|m| OaiChatReqMsg {
                    role: role_name(m.role),
                    content: m.content.clone(),
                })
                .collect(),
            temperature: self.cfg.generation.temperature,
            max_tokens: self.cfg.generation.max_tokens,
        };

        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Network {
                operation: "http_request".to_string(),
                message: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let txt = resp.text().await.unwrap_or_default();
            return Err(ChatError::LlmService {
                provider: "openai_compat".to_string(),
                message: format!("status={} body={}", status, txt),
            });
        }

        let data: OaiChatResp = resp.json().await.map_err(|e| ChatError::Network {
            operation: "http_request".to_string(),
            message: e.to_string(),
        })?;
        let content = data
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();
        Ok(content)
    }
}

#[derive(Serialize)]
struct OaiEmbedReq {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct OaiEmbedData {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct OaiEmbedResp {
    data: Vec<OaiEmbedData>,
}

#[async_trait]
impl EmbedModel for OpenAiCompatClient {
    #[instrument(skip(self, texts))]
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = self
            .cfg
            .embedding_model
            .clone()
            .ok_or_else(|| ChatError::Configuration {
                key: "embedding_model".to_string(),
                reason: "not configured".to_string(),
            })?;
        let url = format!("{}/v1/embeddings", self.cfg.base_url.trim_end_matches('/'));
        let body = OaiEmbedReq {
            model,
            input: texts.to_vec(),
        };

        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Network {
                operation: "http_request".to_string(),
                message: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let txt = resp.text().await.unwrap_or_default();
            return Err(ChatError::EmbeddingService {
                provider: "openai_compat".to_string(),
                message: format!("status={} body={}", status, txt),
            });
        }

        let data: OaiEmbedResp = resp.json().await.map_err(|e| ChatError::Network {
            operation: "http_request".to_string(),
            message: e.to_string(),
        })?;
        Ok(data.data.into_iter().map(|d| d.embedding).collect())
    }
}

// ========== Anthropic (Claude) ==========

#[derive(Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub model: String,   // e.g. claude-3-5-sonnet-latest
    pub api_url: String, // default https://api.anthropic.com
    pub generation: GenerationParams,
}

#[derive(Clone)]
pub struct AnthropicClient {
    http: Client,
    cfg: AnthropicConfig,
}

impl AnthropicClient {
    pub fn new(cfg: AnthropicConfig) -> Self {
        Self {
            http: Client::new(),
            cfg,
        }
    }
}

#[derive(Serialize)]
struct AnthMessageContent {
    r#type: &'static str,
    text: String,
}

#[derive(Serialize)]
struct AnthMessageReqMsg {
    role: &'static str,
    content: Vec<AnthMessageContent>,
}

#[derive(Serialize)]
struct AnthMessageReq {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthMessageReqMsg>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct AnthMessageRespContent {
    #[allow(dead_code)]
    r#type: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct AnthMessageResp {
    content: Vec<AnthMessageRespContent>,
}

#[async_trait]
impl ChatModel for AnthropicClient {
    #[instrument(skip(self, messages))]
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let url = format!("{}/v1/messages", self.cfg.api_url.trim_end_matches('/'));

        // Anthropic carries the system instruction as a top-level field.
        let system = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.clone())
            .collect::<Vec<_>>()
            .join("\n\n");
        let body = AnthMessageReq {
            model: self.cfg.model.clone(),
            system: if system.is_empty() {
                None
            } else {
                Some(system)
            },
            messages: messages
                .iter()
                .filter(|m| m.role != Role::System)
                .map(|m| AnthMessageReqMsg {
                    role: role_name(m.role),
                    content: vec![AnthMessageContent {
                        r#type: "text",
                        text: m.content.clone(),
                    }],
                })
                .collect(),
            max_tokens: self.cfg.generation.max_tokens,
            temperature: self.cfg.generation.temperature,
        };

        let resp = self
            .http
            .post(url)
            .header("x-api-key", &self.cfg.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Network {
                operation: "http_request".to_string(),
                message: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let txt = resp.text().await.unwrap_or_default();
            return Err(ChatError::LlmService {
                provider: "anthropic".to_string(),
                message: format!("status={} body={}", status, txt),
            });
        }

        let data: AnthMessageResp = resp.json().await.map_err(|e| ChatError::Network {
            operation: "http_request".to_string(),
            message: e.to_string(),
        })?;
        let mut out = String::new();
        for c in data.content.into_iter() {
            if let Some(t) = c.text {
                out.push_str(&t);
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl EmbedModel for AnthropicClient {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(ChatError::Configuration {
            key: "embedding_provider".to_string(),
            reason: "Anthropic does not provide embeddings; configure another embedding provider"
                .to_string(),
        })
    }
}

// ========== Provider Factory & Config ==========

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ChatProviderConfig {
    #[serde(rename = "openai_compat")]
    OpenAiCompat {
        base_url: String,
        api_key: String,
        model: String,
    },
    #[serde(rename = "anthropic")]
    Anthropic {
        api_url: Option<String>,
        api_key: String,
        model: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum EmbedProviderConfig {
    #[serde(rename = "openai_compat")]
    OpenAiCompat {
        base_url: String,
        api_key: String,
        model: String,
    },
}

pub struct Providers {
    pub chat: Box<dyn ChatModel>,
    pub embed: Box<dyn EmbedModel>,
}

pub fn make_providers(
    chat: ChatProviderConfig,
    embed: EmbedProviderConfig,
    generation: GenerationParams,
) -> Result<Providers> {
    let chat_box: Box<dyn ChatModel> = match chat {
        ChatProviderConfig::OpenAiCompat {
            base_url,
            api_key,
            model,
        } => Box::new(OpenAiCompatClient::new(OpenAiCompatConfig {
            base_url,
            api_key,
            chat_model: model,
            embedding_model: None,
            generation: generation.clone(),
        })),
        ChatProviderConfig::Anthropic {
            api_url,
            api_key,
            model,
        } => Box::new(AnthropicClient::new(AnthropicConfig {
            api_url: api_url.unwrap_or_else(|| "https://api.anthropic.com".into()),
            api_key,
            model,
            generation: generation.clone(),
        })),
    };

    let embed_box: Box<dyn EmbedModel> = match embed {
        EmbedProviderConfig::OpenAiCompat {
            base_url,
            api_key,
            model,
        } => Box::new(OpenAiCompatClient::new(OpenAiCompatConfig {
            base_url,
            api_key,
            chat_model: "".into(),
            embedding_model: Some(model),
            generation,
        })),
    };

    Ok(Providers {
        chat: chat_box,
        embed: embed_box,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn anthropic_client_refuses_to_embed() {
        let client = AnthropicClient::new(AnthropicConfig {
            api_key: "k".into(),
            model: "claude-3-5-sonnet-latest".into(),
            api_url: "https://api.anthropic.com".into(),
            generation: GenerationParams::default(),
        });
        let err = client.embed(&["hi".to_string()]).await.unwrap_err();
        assert!(matches!(err, ChatError::Configuration { .. }));
    }

    #[test]
    fn generation_defaults_match_config() {
        let g = GenerationParams::default();
        assert_eq!(g.temperature, 0.7);
        assert_eq!(g.max_tokens, 500);
    }

    #[test]
    fn embed_without_model_is_a_configuration_error() {
        let cfg = OpenAiCompatConfig {
            base_url: "https://api.openai.com".into(),
            api_key: "k".into(),
            chat_model: "gpt-4o-mini".into(),
            embedding_model: None,
            generation: GenerationParams::default(),
        };
        let client = OpenAiCompatClient::new(cfg);
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let err = rt.block_on(client.embed(&["hi".into()])).unwrap_err();
        assert!(matches!(err, ChatError::Configuration { .. }));
    }
}
