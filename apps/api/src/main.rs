use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use dotenv::dotenv;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use uwchat_core::{
    ChatMessage, ChatRequest, ChatResponse, IngestRequest, IngestResponse, RateLimitResponse,
};
use uwchat_error::ChatError;
use uwchat_llm::{make_providers, ChatProviderConfig, EmbedProviderConfig, GenerationParams};
use uwchat_quota::{RateLimiter, RedisCounterStore};
use uwchat_rag::{split_fixed, ChunkRecord, MemoryVectorIndex, QdrantVectorIndex, VectorIndex};

mod pipeline;
mod verify;

use pipeline::{ChatOutcome, ChatPipeline};
use verify::{AllowAllVerifier, HumanVerifier, TurnstileVerifier};

#[derive(Clone)]
struct AppState {
    pipeline: Arc<ChatPipeline>,
    limiter: Option<RateLimiter>,
    embed: Arc<dyn uwchat_llm::EmbedModel>,
    index: Arc<dyn VectorIndex>,
}

#[derive(Debug, Deserialize)]
struct AppConfig {
    server: ServerCfg,
    chat_provider: ChatCfgYaml,
    embedding_provider: EmbedCfgYaml,
    vector_store: VectorStoreCfg,
    generation: Option<GenCfg>,
    rate_limit: Option<RateLimitCfg>,
    verification: Option<VerificationCfg>,
}

#[derive(Debug, Deserialize)]
struct ServerCfg {
    host: String,
    port: u16,
}

#[derive(Debug, Deserialize)]
struct ChatCfgYaml {
    kind: String,
    base_url: Option<String>,
    api_key_env: Option<String>,
    api_url: Option<String>,
    model: String,
}

#[derive(Debug, Deserialize)]
struct EmbedCfgYaml {
    kind: String,
    base_url: Option<String>,
    api_key_env: Option<String>,
    model: String,
    dims: u64,
}

#[derive(Debug, Deserialize)]
struct VectorStoreCfg {
    kind: String,
    url: Option<String>,
    collection: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenCfg {
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RateLimitCfg {
    redis_url_env: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VerificationCfg {
    enabled: bool,
    secret_key_env: Option<String>,
    url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    dotenv().ok();

    let cfg: AppConfig = load_config()?;

    let generation = {
        let defaults = GenerationParams::default();
        let gen = cfg.generation.as_ref();
        GenerationParams {
            temperature: gen
                .and_then(|g| g.temperature)
                .unwrap_or(defaults.temperature),
            max_tokens: gen.and_then(|g| g.max_tokens).unwrap_or(defaults.max_tokens),
        }
    };

    let chat_cfg = match cfg.chat_provider.kind.as_str() {
        "openai_compat" => ChatProviderConfig::OpenAiCompat {
            base_url: cfg
                .chat_provider
                .base_url
                .unwrap_or_else(|| "https://api.openai.com".into()),
            api_key: read_env(
                &cfg.chat_provider
                    .api_key_env
                    .unwrap_or_else(|| "OPENAI_API_KEY".into()),
            )?,
            model: cfg.chat_provider.model,
        },
        "anthropic" => ChatProviderConfig::Anthropic {
            api_url: cfg.chat_provider.api_url,
            api_key: read_env(
                &cfg.chat_provider
                    .api_key_env
                    .unwrap_or_else(|| "ANTHROPIC_API_KEY".into()),
            )?,
            model: cfg.chat_provider.model,
        },
        other => anyhow::bail!("unsupported chat provider kind={}", other),
    };

    let embed_cfg = match cfg.embedding_provider.kind.as_str() {
        "openai_compat" => EmbedProviderConfig::OpenAiCompat {
            base_url: cfg
                .embedding_provider
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".into()),
            api_key: read_env(
                &cfg.embedding_provider
                    .api_key_env
                    .clone()
                    .unwrap_or_else(|| "OPENAI_API_KEY".into()),
            )?,
            model: cfg.embedding_provider.model.clone(),
        },
        other => anyhow::bail!("unsupported embedding provider kind={}", other),
    };

    let providers = make_providers(chat_cfg, embed_cfg, generation)
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let chat: Arc<dyn uwchat_llm::ChatModel> = Arc::from(providers.chat);
    let embed: Arc<dyn uwchat_llm::EmbedModel> = Arc::from(providers.embed);

    let index: Arc<dyn VectorIndex> = match cfg.vector_store.kind.as_str() {
        "qdrant" => {
            let url = cfg
                .vector_store
                .url
                .unwrap_or_else(|| "http://localhost:6334".into());
            let coll = cfg
                .vector_store
                .collection
                .unwrap_or_else(|| "uwchat".into());
            info!(url = %url, collection = %coll, "using Qdrant vector index");
            Arc::new(QdrantVectorIndex::new(&url, &coll, cfg.embedding_provider.dims).await?)
        }
        "memory" => {
            info!("using in-memory vector index");
            Arc::new(MemoryVectorIndex::new())
        }
        other => anyhow::bail!("unsupported vector store kind={}", other),
    };

    let limiter = match cfg
        .rate_limit
        .as_ref()
        .and_then(|r| r.redis_url_env.as_deref())
        .map(std::env::var)
    {
        Some(Ok(url)) => {
            let store = RedisCounterStore::new(&url).map_err(|e| anyhow::anyhow!(e.to_string()))?;
            Some(RateLimiter::new(Arc::new(store)))
        }
        _ => {
            info!("no Redis URL configured; usage metering disabled");
            None
        }
    };

    let verifier: Arc<dyn HumanVerifier> = match cfg.verification.as_ref() {
        Some(v) if v.enabled => {
            let secret = read_env(v.secret_key_env.as_deref().unwrap_or("TURNSTILE_SECRET_KEY"))?;
            Arc::new(TurnstileVerifier::new(secret, v.url.clone()))
        }
        _ => {
            info!("human verification disabled");
            Arc::new(AllowAllVerifier)
        }
    };

    let pipeline = Arc::new(ChatPipeline::new(
        verifier,
        limiter.clone(),
        embed.clone(),
        chat,
        index.clone(),
    ));

    let state = AppState {
        pipeline,
        limiter,
        embed,
        index,
    };

    let app = Router::new()
        .route("/api/v1/chat", post(chat_handler))
        .route("/api/v1/ingest", post(ingest))
        .route("/api/v1/rate-limit", get(rate_limit))
        .route("/api/v1/health", get(health))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port).parse()?;
    tracing::info!(%addr, "uwchat-api listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};
    let fmt_layer = fmt::layer().with_target(false);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,tower_http=info"))
        .unwrap();
    let subscriber = Registry::default().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber).ok();
}

fn load_config() -> anyhow::Result<AppConfig> {
    let s = std::fs::read_to_string("configs/default.yaml")?;
    let cfg: AppConfig = serde_yaml::from_str(&s)?;
    Ok(cfg)
}

fn read_env(key: &str) -> anyhow::Result<String> {
    std::env::var(key).map_err(|_| anyhow::anyhow!("missing env {}", key))
}

/// Client identity for quota accounting: first hop of x-forwarded-for,
/// falling back to one shared "unknown" bucket.
fn client_key(headers: &HeaderMap) -> String {
    let ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("unknown");
    format!("rate_limit:{}", ip)
}

async fn chat_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> (StatusCode, Json<ChatResponse>) {
    // Schema violations are a 400, not axum's default 422.
    let Json(req) = match payload {
        Ok(p) => p,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ChatResponse {
                    success: false,
                    message: ChatMessage::assistant("Your request could not be processed."),
                    rate_limit_remaining: None,
                    error: Some(rejection.body_text()),
                }),
            )
        }
    };

    let key = client_key(&headers);
    match state.pipeline.handle(req, &key).await {
        ChatOutcome::Answered { message, remaining } => (
            StatusCode::OK,
            Json(ChatResponse {
                success: true,
                message,
                rate_limit_remaining: remaining,
                error: None,
            }),
        ),
        ChatOutcome::QuotaExceeded => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ChatResponse {
                success: false,
                message: ChatMessage::assistant(
                    "You've reached the daily request limit. Please try again tomorrow.",
                ),
                rate_limit_remaining: Some(0),
                error: Some("rate limit exceeded".to_string()),
            }),
        ),
        ChatOutcome::VerificationFailed => (
            StatusCode::BAD_REQUEST,
            Json(ChatResponse {
                success: false,
                message: ChatMessage::assistant(
                    "Human verification failed. Please retry the challenge.",
                ),
                rate_limit_remaining: None,
                error: Some("human verification failed".to_string()),
            }),
        ),
        ChatOutcome::Invalid { reason } => (
            StatusCode::BAD_REQUEST,
            Json(ChatResponse {
                success: false,
                message: ChatMessage::assistant("Your request could not be processed."),
                rate_limit_remaining: None,
                error: Some(reason),
            }),
        ),
        ChatOutcome::Failed { detail } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ChatResponse {
                success: false,
                message: ChatMessage::assistant("An error occurred while processing your request."),
                rate_limit_remaining: None,
                error: Some(detail),
            }),
        ),
    }
}

async fn ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, ChatError> {
    let chunks = split_fixed(&req.content);
    info!(file = %req.file_name, chunks = chunks.len(), "ingesting file");

    if chunks.is_empty() {
        return Ok(Json(IngestResponse {
            success: true,
            message: Some(format!("No content to process in {}", req.file_name)),
            error: None,
        }));
    }

    let texts: Vec<String> = chunks.iter().map(|c| c.to_string()).collect();
    let embeddings = state.embed.embed(&texts).await?;
    if embeddings.len() != texts.len() {
        return Err(ChatError::EmbeddingService {
            provider: "embedding".to_string(),
            message: format!(
                "expected {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            ),
        });
    }

    let now = chrono::Utc::now();
    let millis = now.timestamp_millis();
    let ingested_at = now.to_rfc3339();
    let records: Vec<(ChunkRecord, Vec<f32>)> = texts
        .into_iter()
        .zip(embeddings)
        .enumerate()
        .map(|(i, (text, embedding))| {
            (
                ChunkRecord {
                    chunk_id: format!("chunk-{}-{}-{}", millis, i, req.file_name),
                    text,
                    file_name: req.file_name.clone(),
                    ingested_at: ingested_at.clone(),
                },
                embedding,
            )
        })
        .collect();

    state.index.upsert(&records).await?;

    Ok(Json(IngestResponse {
        success: true,
        message: Some(format!(
            "Successfully processed {} chunks from {}",
            records.len(),
            req.file_name
        )),
        error: None,
    }))
}

async fn rate_limit(State(state): State<AppState>, headers: HeaderMap) -> Json<RateLimitResponse> {
    let limiter = match &state.limiter {
        Some(limiter) => limiter,
        // Metering disabled: nothing to report, but not an error either.
        None => {
            return Json(RateLimitResponse {
                success: true,
                remaining: None,
                error: None,
            })
        }
    };

    match limiter.remaining(&client_key(&headers)).await {
        Ok(remaining) => Json(RateLimitResponse {
            success: true,
            remaining: Some(remaining),
            error: None,
        }),
        Err(e) => {
            e.log("rate_limit_route");
            Json(RateLimitResponse {
                success: false,
                remaining: None,
                error: Some("could not check rate limit".to_string()),
            })
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
