use anyhow::Context;
use dotenv::dotenv;
use std::path::Path;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};
use uwchat_llm::{EmbedModel, GenerationParams, OpenAiCompatClient, OpenAiCompatConfig};
use uwchat_rag::{split_fixed, ChunkRecord, QdrantVectorIndex, VectorIndex};

/// Chunks embedded per request; ingestion batches for efficiency.
const EMBED_BATCH: usize = 32;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    dotenv().ok();

    let corpus_dir = std::env::args().nth(1).unwrap_or_else(|| "corpus".into());
    info!(dir = %corpus_dir, "uwchat-seeder starting");

    let api_key = std::env::var("OPENAI_API_KEY").context("missing env OPENAI_API_KEY")?;
    let base_url =
        std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com".into());
    let embed_model =
        std::env::var("EMBED_MODEL").unwrap_or_else(|_| "text-embedding-3-small".into());
    let dims: u64 = std::env::var("EMBED_DIMS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1536);
    let qdrant_url =
        std::env::var("QDRANT_URL").unwrap_or_else(|_| "http://localhost:6334".into());
    let collection = std::env::var("QDRANT_COLLECTION").unwrap_or_else(|_| "uwchat".into());

    let embed = OpenAiCompatClient::new(OpenAiCompatConfig {
        base_url,
        api_key,
        chat_model: "".into(),
        embedding_model: Some(embed_model),
        generation: GenerationParams::default(),
    });
    let index = QdrantVectorIndex::new(&qdrant_url, &collection, dims)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let mut processed = 0usize;
    for entry in std::fs::read_dir(Path::new(&corpus_dir))? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("txt") {
            continue;
        }
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown.txt")
            .to_string();

        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                warn!(file = %file_name, error = %e, "could not read file, skipping");
                continue;
            }
        };

        seed_file(&embed, &index, &file_name, &content).await;
        processed += 1;
        info!(file = %file_name, processed, "completed file");
    }

    info!(processed, "knowledge base seeding complete");
    Ok(())
}

/// Chunk, embed and upsert one file. Failures are logged and skipped per
/// batch; a bad chunk never aborts the run.
async fn seed_file(
    embed: &OpenAiCompatClient,
    index: &QdrantVectorIndex,
    file_name: &str,
    content: &str,
) {
    let chunks = split_fixed(content);
    info!(file = %file_name, chunks = chunks.len(), "split file into chunks");

    let now = chrono::Utc::now();
    let millis = now.timestamp_millis();
    let ingested_at = now.to_rfc3339();

    for (batch_idx, batch) in chunks.chunks(EMBED_BATCH).enumerate() {
        let texts: Vec<String> = batch.iter().map(|c| c.to_string()).collect();
        let embeddings = match embed.embed(&texts).await {
            Ok(e) => e,
            Err(e) => {
                error!(file = %file_name, batch = batch_idx, error = %e, "embedding failed, skipping batch");
                continue;
            }
        };

        let records: Vec<(ChunkRecord, Vec<f32>)> = texts
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(i, (text, embedding))| {
                let seq = batch_idx * EMBED_BATCH + i;
                (
                    ChunkRecord {
                        chunk_id: format!("chunk-{}-{}-{}", millis, seq, file_name),
                        text,
                        file_name: file_name.to_string(),
                        ingested_at: ingested_at.clone(),
                    },
                    embedding,
                )
            })
            .collect();

        if let Err(e) = index.upsert(&records).await {
            error!(file = %file_name, batch = batch_idx, error = %e, "upsert failed, skipping batch");
        }
    }
}

fn init_tracing() {
    let fmt_layer = fmt::layer().with_target(false);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    let subscriber = Registry::default().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber).ok();
}
