use std::sync::Arc;
use tracing::{debug, info};
use uwchat_core::{ChatMessage, ChatRequest, Citation, Role};
use uwchat_error::{ChatError, Result};
use uwchat_llm::{ChatModel, EmbedModel};
use uwchat_quota::RateLimiter;
use uwchat_rag::{assemble, context_block, contextualize, VectorIndex, TOP_K};

use crate::verify::HumanVerifier;

/// Reply used when any stage of the retrieval pipeline fails. The chat
/// stays functional even when vector search or the model is down.
pub const FALLBACK_MESSAGE: &str = "I'm unable to search my knowledge base at the moment, but I can still try to help with general information about the University of Waterloo.";

/// Reply used when retrieval finds nothing. Not a failure.
pub const NO_MATCH_MESSAGE: &str = "I couldn't find specific information to answer your question. Please try asking something else about UWaterloo.";

/// Sequences one chat request: verify human-ness, meter quota,
/// contextualize, embed, retrieve, assemble, complete. All external calls
/// are strictly sequential; quota increments are not rolled back when a
/// later stage fails.
pub struct ChatPipeline {
    verifier: Arc<dyn HumanVerifier>,
    limiter: Option<RateLimiter>,
    embed: Arc<dyn EmbedModel>,
    chat: Arc<dyn ChatModel>,
    index: Arc<dyn VectorIndex>,
}

/// Terminal state of a request, shaped into HTTP by the route handler.
#[derive(Debug)]
pub enum ChatOutcome {
    /// 200: answered, degraded-fallback, or no-matches reply.
    Answered {
        message: ChatMessage,
        remaining: Option<u32>,
    },
    /// 429, remaining is 0 by definition.
    QuotaExceeded,
    /// 400, no quota consumed, no AI calls made.
    VerificationFailed,
    /// 400, schema-level invariant violated.
    Invalid { reason: String },
    /// 500 with raw detail for diagnostics.
    Failed { detail: String },
}

impl ChatPipeline {
    pub fn new(
        verifier: Arc<dyn HumanVerifier>,
        limiter: Option<RateLimiter>,
        embed: Arc<dyn EmbedModel>,
        chat: Arc<dyn ChatModel>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            verifier,
            limiter,
            embed,
            chat,
            index,
        }
    }

    pub async fn handle(&self, req: ChatRequest, client_key: &str) -> ChatOutcome {
        // Malformed input short-circuits before any side effect.
        if let Err(e) = validate(&req) {
            return ChatOutcome::Invalid {
                reason: e.to_string(),
            };
        }

        // Human check comes before quota so bots never consume allowance.
        match self.verifier.verify(&req.human_verification_token).await {
            Ok(true) => {}
            Ok(false) => return ChatOutcome::VerificationFailed,
            Err(e) => {
                e.log("verify");
                return ChatOutcome::Failed {
                    detail: e.to_string(),
                };
            }
        }

        // Metering is best-effort: a broken counter store never blocks the
        // chat feature itself.
        let mut remaining = None;
        if let Some(limiter) = &self.limiter {
            match limiter.check_and_increment(client_key).await {
                Ok(r) => remaining = Some(r),
                Err(ChatError::QuotaExceeded { .. }) => return ChatOutcome::QuotaExceeded,
                Err(e) => e.log("rate_limiter"),
            }
        }

        match self.answer(&req).await {
            Ok(message) => ChatOutcome::Answered { message, remaining },
            Err(e) => {
                // Availability over correctness: infrastructure failures
                // become the fixed fallback reply, never a 500.
                e.log("pipeline");
                ChatOutcome::Answered {
                    message: ChatMessage::assistant(FALLBACK_MESSAGE),
                    remaining,
                }
            }
        }
    }

    async fn answer(&self, req: &ChatRequest) -> Result<ChatMessage> {
        let query = contextualize(&req.query);
        debug!(original = %req.query, contextualized = %query, "contextualized query");

        let embeddings = self.embed.embed(&[query]).await?;
        let vector = embeddings
            .first()
            .ok_or_else(|| ChatError::EmbeddingService {
                provider: "embedding".to_string(),
                message: "empty embedding response".to_string(),
            })?;

        let hits = self.index.query(vector, TOP_K).await?;
        if hits.is_empty() {
            info!("no matches in vector index");
            return Ok(ChatMessage::assistant(NO_MATCH_MESSAGE));
        }
        debug!(matches = hits.len(), "retrieved context chunks");

        let citations: Vec<Citation> = hits.into_iter().map(|h| h.citation).collect();
        let texts: Vec<String> = citations.iter().map(|c| c.text.clone()).collect();
        let messages = assemble(&req.messages, &context_block(&texts))?;

        let content = self.chat.complete(&messages).await?;
        let mut message = ChatMessage::assistant(content);
        message.citations = Some(citations);
        Ok(message)
    }
}

fn validate(req: &ChatRequest) -> Result<()> {
    if req.query.trim().is_empty() {
        return Err(ChatError::Validation {
            message: "query must not be empty".to_string(),
        });
    }
    match req.messages.last() {
        Some(last) if last.role == Role::User => Ok(()),
        Some(_) => Err(ChatError::Validation {
            message: "last message must have role user".to_string(),
        }),
        None => Err(ChatError::Validation {
            message: "messages must not be empty".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use uwchat_quota::{MemoryCounterStore, RateLimiter};
    use uwchat_rag::retrieve::{ChunkRecord, MemoryVectorIndex, ScoredChunk};

    use crate::verify::AllowAllVerifier;

    struct FakeEmbed;

    #[async_trait]
    impl EmbedModel for FakeEmbed {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(vec![vec![1.0, 0.0]; texts.len()])
        }
    }

    struct FakeChat;

    #[async_trait]
    impl ChatModel for FakeChat {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
            Ok(format!("answered from {} messages", messages.len()))
        }
    }

    struct FailingChat;

    #[async_trait]
    impl ChatModel for FailingChat {
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
            Err(ChatError::LlmService {
                provider: "fake".into(),
                message: "boom".into(),
            })
        }
    }

    struct FailingIndex;

    #[async_trait]
    impl VectorIndex for FailingIndex {
        async fn upsert(&self, _records: &[(ChunkRecord, Vec<f32>)]) -> Result<()> {
            Err(ChatError::VectorStore {
                operation: "upsert".into(),
                message: "down".into(),
            })
        }

        async fn query(&self, _vector: &[f32], _top_k: usize) -> Result<Vec<ScoredChunk>> {
            Err(ChatError::VectorStore {
                operation: "query".into(),
                message: "down".into(),
            })
        }
    }

    struct DenyVerifier;

    #[async_trait]
    impl crate::verify::HumanVerifier for DenyVerifier {
        async fn verify(&self, _token: &str) -> Result<bool> {
            Ok(false)
        }
    }

    struct FailingCounterStore;

    #[async_trait]
    impl uwchat_quota::CounterStore for FailingCounterStore {
        async fn get(&self, _key: &str) -> Result<Option<i64>> {
            Err(ChatError::CounterStore {
                operation: "get".into(),
                message: "redis down".into(),
            })
        }

        async fn increment(&self, _key: &str) -> Result<i64> {
            Err(ChatError::CounterStore {
                operation: "incr".into(),
                message: "redis down".into(),
            })
        }

        async fn expire_in(&self, _key: &str, _ttl_secs: u64) -> Result<()> {
            Ok(())
        }

        async fn remove(&self, _key: &str) -> Result<()> {
            Ok(())
        }
    }

    fn request(query: &str) -> ChatRequest {
        ChatRequest {
            messages: vec![ChatMessage::user(query)],
            query: query.to_string(),
            human_verification_token: "tok".to_string(),
        }
    }

    async fn seeded_index() -> Arc<MemoryVectorIndex> {
        let index = Arc::new(MemoryVectorIndex::new());
        index
            .upsert(&[(
                ChunkRecord {
                    chunk_id: "chunk-1-0-campus.txt".into(),
                    text: "The DC library opens at 8am.".into(),
                    file_name: "campus.txt".into(),
                    ingested_at: "2024-01-01T00:00:00Z".into(),
                },
                vec![1.0, 0.0],
            )])
            .await
            .unwrap();
        index
    }

    fn pipeline_with(
        chat: Arc<dyn ChatModel>,
        index: Arc<dyn VectorIndex>,
        limiter: Option<RateLimiter>,
    ) -> ChatPipeline {
        ChatPipeline::new(
            Arc::new(AllowAllVerifier),
            limiter,
            Arc::new(FakeEmbed),
            chat,
            index,
        )
    }

    #[tokio::test]
    async fn answers_with_citations_and_remaining_quota() {
        let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()));
        let pipeline = pipeline_with(Arc::new(FakeChat), seeded_index().await, Some(limiter));

        match pipeline.handle(request("when does the library open"), "rate_limit:a").await {
            ChatOutcome::Answered { message, remaining } => {
                assert_eq!(message.role, Role::Assistant);
                assert_eq!(remaining, Some(99));
                let citations = message.citations.expect("citations attached");
                assert_eq!(citations.len(), 1);
                assert_eq!(citations[0].chunk_id, "chunk-1-0-campus.txt");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn zero_matches_is_the_canned_reply_not_a_failure() {
        let pipeline = pipeline_with(Arc::new(FakeChat), Arc::new(MemoryVectorIndex::new()), None);

        match pipeline.handle(request("anything"), "rate_limit:a").await {
            ChatOutcome::Answered { message, remaining } => {
                assert_eq!(message.content, NO_MATCH_MESSAGE);
                assert!(message.citations.is_none());
                assert_eq!(remaining, None);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn index_failure_degrades_to_the_fallback_reply() {
        let pipeline = pipeline_with(Arc::new(FakeChat), Arc::new(FailingIndex), None);

        match pipeline.handle(request("anything"), "rate_limit:a").await {
            ChatOutcome::Answered { message, .. } => {
                assert_eq!(message.content, FALLBACK_MESSAGE);
                assert!(message.citations.is_none());
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn completion_failure_also_degrades_to_the_fallback_reply() {
        let pipeline = pipeline_with(Arc::new(FailingChat), seeded_index().await, None);

        match pipeline.handle(request("anything"), "rate_limit:a").await {
            ChatOutcome::Answered { message, .. } => {
                assert_eq!(message.content, FALLBACK_MESSAGE);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn empty_messages_are_invalid() {
        let pipeline = pipeline_with(Arc::new(FakeChat), seeded_index().await, None);
        let req = ChatRequest {
            messages: vec![],
            query: "hello".into(),
            human_verification_token: "tok".into(),
        };

        assert!(matches!(
            pipeline.handle(req, "rate_limit:a").await,
            ChatOutcome::Invalid { .. }
        ));
    }

    #[tokio::test]
    async fn trailing_assistant_message_is_invalid() {
        let pipeline = pipeline_with(Arc::new(FakeChat), seeded_index().await, None);
        let req = ChatRequest {
            messages: vec![ChatMessage::assistant("hi")],
            query: "hello".into(),
            human_verification_token: "tok".into(),
        };

        assert!(matches!(
            pipeline.handle(req, "rate_limit:a").await,
            ChatOutcome::Invalid { .. }
        ));
    }

    #[tokio::test]
    async fn failed_verification_consumes_no_quota() {
        let store = Arc::new(MemoryCounterStore::new());
        let limiter = RateLimiter::new(store);
        let pipeline = ChatPipeline::new(
            Arc::new(DenyVerifier),
            Some(limiter.clone()),
            Arc::new(FakeEmbed),
            Arc::new(FakeChat),
            seeded_index().await,
        );

        assert!(matches!(
            pipeline.handle(request("hello"), "rate_limit:a").await,
            ChatOutcome::VerificationFailed
        ));
        assert_eq!(limiter.remaining("rate_limit:a").await.unwrap(), 100);
    }

    #[tokio::test]
    async fn exhausted_quota_short_circuits_before_ai_calls() {
        let limiter = RateLimiter::with_limits(Arc::new(MemoryCounterStore::new()), 1, 3600);
        // FailingIndex would turn any AI-path call into the fallback reply,
        // so a QuotaExceeded outcome proves the pipeline stopped early.
        let pipeline = pipeline_with(Arc::new(FakeChat), Arc::new(FailingIndex), Some(limiter));

        match pipeline.handle(request("q"), "rate_limit:a").await {
            ChatOutcome::Answered { remaining, .. } => assert_eq!(remaining, Some(0)),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(matches!(
            pipeline.handle(request("q"), "rate_limit:a").await,
            ChatOutcome::QuotaExceeded
        ));
    }

    #[tokio::test]
    async fn broken_counter_store_never_blocks_the_chat() {
        let limiter = RateLimiter::new(Arc::new(FailingCounterStore));
        let pipeline = pipeline_with(Arc::new(FakeChat), seeded_index().await, Some(limiter));

        match pipeline.handle(request("hello"), "rate_limit:a").await {
            ChatOutcome::Answered { remaining, .. } => assert_eq!(remaining, None),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
