pub mod chunk;
pub mod contextualize;
pub mod prompt;
pub mod qdrant;
pub mod retrieve;

pub use chunk::{split_fixed, CHUNK_SIZE};
pub use contextualize::{contextualize, HOME_REGION};
pub use prompt::{assemble, context_block, SYSTEM_PROMPT};
pub use qdrant::QdrantVectorIndex;
pub use retrieve::{ChunkRecord, MemoryVectorIndex, ScoredChunk, VectorIndex, TOP_K};

pub use uwchat_core::{ChatMessage, Citation, CitationMeta, Role};
pub use uwchat_error::{ChatError, Result};
