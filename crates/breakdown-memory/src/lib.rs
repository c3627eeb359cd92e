pub mod embeddings;
pub mod store;

pub use embeddings::{
    cosine_similarity, embedder_from_config, EmbeddingProvider, HashingEmbedder,
    HttpEmbeddingProvider,
};
pub use store::{MemoryStats, SqliteMemoryStore};
