use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rusqlite::{params, Connection};
use tracing::debug;

use breakdown_core::error::{BreakdownError, Result};
use breakdown_core::traits::{ContextStore, EpisodicStore, SemanticStore};
use breakdown_core::types::Episode;

use crate::embeddings::{cosine_similarity, from_blob, to_blob, EmbeddingProvider};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS facts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        text TEXT NOT NULL,
        metadata TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        embedding BLOB NOT NULL
    );

    CREATE TABLE IF NOT EXISTS episodes (
        id TEXT PRIMARY KEY,
        timestamp TEXT NOT NULL,
        actions TEXT NOT NULL,
        outcome TEXT NOT NULL,
        success INTEGER NOT NULL,
        metadata TEXT NOT NULL,
        embedding BLOB
    );

    CREATE INDEX IF NOT EXISTS idx_episodes_success ON episodes(success);

    CREATE TABLE IF NOT EXISTS context_summaries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        context TEXT NOT NULL,
        summary TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        embedding BLOB NOT NULL
    );";

fn db(e: rusqlite::Error) -> BreakdownError {
    BreakdownError::Database(e.to_string())
}

/// Row counts per table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    pub facts: usize,
    pub episodes: usize,
    pub successful_episodes: usize,
    pub summaries: usize,
}

/// SQLite-backed store for facts, episodes and compressed context summaries.
///
/// Every row carries an embedding; queries rank rows by cosine similarity to
/// the embedded query text. Only successful episodes get an embedding, so only
/// they are returned by similarity search.
pub struct SqliteMemoryStore {
    conn: Mutex<Connection>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl SqliteMemoryStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                BreakdownError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(db)?;

        // WAL lets a second process read while a run writes
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db)?;
        conn.execute_batch(SCHEMA).map_err(db)?;

        debug!(path = %path.display(), "Memory store opened");
        Ok(Self {
            conn: Mutex::new(conn),
            embedder,
        })
    }

    /// Open an in-memory database that lives as long as the store.
    pub fn in_memory(embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db)?;
        conn.execute_batch(SCHEMA).map_err(db)?;
        Ok(Self {
            conn: Mutex::new(conn),
            embedder,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| BreakdownError::Database(e.to_string()))
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embedder
            .embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BreakdownError::Embedding("provider returned no vectors".into()))
    }

    pub fn stats(&self) -> Result<MemoryStats> {
        let conn = self.lock()?;
        let count = |sql: &str| -> Result<usize> {
            conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                .map(|n| n as usize)
                .map_err(db)
        };
        Ok(MemoryStats {
            facts: count("SELECT COUNT(*) FROM facts")?,
            episodes: count("SELECT COUNT(*) FROM episodes")?,
            successful_episodes: count("SELECT COUNT(*) FROM episodes WHERE success = 1")?,
            summaries: count("SELECT COUNT(*) FROM context_summaries")?,
        })
    }
}

/// Keep the `k` candidates most similar to `query`, best first.
fn top_k<T>(query: &[f32], candidates: Vec<(Vec<u8>, T)>, k: usize) -> Vec<T> {
    let mut scored: Vec<(f32, T)> = candidates
        .into_iter()
        .map(|(blob, item)| (cosine_similarity(query, &from_blob(&blob)), item))
        .collect();
    // Stable sort keeps insertion order among equal scores
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(k);
    scored.into_iter().map(|(_, item)| item).collect()
}

impl SemanticStore for SqliteMemoryStore {
    fn add_fact(&self, text: &str, metadata: serde_json::Value) -> BoxFuture<'_, Result<()>> {
        let text = text.to_string();
        Box::pin(async move {
            let embedding = self.embed_one(&text).await?;
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO facts (text, metadata, timestamp, embedding) VALUES (?1, ?2, ?3, ?4)",
                params![
                    text,
                    metadata.to_string(),
                    Utc::now().to_rfc3339(),
                    to_blob(&embedding)
                ],
            )
            .map_err(db)?;
            debug!(chars = text.len(), "Fact stored");
            Ok(())
        })
    }

    fn query_facts(&self, text: &str, k: usize) -> BoxFuture<'_, Result<Vec<String>>> {
        let text = text.to_string();
        Box::pin(async move {
            if k == 0 {
                return Ok(Vec::new());
            }
            let query = self.embed_one(&text).await?;
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare("SELECT embedding, text FROM facts ORDER BY id")
                .map_err(db)?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, String>(1)?)))
                .map_err(db)?;

            let mut candidates = Vec::new();
            for row in rows {
                candidates.push(row.map_err(db)?);
            }
            Ok(top_k(&query, candidates, k))
        })
    }
}

impl EpisodicStore for SqliteMemoryStore {
    fn add_episode(&self, episode: Episode) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let embedding = if episode.success {
                Some(to_blob(&self.embed_one(&episode.pattern_text()).await?))
            } else {
                None
            };
            let actions = serde_json::to_string(&episode.actions)?;
            let conn = self.lock()?;
            conn.execute(
                "INSERT OR REPLACE INTO episodes
                     (id, timestamp, actions, outcome, success, metadata, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    episode.id,
                    episode.timestamp.to_rfc3339(),
                    actions,
                    episode.outcome,
                    episode.success,
                    episode.metadata.to_string(),
                    embedding
                ],
            )
            .map_err(db)?;
            debug!(id = %episode.id, success = episode.success, "Episode stored");
            Ok(())
        })
    }

    fn query_similar_episodes(&self, text: &str, k: usize) -> BoxFuture<'_, Result<Vec<Episode>>> {
        let text = text.to_string();
        Box::pin(async move {
            if k == 0 {
                return Ok(Vec::new());
            }
            let query = self.embed_one(&text).await?;
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare(
                    "SELECT embedding, id, timestamp, actions, outcome, success, metadata
                     FROM episodes
                     WHERE success = 1 AND embedding IS NOT NULL
                     ORDER BY rowid",
                )
                .map_err(db)?;
            let rows = stmt
                .query_map([], |row| {
                    let blob: Vec<u8> = row.get(0)?;
                    let id: String = row.get(1)?;
                    let ts_str: String = row.get(2)?;
                    let actions: String = row.get(3)?;
                    let outcome: String = row.get(4)?;
                    let success: bool = row.get(5)?;
                    let metadata: String = row.get(6)?;
                    Ok((blob, (id, ts_str, actions, outcome, success, metadata)))
                })
                .map_err(db)?;

            let mut candidates = Vec::new();
            for row in rows {
                candidates.push(row.map_err(db)?);
            }

            let mut episodes = Vec::new();
            for (id, ts_str, actions, outcome, success, metadata) in top_k(&query, candidates, k) {
                let timestamp = DateTime::parse_from_rfc3339(&ts_str)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now());
                episodes.push(Episode {
                    id,
                    timestamp,
                    actions: serde_json::from_str(&actions).unwrap_or_default(),
                    outcome,
                    success,
                    metadata: serde_json::from_str(&metadata).unwrap_or_default(),
                });
            }
            Ok(episodes)
        })
    }
}

impl ContextStore for SqliteMemoryStore {
    fn save(&self, context: &str, summary: &str) -> BoxFuture<'_, Result<()>> {
        let context = context.to_string();
        let summary = summary.to_string();
        Box::pin(async move {
            let embedding = self.embed_one(&summary).await?;
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO context_summaries (context, summary, timestamp, embedding)
                 VALUES (?1, ?2, ?3, ?4)",
                params![context, summary, Utc::now().to_rfc3339(), to_blob(&embedding)],
            )
            .map_err(db)?;
            Ok(())
        })
    }

    fn retrieve_relevant(&self, query: &str, k: usize) -> BoxFuture<'_, Result<String>> {
        let query = query.to_string();
        Box::pin(async move {
            if k == 0 {
                return Ok(String::new());
            }
            let query_vec = self.embed_one(&query).await?;
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare("SELECT embedding, summary FROM context_summaries ORDER BY id")
                .map_err(db)?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, String>(1)?)))
                .map_err(db)?;

            let mut candidates = Vec::new();
            for row in rows {
                candidates.push(row.map_err(db)?);
            }
            Ok(top_k(&query_vec, candidates, k).join("\n"))
        })
    }
}
