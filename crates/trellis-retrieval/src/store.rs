use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use rusqlite::{params, Connection};
use tracing::{debug, info};

use trellis_core::error::{Result, TrellisError};
use trellis_core::traits::ModelGateway;
use trellis_core::types::Document;

use crate::cache::{embed_batched, rank_top_k, EmbeddingStore, SyncReport};
use crate::cosine_similarity;

/// SQLite-backed embedding store, selected when `DATABASE_URL` is set.
///
/// Vectors are stored as little-endian f32 blobs; similarity is a cosine
/// scan in Rust over the corpus rows.
pub struct SqliteStore {
    gateway: Arc<dyn ModelGateway>,
    conn: Mutex<Connection>,
    batch_size: usize,
}

impl SqliteStore {
    pub fn open(
        gateway: Arc<dyn ModelGateway>,
        path: &Path,
        batch_size: usize,
    ) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| TrellisError::Storage(format!("cannot create db directory: {e}")))?;
        }
        let conn = Connection::open(path).map_err(|e| TrellisError::Storage(e.to_string()))?;
        Self::init(gateway, conn, batch_size)
    }

    /// In-memory database for tests.
    pub fn in_memory(gateway: Arc<dyn ModelGateway>, batch_size: usize) -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| TrellisError::Storage(e.to_string()))?;
        Self::init(gateway, conn, batch_size)
    }

    fn init(
        gateway: Arc<dyn ModelGateway>,
        conn: Connection,
        batch_size: usize,
    ) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS documents (
                id TEXT NOT NULL,
                corpus TEXT NOT NULL,
                content TEXT NOT NULL,
                hash TEXT NOT NULL,
                vector BLOB NOT NULL,
                PRIMARY KEY (corpus, id)
            );

            CREATE INDEX IF NOT EXISTS idx_documents_corpus ON documents(corpus);",
        )
        .map_err(|e| TrellisError::Storage(e.to_string()))?;

        debug!("SQLite embedding store opened");
        Ok(Self {
            gateway,
            conn: Mutex::new(conn),
            batch_size,
        })
    }

    fn stored_hashes(&self, corpus: &str) -> Result<HashMap<String, String>> {
        let conn = self.conn.lock().map_err(|e| TrellisError::Storage(e.to_string()))?;
        let mut stmt = conn
            .prepare("SELECT id, hash FROM documents WHERE corpus = ?1")
            .map_err(|e| TrellisError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map(params![corpus], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| TrellisError::Storage(e.to_string()))?;

        let mut hashes = HashMap::new();
        for row in rows {
            let (id, hash) = row.map_err(|e| TrellisError::Storage(e.to_string()))?;
            hashes.insert(id, hash);
        }
        Ok(hashes)
    }
}

fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

impl EmbeddingStore for SqliteStore {
    fn sync(&self, corpus: &str, documents: &[Document]) -> BoxFuture<'_, Result<SyncReport>> {
        let corpus = corpus.to_string();
        let documents = documents.to_vec();

        Box::pin(async move {
            let mut report = SyncReport::default();
            let stored = self.stored_hashes(&corpus)?;

            let current: HashMap<&str, &str> = documents
                .iter()
                .map(|d| (d.id.as_str(), d.content_hash.as_str()))
                .collect();

            // Evict rows whose document disappeared or changed
            let stale: Vec<String> = stored
                .iter()
                .filter(|(id, hash)| current.get(id.as_str()) != Some(&hash.as_str()))
                .map(|(id, _)| id.clone())
                .collect();
            {
                let conn = self.conn.lock().map_err(|e| TrellisError::Storage(e.to_string()))?;
                for id in &stale {
                    conn.execute(
                        "DELETE FROM documents WHERE corpus = ?1 AND id = ?2",
                        params![corpus, id],
                    )
                    .map_err(|e| TrellisError::Storage(e.to_string()))?;
                    report.removed += 1;
                }
            }

            let pending: Vec<&Document> = documents
                .iter()
                .filter(|d| stored.get(&d.id) != Some(&d.content_hash))
                .collect();
            report.reused = documents.len() - pending.len();

            if !pending.is_empty() {
                let (vectors, failed) =
                    embed_batched(&self.gateway, &pending, self.batch_size).await;
                report.failed = failed;

                let conn = self.conn.lock().map_err(|e| TrellisError::Storage(e.to_string()))?;
                for doc in &pending {
                    if let Some(vector) = vectors.get(&doc.id) {
                        conn.execute(
                            "INSERT OR REPLACE INTO documents (id, corpus, content, hash, vector)
                             VALUES (?1, ?2, ?3, ?4, ?5)",
                            params![
                                doc.id,
                                corpus,
                                doc.content,
                                doc.content_hash,
                                vector_to_blob(vector)
                            ],
                        )
                        .map_err(|e| TrellisError::Storage(e.to_string()))?;
                        report.embedded += 1;
                    }
                }
            }

            info!(
                corpus,
                embedded = report.embedded,
                reused = report.reused,
                removed = report.removed,
                failed = report.failed,
                "SQLite embedding store synced"
            );
            Ok(report)
        })
    }

    fn search(
        &self,
        corpus: &str,
        query: &[f32],
        k: usize,
    ) -> BoxFuture<'_, Result<Vec<(String, f32)>>> {
        let corpus = corpus.to_string();
        let query = query.to_vec();

        Box::pin(async move {
            let conn = self.conn.lock().map_err(|e| TrellisError::Storage(e.to_string()))?;
            let mut stmt = conn
                .prepare("SELECT id, vector FROM documents WHERE corpus = ?1")
                .map_err(|e| TrellisError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(params![corpus], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
                })
                .map_err(|e| TrellisError::Storage(e.to_string()))?;

            let mut scored = Vec::new();
            for row in rows {
                let (id, blob) = row.map_err(|e| TrellisError::Storage(e.to_string()))?;
                let vector = blob_to_vector(&blob);
                scored.push((id, cosine_similarity(&query, &vector)));
            }
            Ok(rank_top_k(scored, k))
        })
    }

    fn count(&self, corpus: &str) -> BoxFuture<'_, Result<usize>> {
        let corpus = corpus.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().map_err(|e| TrellisError::Storage(e.to_string()))?;
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM documents WHERE corpus = ?1",
                    params![corpus],
                    |row| row.get(0),
                )
                .map_err(|e| TrellisError::Storage(e.to_string()))?;
            Ok(count as usize)
        })
    }
}
