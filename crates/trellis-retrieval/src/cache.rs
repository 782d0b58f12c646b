use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use trellis_core::error::{Result, TrellisError};
use trellis_core::traits::ModelGateway;
use trellis_core::types::Document;

use crate::corpus::content_hash;
use crate::cosine_similarity;

/// Outcome of one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Documents freshly embedded this pass.
    pub embedded: usize,
    /// Documents whose cached vector was still valid.
    pub reused: usize,
    /// Records evicted because their document disappeared or changed.
    pub removed: usize,
    /// Documents whose embedding batch failed after a retry.
    pub failed: usize,
}

/// Content-addressed persistence of document embeddings per corpus.
///
/// A cached vector is returned only while its stored hash equals the
/// document's current hash; `sync` evicts stale records.
pub trait EmbeddingStore: Send + Sync + 'static {
    /// Idempotent reconciliation of a corpus against its documents.
    /// After completion each surviving document has exactly one embedding
    /// matching its current hash.
    fn sync(&self, corpus: &str, documents: &[Document]) -> BoxFuture<'_, Result<SyncReport>>;

    /// The k highest cosine similarities in descending order, ties broken
    /// by document id ascending.
    fn search(
        &self,
        corpus: &str,
        query: &[f32],
        k: usize,
    ) -> BoxFuture<'_, Result<Vec<(String, f32)>>>;

    fn count(&self, corpus: &str) -> BoxFuture<'_, Result<usize>>;
}

/// Embed documents in batches, retrying each failed batch once before
/// marking its members failed and moving on.
pub(crate) async fn embed_batched(
    gateway: &Arc<dyn ModelGateway>,
    documents: &[&Document],
    batch_size: usize,
) -> (HashMap<String, Vec<f32>>, usize) {
    let mut vectors = HashMap::new();
    let mut failed = 0;

    for batch in documents.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|d| d.content.clone()).collect();
        let mut result = gateway.embed(texts.clone()).await;
        if result.is_err() {
            result = gateway.embed(texts).await;
        }
        match result {
            Ok(embeddings) if embeddings.len() == batch.len() => {
                for (doc, vector) in batch.iter().zip(embeddings) {
                    vectors.insert(doc.id.clone(), vector);
                }
            }
            Ok(embeddings) => {
                warn!(
                    expected = batch.len(),
                    got = embeddings.len(),
                    "Embedding batch returned wrong arity, marking batch failed"
                );
                failed += batch.len();
            }
            Err(e) => {
                warn!(error = %e, batch = batch.len(), "Embedding batch failed after retry");
                failed += batch.len();
            }
        }
    }

    (vectors, failed)
}

/// Rank all stored vectors against a query and keep the top k.
pub(crate) fn rank_top_k(
    mut scored: Vec<(String, f32)>,
    k: usize,
) -> Vec<(String, f32)> {
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    scored.truncate(k);
    scored
}

/// Combined corpus digest: hashes every (id, content hash) pair in id
/// order, so any document change changes the digest.
fn corpus_digest(documents: &[Document]) -> String {
    let mut pairs: Vec<(&str, &str)> = documents
        .iter()
        .map(|d| (d.id.as_str(), d.content_hash.as_str()))
        .collect();
    pairs.sort();
    let joined = pairs
        .iter()
        .map(|(id, h)| format!("{id}:{h}"))
        .collect::<Vec<_>>()
        .join("\n");
    content_hash(joined.as_bytes())
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    documents_hash: String,
    #[serde(default)]
    hashes: HashMap<String, String>,
    #[serde(default)]
    embeddings: Vec<CachedEmbedding>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedEmbedding {
    doc_id: String,
    embedding: Vec<f32>,
}

#[derive(Debug, Default, Clone)]
struct CorpusTable {
    hashes: HashMap<String, String>,
    vectors: HashMap<String, Vec<f32>>,
}

/// File-backed embedding store: one JSON file per corpus, replaced
/// atomically on write.
pub struct FileStore {
    gateway: Arc<dyn ModelGateway>,
    cache_dir: PathBuf,
    batch_size: usize,
    tables: Mutex<HashMap<String, CorpusTable>>,
}

impl FileStore {
    pub fn new(gateway: Arc<dyn ModelGateway>, cache_dir: impl Into<PathBuf>, batch_size: usize) -> Self {
        Self {
            gateway,
            cache_dir: cache_dir.into(),
            batch_size,
            tables: Mutex::new(HashMap::new()),
        }
    }

    fn cache_path(&self, corpus: &str) -> PathBuf {
        self.cache_dir.join(format!("embeddings_{corpus}.json"))
    }

    fn load_table(&self, corpus: &str) -> CorpusTable {
        if let Some(table) = self.tables.lock().expect("table lock poisoned").get(corpus) {
            return table.clone();
        }
        match std::fs::read(self.cache_path(corpus)) {
            Ok(bytes) => match serde_json::from_slice::<CacheFile>(&bytes) {
                Ok(file) => {
                    let vectors = file
                        .embeddings
                        .into_iter()
                        .map(|e| (e.doc_id, e.embedding))
                        .collect();
                    CorpusTable {
                        hashes: file.hashes,
                        vectors,
                    }
                }
                Err(e) => {
                    warn!(corpus, error = %e, "Embedding cache unreadable, rebuilding");
                    CorpusTable::default()
                }
            },
            Err(_) => CorpusTable::default(),
        }
    }

    fn persist(&self, corpus: &str, table: &CorpusTable, documents: &[Document]) -> Result<()> {
        let file = CacheFile {
            documents_hash: corpus_digest(documents),
            hashes: table.hashes.clone(),
            embeddings: {
                let mut entries: Vec<CachedEmbedding> = table
                    .vectors
                    .iter()
                    .map(|(doc_id, embedding)| CachedEmbedding {
                        doc_id: doc_id.clone(),
                        embedding: embedding.clone(),
                    })
                    .collect();
                entries.sort_by(|a, b| a.doc_id.cmp(&b.doc_id));
                entries
            },
        };

        let path = self.cache_path(corpus);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(&file)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

impl EmbeddingStore for FileStore {
    fn sync(&self, corpus: &str, documents: &[Document]) -> BoxFuture<'_, Result<SyncReport>> {
        let corpus = corpus.to_string();
        let documents = documents.to_vec();

        Box::pin(async move {
            let mut table = self.load_table(&corpus);
            let mut report = SyncReport::default();

            // Evict records with no surviving or matching document
            let current: HashMap<&str, &str> = documents
                .iter()
                .map(|d| (d.id.as_str(), d.content_hash.as_str()))
                .collect();
            let stale: Vec<String> = table
                .hashes
                .iter()
                .filter(|(id, hash)| current.get(id.as_str()) != Some(&hash.as_str()))
                .map(|(id, _)| id.clone())
                .collect();
            for id in &stale {
                table.hashes.remove(id);
                table.vectors.remove(id);
                report.removed += 1;
            }

            // Drop vectors that lost their hash entry (corrupt cache)
            {
                let CorpusTable { hashes, vectors } = &mut table;
                vectors.retain(|id, _| hashes.contains_key(id));
            }

            let pending: Vec<&Document> = documents
                .iter()
                .filter(|d| {
                    table.hashes.get(&d.id) != Some(&d.content_hash)
                        || !table.vectors.contains_key(&d.id)
                })
                .collect();
            report.reused = documents.len() - pending.len();

            if !pending.is_empty() {
                let (vectors, failed) =
                    embed_batched(&self.gateway, &pending, self.batch_size).await;
                report.embedded = vectors.len();
                report.failed = failed;
                for doc in &pending {
                    if let Some(vector) = vectors.get(&doc.id) {
                        table.hashes.insert(doc.id.clone(), doc.content_hash.clone());
                        table.vectors.insert(doc.id.clone(), vector.clone());
                    }
                }
            }

            self.persist(&corpus, &table, &documents)?;
            self.tables
                .lock()
                .expect("table lock poisoned")
                .insert(corpus.clone(), table);

            info!(
                corpus,
                embedded = report.embedded,
                reused = report.reused,
                removed = report.removed,
                failed = report.failed,
                "Embedding cache synced"
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
            let table = self.load_table(&corpus);
            let scored: Vec<(String, f32)> = table
                .vectors
                .iter()
                .map(|(id, vector)| (id.clone(), cosine_similarity(&query, vector)))
                .collect();
            Ok(rank_top_k(scored, k))
        })
    }

    fn count(&self, corpus: &str) -> BoxFuture<'_, Result<usize>> {
        let corpus = corpus.to_string();
        Box::pin(async move { Ok(self.load_table(&corpus).vectors.len()) })
    }
}

/// Load a cache file's schema without going through a store, used by
/// maintenance tooling and tests.
pub fn read_cache_file(path: &Path) -> Result<(String, usize)> {
    let bytes = std::fs::read(path)?;
    let file: CacheFile = serde_json::from_slice(&bytes)
        .map_err(|e| TrellisError::Storage(format!("unreadable cache file: {e}")))?;
    Ok((file.documents_hash, file.embeddings.len()))
}
