use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use trellis_core::error::Result;
use trellis_core::traits::{DocumentExtractor, FileFormat};
use trellis_core::types::Document;

/// Hex sha-256 digest of raw bytes; the content address for embeddings.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Title = first markdown H1, else the file stem with underscores spaced.
fn extract_title(content: &str, stem: &str) -> String {
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("# ") {
            return rest.trim().to_string();
        }
    }
    stem.replace('_', " ")
}

/// Load every supported document in a corpus directory.
///
/// Files whose extraction fails are skipped with a warning; an absent
/// directory yields an empty corpus.
pub fn load_corpus(
    dir: &Path,
    corpus: &str,
    extractor: &dyn DocumentExtractor,
) -> Result<Vec<Document>> {
    let mut documents = Vec::new();
    if !dir.is_dir() {
        debug!(corpus, dir = %dir.display(), "Corpus directory missing, treating as empty");
        return Ok(documents);
    }

    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    entries.sort();

    for path in entries {
        let Some(format) = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(FileFormat::from_extension)
        else {
            continue;
        };

        let bytes = std::fs::read(&path)?;
        let content = match extractor.extract(format, &bytes) {
            Ok(text) => text,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Skipping unextractable document");
                continue;
            }
        };
        if content.trim().is_empty() {
            continue;
        }

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document")
            .to_string();
        let source = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(&stem)
            .to_string();

        documents.push(Document {
            id: format!("doc_{stem}"),
            corpus: corpus.to_string(),
            title: extract_title(&content, &stem),
            content,
            source,
            content_hash: content_hash(&bytes),
        });
    }

    debug!(corpus, count = documents.len(), "Corpus loaded");
    Ok(documents)
}

/// Shared, read-mostly catalog of loaded documents plus the active corpus
/// selection. Populated at startup sync; re-populated when a corpus is
/// re-synced.
pub struct CorpusCatalog {
    documents: RwLock<HashMap<String, Vec<Document>>>,
    active: RwLock<String>,
}

impl CorpusCatalog {
    pub fn new(default_corpus: impl Into<String>) -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            active: RwLock::new(default_corpus.into()),
        }
    }

    pub fn replace(&self, corpus: &str, documents: Vec<Document>) {
        self.documents
            .write()
            .expect("catalog lock poisoned")
            .insert(corpus.to_string(), documents);
    }

    pub fn documents(&self, corpus: &str) -> Vec<Document> {
        self.documents
            .read()
            .expect("catalog lock poisoned")
            .get(corpus)
            .cloned()
            .unwrap_or_default()
    }

    pub fn document(&self, corpus: &str, id: &str) -> Option<Document> {
        self.documents
            .read()
            .expect("catalog lock poisoned")
            .get(corpus)?
            .iter()
            .find(|d| d.id == id)
            .cloned()
    }

    pub fn count(&self, corpus: &str) -> usize {
        self.documents
            .read()
            .expect("catalog lock poisoned")
            .get(corpus)
            .map(|docs| docs.len())
            .unwrap_or(0)
    }

    pub fn corpora(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .documents
            .read()
            .expect("catalog lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn active(&self) -> String {
        self.active.read().expect("catalog lock poisoned").clone()
    }

    pub fn set_active(&self, corpus: &str) -> bool {
        let known = self
            .documents
            .read()
            .expect("catalog lock poisoned")
            .contains_key(corpus);
        if known {
            *self.active.write().expect("catalog lock poisoned") = corpus.to_string();
        }
        known
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::traits::TextExtractor;

    fn doc(id: &str, corpus: &str) -> Document {
        Document {
            id: id.into(),
            corpus: corpus.into(),
            title: id.into(),
            content: "text".into(),
            source: format!("{id}.md"),
            content_hash: content_hash(id.as_bytes()),
        }
    }

    #[test]
    fn test_content_hash_is_stable_hex() {
        let h = content_hash(b"hello");
        assert_eq!(h.len(), 64);
        assert_eq!(h, content_hash(b"hello"));
        assert_ne!(h, content_hash(b"hello!"));
    }

    #[test]
    fn test_title_from_h1() {
        assert_eq!(extract_title("# Food Safety\n\nbody", "food_safety"), "Food Safety");
        assert_eq!(extract_title("no heading here", "food_safety"), "food safety");
    }

    #[test]
    fn test_load_corpus_reads_supported_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("alpha.md"), "# Alpha\n\ncontent").unwrap();
        std::fs::write(dir.path().join("beta.txt"), "beta content").unwrap();
        std::fs::write(dir.path().join("ignored.bin"), [0u8, 1]).unwrap();

        let docs = load_corpus(dir.path(), "legal", &TextExtractor).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, "doc_alpha");
        assert_eq!(docs[0].title, "Alpha");
        assert_eq!(docs[1].id, "doc_beta");
        assert_eq!(docs[1].corpus, "legal");
    }

    #[test]
    fn test_load_corpus_missing_dir_is_empty() {
        let docs = load_corpus(Path::new("/nonexistent/corpus"), "legal", &TextExtractor).unwrap();
        assert!(docs.is_empty());
    }

    #[test]
    fn test_catalog_switching() {
        let catalog = CorpusCatalog::new("legal");
        catalog.replace("legal", vec![doc("doc_a", "legal")]);
        catalog.replace("audit", vec![doc("doc_b", "audit"), doc("doc_c", "audit")]);

        assert_eq!(catalog.active(), "legal");
        assert_eq!(catalog.count("audit"), 2);
        assert!(catalog.set_active("audit"));
        assert_eq!(catalog.active(), "audit");
        assert!(!catalog.set_active("unknown"));
        assert_eq!(catalog.active(), "audit");
        assert!(catalog.document("legal", "doc_a").is_some());
        assert!(catalog.document("legal", "doc_b").is_none());
    }
}
