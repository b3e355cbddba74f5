//! The persisted corpus of documents plus their vectors.
//!
//! A [`KnowledgeStore`] is immutable once built: queries run against a
//! snapshot, and a rebuild produces a whole new store that the service swaps
//! in atomically. The persisted form is a single JSON index file tagged with
//! the embedding-provider identity and a corpus fingerprint, so an index
//! built from an old corpus (or a different provider) is detected on load
//! and triggers a rebuild instead of silently serving wrong vectors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::corpus::Corpus;
use crate::embedding::EmbeddingProvider;
use crate::error::{KnowledgeError, Result};
use crate::models::{DocKind, Document};

/// Index metadata recorded alongside the documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMeta {
    /// Identity of the provider the vectors were computed with.
    pub provider_identity: String,
    /// Whether vectors were unit-normalized at build time. Queries must use
    /// the same setting.
    pub normalized: bool,
    /// Content hash of the corpus the index was built from.
    pub corpus_fingerprint: String,
    pub dims: usize,
    pub document_count: usize,
    pub built_at: DateTime<Utc>,
}

/// On-disk layout of a persisted index.
#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    meta: IndexMeta,
    documents: Vec<Document>,
}

/// In-memory index over the rendered corpus.
#[derive(Debug)]
pub struct KnowledgeStore {
    documents: Vec<Document>,
    meta: IndexMeta,
    /// Module name → index of the module document.
    module_docs: HashMap<String, usize>,
    /// (module, function) → index of the function document.
    function_docs: HashMap<(String, String), usize>,
    /// Function name → indices of candidates across modules, corpus order.
    functions_by_name: HashMap<String, Vec<usize>>,
}

impl KnowledgeStore {
    /// Render the corpus, batch the texts through the provider, and assemble
    /// the index. Document ordering is corpus order.
    pub async fn build(
        corpus: &Corpus,
        provider: &dyn EmbeddingProvider,
        normalize: bool,
    ) -> Result<KnowledgeStore> {
        let mut documents = corpus.render_documents()?;

        let texts: Vec<String> = documents.iter().map(|d| d.text.clone()).collect();
        info!(documents = documents.len(), "embedding corpus documents");
        let vectors = provider.embed(&texts, normalize).await?;

        if vectors.len() != documents.len() {
            return Err(KnowledgeError::ProviderProtocolError(format!(
                "provider returned {} vectors for {} documents",
                vectors.len(),
                documents.len()
            )));
        }

        for (doc, vector) in documents.iter_mut().zip(vectors) {
            doc.vector = vector;
        }

        let meta = IndexMeta {
            provider_identity: provider.identity(),
            normalized: normalize,
            corpus_fingerprint: corpus.fingerprint(),
            dims: provider.dims(),
            document_count: documents.len(),
            built_at: Utc::now(),
        };

        info!(
            documents = meta.document_count,
            provider = %meta.provider_identity,
            "knowledge index built"
        );

        Ok(Self::assemble(documents, meta))
    }

    fn assemble(documents: Vec<Document>, meta: IndexMeta) -> KnowledgeStore {
        let mut module_docs = HashMap::new();
        let mut function_docs = HashMap::new();
        let mut functions_by_name: HashMap<String, Vec<usize>> = HashMap::new();

        for (i, doc) in documents.iter().enumerate() {
            match doc.kind {
                DocKind::Module => {
                    module_docs.entry(doc.module.clone()).or_insert(i);
                }
                DocKind::Function => {
                    if let Some(function) = &doc.function {
                        function_docs
                            .entry((doc.module.clone(), function.clone()))
                            .or_insert(i);
                        functions_by_name
                            .entry(function.clone())
                            .or_default()
                            .push(i);
                    }
                }
                DocKind::Workflow => {}
            }
        }

        KnowledgeStore {
            documents,
            meta,
            module_docs,
            function_docs,
            functions_by_name,
        }
    }

    /// Serialize the full document set (vectors included) to `path`.
    ///
    /// Written atomically: a temp file in the same directory, then a rename.
    pub fn persist(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let persisted = PersistedIndex {
            meta: self.meta.clone(),
            documents: self.documents.clone(),
        };
        let json = serde_json::to_vec(&persisted)?;

        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, path)?;

        info!(path = %path.display(), documents = self.meta.document_count, "index persisted");
        Ok(())
    }

    /// Load a persisted index, rejecting it when it no longer matches the
    /// current corpus or provider.
    pub fn load(
        path: &Path,
        expected_identity: &str,
        expected_normalized: bool,
        expected_fingerprint: &str,
    ) -> Result<KnowledgeStore> {
        if !path.exists() {
            return Err(KnowledgeError::IndexMissing(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path)?;
        let persisted: PersistedIndex = serde_json::from_str(&content)?;

        if persisted.meta.provider_identity != expected_identity {
            return Err(KnowledgeError::IndexStale(format!(
                "built with provider '{}', current provider is '{}'",
                persisted.meta.provider_identity, expected_identity
            )));
        }
        if persisted.meta.normalized != expected_normalized {
            return Err(KnowledgeError::IndexStale(format!(
                "built with normalize={}, current setting is normalize={}",
                persisted.meta.normalized, expected_normalized
            )));
        }
        if persisted.meta.corpus_fingerprint != expected_fingerprint {
            return Err(KnowledgeError::IndexStale(
                "corpus fingerprint mismatch; the corpus changed since the index was built"
                    .to_string(),
            ));
        }

        let dims = persisted.meta.dims;
        for doc in &persisted.documents {
            if doc.vector.len() != dims {
                return Err(KnowledgeError::IndexStale(format!(
                    "document '{}' has a {}-dimensional vector, index dims are {}",
                    doc.id,
                    doc.vector.len(),
                    dims
                )));
            }
        }

        info!(
            path = %path.display(),
            documents = persisted.documents.len(),
            "index loaded from disk"
        );

        Ok(Self::assemble(persisted.documents, persisted.meta))
    }

    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Direct indexed access to a module document. No vector computation.
    pub fn lookup_by_module(&self, name: &str) -> Option<&Document> {
        self.module_docs.get(name).map(|&i| &self.documents[i])
    }

    /// Direct indexed access to a function document. Without a module the
    /// first corpus-order candidate with that name wins.
    pub fn lookup_by_function(&self, name: &str, module: Option<&str>) -> Option<&Document> {
        match module {
            Some(m) => self
                .function_docs
                .get(&(m.to_string(), name.to_string()))
                .map(|&i| &self.documents[i]),
            None => self
                .functions_by_name
                .get(name)
                .and_then(|indices| indices.first())
                .map(|&i| &self.documents[i]),
        }
    }

    /// Names of all modules with a module document, sorted.
    pub fn module_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.module_docs.keys().cloned().collect();
        names.sort();
        names
    }
}
