//! Ranked similarity search over a [`KnowledgeStore`] snapshot.
//!
//! The scan is linear over the filtered subset. That is deliberate: the
//! corpus is hundreds to low thousands of documents and rebuilt rarely, so
//! embedding the query dominates latency. The `search` signature does not
//! expose the scan, so an ANN structure can replace it later without
//! touching callers.

use tracing::debug;

use crate::embedding::{self, EmbeddingProvider};
use crate::error::Result;
use crate::models::{DocKind, Document};
use crate::store::KnowledgeStore;

/// Bounds applied to caller-supplied `max_results` values.
pub const MIN_RESULTS: usize = 1;
pub const MAX_RESULTS: usize = 20;

/// Clamp a requested result count into `[MIN_RESULTS, MAX_RESULTS]`.
pub fn clamp_max_results(requested: usize) -> usize {
    requested.clamp(MIN_RESULTS, MAX_RESULTS)
}

/// One scored hit, borrowing its document from the store snapshot.
#[derive(Debug, Clone)]
pub struct ScoredDoc<'a> {
    pub doc: &'a Document,
    pub score: f32,
}

/// Execute a similarity query.
///
/// Filters by `kind` and `module` when given, scores the remaining
/// documents against the embedded query, sorts descending with ties broken
/// by corpus insertion order, and truncates to `max_results`. User-facing
/// limits are clamped with [`clamp_max_results`] before they reach here;
/// internal callers may ask for a larger candidate pool. An empty result
/// list is not an error — filters may legitimately exclude everything.
pub async fn search<'a>(
    store: &'a KnowledgeStore,
    provider: &dyn EmbeddingProvider,
    query: &str,
    kind: Option<DocKind>,
    module: Option<&str>,
    max_results: usize,
) -> Result<Vec<ScoredDoc<'a>>> {
    // Same normalization setting the store was built with, so dot product
    // and cosine agree with the indexed vectors.
    let normalized = store.meta().normalized;
    let query_vec = embedding::embed_query(provider, query, normalized).await?;

    let mut scored: Vec<ScoredDoc<'a>> = store
        .documents()
        .iter()
        .filter(|doc| kind.map_or(true, |want| doc.kind == want))
        .filter(|doc| module.map_or(true, |want| doc.module == want))
        .map(|doc| ScoredDoc {
            doc,
            score: score(&query_vec, &doc.vector, normalized),
        })
        .collect();

    // Stable sort: equal scores keep corpus order, so results are
    // deterministic across runs.
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(max_results);

    debug!(query, results = scored.len(), "similarity search complete");
    Ok(scored)
}

fn score(query: &[f32], doc: &[f32], normalized: bool) -> f32 {
    if normalized {
        embedding::dot(query, doc)
    } else {
        embedding::cosine_similarity(query, doc)
    }
}

/// Build the enhanced query text used by `find_function`.
///
/// Mirrors the store's function-document template so operation terms land
/// near the vocabulary the function documents were embedded with.
pub fn enhance_function_query(
    operation: &str,
    object_type: Option<&str>,
    module: Option<&str>,
) -> String {
    let mut query = format!("function operation: {}", operation);
    if let Some(object_type) = object_type {
        query.push(' ');
        query.push_str(object_type);
    }
    if let Some(module) = module {
        query.push_str(" module: ");
        query.push_str(module);
    }
    query
}
