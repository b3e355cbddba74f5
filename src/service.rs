//! Tool-facing facade over the whole engine.
//!
//! A [`KnowledgeService`] owns the embedding provider, the corpus, the
//! current [`KnowledgeStore`] snapshot, the cache layer, and the
//! initialization controller. Handles are cheap to clone and safe to share
//! across tasks. Every query operation works against an immutable store
//! snapshot taken at call time, so a concurrent rebuild can never tear a
//! result set.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::cache::{self, CacheKind, CacheLayer};
use crate::config::Config;
use crate::controller::{InitController, InitState, InitStats};
use crate::corpus::Corpus;
use crate::embedding::{self, create_provider, EmbeddingProvider};
use crate::error::{KnowledgeError, Result};
use crate::models::{
    CacheClearReport, CacheStatistics, DocKind, Document, FunctionDetails, FunctionLookup,
    FunctionMatch, FunctionSearchResponse, ModuleInfo, ModuleLookup, SearchResponse,
    SearchResultItem, StatusReport,
};
use crate::retriever::{self, clamp_max_results, enhance_function_query, ScoredDoc};
use crate::store::KnowledgeStore;

/// Candidate pool size for a `find_function` query before the cutoff.
const FUNCTION_SEARCH_LIMIT: usize = 10;
/// A `find_function` hit survives only if it scores at least this fraction
/// of the best hit's score. Keeps "create wall" from dragging in every
/// function that merely shares the "function operation" preamble.
const RELATIVE_SCORE_CUTOFF: f32 = 0.5;
/// How many alternatives to suggest when `get_function_details` misses.
const SIMILAR_FUNCTION_LIMIT: usize = 3;
/// Result descriptions are capped at this many characters.
const DESCRIPTION_CAP: usize = 500;

struct ServiceInner {
    config: Config,
    corpus: Corpus,
    provider: Arc<dyn EmbeddingProvider>,
    store: RwLock<Option<Arc<KnowledgeStore>>>,
    cache: CacheLayer,
    controller: InitController,
}

/// Shared handle to the knowledge engine.
#[derive(Clone)]
pub struct KnowledgeService {
    inner: Arc<ServiceInner>,
}

impl KnowledgeService {
    /// Create a service with the provider the configuration selects.
    /// Nothing is embedded or loaded until [`ensure_ready`] runs.
    ///
    /// [`ensure_ready`]: KnowledgeService::ensure_ready
    pub fn new(config: Config, corpus: Corpus) -> Result<Self> {
        let provider = create_provider(&config.embedding)?;
        Ok(Self::with_provider(config, corpus, provider))
    }

    /// Create a service around an explicit provider. Used by tests and by
    /// embedders that construct their own backend.
    pub fn with_provider(
        config: Config,
        corpus: Corpus,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                config,
                corpus,
                provider,
                store: RwLock::new(None),
                cache: CacheLayer::new(),
                controller: InitController::new(),
            }),
        }
    }

    /// Convenience constructor reading the corpus from a JSON file.
    pub fn from_corpus_file(config: Config, path: &Path) -> Result<Self> {
        let corpus = Corpus::from_json_file(path)?;
        Self::new(config, corpus)
    }

    /// Bring the engine to `READY`, waiting up to `timeout`.
    ///
    /// Single-flight: concurrent callers share one initialization attempt.
    /// With `force_rebuild` the persisted index is ignored, caches are
    /// invalidated, and a fresh index is built; it is also the only way out
    /// of a sticky error state. Returns the status observed after waiting.
    pub async fn ensure_ready(
        &self,
        force_rebuild: bool,
        timeout: Duration,
    ) -> Result<StatusReport> {
        let inner = self.inner.clone();
        let controller = self.inner.controller.clone();
        self.inner
            .controller
            .ensure_ready(force_rebuild, timeout, async move {
                Self::initialize(inner, controller, force_rebuild).await
            })
            .await?;
        Ok(self.status())
    }

    /// The init routine run by at most one task at a time: load or build
    /// the index, persist, warm the provider, then swap the new snapshot in
    /// and invalidate caches in one step. Until that swap, queries keep
    /// being served from the previous snapshot and its caches.
    async fn initialize(
        inner: Arc<ServiceInner>,
        controller: InitController,
        force_rebuild: bool,
    ) -> Result<InitStats> {
        let normalize = inner.config.embedding.normalize;
        let index_path = inner.config.index.path.clone();
        let identity = inner.provider.identity();
        let fingerprint = inner.corpus.fingerprint();

        let loaded = if force_rebuild {
            None
        } else {
            controller.set_stage("load-index");
            match KnowledgeStore::load(&index_path, &identity, normalize, &fingerprint) {
                Ok(store) => Some(store),
                Err(KnowledgeError::IndexMissing(path)) => {
                    info!(path = %path.display(), "no persisted index, building from corpus");
                    None
                }
                Err(e) => {
                    warn!(error = %e, "persisted index unusable, rebuilding");
                    None
                }
            }
        };

        let store = match loaded {
            Some(store) => store,
            None => {
                controller.set_stage("build-index");
                let built =
                    KnowledgeStore::build(&inner.corpus, inner.provider.as_ref(), normalize)
                        .await?;
                // A failed persist costs a rebuild on the next cold start,
                // nothing more. The in-memory index stays authoritative.
                if let Err(e) = built.persist(&index_path) {
                    warn!(error = %e, path = %index_path.display(), "failed to persist index");
                }
                built
            }
        };

        controller.set_stage("warm-up");
        embedding::embed_query(inner.provider.as_ref(), "warm-up", normalize).await?;

        let stats = InitStats {
            initialization_seconds: 0.0,
            document_count: store.len(),
            provider_identity: identity,
        };
        // Swap the snapshot and invalidate caches under one write lock so a
        // reader never pairs the new store with a stale cached result.
        {
            let mut guard = inner.store.write().await;
            *guard = Some(Arc::new(store));
            inner.cache.clear();
        }
        Ok(stats)
    }

    /// The current store snapshot plus the cache generation it belongs to.
    /// Both are read under the store lock so cached entries computed from
    /// this snapshot can never outlive it.
    async fn snapshot(&self) -> Result<(Arc<KnowledgeStore>, u64)> {
        let guard = self.inner.store.read().await;
        let store = guard.clone().ok_or(KnowledgeError::NotReady)?;
        Ok((store, self.inner.cache.generation()))
    }

    /// Similarity search across the corpus.
    ///
    /// `context_type` restricts hits to one document kind; an unknown value
    /// is rejected rather than silently matching nothing. `max_results`
    /// falls back to the configured default and is clamped to the
    /// retriever's bounds either way.
    pub async fn search(
        &self,
        query: &str,
        context_type: Option<&str>,
        module: Option<&str>,
        max_results: Option<usize>,
    ) -> Result<SearchResponse> {
        let started = Instant::now();

        let kind = match context_type {
            Some(s) => Some(DocKind::parse(s).ok_or_else(|| {
                KnowledgeError::InvalidArgument(format!(
                    "unknown context_type '{}', expected function, module, or workflow",
                    s
                ))
            })?),
            None => None,
        };
        let limit = clamp_max_results(
            max_results.unwrap_or(self.inner.config.retrieval.default_max_results),
        );

        let (store, generation) = self.snapshot().await?;
        let key = cache::search_key(query, kind.map(|k| k.as_str()), module, limit);

        let provider = self.inner.provider.clone();
        let owned_query = query.to_string();
        let owned_module = module.map(str::to_string);
        let (results, cache_hit): (Vec<SearchResultItem>, bool) = self
            .inner
            .cache
            .get_or_compute(CacheKind::Search, &key, generation, move || async move {
                let hits = retriever::search(
                    &store,
                    provider.as_ref(),
                    &owned_query,
                    kind,
                    owned_module.as_deref(),
                    limit,
                )
                .await?;
                Ok(hits.iter().map(result_item).collect())
            })
            .await?;

        Ok(SearchResponse {
            query: query.to_string(),
            results_count: results.len(),
            results,
            search_time: started.elapsed().as_secs_f64(),
            cache_hit,
        })
    }

    /// Find the API functions that perform an operation, optionally on a
    /// particular object type.
    ///
    /// The query is rewritten into the indexed function-document shape and
    /// restricted to function documents; weak trailing hits are dropped by
    /// a relative score cutoff, so a precise query returns a short list.
    pub async fn find_function(
        &self,
        operation: &str,
        object_type: Option<&str>,
        module: Option<&str>,
    ) -> Result<FunctionSearchResponse> {
        let started = Instant::now();

        let (store, generation) = self.snapshot().await?;
        let key = cache::function_search_key(operation, object_type, module);

        let provider = self.inner.provider.clone();
        let owned_operation = operation.to_string();
        let owned_object_type = object_type.map(str::to_string);
        let owned_module = module.map(str::to_string);
        let (functions, cache_hit): (Vec<FunctionMatch>, bool) = self
            .inner
            .cache
            .get_or_compute(CacheKind::Search, &key, generation, move || async move {
                let query = enhance_function_query(
                    &owned_operation,
                    owned_object_type.as_deref(),
                    owned_module.as_deref(),
                );
                let hits = retriever::search(
                    &store,
                    provider.as_ref(),
                    &query,
                    Some(DocKind::Function),
                    owned_module.as_deref(),
                    FUNCTION_SEARCH_LIMIT,
                )
                .await?;

                let matches = match hits.first().map(|h| h.score) {
                    Some(top) if top > 0.0 => hits
                        .iter()
                        .filter(|h| h.score >= top * RELATIVE_SCORE_CUTOFF)
                        .map(function_match)
                        .collect(),
                    _ => Vec::new(),
                };
                Ok(matches)
            })
            .await?;

        Ok(FunctionSearchResponse {
            operation: operation.to_string(),
            object_type: object_type.map(str::to_string),
            functions_found: functions.len(),
            functions,
            search_time: started.elapsed().as_secs_f64(),
            cache_hit,
        })
    }

    /// Indexed module lookup. A miss is not an error: the response carries
    /// the known module names instead, and is cached like a hit.
    pub async fn get_module_info(&self, name: &str) -> Result<ModuleLookup> {
        let (store, generation) = self.snapshot().await?;
        let key = cache::module_key(name);

        let owned_name = name.trim().to_string();
        let (lookup, _) = self
            .inner
            .cache
            .get_or_compute(CacheKind::Metadata, &key, generation, move || async move {
                match store.lookup_by_module(&owned_name) {
                    Some(doc) => Ok(ModuleLookup::Found(ModuleInfo {
                        module: doc.module.clone(),
                        description: doc.metadata.description.clone().unwrap_or_default(),
                        functions: doc.metadata.functions.clone(),
                        function_count: doc.metadata.functions.len(),
                    })),
                    None => Ok(ModuleLookup::Miss {
                        available_modules: store.module_names(),
                    }),
                }
            })
            .await?;
        Ok(lookup)
    }

    /// Indexed function lookup. On a miss the response carries up to
    /// [`SIMILAR_FUNCTION_LIMIT`] similarly named functions instead of an
    /// error, so a caller with a misremembered name still gets somewhere.
    pub async fn get_function_details(
        &self,
        name: &str,
        module: Option<&str>,
    ) -> Result<FunctionLookup> {
        let (store, generation) = self.snapshot().await?;
        let key = cache::function_details_key(name, module);

        let provider = self.inner.provider.clone();
        let owned_name = name.trim().to_string();
        let owned_module = module.map(str::to_string);
        let (lookup, _) = self
            .inner
            .cache
            .get_or_compute(CacheKind::Metadata, &key, generation, move || async move {
                if let Some(doc) = store.lookup_by_function(&owned_name, owned_module.as_deref())
                {
                    return Ok(FunctionLookup::Found(function_details(doc)));
                }

                let query =
                    enhance_function_query(&owned_name, None, owned_module.as_deref());
                let hits = retriever::search(
                    &store,
                    provider.as_ref(),
                    &query,
                    Some(DocKind::Function),
                    owned_module.as_deref(),
                    SIMILAR_FUNCTION_LIMIT,
                )
                .await?;
                Ok(FunctionLookup::Miss {
                    similar_functions: hits.iter().map(function_match).collect(),
                })
            })
            .await?;
        Ok(lookup)
    }

    /// Functions semantically close to `name`, excluding `name` itself.
    /// `limit` is clamped to the retriever's bounds.
    pub async fn find_similar_functions(
        &self,
        name: &str,
        limit: usize,
    ) -> Result<Vec<FunctionMatch>> {
        let limit = clamp_max_results(limit);
        let (store, _) = self.snapshot().await?;
        let query = enhance_function_query(name, None, None);
        let hits = retriever::search(
            &store,
            self.inner.provider.as_ref(),
            &query,
            Some(DocKind::Function),
            None,
            // One extra so dropping the function itself cannot under-fill
            // the requested limit.
            limit + 1,
        )
        .await?;
        Ok(hits
            .iter()
            .filter(|h| h.doc.function.as_deref() != Some(name))
            .take(limit)
            .map(function_match)
            .collect())
    }

    /// Names of every module in the current snapshot, sorted.
    pub async fn modules(&self) -> Result<Vec<String>> {
        let (store, _) = self.snapshot().await?;
        Ok(store.module_names())
    }

    /// Drop every cached result and start a new cache generation. Always
    /// succeeds, ready or not.
    pub fn clear_cache(&self) -> CacheClearReport {
        self.inner.cache.clear()
    }

    pub fn cache_statistics(&self) -> CacheStatistics {
        self.inner.cache.statistics()
    }

    /// Current readiness and cache usage. Never blocks on initialization.
    pub fn status(&self) -> StatusReport {
        let state = self.inner.controller.state();
        let stats = self.inner.controller.stats();
        let cache_stats = self.inner.cache.statistics();

        StatusReport {
            ready: state == InitState::Ready,
            error: match &state {
                InitState::Error(reason) => Some(reason.clone()),
                _ => None,
            },
            state: state.as_str().to_string(),
            stage: self.inner.controller.stage(),
            initialization_seconds: stats.as_ref().map(|s| s.initialization_seconds),
            document_count: stats.as_ref().map(|s| s.document_count),
            provider_identity: stats.map(|s| s.provider_identity),
            cached_searches: cache_stats.search_cache_entries,
            cached_metadata: cache_stats.metadata_cache_entries,
        }
    }
}

fn cap_chars(s: &str, cap: usize) -> String {
    s.chars().take(cap).collect()
}

fn result_item(hit: &ScoredDoc<'_>) -> SearchResultItem {
    let doc = hit.doc;
    SearchResultItem {
        kind: doc.kind,
        module: doc.module.clone(),
        function: doc.function.clone(),
        description: cap_chars(&doc.text, DESCRIPTION_CAP),
        signature: doc.metadata.signature.clone(),
        parameters: doc.metadata.parameters.clone(),
        returns: doc.metadata.returns.clone(),
        examples: doc.metadata.examples.clone(),
        score: hit.score,
    }
}

fn function_match(hit: &ScoredDoc<'_>) -> FunctionMatch {
    let doc = hit.doc;
    FunctionMatch {
        module: doc.module.clone(),
        function: doc.function.clone().unwrap_or_default(),
        full_path: doc.metadata.full_path.clone(),
        signature: doc.metadata.signature.clone(),
        description: doc.metadata.description.clone(),
        parameters: doc.metadata.parameters.clone(),
        returns: doc.metadata.returns.clone(),
        usage: doc.metadata.examples.first().cloned(),
        score: hit.score,
    }
}

fn function_details(doc: &Document) -> FunctionDetails {
    FunctionDetails {
        function: doc.function.clone().unwrap_or_default(),
        module: doc.module.clone(),
        full_path: doc.metadata.full_path.clone(),
        signature: doc.metadata.signature.clone(),
        description: doc.metadata.description.clone(),
        parameters: doc.metadata.parameters.clone(),
        returns: doc.metadata.returns.clone(),
        examples: doc.metadata.examples.clone(),
    }
}
