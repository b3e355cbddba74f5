//! End-to-end tests over the public service API: initialization, search,
//! function lookup, caching, and persistence, all against a deterministic
//! in-process embedding provider.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use ifc_knowledge::config::Config;
use ifc_knowledge::corpus::{Corpus, FunctionDescriptor, ModuleDescriptor, WorkflowDescriptor};
use ifc_knowledge::embedding::{normalize_in_place, EmbeddingProvider};
use ifc_knowledge::error::{KnowledgeError, Result};
use ifc_knowledge::retriever::MAX_RESULTS;
use ifc_knowledge::service::KnowledgeService;

/// Token-bucket embeddings: deterministic, order-insensitive, and similar
/// texts overlap. Counts batch calls so tests can assert single-flight
/// behavior, and can be switched into a failing mode.
struct MockProvider {
    dims: usize,
    batch_calls: AtomicUsize,
    failing: AtomicBool,
}

impl MockProvider {
    fn new(dims: usize) -> Self {
        Self {
            dims,
            batch_calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    fn vector(&self, text: &str, normalize: bool) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 1)
        {
            let mut h = 0usize;
            for b in token.to_lowercase().bytes() {
                h = h.wrapping_mul(31).wrapping_add(b as usize);
            }
            v[h % self.dims] += 1.0;
        }
        if normalize {
            normalize_in_place(&mut v);
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for MockProvider {
    fn model_name(&self) -> &str {
        "mock"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn identity(&self) -> String {
        format!("mock:{}d", self.dims)
    }
    async fn embed(&self, texts: &[String], normalize: bool) -> Result<Vec<Vec<f32>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(KnowledgeError::ProviderUnavailable(
                "mock provider offline".to_string(),
            ));
        }
        Ok(texts.iter().map(|t| self.vector(t, normalize)).collect())
    }
}

fn sample_corpus() -> Corpus {
    Corpus {
        modules: vec![
            ModuleDescriptor {
                name: "root".to_string(),
                description: "Create and remove IFC entities".to_string(),
                functions: vec![FunctionDescriptor {
                    name: "create_wall".to_string(),
                    signature: Some("create_wall(length, height, thickness)".to_string()),
                    description: Some("Creates a new IFC wall entity".to_string()),
                    parameters: vec![],
                    returns: Some("the new wall".to_string()),
                    examples: vec!["wall = create_wall(4.0, 2.7, 0.2)".to_string()],
                }],
            },
            ModuleDescriptor {
                name: "material".to_string(),
                description: "Assign and edit materials".to_string(),
                functions: vec![FunctionDescriptor {
                    name: "assign_material".to_string(),
                    signature: Some("assign_material(element, material)".to_string()),
                    description: Some("Assign a material to an element".to_string()),
                    parameters: vec![],
                    returns: None,
                    examples: vec![],
                }],
            },
        ],
        workflows: vec![WorkflowDescriptor {
            name: "basic_building".to_string(),
            module: Some("root".to_string()),
            description: "Create a storey, then walls, then assign materials".to_string(),
            examples: vec![],
        }],
    }
}

fn service_with(dir: &TempDir, provider: Arc<MockProvider>) -> KnowledgeService {
    let mut config = Config::default();
    config.index.path = dir.path().join("index.json");
    KnowledgeService::with_provider(config, sample_corpus(), provider)
}

async fn ready_service(dir: &TempDir) -> KnowledgeService {
    let service = service_with(dir, Arc::new(MockProvider::new(384)));
    service
        .ensure_ready(false, Duration::from_secs(10))
        .await
        .unwrap();
    service
}

#[tokio::test]
async fn search_finds_the_wall_function() {
    let dir = TempDir::new().unwrap();
    let service = ready_service(&dir).await;

    let response = service
        .search("make a wall", Some("function"), None, Some(1))
        .await
        .unwrap();

    assert_eq!(response.results_count, 1);
    let top = &response.results[0];
    assert_eq!(top.module, "root");
    assert_eq!(top.function.as_deref(), Some("create_wall"));
    assert!(top.score > 0.0);
    assert!(!response.cache_hit);
}

#[tokio::test]
async fn repeated_search_is_deterministic_and_cached() {
    let dir = TempDir::new().unwrap();
    let service = ready_service(&dir).await;

    let first = service.search("walls", None, None, Some(5)).await.unwrap();
    let second = service.search("walls", None, None, Some(5)).await.unwrap();

    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(first.results_count, second.results_count);
    for (a, b) in first.results.iter().zip(&second.results) {
        assert_eq!(a.module, b.module);
        assert_eq!(a.function, b.function);
        assert_eq!(a.score, b.score);
    }
}

#[tokio::test]
async fn result_limits_are_clamped_not_rejected() {
    let dir = TempDir::new().unwrap();
    let service = ready_service(&dir).await;

    let zero = service.search("entities", None, None, Some(0)).await.unwrap();
    assert_eq!(zero.results_count, 1);

    let huge = service
        .search("entities", None, None, Some(1000))
        .await
        .unwrap();
    assert!(huge.results_count <= MAX_RESULTS);
    // Small corpus: the clamp leaves room for every document.
    assert_eq!(huge.results_count, 5);
}

#[tokio::test]
async fn filters_restrict_kind_and_module() {
    let dir = TempDir::new().unwrap();
    let service = ready_service(&dir).await;

    let workflows = service
        .search("building", Some("workflow"), None, Some(10))
        .await
        .unwrap();
    assert_eq!(workflows.results_count, 1);
    assert_eq!(workflows.results[0].kind.as_str(), "workflow");

    let material_only = service
        .search("assign", None, Some("material"), Some(10))
        .await
        .unwrap();
    assert!(material_only.results_count > 0);
    assert!(material_only.results.iter().all(|r| r.module == "material"));
}

#[tokio::test]
async fn find_function_returns_exactly_the_wall_creator() {
    let dir = TempDir::new().unwrap();
    let service = ready_service(&dir).await;

    let response = service
        .find_function("create", Some("wall"), None)
        .await
        .unwrap();

    assert_eq!(response.functions_found, 1);
    let hit = &response.functions[0];
    assert_eq!(hit.module, "root");
    assert_eq!(hit.function, "create_wall");
    assert_eq!(
        hit.signature.as_deref(),
        Some("create_wall(length, height, thickness)")
    );
    assert_eq!(hit.usage.as_deref(), Some("wall = create_wall(4.0, 2.7, 0.2)"));
}

#[tokio::test]
async fn module_and_function_lookups_bypass_the_vector_search() {
    let dir = TempDir::new().unwrap();
    let service = ready_service(&dir).await;

    match service.get_module_info("material").await.unwrap() {
        ifc_knowledge::models::ModuleLookup::Found(info) => {
            assert_eq!(info.description, "Assign and edit materials");
            assert_eq!(info.functions, vec!["assign_material"]);
        }
        other => panic!("expected an exact match, got {:?}", other),
    }

    match service.get_module_info("nonexistent").await.unwrap() {
        ifc_knowledge::models::ModuleLookup::Miss { available_modules } => {
            assert_eq!(available_modules, vec!["material", "root"]);
        }
        other => panic!("expected a miss, got {:?}", other),
    }

    let modules = service.modules().await.unwrap();
    assert_eq!(modules, vec!["material", "root"]);

    match service
        .get_function_details("assign_material", None)
        .await
        .unwrap()
    {
        ifc_knowledge::models::FunctionLookup::Found(details) => {
            assert_eq!(details.module, "material");
            assert_eq!(
                details.full_path.as_deref(),
                Some("ifcopenshell.api.material.assign_material")
            );
        }
        other => panic!("expected an exact match, got {:?}", other),
    }
}

#[tokio::test]
async fn concurrent_ensure_ready_builds_once() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(MockProvider::new(32));
    let service = service_with(&dir, provider.clone());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service.ensure_ready(false, Duration::from_secs(10)).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // One batch for the corpus, one single-text warm-up call.
    assert_eq!(provider.batch_calls.load(Ordering::SeqCst), 2);
    assert!(service.status().ready);
}

#[tokio::test]
async fn second_start_loads_the_persisted_index() {
    let dir = TempDir::new().unwrap();
    {
        let service = ready_service(&dir).await;
        assert!(service.status().ready);
    }
    assert!(dir.path().join("index.json").exists());

    let provider = Arc::new(MockProvider::new(384));
    let service = service_with(&dir, provider.clone());
    service
        .ensure_ready(false, Duration::from_secs(10))
        .await
        .unwrap();

    // Only the warm-up touched the provider; vectors came from disk.
    assert_eq!(provider.batch_calls.load(Ordering::SeqCst), 1);

    let response = service
        .search("make a wall", Some("function"), None, Some(1))
        .await
        .unwrap();
    assert_eq!(response.results[0].function.as_deref(), Some("create_wall"));
}

#[tokio::test]
async fn provider_outage_is_sticky_until_forced() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(MockProvider::new(32));
    provider.failing.store(true, Ordering::SeqCst);
    let service = service_with(&dir, provider.clone());

    let err = service
        .ensure_ready(false, Duration::from_secs(10))
        .await
        .unwrap_err();
    assert!(matches!(err, KnowledgeError::InitFailed(_)));
    assert_eq!(service.status().state, "error");

    // Still failing without force, and the provider is not retried.
    let calls_before = provider.batch_calls.load(Ordering::SeqCst);
    let err = service
        .ensure_ready(false, Duration::from_secs(10))
        .await
        .unwrap_err();
    assert!(matches!(err, KnowledgeError::InitFailed(_)));
    assert_eq!(provider.batch_calls.load(Ordering::SeqCst), calls_before);

    provider.failing.store(false, Ordering::SeqCst);
    let status = service
        .ensure_ready(true, Duration::from_secs(10))
        .await
        .unwrap();
    assert!(status.ready);
    assert!(service
        .search("walls", None, None, None)
        .await
        .is_ok());
}

#[tokio::test]
async fn clear_cache_resets_statistics() {
    let dir = TempDir::new().unwrap();
    let service = ready_service(&dir).await;

    service.search("walls", None, None, None).await.unwrap();
    service
        .find_function("assign", Some("material"), None)
        .await
        .unwrap();
    service.get_module_info("root").await.unwrap();

    let stats = service.cache_statistics();
    assert_eq!(stats.search_cache_entries, 2);
    assert_eq!(stats.metadata_cache_entries, 1);
    assert_eq!(stats.cache_types.get("search"), Some(&1));
    assert_eq!(stats.cache_types.get("function_search"), Some(&1));
    assert_eq!(stats.cache_types.get("module"), Some(&1));
    assert_eq!(stats.cached_modules, vec!["root"]);

    let report = service.clear_cache();
    assert_eq!(report.search_cache_entries, 2);
    assert_eq!(report.metadata_cache_entries, 1);

    let stats = service.cache_statistics();
    assert_eq!(stats.search_cache_entries, 0);
    assert_eq!(stats.metadata_cache_entries, 0);
    assert!(stats.cache_types.is_empty());

    // The next identical search recomputes.
    let response = service.search("walls", None, None, None).await.unwrap();
    assert!(!response.cache_hit);
}

#[tokio::test]
async fn force_rebuild_invalidates_cached_results() {
    let dir = TempDir::new().unwrap();
    let service = ready_service(&dir).await;

    service.search("walls", None, None, None).await.unwrap();
    assert_eq!(service.cache_statistics().search_cache_entries, 1);

    service
        .ensure_ready(true, Duration::from_secs(10))
        .await
        .unwrap();

    assert_eq!(service.cache_statistics().search_cache_entries, 0);
    let response = service.search("walls", None, None, None).await.unwrap();
    assert!(!response.cache_hit);
}
