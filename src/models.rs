//! Core data models used throughout the knowledge engine.
//!
//! These types represent the documents held by the [`KnowledgeStore`]
//! (crate::store::KnowledgeStore) and the result envelopes returned by the
//! tool-facing operations.

use serde::{Deserialize, Serialize};

/// Kind of content a document carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocKind {
    Function,
    Module,
    Workflow,
}

impl DocKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocKind::Function => "function",
            DocKind::Module => "module",
            DocKind::Workflow => "workflow",
        }
    }

    /// Parse a `context_type` filter value. Unknown strings are rejected so
    /// a typo'd filter fails loudly instead of silently matching nothing.
    pub fn parse(s: &str) -> Option<DocKind> {
        match s {
            "function" => Some(DocKind::Function),
            "module" => Some(DocKind::Module),
            "workflow" => Some(DocKind::Workflow),
            _ => None,
        }
    }
}

impl std::fmt::Display for DocKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured fields surfaced verbatim in results.
///
/// Function documents fill signature/parameters/returns/examples; module
/// documents fill `functions`; workflow documents usually carry only
/// `description`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<ParamSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
    /// Complete dotted path, e.g. `ifcopenshell.api.root.create_entity`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_path: Option<String>,
    /// Function names belonging to a module document.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<String>,
}

/// One function parameter as documented in the corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

/// An immutable unit of knowledge content plus its embedding.
///
/// The vector is computed once at index-build time. All vectors within one
/// store share the provider's output dimensionality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier, unique within a store.
    pub id: String,
    pub kind: DocKind,
    /// Owning module name; empty for global documents.
    pub module: String,
    /// Present only for function documents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    /// Canonical content the embedding was computed from.
    pub text: String,
    pub metadata: DocMetadata,
    pub vector: Vec<f32>,
}

// ---------- Result envelopes ----------

/// One ranked hit from `search`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultItem {
    #[serde(rename = "type")]
    pub kind: DocKind,
    pub module: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    /// Leading slice of the document text, capped at 500 chars.
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<ParamSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returns: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
    /// Similarity score; higher is better.
    pub score: f32,
}

/// Full response for a `search` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub results_count: usize,
    pub results: Vec<SearchResultItem>,
    /// Wall-clock seconds spent serving this request.
    pub search_time: f64,
    pub cache_hit: bool,
}

/// One match from `find_function`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionMatch {
    pub module: String,
    pub function: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<ParamSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returns: Option<String>,
    /// First usage example, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<String>,
    pub score: f32,
}

/// Response for a `find_function` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSearchResponse {
    pub operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
    pub functions_found: usize,
    pub functions: Vec<FunctionMatch>,
    pub search_time: f64,
    pub cache_hit: bool,
}

/// Module detail payload served by `get_module_info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub module: String,
    pub description: String,
    pub functions: Vec<String>,
    pub function_count: usize,
}

/// Outcome of `get_module_info`: the module, or the known module names when
/// no such module exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModuleLookup {
    Found(ModuleInfo),
    Miss { available_modules: Vec<String> },
}

/// Function detail payload served by `get_function_details`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDetails {
    pub function: String,
    pub module: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<ParamSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returns: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
}

/// Outcome of `get_function_details`: either the document, or up to a few
/// similar functions when no exact match exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FunctionLookup {
    Found(FunctionDetails),
    Miss { similar_functions: Vec<FunctionMatch> },
}

/// Sizes reported by `clear_cache`, measured before the clear.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheClearReport {
    pub search_cache_entries: usize,
    pub metadata_cache_entries: usize,
}

/// Snapshot of cache usage for `get_cache_statistics`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatistics {
    pub search_cache_entries: usize,
    pub metadata_cache_entries: usize,
    /// Entry counts keyed by the cache-key prefix (`search`,
    /// `function_search`, `module`, `function_details`).
    pub cache_types: std::collections::BTreeMap<String, usize>,
    /// Module names currently present in the metadata cache.
    pub cached_modules: Vec<String>,
}

/// Controller status surfaced by `status()` and `ensure_ready`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    /// `not_initialized`, `initializing`, `ready`, or `error`.
    pub state: String,
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Init stage last entered, e.g. `load-index` or `warm-up`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initialization_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_identity: Option<String>,
    pub cached_searches: usize,
    pub cached_metadata: usize,
}
