//! Structured corpus input and document rendering.
//!
//! The corpus is the external, pre-parsed description of the IfcOpenShell
//! authoring API: modules, their functions, and usage workflows. Document
//! generation itself happens outside this crate; here the descriptors are
//! rendered into [`Document`] text through fixed templates so the embedding
//! input is deterministic, and hashed into a fingerprint so a persisted
//! index built from an older corpus is detected on load.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;

use crate::error::{KnowledgeError, Result};
use crate::models::{DocKind, DocMetadata, Document, ParamSpec};

/// Root corpus descriptor. Deserializes from the JSON emitted by the
/// doc-generation tooling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Corpus {
    #[serde(default)]
    pub modules: Vec<ModuleDescriptor>,
    #[serde(default)]
    pub workflows: Vec<WorkflowDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub functions: Vec<FunctionDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    pub name: String,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Vec<ParamSpec>,
    #[serde(default)]
    pub returns: Option<String>,
    #[serde(default)]
    pub examples: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDescriptor {
    pub name: String,
    /// Module the workflow is most associated with, when there is one.
    #[serde(default)]
    pub module: Option<String>,
    pub description: String,
    #[serde(default)]
    pub examples: Vec<String>,
}

impl Corpus {
    pub fn from_json_str(s: &str) -> Result<Corpus> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Corpus> {
        let content = std::fs::read_to_string(path)?;
        Corpus::from_json_str(&content)
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty() && self.workflows.is_empty()
    }

    /// Content hash over the canonical JSON form. Stable across runs for
    /// the same corpus; any edit to a descriptor changes it.
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_vec(self).expect("corpus descriptors always serialize to JSON");
        let mut hasher = Sha256::new();
        hasher.update(&json);
        hex_digest(&hasher.finalize())
    }

    /// Render the corpus into unembedded documents, in corpus order: each
    /// module document followed by its function documents, then workflows.
    /// Ranking ties break by this same order.
    ///
    /// Document ids must be unique: a corpus with two identically named
    /// modules, or a repeated function name within one module, is rejected
    /// here rather than building a store where lookups resolve ambiguously.
    pub fn render_documents(&self) -> Result<Vec<Document>> {
        let mut docs = Vec::new();

        for module in &self.modules {
            docs.push(render_module(module));
            for function in &module.functions {
                docs.push(render_function(&module.name, function));
            }
        }

        for workflow in &self.workflows {
            docs.push(render_workflow(workflow));
        }

        if docs.is_empty() {
            return Err(KnowledgeError::CorpusEmpty);
        }

        let mut seen = HashSet::with_capacity(docs.len());
        for doc in &docs {
            if !seen.insert(doc.id.as_str()) {
                return Err(KnowledgeError::DuplicateDocumentId(doc.id.clone()));
            }
        }

        Ok(docs)
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

const DESCRIPTION_CAP: usize = 500;

fn cap_chars(s: &str, cap: usize) -> &str {
    match s.char_indices().nth(cap) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn render_function(module: &str, f: &FunctionDescriptor) -> Document {
    let mut parts = vec![format!("Module: {}", module), format!("Function: {}", f.name)];

    if let Some(sig) = &f.signature {
        parts.push(format!("Signature: {}", sig));
    }
    if let Some(desc) = &f.description {
        parts.push(format!("Description: {}", cap_chars(desc, DESCRIPTION_CAP)));
    }
    if !f.parameters.is_empty() {
        let names: Vec<&str> = f.parameters.iter().map(|p| p.name.as_str()).collect();
        parts.push(format!("Parameters: {}", names.join(", ")));
    }
    if !f.examples.is_empty() {
        parts.push("Example usage available".to_string());
    }

    Document {
        id: format!("{}.{}:function", module, f.name),
        kind: DocKind::Function,
        module: module.to_string(),
        function: Some(f.name.clone()),
        text: parts.join("\n"),
        metadata: DocMetadata {
            signature: f.signature.clone(),
            description: f.description.clone(),
            parameters: f.parameters.clone(),
            returns: f.returns.clone(),
            examples: f.examples.clone(),
            full_path: Some(format!("ifcopenshell.api.{}.{}", module, f.name)),
            functions: Vec::new(),
        },
        vector: Vec::new(),
    }
}

fn render_module(m: &ModuleDescriptor) -> Document {
    let names: Vec<&str> = m.functions.iter().map(|f| f.name.as_str()).collect();
    let text = format!(
        "Module: {}\nDescription: {}\nAvailable functions: {}",
        m.name,
        m.description,
        names.join(", ")
    );

    Document {
        id: format!("{}:module", m.name),
        kind: DocKind::Module,
        module: m.name.clone(),
        function: None,
        text,
        metadata: DocMetadata {
            description: Some(m.description.clone()),
            functions: names.iter().map(|n| n.to_string()).collect(),
            ..Default::default()
        },
        vector: Vec::new(),
    }
}

fn render_workflow(w: &WorkflowDescriptor) -> Document {
    let mut parts = vec![
        format!("Workflow: {}", w.name),
        format!("Description: {}", cap_chars(&w.description, DESCRIPTION_CAP)),
    ];
    if !w.examples.is_empty() {
        parts.push("Example usage available".to_string());
    }

    Document {
        id: format!("{}:workflow", w.name),
        kind: DocKind::Workflow,
        module: w.module.clone().unwrap_or_default(),
        function: None,
        text: parts.join("\n"),
        metadata: DocMetadata {
            description: Some(w.description.clone()),
            examples: w.examples.clone(),
            ..Default::default()
        },
        vector: Vec::new(),
    }
}
