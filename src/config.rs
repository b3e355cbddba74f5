use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Backend selector: `"remote"` or `"local"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Vector dimensionality. Optional for known local models.
    #[serde(default)]
    pub dims: Option<usize>,
    /// Remote embedding endpoint, e.g. `http://127.0.0.1:8080/embeddings`.
    #[serde(default)]
    pub url: Option<String>,
    /// Scale vectors to unit length so cosine reduces to a dot product.
    /// Must match between index build and query time; recorded in the
    /// provider identity so a mismatch is caught on load.
    #[serde(default = "default_normalize")]
    pub normalize: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            dims: None,
            url: None,
            normalize: default_normalize(),
            batch_size: default_batch_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_model() -> String {
    "all-minilm-l6-v2".to_string()
}
fn default_normalize() -> bool {
    true
}
fn default_batch_size() -> usize {
    64
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Where the serialized index lives.
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from(".cache/ifc_knowledge_index.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Result count used when a caller does not pass `max_results`.
    #[serde(default = "default_max_results")]
    pub default_max_results: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_max_results: default_max_results(),
        }
    }
}

fn default_max_results() -> usize {
    5
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    match config.embedding.provider.as_str() {
        "remote" => {
            if config.embedding.url.is_none() {
                anyhow::bail!("embedding.url must be set when provider is 'remote'");
            }
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                anyhow::bail!("embedding.dims must be > 0 when provider is 'remote'");
            }
        }
        "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be remote or local.",
            other
        ),
    }

    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    if config.embedding.timeout_secs == 0 {
        anyhow::bail!("embedding.timeout_secs must be > 0");
    }

    if config.retrieval.default_max_results < 1 {
        anyhow::bail!("retrieval.default_max_results must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_defaults() {
        let f = write_config("");
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.embedding.provider, "local");
        assert!(config.embedding.normalize);
        assert_eq!(config.retrieval.default_max_results, 5);
    }

    #[test]
    fn test_remote_requires_url_and_dims() {
        let f = write_config("[embedding]\nprovider = \"remote\"\n");
        assert!(load_config(f.path()).is_err());

        let f = write_config(
            "[embedding]\nprovider = \"remote\"\nurl = \"http://127.0.0.1:8080/embeddings\"\ndims = 384\n",
        );
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.embedding.dims, Some(384));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let f = write_config("[embedding]\nprovider = \"openai\"\n");
        assert!(load_config(f.path()).is_err());
    }
}
