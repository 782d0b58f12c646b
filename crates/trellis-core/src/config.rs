use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrellisError};
use crate::types::ModelClass;

/// Which chat/embedding provider backs the model gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Anthropic,
    Ollama,
}

impl Provider {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Some(Self::OpenAi),
            "anthropic" | "claude" => Some(Self::Anthropic),
            "ollama" => Some(Self::Ollama),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Ollama => "ollama",
        }
    }
}

/// Image generation provider for the image_generator agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImageProvider {
    Dalle,
    Gemini,
    NanoBanana,
}

impl ImageProvider {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "dalle" => Some(Self::Dalle),
            "gemini" => Some(Self::Gemini),
            "nano-banana" => Some(Self::NanoBanana),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dalle => "dalle",
            Self::Gemini => "gemini",
            Self::NanoBanana => "nano-banana",
        }
    }
}

/// Chat and embedding model identifiers for the configured provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub small: String,
    pub large: String,
    pub embedding: String,
}

impl ModelConfig {
    pub fn for_class(&self, class: ModelClass) -> &str {
        match class {
            ModelClass::Small => &self.small,
            ModelClass::Large => &self.large,
        }
    }
}

/// Retrieval tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Documents root; each corpus is a subdirectory.
    pub documents_dir: PathBuf,
    /// Directory holding `embeddings_<corpus>.json` cache files.
    pub cache_dir: PathBuf,
    /// Corpora synced at startup.
    pub corpora: Vec<String>,
    /// Embedding call batch size during sync.
    pub embed_batch_size: usize,
    /// Character budget for retrieval snippets.
    pub snippet_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            documents_dir: PathBuf::from("documents"),
            cache_dir: PathBuf::from("."),
            corpora: vec!["legal".into(), "audit".into()],
            embed_batch_size: default_embed_batch(),
            snippet_chars: default_snippet_chars(),
        }
    }
}

fn default_embed_batch() -> usize {
    16
}

fn default_snippet_chars() -> usize {
    2000
}

/// Engine limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Concurrency degree across ready nodes (1..=8).
    pub max_parallel_agents: usize,
    /// Per-request wall clock timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel_agents: 1,
            request_timeout_secs: 300,
        }
    }
}

/// Process-wide read-only configuration, initialised at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub provider: Provider,
    pub models: ModelConfig,
    pub image_provider: ImageProvider,

    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub anthropic_api_key: Option<String>,
    pub google_api_key: Option<String>,
    pub ollama_base_url: String,

    pub host: String,
    pub port: u16,
    /// When set, selects the persistent sqlite vector-store backend.
    pub database_url: Option<String>,

    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl AppConfig {
    /// Build configuration from the process environment.
    ///
    /// Unknown provider names fail immediately; credential presence is
    /// checked by the gateway on first use so that read-only commands
    /// (`config`, planner validation) work without keys.
    pub fn from_env() -> Result<Self> {
        let provider_raw = env_or("LLM_PROVIDER", "openai");
        let provider = Provider::parse(&provider_raw).ok_or_else(|| {
            TrellisError::Configuration(format!(
                "LLM_PROVIDER must be one of openai, anthropic, ollama (got '{provider_raw}')"
            ))
        })?;

        let image_raw = env_or("IMAGE_PROVIDER", "nano-banana");
        let image_provider = ImageProvider::parse(&image_raw).ok_or_else(|| {
            TrellisError::Configuration(format!(
                "IMAGE_PROVIDER must be one of dalle, gemini, nano-banana (got '{image_raw}')"
            ))
        })?;

        let models = match provider {
            Provider::OpenAi => ModelConfig {
                small: env_or("SMALL_MODEL", "gpt-4o-mini"),
                large: env_or("LARGE_MODEL", "gpt-4o"),
                embedding: env_or("EMBEDDING_MODEL", "text-embedding-3-small"),
            },
            Provider::Anthropic => ModelConfig {
                small: env_or("SMALL_MODEL", "claude-3-haiku-20240307"),
                large: env_or("LARGE_MODEL", "claude-3-5-sonnet-20241022"),
                embedding: env_or("EMBEDDING_MODEL", "text-embedding-3-small"),
            },
            Provider::Ollama => ModelConfig {
                small: env_or("SMALL_MODEL", "llama3.1:8b"),
                large: env_or("LARGE_MODEL", "llama3.1:8b"),
                embedding: env_or("OLLAMA_EMBEDDING_MODEL", "nomic-embed-text"),
            },
        };

        let port = env_or("PORT", "8000").parse::<u16>().map_err(|_| {
            TrellisError::Configuration("PORT must be a valid TCP port number".into())
        })?;

        let max_parallel_agents = env_or("MAX_PARALLEL_AGENTS", "1")
            .parse::<usize>()
            .ok()
            .filter(|n| (1..=8).contains(n))
            .ok_or_else(|| {
                TrellisError::Configuration("MAX_PARALLEL_AGENTS must be between 1 and 8".into())
            })?;

        let request_timeout_secs = env_or("REQUEST_TIMEOUT_SECS", "300")
            .parse::<u64>()
            .map_err(|_| {
                TrellisError::Configuration("REQUEST_TIMEOUT_SECS must be an integer".into())
            })?;

        let corpora: Vec<String> = env_or("KNOWLEDGE_BASES", "legal,audit")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if corpora.is_empty() {
            return Err(TrellisError::Configuration(
                "KNOWLEDGE_BASES must name at least one corpus".into(),
            ));
        }

        Ok(Self {
            provider,
            models,
            image_provider,
            openai_api_key: env_opt("OPENAI_API_KEY"),
            openai_base_url: env_or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            anthropic_api_key: env_opt("ANTHROPIC_API_KEY"),
            google_api_key: env_opt("GOOGLE_API_KEY"),
            ollama_base_url: env_or("OLLAMA_BASE_URL", "http://localhost:11434"),
            host: env_or("HOST", "0.0.0.0"),
            port,
            database_url: env_opt("DATABASE_URL"),
            retrieval: RetrievalConfig {
                documents_dir: PathBuf::from(env_or("DOCUMENTS_DIR", "documents")),
                cache_dir: PathBuf::from(env_or("EMBEDDINGS_CACHE_DIR", ".")),
                corpora,
                embed_batch_size: env_or("EMBED_BATCH_SIZE", "16")
                    .parse()
                    .unwrap_or_else(|_| default_embed_batch()),
                snippet_chars: env_or("SNIPPET_CHARS", "2000")
                    .parse()
                    .unwrap_or_else(|_| default_snippet_chars()),
            },
            engine: EngineConfig {
                max_parallel_agents,
                request_timeout_secs,
            },
        })
    }

    pub fn documents_dir(&self, corpus: &str) -> PathBuf {
        self.retrieval.documents_dir.join(corpus)
    }

    pub fn cache_path(&self, corpus: &str) -> PathBuf {
        self.retrieval
            .cache_dir
            .join(format!("embeddings_{corpus}.json"))
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parse() {
        assert_eq!(Provider::parse("openai"), Some(Provider::OpenAi));
        assert_eq!(Provider::parse("Anthropic"), Some(Provider::Anthropic));
        assert_eq!(Provider::parse("ollama"), Some(Provider::Ollama));
        assert_eq!(Provider::parse("bedrock"), None);
    }

    #[test]
    fn test_image_provider_parse() {
        assert_eq!(ImageProvider::parse("dalle"), Some(ImageProvider::Dalle));
        assert_eq!(
            ImageProvider::parse("nano-banana"),
            Some(ImageProvider::NanoBanana)
        );
        assert_eq!(ImageProvider::parse("sd"), None);
    }

    #[test]
    fn test_model_for_class() {
        let models = ModelConfig {
            small: "s".into(),
            large: "l".into(),
            embedding: "e".into(),
        };
        assert_eq!(models.for_class(ModelClass::Small), "s");
        assert_eq!(models.for_class(ModelClass::Large), "l");
    }

    #[test]
    fn test_cache_path_per_corpus() {
        let config = AppConfig {
            provider: Provider::OpenAi,
            models: ModelConfig {
                small: "s".into(),
                large: "l".into(),
                embedding: "e".into(),
            },
            image_provider: ImageProvider::Dalle,
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".into(),
            anthropic_api_key: None,
            google_api_key: None,
            ollama_base_url: "http://localhost:11434".into(),
            host: "0.0.0.0".into(),
            port: 8000,
            database_url: None,
            retrieval: RetrievalConfig::default(),
            engine: EngineConfig::default(),
        };
        assert_eq!(
            config.cache_path("legal"),
            PathBuf::from("./embeddings_legal.json")
        );
        assert_eq!(
            config.documents_dir("audit"),
            PathBuf::from("documents/audit")
        );
    }
}
