//! Carga y gestión de configuración de la aplicación (LLM, documentos, RAG, validación).

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};

use crate::models::Domain;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }
}

/// Parámetros del troceado de documentos.
#[derive(Clone, Debug)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            min_chunk_chars: 50,
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,

    pub llm_provider: LlmProvider,
    pub llm_embedding_model: String,
    pub llm_chat_model: String,
    pub temperature: f64,
    pub max_tokens: u64,
    pub provider_timeout: Duration,

    pub it_docs_path: PathBuf,
    pub finance_docs_path: PathBuf,
    pub cache_dir: PathBuf,

    pub top_k: usize,
    pub min_score: f32,
    pub max_context_chars: usize,
    pub embed_batch_size: usize,
    pub chunking: ChunkingConfig,

    pub web_search_enabled: bool,
    pub web_search_max_results: usize,
    pub web_search_base_url: String,

    pub query_min_length: usize,
    pub query_max_length: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:3322".to_string(),
            llm_provider: LlmProvider::OpenAI,
            llm_embedding_model: "text-embedding-3-small".to_string(),
            llm_chat_model: "gpt-4o-mini".to_string(),
            temperature: 0.1,
            max_tokens: 1000,
            provider_timeout: Duration::from_secs(60),
            it_docs_path: PathBuf::from("docs/it"),
            finance_docs_path: PathBuf::from("docs/finance"),
            cache_dir: default_cache_dir(),
            top_k: 5,
            min_score: 0.0,
            max_context_chars: 12_000,
            embed_batch_size: 16,
            chunking: ChunkingConfig::default(),
            web_search_enabled: false,
            web_search_max_results: 3,
            web_search_base_url: "https://duckduckgo.com/".to_string(),
            query_min_length: 5,
            query_max_length: 1000,
        }
    }
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let llm_provider_str = env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let llm_provider = LlmProvider::from_str(&llm_provider_str)?;

        let cfg = Self {
            server_addr: env::var("SERVER_ADDR").unwrap_or(defaults.server_addr),
            llm_provider,
            llm_embedding_model: env::var("LLM_EMBEDDING_MODEL")
                .unwrap_or(defaults.llm_embedding_model),
            llm_chat_model: env::var("LLM_CHAT_MODEL").unwrap_or(defaults.llm_chat_model),
            temperature: parse_var("LLM_TEMPERATURE", defaults.temperature)?,
            max_tokens: parse_var("LLM_MAX_TOKENS", defaults.max_tokens)?,
            provider_timeout: Duration::from_secs(parse_var(
                "LLM_TIMEOUT_SECS",
                defaults.provider_timeout.as_secs(),
            )?),
            it_docs_path: env::var("IT_DOCS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.it_docs_path),
            finance_docs_path: env::var("FINANCE_DOCS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.finance_docs_path),
            cache_dir: env::var("VECTOR_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            top_k: parse_var("RAG_TOP_K", defaults.top_k)?,
            min_score: parse_var("RAG_MIN_SCORE", defaults.min_score)?,
            max_context_chars: parse_var("RAG_MAX_CONTEXT_CHARS", defaults.max_context_chars)?,
            embed_batch_size: parse_var("EMBED_BATCH_SIZE", defaults.embed_batch_size)?,
            chunking: ChunkingConfig {
                chunk_size: parse_var("CHUNK_SIZE", defaults.chunking.chunk_size)?,
                chunk_overlap: parse_var("CHUNK_OVERLAP", defaults.chunking.chunk_overlap)?,
                min_chunk_chars: parse_var("CHUNK_MIN_CHARS", defaults.chunking.min_chunk_chars)?,
            },
            web_search_enabled: parse_var("WEB_SEARCH_ENABLED", defaults.web_search_enabled)?,
            web_search_max_results: parse_var(
                "WEB_SEARCH_MAX_RESULTS",
                defaults.web_search_max_results,
            )?,
            web_search_base_url: env::var("WEB_SEARCH_BASE_URL")
                .unwrap_or(defaults.web_search_base_url),
            query_min_length: parse_var("QUERY_MIN_LENGTH", defaults.query_min_length)?,
            query_max_length: parse_var("QUERY_MAX_LENGTH", defaults.query_max_length)?,
        };

        cfg.validate()?;
        Ok(cfg)
    }

    /// Comprueba rangos y coherencia de los valores.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.temperature) {
            bail!("LLM_TEMPERATURE debe estar entre 0 y 1 (actual: {})", self.temperature);
        }
        if self.max_tokens == 0 {
            bail!("LLM_MAX_TOKENS debe ser positivo");
        }
        if self.top_k == 0 {
            bail!("RAG_TOP_K debe ser positivo");
        }
        if self.embed_batch_size == 0 {
            bail!("EMBED_BATCH_SIZE debe ser positivo");
        }
        if self.chunking.chunk_size == 0 {
            bail!("CHUNK_SIZE debe ser positivo");
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            bail!(
                "CHUNK_OVERLAP ({}) debe ser menor que CHUNK_SIZE ({})",
                self.chunking.chunk_overlap,
                self.chunking.chunk_size
            );
        }
        if self.max_context_chars < self.chunking.chunk_size {
            bail!(
                "RAG_MAX_CONTEXT_CHARS ({}) debe ser al menos CHUNK_SIZE ({})",
                self.max_context_chars,
                self.chunking.chunk_size
            );
        }
        if self.query_min_length > self.query_max_length {
            bail!("QUERY_MIN_LENGTH no puede superar QUERY_MAX_LENGTH");
        }
        Ok(())
    }

    /// Raíz de documentos de un dominio.
    pub fn docs_path(&self, domain: Domain) -> &PathBuf {
        match domain {
            Domain::It => &self.it_docs_path,
            Domain::Finance => &self.finance_docs_path,
        }
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("helpdesk_router"))
        .unwrap_or_else(|| PathBuf::from("cache"))
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Valor inválido para {name}: '{raw}'")),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_temperature() {
        let cfg = AppConfig {
            temperature: 1.5,
            ..AppConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_overlap_larger_than_chunk() {
        let cfg = AppConfig {
            chunking: ChunkingConfig {
                chunk_size: 100,
                chunk_overlap: 100,
                min_chunk_chars: 10,
            },
            ..AppConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn context_budget_must_fit_a_chunk() {
        let cfg = AppConfig {
            max_context_chars: 500,
            ..AppConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = AppConfig {
            max_context_chars: 1000,
            ..AppConfig::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn provider_names_are_case_insensitive() {
        assert_eq!(LlmProvider::from_str("OpenAI").unwrap(), LlmProvider::OpenAI);
        assert!(LlmProvider::from_str("bedrock").is_err());
    }

    #[test]
    fn docs_path_follows_domain() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.docs_path(Domain::It), &PathBuf::from("docs/it"));
        assert_eq!(cfg.docs_path(Domain::Finance), &PathBuf::from("docs/finance"));
    }
}
