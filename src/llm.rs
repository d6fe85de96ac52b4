//! Abstracción sobre Rig para trabajar con distintos proveedores de LLM.
//!
//! El núcleo sólo ve dos capacidades: [`LanguageModel`] (prompt → texto) y
//! [`Embedder`] (texto → vector). `LlmManager` implementa ambas con Rig; de
//! momento sólo OpenAI, Gemini/Ollama quedan preparados para el futuro.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rig::completion::Prompt;
use rig::embeddings::EmbeddingModel; // <- para .embed_texts
use tracing::{debug, warn};

use crate::config::{AppConfig, LlmProvider};
use crate::error::ProviderError;

/// Parámetros de generación que se envían en cada llamada.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f64,
    pub max_tokens: u64,
}

/// Proveedor de modelo de lenguaje.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Genera texto a partir de un preámbulo de sistema y el prompt del usuario.
    async fn generate(
        &self,
        preamble: &str,
        prompt: &str,
        params: GenerationParams,
    ) -> Result<String, ProviderError>;
}

/// Proveedor de embeddings de dimensión fija.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identificador estable del modelo; forma parte de la huella del índice.
    fn embedder_id(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Aplica el timeout configurado a una llamada a proveedor. Un timeout se trata
/// igual que cualquier otro fallo del proveedor.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            warn!("Llamada al proveedor cancelada tras {:?}", limit);
            Err(ProviderError::Timeout(limit))
        }
    }
}

/// Gestor de LLMs y embeddings.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub embedding_model: String,
    pub chat_model: String,
    pub timeout: Duration,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            provider: cfg.llm_provider.clone(),
            embedding_model: cfg.llm_embedding_model.clone(),
            chat_model: cfg.llm_chat_model.clone(),
            timeout: cfg.provider_timeout,
        }
    }

    fn ensure_openai_key() -> Result<(), ProviderError> {
        match std::env::var("OPENAI_API_KEY") {
            Ok(key) if !key.trim().is_empty() => Ok(()),
            _ => Err(ProviderError::Request(
                "Falta OPENAI_API_KEY en el entorno".to_string(),
            )),
        }
    }

    // ---------------------------------------------------------------------
    // EMBEDDINGS
    // ---------------------------------------------------------------------

    async fn embed_with_openai(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, ProviderError> {
        use rig::providers::openai::{self, TEXT_EMBEDDING_3_SMALL};
        // Trait para client.embedding_model(...)
        use rig::client::EmbeddingsClient as _;

        Self::ensure_openai_key()?;
        let client = openai::Client::from_env();

        let model_name = if self.embedding_model.is_empty() {
            TEXT_EMBEDDING_3_SMALL
        } else {
            self.embedding_model.as_str()
        };
        let embedding_model = client.embedding_model(model_name);

        let expected = texts.len();
        let embeddings = embedding_model
            .embed_texts(texts)
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        if embeddings.len() != expected {
            return Err(ProviderError::Request(format!(
                "Número de embeddings ({}) distinto al número de textos ({})",
                embeddings.len(),
                expected
            )));
        }

        Ok(embeddings
            .into_iter()
            .map(|emb| emb.vec.into_iter().map(|v| v as f32).collect())
            .collect())
    }

    // ---------------------------------------------------------------------
    // CHAT / COMPLETION
    // ---------------------------------------------------------------------

    async fn generate_with_openai(
        &self,
        preamble: &str,
        prompt: &str,
        params: GenerationParams,
    ) -> Result<String, ProviderError> {
        use rig::providers::openai;
        // Trait para client.agent(...)
        use rig::client::CompletionClient as _;

        Self::ensure_openai_key()?;
        let client = openai::Client::from_env();

        // Modelo de chat por defecto si no se ha configurado otro
        let model_name = if self.chat_model.is_empty() {
            "gpt-4o-mini"
        } else {
            self.chat_model.as_str()
        };

        let agent = client
            .agent(model_name)
            .preamble(preamble)
            .temperature(params.temperature)
            .max_tokens(params.max_tokens)
            .build();

        let answer = agent
            .prompt(prompt)
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        if answer.trim().is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(answer)
    }
}

#[async_trait]
impl LanguageModel for LlmManager {
    async fn generate(
        &self,
        preamble: &str,
        prompt: &str,
        params: GenerationParams,
    ) -> Result<String, ProviderError> {
        debug!(model = %self.chat_model, chars = prompt.len(), "Llamada de completion");
        match self.provider {
            LlmProvider::OpenAI => {
                with_timeout(self.timeout, self.generate_with_openai(preamble, prompt, params))
                    .await
            }
            ref other => Err(ProviderError::Unsupported(format!(
                "Proveedor LLM {:?} aún no implementado para chat",
                other
            ))),
        }
    }
}

#[async_trait]
impl Embedder for LlmManager {
    fn embedder_id(&self) -> &str {
        &self.embedding_model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or(ProviderError::EmptyResponse)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        match self.provider {
            LlmProvider::OpenAI => {
                with_timeout(self.timeout, self.embed_with_openai(texts.to_vec())).await
            }
            ref other => Err(ProviderError::Unsupported(format!(
                "Proveedor LLM {:?} aún no implementado para embeddings",
                other
            ))),
        }
    }
}
