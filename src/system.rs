//! Fachada del sistema: conecta configuración, proveedores, índices, agentes y
//! orquestador, y es lo único que usan la CLI y la API HTTP.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agents::{Specialist, SpecialistAgent, SpecialistSettings, Supervisor};
use crate::config::AppConfig;
use crate::documents::{DocumentStore, FsDocumentStore};
use crate::error::IndexBuildError;
use crate::llm::{Embedder, GenerationParams, LanguageModel, LlmManager};
use crate::models::{Domain, Query, QueryResult};
use crate::orchestrator::Orchestrator;
use crate::rag::RetrievalEngine;
use crate::tools::{WebSearchTool, RAG_SEARCH, WEB_SEARCH};
use crate::validation::InputValidator;
use crate::vector_store::{IndexCache, IndexRegistry, IndexReport};

#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub domain: Domain,
    /// `None` mientras el índice no se haya cargado.
    pub chunks: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub chat_model: String,
    pub embedding_model: String,
    pub temperature: f64,
    pub max_tokens: u64,
    pub top_k: usize,
    pub tools: Vec<String>,
    pub indexes: Vec<IndexStatus>,
}

impl fmt::Display for SystemInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Chat model:      {}", self.chat_model)?;
        writeln!(f, "Embedding model: {}", self.embedding_model)?;
        writeln!(f, "Temperature:     {}", self.temperature)?;
        writeln!(f, "Max tokens:      {}", self.max_tokens)?;
        writeln!(f, "Top-k:           {}", self.top_k)?;
        writeln!(f, "Tools:           {}", self.tools.join(", "))?;
        for status in &self.indexes {
            match status.chunks {
                Some(n) => writeln!(f, "{} index:        {n} chunks", status.domain)?,
                None => writeln!(f, "{} index:        not loaded", status.domain)?,
            }
        }
        Ok(())
    }
}

pub struct SupportSystem {
    config: AppConfig,
    validator: InputValidator,
    registry: Arc<IndexRegistry>,
    orchestrator: Orchestrator,
    web_enabled: bool,
}

impl SupportSystem {
    /// Sistema real: Rig para LLM/embeddings y documentos del sistema de ficheros.
    pub fn from_config(cfg: AppConfig) -> Self {
        let llm = Arc::new(LlmManager::from_config(&cfg));
        let model: Arc<dyn LanguageModel> = llm.clone();
        let embedder: Arc<dyn Embedder> = llm;
        let store: Arc<dyn DocumentStore> = Arc::new(FsDocumentStore::from_config(&cfg));
        Self::with_components(cfg, model, embedder, store)
    }

    pub fn with_components(
        cfg: AppConfig,
        model: Arc<dyn LanguageModel>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        let registry = Arc::new(IndexRegistry::new(
            store,
            embedder,
            IndexCache::new(cfg.cache_dir.clone()),
            cfg.chunking.clone(),
            cfg.embed_batch_size,
        ));
        let retrieval = Arc::new(RetrievalEngine::new(
            registry.clone(),
            cfg.min_score,
            cfg.provider_timeout,
        ));

        let params = GenerationParams {
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
        };
        let settings = SpecialistSettings {
            top_k: cfg.top_k,
            max_context_chars: cfg.max_context_chars,
            params,
        };
        let web = WebSearchTool::from_config(&cfg);
        let specialists: Vec<Arc<dyn Specialist>> = Domain::ALL
            .iter()
            .map(|domain| {
                Arc::new(SpecialistAgent::new(
                    *domain,
                    model.clone(),
                    retrieval.clone(),
                    web.clone(),
                    settings,
                )) as Arc<dyn Specialist>
            })
            .collect();

        Self {
            validator: InputValidator::from_config(&cfg),
            orchestrator: Orchestrator::new(Supervisor::new(model, params), specialists),
            registry,
            web_enabled: web.is_enabled(),
            config: cfg,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Valida y procesa una consulta. Una consulta rechazada no llega al orquestador.
    pub async fn process_query(&self, raw: &str) -> QueryResult {
        match self.validator.validate(raw) {
            Ok(text) => self.orchestrator.run(Query::new(text)).await,
            Err(e) => {
                warn!("Consulta rechazada: {e}");
                QueryResult {
                    request_id: Uuid::new_v4().to_string(),
                    query: raw.to_string(),
                    response_text: format!("I apologize, but your query could not be processed: {e}."),
                    success: false,
                    routing_decision: None,
                    processing_path: Vec::new(),
                    specialist_agents_used: Vec::new(),
                    tools_used: 0,
                    evaluated: false,
                    total_processing_steps: 0,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Reconstrucción forzada de un dominio.
    pub async fn rebuild_domain(&self, domain: Domain) -> Result<IndexReport, IndexBuildError> {
        let report = self.registry.rebuild(domain).await?;
        if report.no_documents() {
            warn!("No se encontraron documentos para {domain}");
        } else {
            info!("Índice reconstruido: {report}");
        }
        Ok(report)
    }

    /// Reconstruye los dominios indicados; se detiene en el primer fallo.
    pub async fn init_vector_store(
        &self,
        domains: &[Domain],
    ) -> Result<Vec<IndexReport>, IndexBuildError> {
        let mut reports = Vec::with_capacity(domains.len());
        for domain in domains {
            reports.push(self.rebuild_domain(*domain).await?);
        }
        Ok(reports)
    }

    /// Carga (o construye) los índices de todos los dominios antes de la primera consulta.
    /// Los fallos no son fatales: el dominio se reintentará en su primera búsqueda.
    pub async fn warm_up(&self) {
        for domain in Domain::ALL {
            match self.registry.load_or_build(domain).await {
                Ok(report) => info!("Índice listo: {report}"),
                Err(e) => warn!("No se pudo preparar el índice de {domain}: {e}"),
            }
        }
    }

    pub fn info(&self) -> SystemInfo {
        let mut tools = vec![RAG_SEARCH.to_string()];
        if self.web_enabled {
            tools.push(WEB_SEARCH.to_string());
        }
        SystemInfo {
            chat_model: self.config.llm_chat_model.clone(),
            embedding_model: self.config.llm_embedding_model.clone(),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            top_k: self.config.top_k,
            tools,
            indexes: self
                .registry
                .status()
                .into_iter()
                .map(|(domain, chunks)| IndexStatus { domain, chunks })
                .collect(),
        }
    }
}
