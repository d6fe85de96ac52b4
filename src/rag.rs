//! Motor de recuperación: embebe la consulta, busca en el índice del dominio y
//! construye el contexto que se le pasa al LLM.
//!
//! Flujo:
//!   1. Obtener (o cargar/construir) el índice del dominio.
//!   2. Si el índice está vacío, devolver un resultado vacío sin llamar al proveedor.
//!   3. Embedding de la consulta (con timeout) y búsqueda coseno top-k.
//!   4. `build_context` concatena los pasajes con su fuente hasta el límite de caracteres.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::RetrievalError;
use crate::llm::with_timeout;
use crate::models::{Domain, RetrievalResult};
use crate::vector_store::IndexRegistry;

pub struct RetrievalEngine {
    registry: Arc<IndexRegistry>,
    min_score: f32,
    timeout: Duration,
}

impl RetrievalEngine {
    pub fn new(registry: Arc<IndexRegistry>, min_score: f32, timeout: Duration) -> Self {
        Self {
            registry,
            min_score,
            timeout,
        }
    }

    /// Devuelve los `top_k` pasajes más parecidos a `query_text` en `domain`.
    /// Un índice sin chunks produce un resultado vacío, nunca un error.
    pub async fn search(
        &self,
        domain: Domain,
        query_text: &str,
        top_k: usize,
    ) -> Result<RetrievalResult, RetrievalError> {
        let index = self.registry.get(domain).await?;
        if index.is_empty() {
            debug!("Índice de {domain} vacío; no hay contexto que recuperar");
            return Ok(RetrievalResult::default());
        }

        let embedder = self.registry.embedder();
        let query_vector = with_timeout(self.timeout, embedder.embed(query_text)).await?;
        let hits = index.search(&query_vector, top_k, self.min_score)?;

        info!("{} chunks relevantes en {domain} para: {}", hits.len(), query_text);
        Ok(RetrievalResult { hits })
    }
}

/// Contexto textual listo para el prompt y las fuentes que realmente incluye.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievedContext {
    pub text: String,
    pub sources: Vec<String>,
    pub passages: usize,
}

/// Concatena pasajes como `[From <fuente>]\n<texto>` hasta `max_chars`.
/// Los pasajes que no caben se saltan; el primero se recorta para que el
/// contexto nunca quede vacío si hubo resultados.
pub fn build_context(result: &RetrievalResult, max_chars: usize) -> RetrievedContext {
    let mut parts: Vec<String> = Vec::new();
    let mut sources: Vec<String> = Vec::new();
    let mut used = 0;

    for hit in &result.hits {
        let header = format!("[From {}]\n", hit.chunk.source_name);
        let mut part = format!("{header}{}\n", hit.chunk.text);
        let mut len = part.chars().count();
        if used + len > max_chars {
            let room = max_chars.saturating_sub(header.chars().count() + 1);
            if !parts.is_empty() || room == 0 {
                continue;
            }
            let excerpt: String = hit.chunk.text.chars().take(room).collect();
            part = format!("{header}{excerpt}\n");
            len = part.chars().count();
        }
        used += len;
        if !sources.contains(&hit.chunk.source_name) {
            sources.push(hit.chunk.source_name.clone());
        }
        parts.push(part);
    }

    RetrievedContext {
        passages: parts.len(),
        text: parts.join("\n"),
        sources,
    }
}
