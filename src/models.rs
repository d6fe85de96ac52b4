//! Modelos de dominio: consultas, decisiones de enrutado, chunks indexados,
//! respuestas de especialistas y el payload final devuelto al llamante.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tools::ToolCall;

/// Dominios especialistas soportados.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Domain {
    #[serde(rename = "IT")]
    It,
    Finance,
}

impl Domain {
    pub const ALL: [Domain; 2] = [Domain::It, Domain::Finance];

    /// Identificador en minúsculas usado en rutas de caché y en la CLI.
    pub fn slug(self) -> &'static str {
        match self {
            Domain::It => "it",
            Domain::Finance => "finance",
        }
    }

    /// Nombre del agente especialista tal y como aparece en `processing_path`.
    pub fn agent_name(self) -> &'static str {
        match self {
            Domain::It => "IT Agent",
            Domain::Finance => "Finance Agent",
        }
    }

    /// Interpreta `it`, `finance` o `both` (sin distinguir mayúsculas).
    pub fn parse_selection(s: &str) -> Result<Vec<Domain>> {
        match s.trim().to_lowercase().as_str() {
            "both" | "all" => Ok(Domain::ALL.to_vec()),
            other => Ok(vec![other.parse()?]),
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::It => write!(f, "IT"),
            Domain::Finance => write!(f, "Finance"),
        }
    }
}

impl FromStr for Domain {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "it" => Ok(Domain::It),
            "finance" => Ok(Domain::Finance),
            other => Err(anyhow!("Dominio no soportado: {other} (usa it, finance o both)")),
        }
    }
}

/// Consulta ya validada. Inmutable.
#[derive(Debug, Clone, Serialize)]
pub struct Query {
    pub text: String,
    pub submitted_at: DateTime<Utc>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            submitted_at: Utc::now(),
        }
    }
}

/// Destino de una consulta según el supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Route {
    #[serde(rename = "IT")]
    It,
    Finance,
    Both,
    Unclear,
}

impl Route {
    /// Dominios a los que se despacha la consulta. `Unclear` no despacha nada.
    pub fn domains(self) -> &'static [Domain] {
        match self {
            Route::It => &[Domain::It],
            Route::Finance => &[Domain::Finance],
            Route::Both => &Domain::ALL,
            Route::Unclear => &[],
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Route::It => "IT",
            Route::Finance => "Finance",
            Route::Both => "Both",
            Route::Unclear => "Unclear",
        };
        f.write_str(s)
    }
}

/// Decisión de enrutado junto con el texto crudo del clasificador (diagnóstico).
#[derive(Debug, Clone, Serialize)]
pub struct RoutingDecision {
    pub route: Route,
    pub raw: String,
    /// Error del proveedor si la clasificación no pudo hacerse.
    pub error: Option<String>,
}

/// Entrada del listado de documentos de un dominio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMeta {
    /// Ruta relativa a la raíz del dominio.
    pub source_name: String,
    pub modified_at: DateTime<Utc>,
    pub size_bytes: u64,
}

/// Trozo de texto indexado con su embedding (normalizado L2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: String,
    pub domain: Domain,
    pub source_name: String,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// Chunk recuperado con su puntuación de similitud.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: DocumentChunk,
    pub score: f32,
}

/// Resultado de una búsqueda, ordenado de mayor a menor puntuación.
#[derive(Debug, Clone, Default)]
pub struct RetrievalResult {
    pub hits: Vec<ScoredChunk>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// Borrador producido por un agente especialista.
#[derive(Debug, Clone, Serialize)]
pub struct SpecialistResponse {
    pub domain: Domain,
    pub agent_name: String,
    pub text: String,
    pub sources: Vec<String>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_calls_used: usize,
    pub success: bool,
}

/// Payload devuelto a cualquier llamante (CLI, HTTP, batch).
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub request_id: String,
    pub query: String,
    pub response_text: String,
    pub success: bool,
    pub routing_decision: Option<Route>,
    pub processing_path: Vec<String>,
    pub specialist_agents_used: Vec<String>,
    pub tools_used: usize,
    pub evaluated: bool,
    pub total_processing_steps: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
