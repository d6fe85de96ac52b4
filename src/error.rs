//! Taxonomía de errores del núcleo (proveedores, índice, recuperación, validación).
//!
//! La capa de aplicación (`main`, `cli`, `api`) trabaja con `anyhow`; estos tipos
//! sólo existen para que el núcleo pueda decidir cómo degradar cada fallo.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::models::Domain;

/// Fallo de un proveedor externo (LLM o embeddings).
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("la petición al proveedor falló: {0}")]
    Request(String),

    #[error("el proveedor no respondió en {0:?}")]
    Timeout(Duration),

    #[error("el proveedor devolvió una respuesta vacía")]
    EmptyResponse,

    #[error("proveedor no soportado: {0}")]
    Unsupported(String),
}

/// Fallo al construir (o cargar) el índice vectorial de un dominio.
#[derive(Debug, Error)]
pub enum IndexBuildError {
    #[error("no se puede acceder a los documentos de {domain} en {}", path.display())]
    DocumentsUnreachable { domain: Domain, path: PathBuf },

    #[error("error del proveedor de embeddings: {0}")]
    Provider(#[from] ProviderError),

    #[error("error en la caché del índice: {0}")]
    Cache(String),
}

/// Fallo durante una búsqueda. Un resultado vacío NO es un error.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error(transparent)]
    Index(#[from] IndexBuildError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("dimensión del embedding de la consulta ({actual}) distinta a la del índice ({expected})")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Entrada del usuario rechazada antes de llegar al orquestador.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ValidationError(pub String);
