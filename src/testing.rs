//! Dobles deterministas para los tests: modelos, embeddings y documentos en memoria.

use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use twox_hash::XxHash64;

use crate::agents::{EVALUATION_PREAMBLE, ROUTING_PREAMBLE};
use crate::documents::DocumentStore;
use crate::error::{IndexBuildError, ProviderError};
use crate::llm::{Embedder, GenerationParams, LanguageModel};
use crate::models::{DocumentMeta, Domain};

const IT_WORDS: &[&str] = &[
    "password", "computer", "network", "email", "software", "vpn", "laptop", "printer", "license",
];
const FINANCE_WORDS: &[&str] = &[
    "expense", "budget", "payment", "invoice", "reimbursement", "payroll", "finance",
];

type Handler = dyn Fn(&str, &str) -> Result<String, ProviderError> + Send + Sync;

/// Modelo guiado por una función `(preámbulo, prompt) -> respuesta`.
pub struct ScriptedModel {
    handler: Box<Handler>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, &str) -> Result<String, ProviderError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: AtomicUsize::new(0),
        }
    }

    /// Clasifica por palabras clave, refina devolviendo los borradores y
    /// responde como especialista citando el contexto recibido.
    pub fn keyword() -> Self {
        Self::new(|preamble, prompt| Ok(keyword_reply(preamble, prompt)))
    }

    /// Falla en todas las llamadas.
    pub fn failing() -> Self {
        Self::new(|_, _| Err(ProviderError::Request("servicio no disponible".to_string())))
    }

    /// Como `keyword`, pero la evaluación del supervisor falla.
    pub fn failing_evaluation() -> Self {
        Self::new(|preamble, prompt| {
            if preamble == EVALUATION_PREAMBLE {
                Err(ProviderError::Timeout(std::time::Duration::from_secs(1)))
            } else {
                Ok(keyword_reply(preamble, prompt))
            }
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn mentions(text: &str, words: &[&str]) -> bool {
    let lower = text.to_lowercase();
    words.iter().any(|w| lower.contains(w))
}

fn keyword_reply(preamble: &str, prompt: &str) -> String {
    if preamble == ROUTING_PREAMBLE {
        let query = prompt.rsplit("Query:").next().unwrap_or(prompt);
        return match (mentions(query, IT_WORDS), mentions(query, FINANCE_WORDS)) {
            (true, true) => "Both".to_string(),
            (true, false) => "IT".to_string(),
            (false, true) => "Finance".to_string(),
            (false, false) => "Unclear".to_string(),
        };
    }
    if preamble == EVALUATION_PREAMBLE {
        let drafts = prompt.split("Specialist drafts:").nth(1).unwrap_or(prompt);
        return format!("Refined answer.\n{}", drafts.trim());
    }
    format!("Draft answer grounded in:\n{}", prompt)
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(
        &self,
        preamble: &str,
        prompt: &str,
        _params: GenerationParams,
    ) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.handler)(preamble, prompt)
    }
}

/// Embeddings de bolsa de palabras con hashing; cuenta los textos embebidos.
pub struct CountingEmbedder {
    dim: usize,
    embedded: AtomicUsize,
}

impl CountingEmbedder {
    pub fn new() -> Self {
        Self {
            dim: 64,
            embedded: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.embedded.load(Ordering::SeqCst)
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 2)
        {
            let mut hasher = XxHash64::with_seed(7);
            hasher.write(token.to_lowercase().as_bytes());
            vector[(hasher.finish() as usize) % self.dim] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl Embedder for CountingEmbedder {
    fn embedder_id(&self) -> &str {
        "counting-bow-64"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.embedded.fetch_add(1, Ordering::SeqCst);
        Ok(self.vectorize(text))
    }
}

/// Almacén de documentos en memoria. Un dominio sin registrar es inaccesible.
#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    docs: HashMap<Domain, Vec<(DocumentMeta, String)>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra el dominio como accesible aunque no tenga documentos.
    pub fn with_domain(mut self, domain: Domain) -> Self {
        self.docs.entry(domain).or_default();
        self
    }

    pub fn with_document(mut self, domain: Domain, name: &str, text: &str) -> Self {
        let meta = DocumentMeta {
            source_name: name.to_string(),
            modified_at: DateTime::<Utc>::UNIX_EPOCH,
            size_bytes: text.len() as u64,
        };
        self.docs
            .entry(domain)
            .or_default()
            .push((meta, text.to_string()));
        self
    }

    /// Corpus pequeño de soporte con documentos de ambos dominios.
    pub fn support_corpus() -> Self {
        Self::new()
            .with_document(
                Domain::It,
                "password_reset.md",
                "To reset your password open the self service portal and follow the password reset steps.",
            )
            .with_document(
                Domain::It,
                "network.md",
                "If your computer cannot connect to the network restart the router and check the VPN client.",
            )
            .with_document(
                Domain::Finance,
                "expense_policy.md",
                "Submit every expense report through the finance portal within thirty days of purchase.",
            )
            .with_document(
                Domain::Finance,
                "budget.md",
                "Budget approval requires sign off from the department head and the finance team.",
            )
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn list_documents(&self, domain: Domain) -> Result<Vec<DocumentMeta>, IndexBuildError> {
        let docs = self
            .docs
            .get(&domain)
            .ok_or_else(|| IndexBuildError::DocumentsUnreachable {
                domain,
                path: format!("memory://{}", domain.slug()).into(),
            })?;
        let mut metas: Vec<DocumentMeta> = docs.iter().map(|(m, _)| m.clone()).collect();
        metas.sort_by(|a, b| a.source_name.cmp(&b.source_name));
        Ok(metas)
    }

    async fn read_text(&self, domain: Domain, source_name: &str) -> Result<String> {
        self.docs
            .get(&domain)
            .and_then(|docs| docs.iter().find(|(m, _)| m.source_name == source_name))
            .map(|(_, text)| text.clone())
            .ok_or_else(|| anyhow!("documento no encontrado: {source_name}"))
    }
}

/// Atajo para construir `Arc<dyn LanguageModel>`.
pub fn model(m: ScriptedModel) -> Arc<dyn LanguageModel> {
    Arc::new(m)
}
