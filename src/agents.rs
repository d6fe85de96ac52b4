//! Agentes del sistema: el supervisor (enrutado + evaluación) y los especialistas
//! de dominio (IT y Finanzas), que son dos configuraciones del mismo agente.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::llm::{GenerationParams, LanguageModel};
use crate::models::{Domain, Query, Route, RoutingDecision, SpecialistResponse};
use crate::rag::{build_context, RetrievalEngine};
use crate::tools::{format_web_results, ToolCall, WebSearchTool, RAG_SEARCH, WEB_SEARCH};

pub const ROUTING_PREAMBLE: &str = "\
You are a Supervisor Agent in a multi-agent support system. Your role is to analyze user \
queries and route them to the appropriate specialist agent.

Available specialist agents:
- IT Agent: technical issues, software problems, hardware troubleshooting, network issues, \
security concerns and system administration.
- Finance Agent: financial queries, accounting questions, budget analysis, expense reports, \
financial calculations and payment processing.

Instructions:
1. Analyze the user's query carefully.
2. If the query clearly needs both specialists, answer Both.
3. If the query is unrelated to IT or Finance, answer Unclear.
4. Respond with exactly one word: IT, Finance, Both or Unclear. Do not add any explanation, \
punctuation or other text.";

pub const EVALUATION_PREAMBLE: &str = "\
You are the Supervisor Agent reviewing the drafts written by the specialist agents before \
they reach the user.

Instructions:
1. Merge the drafts into a single answer; when there are several, keep every domain section.
2. Improve clarity, structure and relevance to the original query.
3. Preserve all factual content and every source document reference.
4. Do not invent policies, procedures or links that are not in the drafts.
5. If a draft reports an issue, keep that notice so the user knows what could not be answered.";

const IT_PREAMBLE: &str = "\
You are an IT Support Agent specializing in technical issues, software problems, hardware \
troubleshooting, network issues, security concerns and system administration.

Instructions:
1. Provide clear, actionable solutions based on the retrieved internal documentation.
2. Include step-by-step instructions when appropriate.
3. Reference the specific documents when citing policies or procedures.
4. If the documentation does not cover the question, say so and give general guidance.
5. Always be helpful and professional.";

const FINANCE_PREAMBLE: &str = "\
You are a Finance Support Agent specializing in financial queries, accounting questions, \
budget analysis, expense reports, financial calculations and payment processing.

Instructions:
1. Provide clear, accurate financial guidance based on the retrieved internal documents.
2. Include specific policy references when available.
3. When dealing with financial calculations, show your work.
4. Cite the specific documents you are referencing.
5. If the documents do not cover the question, say so instead of guessing.";

static BOTH_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bboth\b").unwrap());
static FINANCE_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bfinance\b").unwrap());
// Sensible a mayúsculas: el pronombre "it" no cuenta como mención del dominio.
static IT_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bIT\b").unwrap());

/// Interpreta la respuesta libre del clasificador. Reglas por prioridad:
/// `Both` explícito, sólo Finance, sólo IT, ambos mencionados, y en otro caso `Unclear`.
pub fn parse_routing_decision(text: &str) -> Route {
    if BOTH_WORD.is_match(text) {
        return Route::Both;
    }
    let finance = FINANCE_WORD.is_match(text);
    let it = IT_WORD.is_match(text);
    match (it, finance) {
        (false, true) => Route::Finance,
        (true, false) => Route::It,
        (true, true) => Route::Both,
        (false, false) => Route::Unclear,
    }
}

/// Decisión a partir de la respuesta del clasificador. Manda la etiqueta inicial
/// ("Unclear - not an IT or Finance topic" es `Unclear`, no `Both`); sólo si no es
/// una decisión se interpreta el texto completo.
pub fn classify_answer(raw: &str) -> Route {
    let head = raw
        .trim()
        .lines()
        .next()
        .unwrap_or_default()
        .split(['-', '.', ':', ',', ';', '(', '\u{2013}'])
        .next()
        .unwrap_or_default()
        .trim()
        .trim_matches(|c: char| c == '*' || c == '"' || c == '`');
    if head.eq_ignore_ascii_case("unclear") {
        return Route::Unclear;
    }
    match parse_routing_decision(head) {
        Route::Unclear => parse_routing_decision(raw),
        route => route,
    }
}

/// Prompt de clasificación. La consulta va siempre al final.
pub fn routing_prompt(query: &Query) -> String {
    format!(
        "Classify the following support request. Answer with a single word (IT, Finance, Both or Unclear) and nothing else.\n\nQuery: {}",
        query.text
    )
}

/// Une los borradores en secciones por dominio separadas por `---`.
pub fn compose_drafts(responses: &[SpecialistResponse]) -> String {
    responses
        .iter()
        .map(|r| {
            let heading = if r.success {
                format!("## {} Support Response:", r.domain)
            } else {
                format!("## {} Support Issue:", r.domain)
            };
            let mut section = format!("{heading}\n{}", r.text.trim());
            if !r.sources.is_empty() {
                section.push_str(&format!("\nSources: {}", r.sources.join(", ")));
            }
            section
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

/// Mejor borrador individual: el primero con éxito o, si no hay, el primero.
fn best_draft(responses: &[SpecialistResponse]) -> Option<&SpecialistResponse> {
    responses
        .iter()
        .find(|r| r.success)
        .or_else(|| responses.first())
}

/// Autoridad de enrutado y evaluación que está por encima de los especialistas.
pub struct Supervisor {
    model: Arc<dyn LanguageModel>,
    params: GenerationParams,
}

impl Supervisor {
    pub fn new(model: Arc<dyn LanguageModel>, params: GenerationParams) -> Self {
        Self { model, params }
    }

    /// Clasifica la consulta. Un fallo del proveedor nunca se propaga:
    /// la decisión pasa a `Unclear` y el error queda registrado.
    pub async fn route(&self, query: &Query) -> RoutingDecision {
        info!("Supervisor enrutando la consulta: {}", query.text);
        match self
            .model
            .generate(ROUTING_PREAMBLE, &routing_prompt(query), self.params)
            .await
        {
            Ok(raw) => {
                let route = classify_answer(&raw);
                info!("Consulta enrutada a: {route}");
                debug!("Respuesta del clasificador: {}", raw.trim());
                RoutingDecision {
                    route,
                    raw,
                    error: None,
                }
            }
            Err(e) => {
                error!("Fallo del proveedor durante el enrutado: {e}");
                RoutingDecision {
                    route: Route::Unclear,
                    raw: String::new(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Refina los borradores. Si el proveedor falla se devuelve el mejor
    /// borrador tal cual con `success = false`.
    pub async fn evaluate(&self, query: &Query, responses: &[SpecialistResponse]) -> (String, bool) {
        let Some(fallback) = best_draft(responses) else {
            warn!("Evaluación sin borradores de especialistas");
            return (
                "No specialist response was produced for this query.".to_string(),
                false,
            );
        };

        let prompt = format!(
            "Original query: {}\n\nSpecialist drafts:\n{}",
            query.text,
            compose_drafts(responses)
        );

        match self
            .model
            .generate(EVALUATION_PREAMBLE, &prompt, self.params)
            .await
        {
            Ok(text) => {
                info!("Supervisor evaluó {} borrador(es)", responses.len());
                (text.trim().to_string(), true)
            }
            Err(e) => {
                warn!("Evaluación fallida ({e}); se devuelve el borrador de {}", fallback.agent_name);
                (fallback.text.clone(), false)
            }
        }
    }
}

/// Capacidad común a los especialistas de dominio.
#[async_trait]
pub trait Specialist: Send + Sync {
    fn domain(&self) -> Domain;

    fn name(&self) -> &str;

    /// Nunca falla: los errores se devuelven como respuesta con `success = false`.
    async fn handle(&self, query: &Query) -> SpecialistResponse;
}

/// Ajustes de recuperación y generación de un especialista.
#[derive(Debug, Clone, Copy)]
pub struct SpecialistSettings {
    pub top_k: usize,
    pub max_context_chars: usize,
    pub params: GenerationParams,
}

/// Especialista RAG de un dominio. IT y Finanzas sólo difieren en la configuración.
pub struct SpecialistAgent {
    domain: Domain,
    preamble: &'static str,
    model: Arc<dyn LanguageModel>,
    retrieval: Arc<RetrievalEngine>,
    web: WebSearchTool,
    settings: SpecialistSettings,
}

impl SpecialistAgent {
    pub fn new(
        domain: Domain,
        model: Arc<dyn LanguageModel>,
        retrieval: Arc<RetrievalEngine>,
        web: WebSearchTool,
        settings: SpecialistSettings,
    ) -> Self {
        let preamble = match domain {
            Domain::It => IT_PREAMBLE,
            Domain::Finance => FINANCE_PREAMBLE,
        };
        Self {
            domain,
            preamble,
            model,
            retrieval,
            web,
            settings,
        }
    }

    fn response(
        &self,
        text: String,
        sources: Vec<String>,
        tool_calls: Vec<ToolCall>,
        success: bool,
    ) -> SpecialistResponse {
        SpecialistResponse {
            domain: self.domain,
            agent_name: self.name().to_string(),
            text,
            sources,
            tool_calls_used: tool_calls.len(),
            tool_calls,
            success,
        }
    }

    fn task_prompt(&self, query: &Query, context: &str) -> String {
        let closing = match self.domain {
            Domain::It => "Please provide a comprehensive IT support response based on the retrieved documents. \
If you reference specific procedures or policies, mention the source document name.",
            Domain::Finance => "Please provide a comprehensive finance support response based on the retrieved documents. \
If you reference specific policies or procedures, mention the source document name. \
Be specific about requirements, deadlines and approval processes.",
        };
        format!(
            "User Query: {}\n\nRelevant Context from Internal Documents:\n{}\n{}",
            query.text, context, closing
        )
    }
}

#[async_trait]
impl Specialist for SpecialistAgent {
    fn domain(&self) -> Domain {
        self.domain
    }

    fn name(&self) -> &str {
        self.domain.agent_name()
    }

    async fn handle(&self, query: &Query) -> SpecialistResponse {
        info!("{} procesando la consulta: {}", self.name(), query.text);
        let mut tool_calls = Vec::new();
        let mut context = String::new();

        let retrieved = match self
            .retrieval
            .search(self.domain, &query.text, self.settings.top_k)
            .await
        {
            Ok(result) => build_context(&result, self.settings.max_context_chars),
            Err(e) => {
                error!("Búsqueda RAG fallida en {}: {e}", self.domain);
                tool_calls.push(ToolCall::failed(RAG_SEARCH, format!("RAG search failed: {e}")));
                return self.response(
                    format!(
                        "I couldn't search the internal {} documentation for this query ({e}). \
Please try again later or contact the {} team directly.",
                        self.domain, self.domain
                    ),
                    Vec::new(),
                    tool_calls,
                    false,
                );
            }
        };

        tool_calls.push(ToolCall::ok(
            RAG_SEARCH,
            format!(
                "Found {} relevant sections from {} documents",
                retrieved.passages,
                retrieved.sources.len()
            ),
            retrieved.sources.clone(),
        ));
        if retrieved.text.is_empty() {
            debug!("Sin contexto documental para {}", self.domain);
            context.push_str("No internal documents matched this query.\n\n");
        } else {
            context.push_str(&format!(
                "Internal {} Documentation:\n{}\n\n",
                self.domain, retrieved.text
            ));
        }

        if self.web.is_enabled() {
            match self.web.search(self.domain, &query.text) {
                Ok(results) => {
                    context.push_str(&format!(
                        "External Resources:\n{}\n\n",
                        format_web_results(&results)
                    ));
                    tool_calls.push(ToolCall::ok(
                        WEB_SEARCH,
                        format!("Found {} relevant web results", results.len()),
                        Vec::new(),
                    ));
                }
                Err(e) => {
                    warn!("Búsqueda web fallida: {e}");
                    tool_calls.push(ToolCall::failed(WEB_SEARCH, format!("Web search failed: {e}")));
                }
            }
        }

        let prompt = self.task_prompt(query, &context);
        match self
            .model
            .generate(self.preamble, &prompt, self.settings.params)
            .await
        {
            Ok(text) => {
                info!("{} completó la consulta ({} herramientas)", self.name(), tool_calls.len());
                self.response(text.trim().to_string(), retrieved.sources, tool_calls, true)
            }
            Err(e) => {
                error!("Fallo del LLM en {}: {e}", self.name());
                self.response(
                    format!(
                        "I'm experiencing technical difficulties with processing your {} query ({e}). \
Please try again later.",
                        self.domain
                    ),
                    retrieved.sources,
                    tool_calls,
                    false,
                )
            }
        }
    }
}
