//! Herramientas que usan los especialistas y el registro de cada invocación.

use anyhow::Result;
use serde::Serialize;
use tracing::info;
use url::Url;

use crate::config::AppConfig;
use crate::models::Domain;

pub const RAG_SEARCH: &str = "rag_search";
pub const WEB_SEARCH: &str = "web_search";

/// Registro de una invocación de herramienta dentro de un especialista.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCall {
    pub tool: String,
    pub success: bool,
    pub summary: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
}

impl ToolCall {
    pub fn ok(tool: &str, summary: impl Into<String>, sources: Vec<String>) -> Self {
        Self {
            tool: tool.to_string(),
            success: true,
            summary: summary.into(),
            sources,
        }
    }

    pub fn failed(tool: &str, summary: impl Into<String>) -> Self {
        Self {
            tool: tool.to_string(),
            success: false,
            summary: summary.into(),
            sources: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Búsqueda web opcional: genera enlaces de referencia al buscador configurado
/// para ampliar la respuesta con recursos externos.
#[derive(Debug, Clone)]
pub struct WebSearchTool {
    enabled: bool,
    max_results: usize,
    base_url: String,
}

impl WebSearchTool {
    pub fn new(enabled: bool, max_results: usize, base_url: impl Into<String>) -> Self {
        Self {
            enabled,
            max_results,
            base_url: base_url.into(),
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(
            cfg.web_search_enabled,
            cfg.web_search_max_results,
            cfg.web_search_base_url.clone(),
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn search(&self, domain: Domain, query: &str) -> Result<Vec<WebResult>> {
        let query = query.trim();
        if query.is_empty() {
            anyhow::bail!("La consulta de búsqueda no puede estar vacía");
        }

        let angles: [(&str, &str); 3] = match domain {
            Domain::It => [
                ("Documentation", "documentation"),
                ("Troubleshooting guide", "troubleshooting"),
                ("Best practices", "best practices"),
            ],
            Domain::Finance => [
                ("Policy guidance", "policy"),
                ("Process overview", "process"),
                ("Best practices", "best practices"),
            ],
        };

        let mut results = Vec::new();
        for (title, suffix) in angles.iter().take(self.max_results) {
            let q = format!("{query} {suffix}");
            let url = Url::parse_with_params(&self.base_url, &[("q", q.as_str())])?;
            results.push(WebResult {
                title: format!("{title}: {query}"),
                url: url.to_string(),
                snippet: format!("External {domain} resources about '{query}' ({suffix})."),
            });
        }

        info!("Búsqueda web para '{query}': {} resultados", results.len());
        Ok(results)
    }
}

/// Formatea resultados web para el contexto del LLM.
pub fn format_web_results(results: &[WebResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| format!("{}. {}\n   {}\n   URL: {}\n", i + 1, r.title, r.snippet, r.url))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn web_search_builds_encoded_links_up_to_limit() {
        let tool = WebSearchTool::new(true, 2, "https://duckduckgo.com/");
        let results = tool.search(Domain::It, "reset password & MFA").unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].url.starts_with("https://duckduckgo.com/?q="));
        assert!(!results[0].url.contains(' '));
        assert!(results[0].url.contains("%26"));
    }

    #[test]
    fn web_search_rejects_empty_query() {
        let tool = WebSearchTool::new(true, 3, "https://duckduckgo.com/");
        assert!(tool.search(Domain::Finance, "   ").is_err());
    }

    #[test]
    fn formatted_results_are_numbered() {
        let results = vec![WebResult {
            title: "Policy guidance: travel".into(),
            url: "https://duckduckgo.com/?q=travel".into(),
            snippet: "External Finance resources".into(),
        }];
        let text = format_web_results(&results);
        assert!(text.starts_with("1. Policy guidance: travel"));
        assert!(text.contains("URL: https://duckduckgo.com/?q=travel"));
    }
}
