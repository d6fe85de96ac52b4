//! Validación y saneado de la consulta antes de que llegue al orquestador.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::error::ValidationError;

static CONTROL_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F\x7F]").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

static SUSPICIOUS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?is)<script[^>]*>.*?</script>",
        r"(?i)javascript:",
        r"(?i)data:text/html",
        r"(?i)vbscript:",
        r"(?i)on(load|error|click)\s*=",
        r"(?i)\b(eval|exec|system)\s*\(",
        r"(?i)import\s+(os|subprocess)\b",
        r"__import__",
        r"\.\./",
        r"\.\.\\",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

#[derive(Debug, Clone)]
pub struct InputValidator {
    min_length: usize,
    max_length: usize,
}

impl InputValidator {
    pub fn new(min_length: usize, max_length: usize) -> Self {
        Self {
            min_length,
            max_length,
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(cfg.query_min_length, cfg.query_max_length)
    }

    /// Devuelve la consulta saneada o el motivo del rechazo.
    pub fn validate(&self, raw: &str) -> Result<String, ValidationError> {
        if raw.trim().is_empty() {
            return Err(ValidationError("Query cannot be empty".to_string()));
        }

        let stripped = CONTROL_CHARS.replace_all(raw, "");
        let sanitized = WHITESPACE.replace_all(&stripped, " ").trim().to_string();
        if sanitized.is_empty() {
            return Err(ValidationError(
                "Query contains only invalid characters".to_string(),
            ));
        }

        let len = sanitized.chars().count();
        if len < self.min_length {
            return Err(ValidationError(format!(
                "Query must be at least {} characters long",
                self.min_length
            )));
        }
        if len > self.max_length {
            return Err(ValidationError(format!(
                "Query cannot exceed {} characters",
                self.max_length
            )));
        }

        if let Some(pattern) = SUSPICIOUS.iter().find(|re| re.is_match(&sanitized)) {
            warn!("Patrón sospechoso detectado: {}", pattern.as_str());
            return Err(ValidationError(
                "Query contains potentially harmful content".to_string(),
            ));
        }

        debug!("Consulta validada ({len} caracteres)");
        Ok(sanitized)
    }
}
