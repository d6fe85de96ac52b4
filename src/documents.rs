//! Almacén de documentos por dominio: listado con metadatos, extracción de
//! texto (texto plano / Markdown / PDF) y troceado en chunks.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mime_guess::{mime, MimeGuess};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::{AppConfig, ChunkingConfig};
use crate::error::IndexBuildError;
use crate::models::{DocumentMeta, Domain};

/// Fuente de documentos de la que se alimentan los índices.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Enumera los documentos soportados de un dominio, ordenados por nombre.
    async fn list_documents(&self, domain: Domain) -> Result<Vec<DocumentMeta>, IndexBuildError>;

    /// Devuelve el texto extraído de un documento listado previamente.
    async fn read_text(&self, domain: Domain, source_name: &str) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentKind {
    Text,
    Pdf,
}

fn document_kind(path: &Path) -> Option<DocumentKind> {
    let guess: MimeGuess = MimeGuess::from_path(path);
    if let Some(m) = guess.first() {
        if m == mime::APPLICATION_PDF {
            return Some(DocumentKind::Pdf);
        }
        if m.type_() == mime::TEXT {
            return Some(DocumentKind::Text);
        }
    }
    // Algunas extensiones de texto no están en la tabla de MIME.
    let extension = path
        .extension()
        .and_then(std::ffi::OsStr::to_str)
        .unwrap_or("")
        .to_lowercase();
    match extension.as_str() {
        "md" | "markdown" | "txt" | "rst" => Some(DocumentKind::Text),
        _ => None,
    }
}

/// Documentos en disco: un directorio raíz por dominio.
#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    roots: HashMap<Domain, PathBuf>,
}

impl FsDocumentStore {
    pub fn new(roots: HashMap<Domain, PathBuf>) -> Self {
        Self { roots }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        let roots = Domain::ALL
            .iter()
            .map(|d| (*d, cfg.docs_path(*d).clone()))
            .collect();
        Self::new(roots)
    }

    fn root(&self, domain: Domain) -> Result<&PathBuf, IndexBuildError> {
        self.roots
            .get(&domain)
            .ok_or_else(|| IndexBuildError::DocumentsUnreachable {
                domain,
                path: PathBuf::new(),
            })
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn list_documents(&self, domain: Domain) -> Result<Vec<DocumentMeta>, IndexBuildError> {
        let root = self.root(domain)?;
        if !root.is_dir() {
            return Err(IndexBuildError::DocumentsUnreachable {
                domain,
                path: root.clone(),
            });
        }

        let mut docs = Vec::new();
        for entry in WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            if document_kind(path).is_none() {
                debug!("Saltando fichero con tipo no soportado: {}", path.display());
                continue;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            let modified_at: DateTime<Utc> = metadata
                .modified()
                .ok()
                .map(DateTime::<Utc>::from)
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
            let source_name = path
                .strip_prefix(root)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/");

            docs.push(DocumentMeta {
                source_name,
                modified_at,
                size_bytes: metadata.len(),
            });
        }

        docs.sort_by(|a, b| a.source_name.cmp(&b.source_name));
        info!("{} documentos encontrados para {domain} en {}", docs.len(), root.display());
        Ok(docs)
    }

    async fn read_text(&self, domain: Domain, source_name: &str) -> Result<String> {
        let path = self.root(domain)?.join(source_name);
        match document_kind(&path) {
            Some(DocumentKind::Pdf) => {
                let owned = path.clone();
                let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text(&owned))
                    .await?
                    .map_err(|e| anyhow!("No se pudo extraer texto del PDF {}: {e}", path.display()))?;
                Ok(text)
            }
            Some(DocumentKind::Text) => fs::read_to_string(&path)
                .map_err(|e| anyhow!("No se pudo leer {} como UTF-8: {e}", path.display())),
            None => Err(anyhow!("Tipo de fichero no soportado: {}", path.display())),
        }
    }
}

const SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", " "];

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Trocea un texto en chunks de como mucho `chunk_size` caracteres, probando
/// separadores de mayor a menor granularidad y solapando `chunk_overlap`
/// caracteres entre chunks consecutivos. Descarta chunks más cortos que
/// `min_chunk_chars`.
pub fn split_into_chunks(text: &str, cfg: &ChunkingConfig) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    let pieces = split_pieces(text, cfg.chunk_size, &SEPARATORS);
    merge_pieces(pieces, cfg.chunk_size, cfg.chunk_overlap)
        .into_iter()
        .map(|chunk| chunk.trim().to_string())
        .filter(|chunk| char_len(chunk) >= cfg.min_chunk_chars.max(1))
        .collect()
}

fn split_pieces(text: &str, max: usize, separators: &[&str]) -> Vec<String> {
    if char_len(text) <= max {
        return vec![text.to_string()];
    }
    match separators.split_first() {
        None => {
            // Sin separadores: ventanas fijas de caracteres.
            let chars: Vec<char> = text.chars().collect();
            chars.chunks(max).map(|w| w.iter().collect()).collect()
        }
        Some((sep, rest)) if text.contains(sep) => {
            let mut out = Vec::new();
            for part in text.split_inclusive(sep) {
                if char_len(part) <= max {
                    out.push(part.to_string());
                } else {
                    out.extend(split_pieces(part, max, rest));
                }
            }
            out
        }
        Some((_, rest)) => split_pieces(text, max, rest),
    }
}

fn merge_pieces(pieces: Vec<String>, size: usize, overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_len = 0;

    for piece in pieces {
        let piece_len = char_len(&piece);
        if current_len + piece_len > size && !current.is_empty() {
            chunks.push(current.concat());
            while !current.is_empty()
                && (current_len > overlap || current_len + piece_len > size)
            {
                let removed = current.remove(0);
                current_len -= char_len(&removed);
            }
        }
        current_len += piece_len;
        current.push(piece);
    }
    if !current.is_empty() {
        chunks.push(current.concat());
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio_test::assert_err;

    fn chunking(size: usize, overlap: usize, min: usize) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size: size,
            chunk_overlap: overlap,
            min_chunk_chars: min,
        }
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = split_into_chunks("Reset your password from the portal.", &chunking(100, 10, 5));
        assert_eq!(chunks, vec!["Reset your password from the portal.".to_string()]);
    }

    #[test]
    fn paragraphs_are_packed_without_exceeding_size() {
        let text = "alpha alpha alpha\n\nbravo bravo bravo\n\ncharlie charlie charlie";
        let chunks = split_into_chunks(text, &chunking(40, 0, 1));
        assert!(chunks.len() >= 2);
        assert!(chunks.iter().all(|c| c.chars().count() <= 40));
        assert!(chunks[0].starts_with("alpha"));
        assert!(chunks.last().unwrap().ends_with("charlie"));
    }

    #[test]
    fn consecutive_chunks_overlap() {
        let words: Vec<String> = (0..60).map(|i| format!("w{i:02}")).collect();
        let text = words.join(" ");
        let chunks = split_into_chunks(&text, &chunking(60, 20, 1));
        assert!(chunks.len() > 1);
        let last_word_of_first = chunks[0].split_whitespace().last().unwrap();
        assert!(chunks[1].contains(last_word_of_first));
    }

    #[test]
    fn tiny_chunks_are_dropped() {
        let chunks = split_into_chunks("ok", &chunking(100, 0, 50));
        assert!(chunks.is_empty());
    }

    #[test]
    fn long_words_are_hard_split() {
        let text = "x".repeat(250);
        let chunks = split_into_chunks(&text, &chunking(100, 0, 1));
        assert_eq!(chunks.len(), 3);
    }

    #[tokio::test]
    async fn lists_supported_documents_sorted() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("vpn.md"), "# VPN\nConnect with the client.").unwrap();
        fs::write(tmp.path().join("email.txt"), "Email setup guide").unwrap();
        fs::write(tmp.path().join("logo.png"), [0u8, 1, 2]).unwrap();

        let store = FsDocumentStore::new(HashMap::from([(Domain::It, tmp.path().to_path_buf())]));
        let docs = store.list_documents(Domain::It).await.unwrap();
        let names: Vec<_> = docs.iter().map(|d| d.source_name.as_str()).collect();
        assert_eq!(names, vec!["email.txt", "vpn.md"]);

        let text = store.read_text(Domain::It, "vpn.md").await.unwrap();
        assert!(text.contains("Connect with the client"));
    }

    #[tokio::test]
    async fn missing_root_is_unreachable() {
        let store = FsDocumentStore::new(HashMap::from([(
            Domain::Finance,
            PathBuf::from("/definitely/not/here"),
        )]));
        let err = assert_err!(store.list_documents(Domain::Finance).await);
        assert!(matches!(err, IndexBuildError::DocumentsUnreachable { .. }));
    }

    #[tokio::test]
    async fn empty_root_lists_nothing() {
        let tmp = TempDir::new().unwrap();
        let store = FsDocumentStore::new(HashMap::from([(Domain::It, tmp.path().to_path_buf())]));
        assert!(store.list_documents(Domain::It).await.unwrap().is_empty());
    }
}
