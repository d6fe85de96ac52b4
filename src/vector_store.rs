//! Índice vectorial en memoria por dominio, con caché persistente en disco.
//!
//! API pública:
//!   - `IndexRegistry::get(domain)`: índice listo para buscar (carga o construye la primera vez).
//!   - `IndexRegistry::load_or_build(domain)`: usa la caché si la huella coincide.
//!   - `IndexRegistry::rebuild(domain)`: reconstrucción forzada (`init-vector-store`).
//!   - `VectorIndex::search(&[f32], k, min_score)`.
//!
//! Un índice nunca se modifica: reconstruir crea uno nuevo y lo sustituye en el
//! registro de golpe, así las búsquedas en curso siguen usando el anterior.

use std::collections::HashMap;
use std::fs;
use std::hash::Hasher;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};
use twox_hash::XxHash64;

use crate::config::ChunkingConfig;
use crate::documents::{split_into_chunks, DocumentStore};
use crate::error::{IndexBuildError, ProviderError, RetrievalError};
use crate::llm::Embedder;
use crate::models::{DocumentChunk, DocumentMeta, Domain, ScoredChunk};

/// Normaliza un vector a norma L2 unitaria (los vectores nulos se dejan igual).
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Huella de un conjunto de documentos: modelo de embeddings + nombres +
/// metadatos de modificación. Independiente del orden del listado.
pub fn compute_fingerprint(embedder_id: &str, docs: &[DocumentMeta]) -> String {
    let mut sorted: Vec<&DocumentMeta> = docs.iter().collect();
    sorted.sort_by(|a, b| a.source_name.cmp(&b.source_name));

    let mut hasher = XxHash64::with_seed(0);
    hasher.write(embedder_id.as_bytes());
    for doc in sorted {
        hasher.write_u8(0);
        hasher.write(doc.source_name.as_bytes());
        hasher.write_u8(0);
        hasher.write(doc.modified_at.to_rfc3339().as_bytes());
        hasher.write_u64(doc.size_bytes);
    }
    format!("{:016x}", hasher.finish())
}

/// Índice inmutable de un dominio. Los embeddings se guardan normalizados, así
/// que el producto escalar equivale a la similitud coseno.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    pub domain: Domain,
    pub fingerprint: String,
    chunks: Vec<DocumentChunk>,
    dimension: Option<usize>,
}

impl VectorIndex {
    pub fn new(domain: Domain, fingerprint: String, mut chunks: Vec<DocumentChunk>) -> Self {
        for chunk in &mut chunks {
            normalize(&mut chunk.embedding);
        }
        let dimension = chunks.first().map(|c| c.embedding.len());
        Self {
            domain,
            fingerprint,
            chunks,
            dimension,
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Devuelve los `top_k` chunks con puntuación mayor que `min_score`, de
    /// mayor a menor. Los empates conservan el orden de inserción.
    pub fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredChunk>, RetrievalError> {
        let Some(expected) = self.dimension else {
            return Ok(Vec::new());
        };
        if query_vector.len() != expected {
            return Err(RetrievalError::DimensionMismatch {
                expected,
                actual: query_vector.len(),
            });
        }

        let mut query = query_vector.to_vec();
        normalize(&mut query);

        let mut scored: Vec<(usize, f32)> = self
            .chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| (i, dot(&query, &chunk.embedding)))
            .filter(|(_, score)| *score > min_score)
            .collect();
        // sort_by es estable: a igual puntuación gana el chunk insertado antes.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| ScoredChunk {
                chunk: self.chunks[i].clone(),
                score,
            })
            .collect())
    }
}

/// Chunk tal y como se persiste en la caché.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedChunk {
    pub id: String,
    pub source_name: String,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// Entrada persistida de la caché: una por dominio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub domain: Domain,
    pub fingerprint: String,
    pub chunks: Vec<CachedChunk>,
}

impl CacheEntry {
    fn from_index(index: &VectorIndex) -> Self {
        Self {
            domain: index.domain,
            fingerprint: index.fingerprint.clone(),
            chunks: index
                .chunks
                .iter()
                .map(|c| CachedChunk {
                    id: c.id.clone(),
                    source_name: c.source_name.clone(),
                    text: c.text.clone(),
                    embedding: c.embedding.clone(),
                })
                .collect(),
        }
    }

    fn into_index(self) -> VectorIndex {
        let domain = self.domain;
        let chunks = self
            .chunks
            .into_iter()
            .map(|c| DocumentChunk {
                id: c.id,
                domain,
                source_name: c.source_name,
                text: c.text,
                embedding: c.embedding,
            })
            .collect();
        VectorIndex::new(domain, self.fingerprint, chunks)
    }
}

/// Caché en disco: un fichero JSON por dominio.
#[derive(Debug, Clone)]
pub struct IndexCache {
    dir: PathBuf,
}

impl IndexCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, domain: Domain) -> PathBuf {
        self.dir.join(format!("{}_index.json", domain.slug()))
    }

    /// Lee la entrada de un dominio. Un fichero ausente o corrupto cuenta como fallo de caché.
    pub fn load(&self, domain: Domain) -> Option<CacheEntry> {
        let path = self.path_for(domain);
        let raw = fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) if entry.domain == domain => Some(entry),
            Ok(_) => {
                warn!("La caché {} pertenece a otro dominio; se ignora", path.display());
                None
            }
            Err(e) => {
                warn!("Caché {} ilegible ({e}); se reconstruirá", path.display());
                None
            }
        }
    }

    /// Escribe la entrada en un fichero temporal y lo renombra.
    pub fn store(&self, entry: &CacheEntry) -> Result<(), IndexBuildError> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            IndexBuildError::Cache(format!("no se pudo crear {}: {e}", self.dir.display()))
        })?;
        let path = self.path_for(entry.domain);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec(entry).map_err(|e| IndexBuildError::Cache(e.to_string()))?;
        fs::write(&tmp, json)
            .and_then(|_| fs::rename(&tmp, &path))
            .map_err(|e| IndexBuildError::Cache(format!("no se pudo escribir {}: {e}", path.display())))
    }
}

/// Resumen de una carga o construcción de índice.
#[derive(Debug, Clone, Serialize)]
pub struct IndexReport {
    pub domain: Domain,
    pub documents: usize,
    pub chunks: usize,
    pub fingerprint: String,
    pub from_cache: bool,
}

impl IndexReport {
    pub fn no_documents(&self) -> bool {
        self.documents == 0
    }
}

impl std::fmt::Display for IndexReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let origin = if self.from_cache { "caché" } else { "construido" };
        write!(
            f,
            "{}: {} documentos, {} chunks ({origin}, huella {})",
            self.domain, self.documents, self.chunks, self.fingerprint
        )
    }
}

/// Registro de índices por dominio, compartido por todo el proceso.
pub struct IndexRegistry {
    store: Arc<dyn DocumentStore>,
    embedder: Arc<dyn Embedder>,
    cache: IndexCache,
    chunking: ChunkingConfig,
    batch_size: usize,
    indexes: RwLock<HashMap<Domain, Arc<VectorIndex>>>,
    build_lock: Mutex<()>,
}

impl IndexRegistry {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        embedder: Arc<dyn Embedder>,
        cache: IndexCache,
        chunking: ChunkingConfig,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            cache,
            chunking,
            batch_size: batch_size.max(1),
            indexes: RwLock::new(HashMap::new()),
            build_lock: Mutex::new(()),
        }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Índice activo de un dominio, si ya se ha cargado.
    pub fn current(&self, domain: Domain) -> Option<Arc<VectorIndex>> {
        self.indexes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&domain)
            .cloned()
    }

    /// Índice listo para buscar; la primera vez lo carga de caché o lo construye.
    pub async fn get(&self, domain: Domain) -> Result<Arc<VectorIndex>, IndexBuildError> {
        if let Some(index) = self.current(domain) {
            return Ok(index);
        }
        {
            let _guard = self.build_lock.lock().await;
            // Otro llamante pudo terminar la carga mientras esperábamos el cerrojo.
            if self.current(domain).is_none() {
                self.load_or_build_locked(domain).await?;
            }
        }
        self.current(domain)
            .ok_or_else(|| IndexBuildError::Cache(format!("índice de {domain} no disponible")))
    }

    /// Usa la caché si su huella coincide con el listado actual; si no, reconstruye.
    pub async fn load_or_build(&self, domain: Domain) -> Result<IndexReport, IndexBuildError> {
        let _guard = self.build_lock.lock().await;
        self.load_or_build_locked(domain).await
    }

    /// Requiere `build_lock` tomado.
    async fn load_or_build_locked(&self, domain: Domain) -> Result<IndexReport, IndexBuildError> {
        let docs = self.store.list_documents(domain).await?;
        let fingerprint = compute_fingerprint(self.embedder.embedder_id(), &docs);

        if let Some(entry) = self.cache.load(domain) {
            if entry.fingerprint == fingerprint {
                let index = entry.into_index();
                info!("Índice de {domain} cargado de caché ({} chunks)", index.len());
                let report = IndexReport {
                    domain,
                    documents: docs.len(),
                    chunks: index.len(),
                    fingerprint,
                    from_cache: true,
                };
                self.swap(index);
                return Ok(report);
            }
            info!("Huella de {domain} cambiada; se reconstruye el índice");
        }

        self.build_and_swap(domain, docs, fingerprint).await
    }

    /// Reconstrucción forzada, ignorando la caché existente.
    pub async fn rebuild(&self, domain: Domain) -> Result<IndexReport, IndexBuildError> {
        let _guard = self.build_lock.lock().await;
        let docs = self.store.list_documents(domain).await?;
        let fingerprint = compute_fingerprint(self.embedder.embedder_id(), &docs);
        self.build_and_swap(domain, docs, fingerprint).await
    }

    /// Número de chunks del índice activo de cada dominio (`None` si no está cargado).
    pub fn status(&self) -> Vec<(Domain, Option<usize>)> {
        Domain::ALL
            .iter()
            .map(|d| (*d, self.current(*d).map(|i| i.len())))
            .collect()
    }

    fn swap(&self, index: VectorIndex) {
        let domain = index.domain;
        self.indexes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(domain, Arc::new(index));
    }

    async fn build_and_swap(
        &self,
        domain: Domain,
        docs: Vec<DocumentMeta>,
        fingerprint: String,
    ) -> Result<IndexReport, IndexBuildError> {
        if docs.is_empty() {
            warn!("No se encontraron documentos para {domain}; el índice quedará vacío");
        }
        let index = self.build(domain, &docs, fingerprint.clone()).await?;

        if let Err(e) = self.cache.store(&CacheEntry::from_index(&index)) {
            // El índice en memoria sigue siendo válido aunque no se pueda persistir.
            warn!("No se pudo guardar la caché de {domain}: {e}");
        }

        let report = IndexReport {
            domain,
            documents: docs.len(),
            chunks: index.len(),
            fingerprint,
            from_cache: false,
        };
        info!("Índice de {domain} construido con {} chunks", report.chunks);
        self.swap(index);
        Ok(report)
    }

    async fn build(
        &self,
        domain: Domain,
        docs: &[DocumentMeta],
        fingerprint: String,
    ) -> Result<VectorIndex, IndexBuildError> {
        let mut pending: Vec<(String, String, String)> = Vec::new();
        for doc in docs {
            let text = match self.store.read_text(domain, &doc.source_name).await {
                Ok(text) => text,
                Err(e) => {
                    warn!("Saltando {}: {e}", doc.source_name);
                    continue;
                }
            };
            let pieces = split_into_chunks(&text, &self.chunking);
            if pieces.is_empty() {
                warn!("Fichero vacío o sin texto útil: {}", doc.source_name);
                continue;
            }
            info!("Procesado {}: {} chunks", doc.source_name, pieces.len());
            for (i, piece) in pieces.into_iter().enumerate() {
                pending.push((format!("{}#{i}", doc.source_name), doc.source_name.clone(), piece));
            }
        }

        let mut chunks = Vec::with_capacity(pending.len());
        let mut dimension: Option<usize> = None;
        for batch in pending.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|(_, _, text)| text.clone()).collect();
            let vectors = self.embedder.embed_batch(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(ProviderError::Request(format!(
                    "Número de embeddings ({}) distinto al número de chunks ({})",
                    vectors.len(),
                    batch.len()
                ))
                .into());
            }
            for ((id, source_name, text), embedding) in batch.iter().zip(vectors) {
                let expected = *dimension.get_or_insert(embedding.len());
                if embedding.len() != expected {
                    return Err(ProviderError::Request(format!(
                        "dimensión de embedding inconsistente: {} vs {expected}",
                        embedding.len()
                    ))
                    .into());
                }
                chunks.push(DocumentChunk {
                    id: id.clone(),
                    domain,
                    source_name: source_name.clone(),
                    text: text.clone(),
                    embedding,
                });
            }
        }

        Ok(VectorIndex::new(domain, fingerprint, chunks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CountingEmbedder, MemoryDocumentStore};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    fn meta(name: &str, secs: i64) -> DocumentMeta {
        DocumentMeta {
            source_name: name.to_string(),
            modified_at: Utc.timestamp_opt(secs, 0).unwrap(),
            size_bytes: 10,
        }
    }

    fn chunk(id: &str, embedding: Vec<f32>) -> DocumentChunk {
        DocumentChunk {
            id: id.to_string(),
            domain: Domain::It,
            source_name: format!("{id}.md"),
            text: id.to_string(),
            embedding,
        }
    }

    fn registry(
        store: MemoryDocumentStore,
        embedder: Arc<CountingEmbedder>,
        dir: &TempDir,
    ) -> IndexRegistry {
        IndexRegistry::new(
            Arc::new(store),
            embedder,
            IndexCache::new(dir.path()),
            ChunkingConfig {
                chunk_size: 200,
                chunk_overlap: 0,
                min_chunk_chars: 5,
            },
            4,
        )
    }

    #[test]
    fn fingerprint_ignores_listing_order_but_tracks_changes() {
        let a = vec![meta("a.md", 1), meta("b.md", 2)];
        let b = vec![meta("b.md", 2), meta("a.md", 1)];
        assert_eq!(compute_fingerprint("m", &a), compute_fingerprint("m", &b));

        let touched = vec![meta("a.md", 1), meta("b.md", 3)];
        assert_ne!(compute_fingerprint("m", &a), compute_fingerprint("m", &touched));
        assert_ne!(compute_fingerprint("m", &a), compute_fingerprint("other-model", &a));
    }

    #[test]
    fn search_ranks_by_cosine_with_stable_ties() {
        let index = VectorIndex::new(
            Domain::It,
            "fp".into(),
            vec![
                chunk("first", vec![1.0, 0.0]),
                chunk("orthogonal", vec![0.0, 1.0]),
                chunk("second", vec![2.0, 0.0]),
                chunk("diagonal", vec![1.0, 1.0]),
            ],
        );
        let hits = index.search(&[3.0, 0.0], 10, 0.0).unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.chunk.id.as_str()).collect();
        // "orthogonal" puntúa 0 y no supera el umbral.
        assert_eq!(ids, vec!["first", "second", "diagonal"]);
        assert!((hits[0].score - 1.0).abs() < 1e-6);

        let top1 = index.search(&[3.0, 0.0], 1, 0.0).unwrap();
        assert_eq!(top1[0].chunk.id, "first");
    }

    #[test]
    fn empty_index_search_is_empty_not_error() {
        let index = VectorIndex::new(Domain::Finance, "fp".into(), Vec::new());
        let hits = assert_ok!(index.search(&[1.0, 2.0, 3.0], 5, 0.0));
        assert!(hits.is_empty());
    }

    #[test]
    fn dimension_mismatch_is_an_error() {
        let index = VectorIndex::new(Domain::It, "fp".into(), vec![chunk("a", vec![1.0, 0.0])]);
        let err = assert_err!(index.search(&[1.0, 0.0, 0.0], 5, 0.0));
        assert!(matches!(err, RetrievalError::DimensionMismatch { expected: 2, actual: 3 }));
    }

    #[tokio::test]
    async fn second_load_hits_cache_without_reembedding() {
        let dir = TempDir::new().unwrap();
        let store = MemoryDocumentStore::new()
            .with_document(Domain::It, "password.md", "To reset your password open the self service portal.")
            .with_document(Domain::It, "vpn.md", "Install the VPN client and sign in with your account.");

        let embedder = Arc::new(CountingEmbedder::new());
        let first = registry(store.clone(), embedder.clone(), &dir);
        let report = first.load_or_build(Domain::It).await.unwrap();
        assert!(!report.from_cache);
        assert_eq!(report.chunks, 2);
        let embedded_after_build = embedder.calls();
        assert_eq!(embedded_after_build, 2);

        let second = registry(store, embedder.clone(), &dir);
        let cached = second.load_or_build(Domain::It).await.unwrap();
        assert!(cached.from_cache);
        assert_eq!(cached.fingerprint, report.fingerprint);
        assert_eq!(embedder.calls(), embedded_after_build);
        assert_eq!(second.current(Domain::It).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn changed_listing_invalidates_cache() {
        let dir = TempDir::new().unwrap();
        let embedder = Arc::new(CountingEmbedder::new());
        let store = MemoryDocumentStore::new()
            .with_document(Domain::Finance, "expenses.md", "Submit expense reports within thirty days.");
        registry(store.clone(), embedder.clone(), &dir)
            .load_or_build(Domain::Finance)
            .await
            .unwrap();

        let updated = store.with_document(
            Domain::Finance,
            "travel.md",
            "Travel must be approved by your manager before booking.",
        );
        let report = registry(updated, embedder.clone(), &dir)
            .load_or_build(Domain::Finance)
            .await
            .unwrap();
        assert!(!report.from_cache);
        assert_eq!(report.documents, 2);
    }

    #[tokio::test]
    async fn zero_documents_builds_valid_empty_index() {
        let dir = TempDir::new().unwrap();
        let embedder = Arc::new(CountingEmbedder::new());
        let reg = registry(MemoryDocumentStore::new().with_domain(Domain::It), embedder.clone(), &dir);

        let report = reg.rebuild(Domain::It).await.unwrap();
        assert!(report.no_documents());
        assert_eq!(report.chunks, 0);
        assert_eq!(embedder.calls(), 0);
        assert!(reg.get(Domain::It).await.unwrap().is_empty());
        assert!(IndexCache::new(dir.path()).load(Domain::It).is_some());
    }

    #[tokio::test]
    async fn unreachable_store_fails_rebuild() {
        let dir = TempDir::new().unwrap();
        let reg = registry(MemoryDocumentStore::new(), Arc::new(CountingEmbedder::new()), &dir);
        let err = assert_err!(reg.rebuild(Domain::Finance).await);
        assert!(matches!(err, IndexBuildError::DocumentsUnreachable { .. }));
    }

    #[tokio::test]
    async fn rebuild_swaps_without_touching_held_index() {
        let dir = TempDir::new().unwrap();
        let embedder = Arc::new(CountingEmbedder::new());
        let store = MemoryDocumentStore::new()
            .with_document(Domain::It, "email.md", "Configure email on your phone with the company profile.");
        let reg = registry(store, embedder, &dir);

        let before = reg.get(Domain::It).await.unwrap();
        reg.rebuild(Domain::It).await.unwrap();
        let after = reg.get(Domain::It).await.unwrap();

        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(before.len(), 1);
        assert_eq!(after.len(), 1);
    }

    /// Cede el turno antes de cada embedding para que las cargas concurrentes se intercalen.
    struct YieldingEmbedder(Arc<CountingEmbedder>);

    #[async_trait::async_trait]
    impl Embedder for YieldingEmbedder {
        fn embedder_id(&self) -> &str {
            self.0.embedder_id()
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
            tokio::task::yield_now().await;
            self.0.embed(text).await
        }
    }

    #[tokio::test]
    async fn concurrent_first_use_builds_once_even_without_cache() {
        let dir = TempDir::new().unwrap();
        // Un fichero en lugar del directorio de caché: toda escritura falla.
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();

        let counter = Arc::new(CountingEmbedder::new());
        let store = MemoryDocumentStore::new()
            .with_document(Domain::It, "password.md", "To reset your password open the self service portal.")
            .with_document(Domain::It, "vpn.md", "Install the VPN client and sign in with your account.");
        let reg = IndexRegistry::new(
            Arc::new(store),
            Arc::new(YieldingEmbedder(counter.clone())),
            IndexCache::new(&blocker),
            ChunkingConfig {
                chunk_size: 200,
                chunk_overlap: 0,
                min_chunk_chars: 5,
            },
            1,
        );

        let (a, b, c) = tokio::join!(reg.get(Domain::It), reg.get(Domain::It), reg.get(Domain::It));
        let (a, b, c) = (assert_ok!(a), assert_ok!(b), assert_ok!(c));
        assert!(Arc::ptr_eq(&a, &b) && Arc::ptr_eq(&b, &c));
        assert_eq!(counter.calls(), 2);
    }

    #[test]
    fn corrupt_cache_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let cache = IndexCache::new(dir.path());
        fs::write(cache.path_for(Domain::It), "{not json").unwrap();
        assert!(cache.load(Domain::It).is_none());
    }
}
