//! A small retrieval store: text files are split into overlapping chunks,
//! embedded through the provider and kept in SQLite. Searches rank every
//! chunk by cosine similarity to the embedded query.
use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::providers::base::Provider;

pub const CHUNK_SIZE: usize = 500;
pub const CHUNK_OVERLAP: usize = 50;
pub const DEFAULT_TOP_K: usize = 3;

/// Chunks sent to the embeddings endpoint per request
const EMBED_BATCH: usize = 64;

/// A chunk returned by a search, most similar first
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Passage {
    pub source: String,
    /// Position of the chunk within its source
    pub chunk: usize,
    pub content: String,
    pub score: f32,
}

/// Number of chunks stored per source
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceSummary {
    pub source: String,
    pub chunks: usize,
}

/// Split `text` into chunks of at most `size` characters, each sharing up to
/// `overlap` characters with the one before. Breaks fall on whitespace when
/// there is some in the second half of the window.
pub fn split_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let size = size.max(1);
    let overlap = overlap.min(size - 1);

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let mut end = (start + size).min(chars.len());
        if end < chars.len() {
            if let Some(pos) = (start + size / 2..end)
                .rev()
                .find(|&i| chars[i].is_whitespace())
            {
                end = pos + 1;
            }
        }

        let chunk: String = chars[start..end].iter().collect();
        let chunk = chunk.trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }
        if end == chars.len() {
            break;
        }

        // Start the overlap on a word boundary when there is one
        let mut next = end.saturating_sub(overlap);
        if let Some(pos) = (next..end).find(|&i| chars[i].is_whitespace()) {
            next = pos + 1;
        }
        start = if next > start { next } else { end };
    }
    chunks
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn from_blob(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Render retrieved passages for a system prompt
pub fn render_context(passages: &[Passage]) -> String {
    if passages.is_empty() {
        return "No related information was found in the knowledge base. \
Answer from your own knowledge and say so."
            .to_string();
    }
    let mut context = String::from("Related information from the knowledge base:\n");
    for passage in passages {
        context.push_str(&format!(
            "- Content: {}\n  Source: {} (chunk {})\n",
            passage.content, passage.source, passage.chunk
        ));
    }
    context
}

/// Chunks and their embeddings in a SQLite file
pub struct KnowledgeBase {
    conn: Arc<Mutex<Connection>>,
    embedder: Arc<dyn Provider>,
    top_k: usize,
}

impl fmt::Debug for KnowledgeBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KnowledgeBase")
            .field("top_k", &self.top_k)
            .finish()
    }
}

impl KnowledgeBase {
    /// Open or create the database at `path`
    pub fn open<P: AsRef<Path>>(path: P, embedder: Arc<dyn Provider>) -> Result<Self> {
        let expanded = shellexpand::tilde(&path.as_ref().to_string_lossy()).into_owned();
        let path = PathBuf::from(expanded);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open knowledge base {}", path.display()))?;
        Self::with_connection(conn, embedder)
    }

    /// A knowledge base that lives only as long as this value
    pub fn in_memory(embedder: Arc<dyn Provider>) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, embedder)
    }

    fn with_connection(conn: Connection, embedder: Arc<dyn Provider>) -> Result<Self> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL,
                position INTEGER NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL
            )
            "#,
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source)",
            [],
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            embedder,
            top_k: DEFAULT_TOP_K,
        })
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&conn)
        })
        .await?
        .map_err(Into::into)
    }

    async fn embed_all(&self, chunks: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(EMBED_BATCH) {
            vectors.extend(self.embedder.embed(batch).await?);
        }
        if vectors.len() != chunks.len() {
            return Err(anyhow!(
                "Embedded {} of {} chunks",
                vectors.len(),
                chunks.len()
            ));
        }
        Ok(vectors)
    }

    /// Index `text` under `source`, replacing whatever that source held before.
    /// Returns the number of chunks stored.
    pub async fn add_text(&self, source: &str, text: &str) -> Result<usize> {
        let chunks = split_text(text, CHUNK_SIZE, CHUNK_OVERLAP);
        let vectors = self.embed_all(&chunks).await?;
        let count = chunks.len();

        let source = source.to_string();
        let logged = source.clone();
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute("DELETE FROM chunks WHERE source = ?1", params![source])?;
            {
                let mut insert = tx.prepare(
                    "INSERT INTO chunks (source, position, content, embedding) VALUES (?1, ?2, ?3, ?4)",
                )?;
                for (position, (content, vector)) in chunks.iter().zip(&vectors).enumerate() {
                    insert.execute(params![source, position as i64, content, to_blob(vector)])?;
                }
            }
            tx.commit()
        })
        .await?;

        tracing::info!(source = %logged, chunks = count, "indexed document");
        Ok(count)
    }

    /// Index one UTF-8 text file, keyed by its path
    pub async fn add_file<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Could not read {} as UTF-8 text", path.display()))?;
        self.add_text(&path.to_string_lossy(), &text).await
    }

    /// Index every `.txt` file under `dir`. Returns the number of files indexed.
    pub async fn add_dir<P: AsRef<Path>>(&self, dir: P) -> Result<usize> {
        let dir = dir.as_ref().to_path_buf();
        let files = tokio::task::spawn_blocking(move || text_files(&dir)).await??;
        for file in &files {
            self.add_file(file).await?;
        }
        Ok(files.len())
    }

    /// Index a file, or every text file in a directory
    pub async fn add_path<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let path = path.as_ref();
        if path.is_dir() {
            self.add_dir(path).await
        } else {
            self.add_file(path).await.map(|_| 1)
        }
    }

    pub async fn is_empty(&self) -> Result<bool> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get::<_, i64>(0))
        })
        .await
        .map(|count| count == 0)
    }

    pub async fn sources(&self) -> Result<Vec<SourceSummary>> {
        self.with_conn(|conn| {
            let mut statement = conn.prepare(
                "SELECT source, COUNT(*) FROM chunks GROUP BY source ORDER BY source",
            )?;
            let rows = statement.query_map([], |row| {
                Ok(SourceSummary {
                    source: row.get(0)?,
                    chunks: row.get::<_, i64>(1)? as usize,
                })
            })?;
            rows.collect()
        })
        .await
    }

    /// The `k` chunks closest to `query`; the configured top-k when `k` is `None`
    pub async fn search(&self, query: &str, k: Option<usize>) -> Result<Vec<Passage>> {
        let k = k.unwrap_or(self.top_k).max(1);
        let query_vector = self
            .embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No embedding returned for the query"))?;

        let mut passages = self
            .with_conn(move |conn| {
                let mut statement =
                    conn.prepare("SELECT source, position, content, embedding FROM chunks")?;
                let rows = statement.query_map([], |row| {
                    let embedding: Vec<u8> = row.get(3)?;
                    Ok(Passage {
                        source: row.get(0)?,
                        chunk: row.get::<_, i64>(1)? as usize,
                        content: row.get(2)?,
                        score: cosine_similarity(&query_vector, &from_blob(&embedding)),
                    })
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await?;

        passages.sort_by(|a, b| b.score.total_cmp(&a.score));
        passages.truncate(k);
        tracing::debug!(query, hits = passages.len(), "knowledge search");
        Ok(passages)
    }
}

fn text_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)
            .with_context(|| format!("Could not read directory {}", current.display()))?
        {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().and_then(|e| e.to_str()) == Some("txt") {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::models::message::Message;
    use crate::models::tool::Tool;
    use crate::providers::base::Usage;
    use async_trait::async_trait;

    const VOCABULARY: [&str; 6] = ["rust", "python", "graph", "agent", "tokio", "sqlite"];

    /// Embeds text as counts of a few known words
    pub struct KeywordEmbedder;

    #[async_trait]
    impl Provider for KeywordEmbedder {
        async fn complete(
            &self,
            _system: &str,
            _messages: &[Message],
            _tools: &[Tool],
        ) -> Result<(Message, Usage)> {
            Err(anyhow!("embeddings only"))
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|text| {
                    let text = text.to_lowercase();
                    VOCABULARY
                        .iter()
                        .map(|word| text.matches(word).count() as f32)
                        .collect()
                })
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::KeywordEmbedder;
    use super::*;
    use crate::providers::configs::OpenAiProviderConfig;
    use crate::providers::openai::OpenAiProvider;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn knowledge() -> KnowledgeBase {
        KnowledgeBase::in_memory(Arc::new(KeywordEmbedder)).unwrap()
    }

    #[test]
    fn test_split_text() {
        assert!(split_text("", CHUNK_SIZE, CHUNK_OVERLAP).is_empty());
        assert_eq!(split_text("short note", CHUNK_SIZE, CHUNK_OVERLAP), vec!["short note"]);

        let text = (0..300)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = split_text(&text, CHUNK_SIZE, CHUNK_OVERLAP);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= CHUNK_SIZE);
            // Breaks fall between words
            assert!(chunk.starts_with("word"));
        }
        // Neighbouring chunks share their boundary words
        let last_word = chunks[0].split_whitespace().last().unwrap();
        assert!(chunks[1].contains(last_word));
    }

    #[test]
    fn test_split_text_without_whitespace() {
        let text = "x".repeat(1200);
        let chunks = split_text(&text, CHUNK_SIZE, CHUNK_OVERLAP);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 500);
        assert_eq!(chunks[1].len(), 500);
        assert_eq!(chunks[2].len(), 300);
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn test_search_ranks_by_similarity() {
        let kb = knowledge();
        kb.add_text("rust.txt", "Rust with tokio runs async code.")
            .await
            .unwrap();
        kb.add_text("python.txt", "Python scripts build a graph agent.")
            .await
            .unwrap();
        kb.add_text("db.txt", "SQLite stores rows.").await.unwrap();

        let hits = kb.search("How does tokio work in Rust?", Some(2)).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].source, "rust.txt");
        assert!(hits[0].score > hits[1].score);

        assert_eq!(kb.search("graph agent", None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_reindexing_a_source_replaces_it() {
        let kb = knowledge();
        assert!(kb.is_empty().await.unwrap());

        kb.add_text("notes.txt", "rust").await.unwrap();
        kb.add_text("notes.txt", "python").await.unwrap();

        assert_eq!(
            kb.sources().await.unwrap(),
            vec![SourceSummary {
                source: "notes.txt".to_string(),
                chunks: 1
            }]
        );
        let hits = kb.search("python", None).await.unwrap();
        assert_eq!(hits[0].content, "python");
    }

    #[tokio::test]
    async fn test_add_dir_indexes_text_files_and_persists() {
        let dir = TempDir::new().unwrap();
        let docs = dir.path().join("docs");
        std::fs::create_dir_all(docs.join("nested")).unwrap();
        std::fs::write(docs.join("a.txt"), "Rust and tokio").unwrap();
        std::fs::write(docs.join("nested").join("b.txt"), "A graph agent").unwrap();
        std::fs::write(docs.join("skip.md"), "not indexed").unwrap();

        let db = dir.path().join("knowledge.db");
        {
            let kb = KnowledgeBase::open(&db, Arc::new(KeywordEmbedder)).unwrap();
            assert_eq!(kb.add_path(&docs).await.unwrap(), 2);
        }

        let reopened = KnowledgeBase::open(&db, Arc::new(KeywordEmbedder)).unwrap();
        let sources = reopened.sources().await.unwrap();
        assert_eq!(sources.len(), 2);
        assert!(sources.iter().all(|s| s.source.ends_with(".txt")));

        let hits = reopened.search("agent graph", Some(1)).await.unwrap();
        assert!(hits[0].source.ends_with("b.txt"));
    }

    #[tokio::test]
    async fn test_add_file_rejects_binary() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("blob.txt");
        std::fs::write(&file, [0xff, 0xfe, 0xfd]).unwrap();

        let err = knowledge().add_file(&file).await.unwrap_err();
        assert!(err.to_string().contains("UTF-8"));
    }

    #[tokio::test]
    async fn test_search_with_openai_embeddings() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"index": 0, "embedding": [1.0, 0.0]}]
            })))
            .mount(&server)
            .await;
        let provider = OpenAiProvider::new(OpenAiProviderConfig {
            host: server.uri(),
            api_key: "test_api_key".to_string(),
            model: "gpt-4o".to_string(),
            temperature: None,
            max_tokens: None,
            embedding_model: None,
        })
        .unwrap();

        let kb = KnowledgeBase::in_memory(Arc::new(provider)).unwrap();
        assert_eq!(kb.add_text("one.txt", "only chunk").await.unwrap(), 1);

        let hits = kb.search("anything", None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_embedding_failure_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let provider = OpenAiProvider::new(OpenAiProviderConfig {
            host: server.uri(),
            api_key: "test_api_key".to_string(),
            model: "gpt-4o".to_string(),
            temperature: None,
            max_tokens: None,
            embedding_model: None,
        })
        .unwrap();

        let kb = KnowledgeBase::in_memory(Arc::new(provider)).unwrap();
        let err = kb.add_text("one.txt", "text").await.unwrap_err();
        assert!(err.to_string().contains("503"));
        assert!(kb.is_empty().await.unwrap());
    }

    #[test]
    fn test_render_context() {
        let context = render_context(&[Passage {
            source: "guide.txt".to_string(),
            chunk: 2,
            content: "Use tokio".to_string(),
            score: 0.9,
        }]);
        assert!(context.contains("- Content: Use tokio"));
        assert!(context.contains("Source: guide.txt (chunk 2)"));
        assert!(render_context(&[]).contains("No related information"));
    }
}
