//! Persistence for thread state between turns and across suspensions
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::errors::StoreError;
use crate::models::thread::{ThreadState, ThreadSummary};

pub type StoreResult<T> = Result<T, StoreError>;

/// Exclusive use of one thread, released when dropped
pub struct ThreadLease {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ThreadLease {
    fn new<F: FnOnce() + Send + Sync + 'static>(release: F) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for ThreadLease {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for ThreadLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadLease")
            .field("held", &self.release.is_some())
            .finish()
    }
}

/// Keyed storage for thread state
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Claim a thread for one round against every other user of the store.
    /// Fails with [`StoreError::Busy`] while someone else holds it.
    async fn claim(&self, thread_id: &str) -> StoreResult<ThreadLease>;

    async fn get(&self, thread_id: &str) -> StoreResult<Option<ThreadState>>;

    async fn put(&self, thread: &ThreadState) -> StoreResult<()>;

    /// Returns whether anything was removed
    async fn delete(&self, thread_id: &str) -> StoreResult<bool>;

    /// Summaries of every stored thread, most recently updated first
    async fn list(&self) -> StoreResult<Vec<ThreadSummary>>;
}

/// Thread ids become file names, so keep them to a safe alphabet
pub fn validate_thread_id(thread_id: &str) -> StoreResult<()> {
    let valid = !thread_id.is_empty()
        && thread_id.len() <= 128
        && thread_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && !thread_id.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidThreadId(thread_id.to_string()))
    }
}

fn sort_summaries(mut summaries: Vec<ThreadSummary>) -> Vec<ThreadSummary> {
    summaries.sort_by(|a, b| b.updated.cmp(&a.updated));
    summaries
}

/// In-process store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    threads: RwLock<HashMap<String, ThreadState>>,
    claimed: Arc<Mutex<HashSet<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn claim(&self, thread_id: &str) -> StoreResult<ThreadLease> {
        validate_thread_id(thread_id)?;
        {
            let mut claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner);
            if !claimed.insert(thread_id.to_string()) {
                return Err(StoreError::Busy(thread_id.to_string()));
            }
        }

        let claimed = Arc::clone(&self.claimed);
        let thread_id = thread_id.to_string();
        Ok(ThreadLease::new(move || {
            claimed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&thread_id);
        }))
    }

    async fn get(&self, thread_id: &str) -> StoreResult<Option<ThreadState>> {
        Ok(self.threads.read().await.get(thread_id).cloned())
    }

    async fn put(&self, thread: &ThreadState) -> StoreResult<()> {
        validate_thread_id(&thread.thread_id)?;
        self.threads
            .write()
            .await
            .insert(thread.thread_id.clone(), thread.clone());
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> StoreResult<bool> {
        Ok(self.threads.write().await.remove(thread_id).is_some())
    }

    async fn list(&self) -> StoreResult<Vec<ThreadSummary>> {
        let threads = self.threads.read().await;
        Ok(sort_summaries(
            threads.values().map(ThreadSummary::from).collect(),
        ))
    }
}

/// One JSON file per thread in a directory.
///
/// A thread in use has a `<id>.lock` file next to it, so processes sharing the
/// directory never run the same thread at once. A lock left behind by a crashed
/// process has to be removed by hand.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// `dir` may start with `~` or contain environment variables
    pub fn new<P: AsRef<Path>>(dir: P) -> StoreResult<Self> {
        let raw = dir.as_ref().to_string_lossy().to_string();
        let expanded = shellexpand::full(&raw)
            .map(|s| s.into_owned())
            .unwrap_or(raw);
        let dir = PathBuf::from(expanded);
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, thread_id: &str) -> StoreResult<PathBuf> {
        validate_thread_id(thread_id)?;
        Ok(self.dir.join(format!("{}.json", thread_id)))
    }

    fn lock_path(&self, thread_id: &str) -> StoreResult<PathBuf> {
        validate_thread_id(thread_id)?;
        Ok(self.dir.join(format!("{}.lock", thread_id)))
    }
}

#[async_trait]
impl StateStore for FileStore {
    async fn claim(&self, thread_id: &str) -> StoreResult<ThreadLease> {
        let path = self.lock_path(thread_id)?;
        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                tracing::debug!(lock = %path.display(), "thread already claimed");
                return Err(StoreError::Busy(thread_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let held = path.clone();
        let lease = ThreadLease::new(move || {
            if let Err(e) = std::fs::remove_file(&held) {
                tracing::warn!(lock = %held.display(), error = %e, "failed to release thread lock");
            }
        });
        // The owner's pid helps when clearing a stale lock
        file.write_all(std::process::id().to_string().as_bytes())
            .await?;
        Ok(lease)
    }

    async fn get(&self, thread_id: &str) -> StoreResult<Option<ThreadState>> {
        let path = self.path_for(thread_id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, thread: &ThreadState) -> StoreResult<()> {
        let path = self.path_for(&thread.thread_id)?;
        let bytes = serde_json::to_vec_pretty(thread)?;

        // Write then rename so a crash never leaves a half-written thread
        let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> StoreResult<bool> {
        let path = self.path_for(thread_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> StoreResult<Vec<ThreadSummary>> {
        let mut summaries = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<ThreadState>(&bytes) {
                Ok(thread) => summaries.push(ThreadSummary::from(&thread)),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable thread file"),
            }
        }
        Ok(sort_summaries(summaries))
    }
}
