//! Group cache: runs the wrapped chain at most once per group content identity.
//!
//! Each input document (a group parent) is hashed together with its children
//! into a [`CacheKey`]. Within one [`GroupCache`] the chain runs once per key;
//! concurrent requests for the same key wait for the first one. With a
//! [`CacheStore`] attached, results also survive across runs.
//!
//! The key ignores `RepositoryRoot` and reads member sources relative to it,
//! since every run checks out into a fresh temporary directory. Everything
//! else (content bytes, revision id, destinations) is part of the key.

use crate::document::Document;
use crate::error::{Error, Result};
use crate::keys;
use crate::stage::{Chain, Context, Stage};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::try_join_all;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Bumped whenever the key derivation or entry format changes.
const KEY_SALT: &[u8] = b"versioned-docs/group-cache/v1";

/// Hex SHA-256 of a group's content identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn of(doc: &Document) -> Result<Self> {
        let mut hasher = Sha256::new();
        hasher.update(KEY_SALT);
        identity_view(doc).fingerprint(&mut hasher)?;
        Ok(Self(hex::encode(hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strip run-specific checkout paths before hashing.
fn identity_view(doc: &Document) -> Document {
    let mut view = doc.clone().without_meta(keys::REPOSITORY_ROOT);
    if let (Some(root), Some(source)) = (doc.get_path(keys::REPOSITORY_ROOT), doc.source()) {
        if let Ok(relative) = source.strip_prefix(root) {
            view = view.with_source(relative);
        }
    }
    let children = doc.children().iter().map(identity_view).collect();
    view.with_children(children)
}

/// Cross-run cache: one JSON file per key.
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// Load an entry. Missing or unreadable entries are a miss.
    pub fn load(&self, key: &CacheKey) -> Option<Vec<Document>> {
        let path = self.entry_path(key);
        let bytes = fs::read(&path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(docs) => Some(docs),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cache: discarding corrupt entry");
                None
            }
        }
    }

    /// Write an entry atomically: a temp file in the store directory is
    /// renamed over the final path only once fully written.
    pub fn save(&self, key: &CacheKey, docs: &[Document]) -> Result<()> {
        let path = self.entry_path(key);
        let store_err = |message: String| Error::CacheStore {
            path: path.clone(),
            message,
        };

        let docs = docs
            .iter()
            .map(Document::materialized)
            .collect::<std::io::Result<Vec<_>>>()?;
        let json = serde_json::to_vec(&docs).map_err(|e| store_err(e.to_string()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&json)?;
        tmp.persist(&path).map_err(|e| store_err(e.error.to_string()))?;
        Ok(())
    }
}

/// Caches the output of `chain` per input document.
pub struct GroupCache {
    chain: Chain,
    store: Option<CacheStore>,
    cells: DashMap<CacheKey, Arc<OnceCell<Arc<Vec<Document>>>>>,
    executions: AtomicUsize,
}

impl GroupCache {
    pub fn new(chain: Chain) -> Self {
        Self {
            chain,
            store: None,
            cells: DashMap::new(),
            executions: AtomicUsize::new(0),
        }
    }

    pub fn with_store(mut self, store: CacheStore) -> Self {
        self.store = Some(store);
        self
    }

    /// How many times the wrapped chain actually ran.
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    async fn process(&self, ctx: &Context, input: &Document) -> Result<Arc<Vec<Document>>> {
        let key = CacheKey::of(input)?;
        let cell = Arc::clone(&self.cells.entry(key.clone()).or_default());
        let docs = cell
            .get_or_try_init(|| self.compute(ctx, &key, input))
            .await?;
        Ok(Arc::clone(docs))
    }

    async fn compute(&self, ctx: &Context, key: &CacheKey, input: &Document) -> Result<Arc<Vec<Document>>> {
        let group = input.get_str(keys::GROUP_KEY).unwrap_or("<ungrouped>");
        if let Some(store) = &self.store {
            if let Some(docs) = store.load(key) {
                debug!(group = %group, key = %key, count = docs.len(), "cache: hit");
                return Ok(Arc::new(docs));
            }
        }

        debug!(group = %group, key = %key, "cache: miss, executing");
        self.executions.fetch_add(1, Ordering::SeqCst);
        let docs = self.chain.execute(ctx, vec![input.clone()]).await?;
        if let Some(store) = &self.store {
            store.save(key, &docs)?;
        }
        Ok(Arc::new(docs))
    }
}

#[async_trait]
impl Stage for GroupCache {
    async fn execute(&self, ctx: &Context, inputs: Vec<Document>) -> Result<Vec<Document>> {
        let outputs = try_join_all(inputs.iter().map(|input| self.process(ctx, input))).await?;
        Ok(outputs
            .iter()
            .flat_map(|docs| docs.iter().cloned())
            .collect())
    }
}
