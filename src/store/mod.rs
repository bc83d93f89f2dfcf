// Vector store
// Records live in one key-value namespace and the derived inverted indexes in another.
// Every index read-modify-write happens under the write gate.


mod index;
mod record;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::keys::{SecureKeyStore, StaticKeyStore};
use crate::math::{self, MathError};
use crate::storage::{InMemoryBackend, KeyValueBackend, KvValue, StorageError, crypto};
use crate::{MemoryError, Result};

use index::{ALL_IDS_KEY, INDEX_VERSION, META_PREFIX, VERSION_KEY, is_legacy_key, meta_key};
pub use index::canonical_json;
use record::{StoredRecord, StoredVector};
pub use record::{EmbeddingRecord, Metadata, MetadataFilter, NewEmbedding, Role};

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

static LAST_TIMESTAMP: AtomicI64 = AtomicI64::new(0);

/// Wall-clock milliseconds, strictly increasing within this process
fn next_timestamp() -> i64 {
    let now = Utc::now().timestamp_millis();
    let previous = LAST_TIMESTAMP
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or_else(|last| last);
    now.max(previous + 1)
}

/// Capacity and storage policy for a [`VectorStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Oldest records are evicted once the store holds more than this
    pub max_embeddings: usize,
    /// Records older than this are evicted on the next insert; `0` disables the sweep
    pub max_age_days: u32,
    /// Store vectors as 8-bit quantized values
    pub compress_vectors: bool,
}

impl Default for StoreSettings {
    #[inline]
    fn default() -> Self {
        Self {
            max_embeddings: 10_000,
            max_age_days: 90,
            compress_vectors: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    pub limit: usize,
    pub threshold: f32,
    pub filter: Option<MetadataFilter>,
}

impl Default for SearchOptions {
    #[inline]
    fn default() -> Self {
        Self {
            limit: 5,
            threshold: 0.0,
            filter: None,
        }
    }
}

impl SearchOptions {
    #[inline]
    pub fn new(limit: usize, threshold: f32) -> Self {
        Self {
            limit,
            threshold,
            filter: None,
        }
    }

    #[inline]
    pub fn with_filter(mut self, filter: MetadataFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub record: EmbeddingRecord,
    pub similarity: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub total_embeddings: usize,
    pub storage_size: u64,
    pub conversation_count: usize,
    pub oldest_embedding: Option<i64>,
    pub newest_embedding: Option<i64>,
}

/// An encrypted, indexed store of embedding records
pub struct VectorStore {
    records: Arc<dyn KeyValueBackend>,
    index: Arc<dyn KeyValueBackend>,
    key_store: Arc<dyn SecureKeyStore>,
    settings: StoreSettings,
    init: OnceCell<std::result::Result<(), String>>,
    write_gate: Mutex<()>,
    reported_mismatches: std::sync::Mutex<HashSet<(usize, usize)>>,
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore")
            .field("settings", &self.settings)
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

fn is_corruption(error: &StorageError) -> bool {
    matches!(
        error,
        StorageError::Crypto(_) | StorageError::Serialization(_) | StorageError::TypeMismatch { .. }
    )
}

impl VectorStore {
    /// Build a store that is not usable until [`VectorStore::ready`] completes
    #[inline]
    pub fn new(
        records: Arc<dyn KeyValueBackend>,
        index: Arc<dyn KeyValueBackend>,
        key_store: Arc<dyn SecureKeyStore>,
        settings: StoreSettings,
    ) -> Self {
        Self {
            records,
            index,
            key_store,
            settings,
            init: OnceCell::new(),
            write_gate: Mutex::new(()),
            reported_mismatches: std::sync::Mutex::new(HashSet::new()),
        }
    }

    /// [`VectorStore::new`] followed by [`VectorStore::ready`]
    #[inline]
    pub async fn open(
        records: Arc<dyn KeyValueBackend>,
        index: Arc<dyn KeyValueBackend>,
        key_store: Arc<dyn SecureKeyStore>,
        settings: StoreSettings,
    ) -> Result<Self> {
        let store = Self::new(records, index, key_store, settings);
        store.ready().await?;
        Ok(store)
    }

    /// A ready store that keeps everything in memory under a throwaway key
    #[inline]
    pub async fn in_memory(settings: StoreSettings) -> Result<Self> {
        let key = crypto::generate_key()?;
        Self::open(
            Arc::new(InMemoryBackend::new()),
            Arc::new(InMemoryBackend::new()),
            Arc::new(StaticKeyStore::new(*key)),
            settings,
        )
        .await
    }

    #[inline]
    pub const fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        matches!(self.init.get(), Some(Ok(())))
    }

    /// Resolve the encryption key, re-key both namespaces and migrate the index.
    ///
    /// Runs once. A failure is remembered and returned from every later call.
    #[inline]
    pub async fn ready(&self) -> Result<()> {
        let outcome = self
            .init
            .get_or_init(|| async {
                self.initialize().await.map_err(|e| {
                    error!("Vector store initialization failed: {}", e);
                    e.to_string()
                })
            })
            .await;
        outcome.clone().map_err(MemoryError::Initialization)
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.init.get() {
            None => Err(MemoryError::NotReady),
            Some(Ok(())) => Ok(()),
            Some(Err(message)) => Err(MemoryError::Initialization(message.clone())),
        }
    }

    async fn initialize(&self) -> Result<()> {
        let key = self.key_store.get_or_create_key().await?;
        self.records.recrypt(&key).await?;
        self.index.recrypt(&key).await?;

        let _gate = self.write_gate.lock().await;
        self.migrate_index().await?;
        info!("Vector store ready");
        Ok(())
    }

    /// Rebuild the inverted indexes from the records unless they are already current
    async fn migrate_index(&self) -> Result<()> {
        if let Some(KvValue::Number(version)) = self.index.get(VERSION_KEY).await? {
            if version >= INDEX_VERSION {
                debug!("Index is at version {}", version);
                return Ok(());
            }
        }

        let existing_keys = self.index.all_keys().await?;
        let legacy_keys = existing_keys.iter().filter(|k| is_legacy_key(k)).count();
        let arrival: HashMap<String, usize> = self
            .read_ids(ALL_IDS_KEY)
            .await?
            .into_iter()
            .enumerate()
            .map(|(position, id)| (id, position))
            .collect();

        let mut loaded = Vec::new();
        for id in self.records.all_keys().await? {
            if let Some(stored) = self.load_stored(&id).await? {
                loaded.push(stored);
            }
        }
        loaded.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| {
                    let pa = arrival.get(&a.id).copied().unwrap_or(usize::MAX);
                    let pb = arrival.get(&b.id).copied().unwrap_or(usize::MAX);
                    pa.cmp(&pb)
                })
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut lists: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for stored in &loaded {
            for (field, value) in stored.metadata.fields() {
                lists
                    .entry(meta_key(&field, &value))
                    .or_default()
                    .push(stored.id.clone());
            }
        }

        self.index.clear_all().await?;
        for (key, ids) in &lists {
            self.write_ids(key, ids).await?;
        }
        let all: Vec<String> = loaded.iter().map(|r| r.id.clone()).collect();
        self.write_ids(ALL_IDS_KEY, &all).await?;
        self.index.set(VERSION_KEY, INDEX_VERSION.into()).await?;

        if !existing_keys.is_empty() || !loaded.is_empty() {
            info!(
                "Rebuilt index for {} records ({} legacy keys removed)",
                loaded.len(),
                legacy_keys
            );
        }
        Ok(())
    }

    /// Store a new record and return its id. Eviction runs before this returns.
    #[inline]
    pub async fn add_embedding(&self, embedding: NewEmbedding) -> Result<String> {
        self.ensure_ready()?;
        if embedding.vector.is_empty() {
            return Err(MathError::EmptyInput.into());
        }
        let metadata = embedding
            .metadata
            .normalized()
            .map_err(|e| MemoryError::InvalidMetadata(e.to_string()))?;

        let id = format!("emb_{}", Uuid::new_v4().simple());
        let _gate = self.write_gate.lock().await;

        let timestamp = next_timestamp();
        let stored = StoredRecord {
            id: id.clone(),
            text: embedding.text,
            vector: StoredVector::encode(&embedding.vector, self.settings.compress_vectors),
            timestamp,
            metadata,
        };
        let raw = serde_json::to_string(&stored).map_err(StorageError::from)?;
        self.records.set(&id, raw.into()).await?;

        let mut all = self.read_ids(ALL_IDS_KEY).await?;
        all.push(id.clone());
        self.write_ids(ALL_IDS_KEY, &all).await?;

        for (field, value) in stored.metadata.fields() {
            let key = meta_key(&field, &value);
            let mut ids = self.read_ids(&key).await?;
            ids.push(id.clone());
            self.write_ids(&key, &ids).await?;
        }

        debug!(
            "Stored embedding {} ({} dims, {} chars)",
            id,
            embedding.vector.len(),
            stored.text.len()
        );

        self.evict_locked(timestamp).await?;
        Ok(id)
    }

    /// Point lookup. Missing and unreadable records both come back as `None`.
    #[inline]
    pub async fn get_embedding(&self, id: &str) -> Result<Option<EmbeddingRecord>> {
        self.ensure_ready()?;
        Ok(self.load_stored(id).await?.map(StoredRecord::into_record))
    }

    /// Rank stored records against `query` by cosine similarity.
    ///
    /// Records whose vector length differs from the query are skipped.
    #[inline]
    pub async fn search(&self, query: &[f32], options: &SearchOptions) -> Result<Vec<SearchResult>> {
        self.ensure_ready()?;
        if query.is_empty() || options.limit == 0 {
            return Ok(Vec::new());
        }

        let ids = self.candidate_ids(options.filter.as_ref()).await?;
        let mut candidates = Vec::with_capacity(ids.len());
        let mut skipped = 0usize;
        for id in &ids {
            let Some(stored) = self.load_stored(id).await? else {
                continue;
            };
            if options
                .filter
                .as_ref()
                .is_some_and(|f| !f.matches(&stored.metadata))
            {
                continue;
            }
            if stored.vector.len() != query.len() {
                self.report_mismatch(query.len(), stored.vector.len());
                skipped += 1;
                continue;
            }
            candidates.push(stored.into_record());
        }

        let scored = {
            let vectors: Vec<&[f32]> = candidates.iter().map(|r| r.vector.as_slice()).collect();
            math::top_k(query, &vectors, options.limit, options.threshold)?
        };

        debug!(
            "Search over {} candidates returned {} results ({} skipped for dimension mismatch)",
            candidates.len(),
            scored.len(),
            skipped
        );

        let mut slots: Vec<Option<EmbeddingRecord>> = candidates.into_iter().map(Some).collect();
        Ok(scored
            .into_iter()
            .filter_map(|s| {
                slots.get_mut(s.index).and_then(Option::take).map(|record| SearchResult {
                    record,
                    similarity: s.similarity,
                })
            })
            .collect())
    }

    /// Remove one record. Returns whether anything was removed.
    #[inline]
    pub async fn delete(&self, id: &str) -> Result<bool> {
        self.ensure_ready()?;
        let _gate = self.write_gate.lock().await;
        let metadata = self.load_stored(id).await?.map(|r| r.metadata);
        Ok(self.remove_locked(vec![(id.to_string(), metadata)]).await? > 0)
    }

    /// Remove every record matching `filter`. Returns how many were removed.
    #[inline]
    pub async fn delete_by_filter(&self, filter: &MetadataFilter) -> Result<usize> {
        self.ensure_ready()?;
        let _gate = self.write_gate.lock().await;

        let mut targets = Vec::new();
        for id in self.candidate_ids(Some(filter)).await? {
            if let Some(stored) = self.load_stored(&id).await? {
                if filter.matches(&stored.metadata) {
                    targets.push((id, Some(stored.metadata)));
                }
            }
        }

        let removed = self.remove_locked(targets).await?;
        info!("Deleted {} embeddings by filter", removed);
        Ok(removed)
    }

    /// Records in arrival order, optionally restricted by `filter`
    #[inline]
    pub async fn list_embeddings(
        &self,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<EmbeddingRecord>> {
        self.ensure_ready()?;
        let mut records = Vec::new();
        for id in self.candidate_ids(filter).await? {
            if let Some(stored) = self.load_stored(&id).await? {
                if filter.is_none_or(|f| f.matches(&stored.metadata)) {
                    records.push(stored.into_record());
                }
            }
        }
        Ok(records)
    }

    #[inline]
    pub async fn stats(&self) -> Result<StoreStats> {
        self.ensure_ready()?;
        let ids = self.read_ids(ALL_IDS_KEY).await?;

        let mut oldest = None;
        for id in &ids {
            if let Some(stored) = self.load_stored(id).await? {
                oldest = Some(stored.timestamp);
                break;
            }
        }
        let mut newest = None;
        for id in ids.iter().rev() {
            if let Some(stored) = self.load_stored(id).await? {
                newest = Some(stored.timestamp);
                break;
            }
        }

        let conversation_prefix = format!("{META_PREFIX}conversationId=");
        let conversation_count = self
            .index
            .all_keys()
            .await?
            .iter()
            .filter(|k| k.starts_with(&conversation_prefix))
            .count();

        let storage_size =
            self.records.storage_size().await? + self.index.storage_size().await?;

        Ok(StoreStats {
            total_embeddings: ids.len(),
            storage_size,
            conversation_count,
            oldest_embedding: oldest,
            newest_embedding: newest,
        })
    }

    /// Wipe both namespaces
    #[inline]
    pub async fn clear_all(&self) -> Result<()> {
        self.ensure_ready()?;
        let _gate = self.write_gate.lock().await;
        self.records.clear_all().await?;
        self.index.clear_all().await?;
        self.index.set(VERSION_KEY, INDEX_VERSION.into()).await?;
        info!("Cleared all embeddings");
        Ok(())
    }

    #[inline]
    pub async fn count(&self) -> Result<usize> {
        self.ensure_ready()?;
        Ok(self.read_ids(ALL_IDS_KEY).await?.len())
    }

    /// Every live id, oldest first
    #[inline]
    pub async fn all_ids(&self) -> Result<Vec<String>> {
        self.ensure_ready()?;
        self.read_ids(ALL_IDS_KEY).await
    }

    /// Apply the age sweep, then the count limit. The caller holds the write gate.
    async fn evict_locked(&self, now: i64) -> Result<()> {
        let ids = self.read_ids(ALL_IDS_KEY).await?;
        let mut doomed: Vec<(String, Option<Metadata>)> = Vec::new();

        if self.settings.max_age_days > 0 {
            let cutoff = now - i64::from(self.settings.max_age_days) * MS_PER_DAY;
            for id in &ids {
                match self.load_stored(id).await? {
                    Some(stored) if stored.timestamp < cutoff => {
                        doomed.push((id.clone(), Some(stored.metadata)));
                    }
                    Some(_) => break,
                    None => {}
                }
            }
        }
        let aged = doomed.len();

        let remaining = ids.len() - aged;
        let max = self.settings.max_embeddings;
        if max > 0 && remaining > max {
            // Unreadable ids can sit between aged ones, so skip by id rather than position
            let swept: HashSet<String> = doomed.iter().map(|(id, _)| id.clone()).collect();
            for id in ids
                .iter()
                .filter(|id| !swept.contains(*id))
                .take(remaining - max)
            {
                let metadata = self.load_stored(id).await?.map(|r| r.metadata);
                doomed.push((id.clone(), metadata));
            }
        }

        if doomed.is_empty() {
            return Ok(());
        }
        let removed = self.remove_locked(doomed).await?;
        info!(
            "Evicted {} embeddings ({} past the {} day retention window)",
            removed, aged, self.settings.max_age_days
        );
        Ok(())
    }

    /// Delete records and unwind every index entry they appear in.
    ///
    /// A target without metadata (missing or unreadable record) is scrubbed from every
    /// inverted list. The caller holds the write gate.
    async fn remove_locked(&self, targets: Vec<(String, Option<Metadata>)>) -> Result<usize> {
        if targets.is_empty() {
            return Ok(0);
        }

        let target_ids: HashSet<&str> = targets.iter().map(|(id, _)| id.as_str()).collect();
        let mut all = self.read_ids(ALL_IDS_KEY).await?;
        let before = all.len();
        all.retain(|id| !target_ids.contains(id.as_str()));
        let dropped_from_list = before - all.len();
        self.write_ids(ALL_IDS_KEY, &all).await?;

        let mut per_key: BTreeMap<String, HashSet<&str>> = BTreeMap::new();
        let mut unknown: HashSet<&str> = HashSet::new();
        for (id, metadata) in &targets {
            match metadata {
                Some(metadata) => {
                    for (field, value) in metadata.fields() {
                        per_key
                            .entry(meta_key(&field, &value))
                            .or_default()
                            .insert(id.as_str());
                    }
                }
                None => {
                    unknown.insert(id.as_str());
                }
            }
        }
        if !unknown.is_empty() {
            for key in self.index.all_keys().await? {
                if key.starts_with(META_PREFIX) {
                    per_key.entry(key).or_default().extend(unknown.iter().copied());
                }
            }
        }

        for (key, doomed) in &per_key {
            let mut ids = self.read_ids(key).await?;
            let len = ids.len();
            ids.retain(|id| !doomed.contains(id.as_str()));
            if ids.len() != len {
                self.write_ids(key, &ids).await?;
            }
        }

        let mut deleted_records = 0usize;
        for (id, _) in &targets {
            if self.records.delete(id).await? {
                deleted_records += 1;
            }
        }

        Ok(deleted_records.max(dropped_from_list))
    }

    async fn candidate_ids(&self, filter: Option<&MetadataFilter>) -> Result<Vec<String>> {
        let all = self.read_ids(ALL_IDS_KEY).await?;
        let Some(filter) = filter.filter(|f| !f.is_empty()) else {
            return Ok(all);
        };

        let mut allowed: Option<HashSet<String>> = None;
        for (field, value) in filter.iter() {
            let ids: HashSet<String> = self
                .read_ids(&meta_key(field, value))
                .await?
                .into_iter()
                .collect();
            let narrowed = match allowed {
                None => ids,
                Some(previous) => previous.intersection(&ids).cloned().collect(),
            };
            if narrowed.is_empty() {
                return Ok(Vec::new());
            }
            allowed = Some(narrowed);
        }

        let allowed = allowed.unwrap_or_default();
        Ok(all.into_iter().filter(|id| allowed.contains(id)).collect())
    }

    async fn load_stored(&self, id: &str) -> Result<Option<StoredRecord>> {
        let raw = match self.records.get_string(id).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(None),
            Err(e) if is_corruption(&e) => {
                warn!("Ignoring unreadable record '{}': {}", id, e);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<StoredRecord>(&raw) {
            Ok(stored) if !stored.vector.is_empty() => Ok(Some(stored)),
            Ok(_) => {
                warn!("Ignoring record '{}' with an empty vector", id);
                Ok(None)
            }
            Err(e) => {
                warn!("Ignoring corrupt record '{}': {}", id, e);
                Ok(None)
            }
        }
    }

    async fn read_ids(&self, key: &str) -> Result<Vec<String>> {
        match self.index.get_string(key).await {
            Ok(Some(raw)) => Ok(serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Discarding corrupt index entry '{}': {}", key, e);
                Vec::new()
            })),
            Ok(None) => Ok(Vec::new()),
            Err(e) if is_corruption(&e) => {
                warn!("Discarding unreadable index entry '{}': {}", key, e);
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Empty lists are deleted rather than stored
    async fn write_ids(&self, key: &str, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            self.index.delete(key).await?;
        } else {
            let raw = serde_json::to_string(ids).map_err(StorageError::from)?;
            self.index.set(key, raw.into()).await?;
        }
        Ok(())
    }

    fn report_mismatch(&self, query_dim: usize, stored_dim: usize) {
        let first_time = self
            .reported_mismatches
            .lock()
            .map(|mut seen| seen.insert((query_dim, stored_dim)))
            .unwrap_or(false);
        if first_time {
            warn!(
                "Skipping stored vectors with {} dimensions while searching with {} dimensions",
                stored_dim, query_dim
            );
        }
    }
}
