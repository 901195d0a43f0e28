//! Episodic memory: learned query shapes mapped to resolved plans and
//! past diagnostic conclusions.
//!
//! Keys are fingerprints (normalized token sets). Lookup accepts the best
//! stored fingerprint whose Jaccard similarity clears the threshold. Stored
//! confidence decays with a half-life; a record that has decayed below the
//! floor is a miss. A hit never substitutes for approval and, for diagnostic
//! records, only seeds priors.

use crate::config::MemoryConfig;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use lru::LruCache;
use netpilot_shared::{ExecutionPlan, Layer, NetpilotError, Result, Strategy};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Words that carry no signal for matching
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "on", "in", "of", "for", "to", "is", "are", "am", "be", "me", "my", "please",
    "and", "or", "at", "with", "what", "whats", "can", "you", "could", "would", "i", "it", "this", "that",
    "do", "does", "any",
];

// ============================================================================
// Fingerprint
// ============================================================================

/// Normalized token set of a query
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(BTreeSet<String>);

impl Fingerprint {
    /// Lowercase, split on non-alphanumerics, drop stopwords; order-free
    pub fn of(text: &str) -> Self {
        Fingerprint(
            text.to_lowercase()
                .split(|c: char| !c.is_alphanumeric())
                .filter(|s| !s.is_empty() && !STOPWORDS.contains(s))
                .map(String::from)
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Canonical key (sorted tokens joined by spaces)
    pub fn key(&self) -> String {
        self.0.iter().cloned().collect::<Vec<_>>().join(" ")
    }

    /// Short stable id for logs
    pub fn digest(&self) -> String {
        let hash = Sha256::digest(self.key().as_bytes());
        hex::encode(&hash[..6])
    }

    /// |A ∩ B| / |A ∪ B|; two empty sets are not similar
    pub fn jaccard(&self, other: &Fingerprint) -> f64 {
        let union = self.0.union(&other.0).count();
        if union == 0 {
            return 0.0;
        }
        self.0.intersection(&other.0).count() as f64 / union as f64
    }
}

// ============================================================================
// Records
// ============================================================================

/// What a record resolves to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MemoryPayload {
    /// Fast-path plan; reusing it skips classification only
    Plan { plan: ExecutionPlan },
    /// Past diagnosis; reusing it only seeds SUPERVISE priors
    Conclusion {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        layer: Option<Layer>,
        summary: String,
    },
    /// Inspection job resolved from a query
    Inspection { name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub fingerprint: Fingerprint,
    pub query: String,
    pub strategy: Strategy,
    pub payload: MemoryPayload,
    /// Confidence as of `decayed_at`
    pub confidence: f64,
    pub decayed_at: DateTime<Utc>,
    /// Last time a fresh result was stored
    pub confirmed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub hits: u64,
}

impl MemoryRecord {
    /// Confidence after exponential decay since `decayed_at`
    pub fn effective_confidence(&self, now: DateTime<Utc>, half_life_secs: u64) -> f64 {
        let age = (now - self.decayed_at).num_milliseconds().max(0) as f64 / 1000.0;
        if half_life_secs == 0 {
            return self.confidence;
        }
        self.confidence * 0.5_f64.powf(age / half_life_secs as f64)
    }

    pub fn is_stale(&self, now: DateTime<Utc>, staleness_secs: u64) -> bool {
        now - self.confirmed_at > ChronoDuration::seconds(staleness_secs as i64)
    }
}

/// A successful lookup
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryHit {
    pub record: MemoryRecord,
    pub similarity: f64,
    pub effective_confidence: f64,
    /// Older than the staleness window; must be re-confirmed by a fresh read
    pub stale: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Inserted,
    Replaced,
    /// Existing record had higher effective confidence
    Kept,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub records: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub kept: u64,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    saved_at: DateTime<Utc>,
    /// Least recently used first
    records: Vec<MemoryRecord>,
}

struct Inner {
    records: LruCache<String, MemoryRecord>,
    stats: MemoryStats,
}

// ============================================================================
// Cache
// ============================================================================

pub struct EpisodicMemory {
    config: MemoryConfig,
    inner: RwLock<Inner>,
    snapshot_path: Option<PathBuf>,
}

impl EpisodicMemory {
    pub fn new(config: MemoryConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: RwLock::new(Inner {
                records: LruCache::new(capacity),
                stats: MemoryStats { capacity: capacity.get(), ..Default::default() },
            }),
            config,
            snapshot_path: None,
        }
    }

    /// Persist to (and restore from) a snapshot file
    pub fn with_snapshot(mut self, path: PathBuf) -> Self {
        self.snapshot_path = Some(path);
        self
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Best acceptable match, or a miss. Updates usage on hit.
    pub async fn lookup(&self, fingerprint: &Fingerprint, strategy: Option<Strategy>) -> Option<MemoryHit> {
        self.lookup_at(fingerprint, strategy, Utc::now()).await
    }

    pub async fn lookup_at(
        &self,
        fingerprint: &Fingerprint,
        strategy: Option<Strategy>,
        now: DateTime<Utc>,
    ) -> Option<MemoryHit> {
        // Scan under the read lock so concurrent lookups do not block each other
        let best = {
            let inner = self.inner.read().await;
            self.candidates(&inner, fingerprint, strategy, now).into_iter().next()
        };

        let mut inner = self.inner.write().await;
        match best {
            Some(hit) => {
                inner.stats.hits += 1;
                let key = hit.record.fingerprint.key();
                if let Some(record) = inner.records.get_mut(&key) {
                    record.confidence = hit.effective_confidence;
                    record.decayed_at = now;
                    record.last_used = now;
                    record.hits += 1;
                }
                debug!(
                    "Memory hit {} (similarity {:.2}, confidence {:.2}, stale {})",
                    hit.record.fingerprint.digest(),
                    hit.similarity,
                    hit.effective_confidence,
                    hit.stale
                );
                Some(hit)
            }
            None => {
                inner.stats.misses += 1;
                None
            }
        }
    }

    /// All acceptable matches, best first, without touching usage
    pub async fn similar(&self, fingerprint: &Fingerprint, strategy: Option<Strategy>, limit: usize) -> Vec<MemoryHit> {
        let inner = self.inner.read().await;
        let mut hits = self.candidates(&inner, fingerprint, strategy, Utc::now());
        hits.truncate(limit);
        hits
    }

    fn candidates(
        &self,
        inner: &Inner,
        fingerprint: &Fingerprint,
        strategy: Option<Strategy>,
        now: DateTime<Utc>,
    ) -> Vec<MemoryHit> {
        if fingerprint.is_empty() {
            return Vec::new();
        }
        let mut hits: Vec<MemoryHit> = inner
            .records
            .iter()
            .filter(|(_, r)| strategy.map(|s| r.strategy == s).unwrap_or(true))
            .filter_map(|(_, r)| {
                let similarity = fingerprint.jaccard(&r.fingerprint);
                if similarity < self.config.similarity_threshold {
                    return None;
                }
                let effective = r.effective_confidence(now, self.config.half_life_secs);
                if effective < self.config.confidence_floor {
                    return None;
                }
                Some(MemoryHit {
                    record: r.clone(),
                    similarity,
                    effective_confidence: effective,
                    stale: r.is_stale(now, self.config.staleness_secs),
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then(b.effective_confidence.total_cmp(&a.effective_confidence))
                .then_with(|| a.record.fingerprint.key().cmp(&b.record.fingerprint.key()))
        });
        hits
    }

    /// Store a resolution. An existing record is replaced only when the new
    /// confidence is at least its current effective confidence.
    pub async fn store(
        &self,
        fingerprint: Fingerprint,
        query: &str,
        strategy: Strategy,
        payload: MemoryPayload,
        confidence: f64,
    ) -> StoreOutcome {
        let outcome = self
            .store_at(fingerprint, query, strategy, payload, confidence, Utc::now())
            .await;
        if outcome != StoreOutcome::Kept && self.config.persist {
            if let Err(e) = self.save().await {
                warn!("Failed to persist memory snapshot: {}", e);
            }
        }
        outcome
    }

    pub async fn store_at(
        &self,
        fingerprint: Fingerprint,
        query: &str,
        strategy: Strategy,
        payload: MemoryPayload,
        confidence: f64,
        now: DateTime<Utc>,
    ) -> StoreOutcome {
        if fingerprint.is_empty() {
            return StoreOutcome::Kept;
        }
        let confidence = confidence.clamp(0.0, 1.0);
        let key = fingerprint.key();
        let mut inner = self.inner.write().await;

        let existing = inner.records.peek(&key).map(|r| {
            (r.effective_confidence(now, self.config.half_life_secs), r.created_at, r.hits)
        });

        let outcome = match existing {
            Some((effective, _, _)) if confidence < effective => {
                inner.stats.kept += 1;
                debug!(
                    "Memory kept {} (stored {:.2} > new {:.2})",
                    fingerprint.digest(),
                    effective,
                    confidence
                );
                return StoreOutcome::Kept;
            }
            Some(_) => StoreOutcome::Replaced,
            None => StoreOutcome::Inserted,
        };

        let (created_at, hits) = existing.map(|(_, c, h)| (c, h)).unwrap_or((now, 0));
        let record = MemoryRecord {
            fingerprint,
            query: query.to_string(),
            strategy,
            payload,
            confidence,
            decayed_at: now,
            confirmed_at: now,
            created_at,
            last_used: now,
            hits,
        };
        if let Some((evicted, _)) = inner.records.push(key.clone(), record) {
            if evicted != key {
                debug!("Memory evicted least recently used record");
            }
        }
        inner.stats.stores += 1;
        outcome
    }

    pub async fn stats(&self) -> MemoryStats {
        let inner = self.inner.read().await;
        MemoryStats { records: inner.records.len(), ..inner.stats.clone() }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.records.clear();
    }

    /// Write the snapshot file (no-op without a snapshot path)
    pub async fn save(&self) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let snapshot = {
            let inner = self.inner.read().await;
            let mut records: Vec<MemoryRecord> = inner.records.iter().map(|(_, r)| r.clone()).collect();
            records.reverse();
            Snapshot { saved_at: Utc::now(), records }
        };
        save_snapshot(path, &snapshot).await
    }

    /// Load the snapshot file if present; returns the number of records
    pub async fn load(&self) -> Result<usize> {
        let Some(path) = &self.snapshot_path else {
            return Ok(0);
        };
        if !path.exists() {
            return Ok(0);
        }
        let content = tokio::fs::read_to_string(path).await?;
        let snapshot: Snapshot = serde_json::from_str(&content)
            .map_err(|e| NetpilotError::Internal(format!("corrupt memory snapshot {}: {}", path.display(), e)))?;

        let mut inner = self.inner.write().await;
        for record in snapshot.records {
            inner.records.push(record.fingerprint.key(), record);
        }
        let count = inner.records.len();
        info!("Loaded {} memory records from {}", count, path.display());
        Ok(count)
    }
}

async fn save_snapshot(path: &Path, snapshot: &Snapshot) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let content = serde_json::to_string_pretty(snapshot)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use netpilot_shared::Capability;
    use serde_json::Map;

    fn memory() -> EpisodicMemory {
        EpisodicMemory::new(MemoryConfig { persist: false, ..MemoryConfig::default() })
    }

    fn plan() -> MemoryPayload {
        MemoryPayload::Plan { plan: ExecutionPlan::new("telemetry_bgp", Capability::Read, Map::new()) }
    }

    #[test]
    fn test_fingerprint_normalization() {
        let a = Fingerprint::of("Check the BGP peers on R1?");
        let b = Fingerprint::of("r1 bgp PEERS check");
        assert_eq!(a, b);
        assert_eq!(a.key(), "bgp check peers r1");
        assert_eq!(a.jaccard(&b), 1.0);
    }

    #[test]
    fn test_jaccard_different_target() {
        let a = Fingerprint::of("check bgp peers on R1");
        let b = Fingerprint::of("check bgp peers on R2");
        assert!((a.jaccard(&b) - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_round_trip_hit() {
        let mem = memory();
        let fp = Fingerprint::of("show interfaces on R1");
        assert_eq!(mem.store(fp.clone(), "show interfaces on R1", Strategy::Fast, plan(), 0.9).await, StoreOutcome::Inserted);
        let hit = mem.lookup(&fp, Some(Strategy::Fast)).await.unwrap();
        assert_eq!(hit.similarity, 1.0);
        assert!(!hit.stale);
        assert!(mem.lookup(&fp, Some(Strategy::Diagnostic)).await.is_none());
    }

    #[tokio::test]
    async fn test_lower_confidence_never_overwrites() {
        let mem = memory();
        let fp = Fingerprint::of("bgp summary R1");
        mem.store(fp.clone(), "q", Strategy::Fast, plan(), 0.9).await;
        assert_eq!(mem.store(fp.clone(), "q", Strategy::Fast, plan(), 0.5).await, StoreOutcome::Kept);
        let hit = mem.lookup(&fp, None).await.unwrap();
        assert!(hit.effective_confidence > 0.89);
    }

    #[tokio::test]
    async fn test_decay_and_floor() {
        let mem = EpisodicMemory::new(MemoryConfig {
            half_life_secs: 60,
            confidence_floor: 0.3,
            persist: false,
            ..MemoryConfig::default()
        });
        let fp = Fingerprint::of("ospf neighbors R3");
        let t0 = Utc::now();
        mem.store_at(fp.clone(), "q", Strategy::Fast, plan(), 0.8, t0).await;

        let hit = mem.lookup_at(&fp, None, t0 + ChronoDuration::seconds(60)).await.unwrap();
        assert!((hit.effective_confidence - 0.4).abs() < 1e-6);
        assert!(!hit.stale);

        // another two half-lives: 0.1 < floor
        assert!(mem.lookup_at(&fp, None, t0 + ChronoDuration::seconds(180)).await.is_none());
    }

    #[tokio::test]
    async fn test_stale_flag() {
        let mem = memory();
        let fp = Fingerprint::of("vlan table sw1");
        let t0 = Utc::now();
        mem.store_at(fp.clone(), "q", Strategy::Fast, plan(), 0.9, t0).await;
        let hit = mem.lookup_at(&fp, None, t0 + ChronoDuration::seconds(301)).await.unwrap();
        assert!(hit.stale);
    }

    #[tokio::test]
    async fn test_capacity_eviction() {
        let mem = EpisodicMemory::new(MemoryConfig { capacity: 2, persist: false, ..MemoryConfig::default() });
        for q in ["alpha one", "beta two", "gamma three"] {
            mem.store(Fingerprint::of(q), q, Strategy::Fast, plan(), 0.9).await;
        }
        assert_eq!(mem.len().await, 2);
        assert!(mem.lookup(&Fingerprint::of("alpha one"), None).await.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.json");
        let mem = EpisodicMemory::new(MemoryConfig::default()).with_snapshot(path.clone());
        mem.store(Fingerprint::of("bgp peers R1"), "bgp peers R1", Strategy::Fast, plan(), 0.9).await;
        assert!(path.exists());

        let restored = EpisodicMemory::new(MemoryConfig::default()).with_snapshot(path);
        assert_eq!(restored.load().await.unwrap(), 1);
        assert!(restored.lookup(&Fingerprint::of("bgp peers R1"), None).await.is_some());
    }
}
