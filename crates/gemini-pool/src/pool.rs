//! Key list, active-credential state, and rotation
//!
//! The pool keeps keys in insertion order with one active index. Binding a
//! key (constructing a client for it) happens through an injected `Binder`
//! so tests can script failures. Mutations that change the active key
//! always rebind, keeping the cached client consistent with the index.

use std::sync::Arc;
use std::time::Duration;

use gemini_client::GenerativeClient;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::cooldown::{CooldownTable, DEFAULT_COOLDOWN};
use crate::probe::ProbeReport;

/// Error from constructing a client for a credential.
#[derive(Debug, thiserror::Error)]
#[error("bind failed: {0}")]
pub struct BindError(pub String);

/// Constructs a client bound to the given key.
pub type Binder =
    Arc<dyn Fn(&str) -> std::result::Result<Arc<dyn GenerativeClient>, BindError> + Send + Sync>;

/// Last tier observed for a key by the prober.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyTier {
    #[default]
    Unknown,
    Paid,
    Standard,
}

impl KeyTier {
    pub fn label(&self) -> &'static str {
        match self {
            KeyTier::Unknown => "unknown",
            KeyTier::Paid => "paid",
            KeyTier::Standard => "standard",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    Duplicate,
    InvalidFormat,
    BindFailed(String),
}

/// Aggregate result of seeding the pool from a key blob.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct AddSummary {
    pub added: usize,
    pub duplicates: usize,
    pub invalid: usize,
    pub bind_failed: usize,
}

#[derive(Debug, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SetActiveOutcome {
    Switched,
    OutOfRange,
    BindFailed(String),
}

#[derive(Debug, PartialEq, Eq)]
pub enum RotateOutcome {
    Switched { index: usize },
    Exhausted,
}

/// Display row for one pooled key.
#[derive(Debug, Clone)]
pub struct KeyEntry {
    pub index: usize,
    pub masked: String,
    pub tier: KeyTier,
    pub active: bool,
    pub cooling: Option<Duration>,
}

struct KeyRecord {
    secret: String,
    tier: KeyTier,
}

struct Inner {
    keys: Vec<KeyRecord>,
    active: usize,
    client: Option<Arc<dyn GenerativeClient>>,
}

/// Ordered key pool with a single active credential.
pub struct KeyPool {
    inner: Mutex<Inner>,
    pub(crate) cooldowns: CooldownTable,
    binder: Binder,
}

impl KeyPool {
    pub fn new(binder: Binder) -> Self {
        Self {
            inner: Mutex::new(Inner {
                keys: Vec::new(),
                active: 0,
                client: None,
            }),
            cooldowns: CooldownTable::new(),
            binder,
        }
    }

    pub(crate) fn bind(&self, key: &str) -> std::result::Result<Arc<dyn GenerativeClient>, BindError> {
        (self.binder)(key)
    }

    /// Add one key. The first key in an empty pool is bound immediately;
    /// if binding fails the insert is rolled back so the pool never holds
    /// an active key without a client.
    pub async fn add(&self, key: &str) -> AddOutcome {
        let key = key.trim();
        if !valid_key_format(key) {
            return AddOutcome::InvalidFormat;
        }

        let mut inner = self.inner.lock().await;
        if inner.keys.iter().any(|r| r.secret == key) {
            return AddOutcome::Duplicate;
        }

        inner.keys.push(KeyRecord {
            secret: key.to_owned(),
            tier: KeyTier::Unknown,
        });

        if inner.keys.len() == 1 {
            match self.bind(key) {
                Ok(client) => {
                    inner.active = 0;
                    inner.client = Some(client);
                }
                Err(e) => {
                    inner.keys.pop();
                    warn!(error = %e, "first key failed to bind, rolled back");
                    return AddOutcome::BindFailed(e.to_string());
                }
            }
        }

        info!(total = inner.keys.len(), "key added to pool");
        AddOutcome::Added
    }

    /// Add a batch of seed keys, tallying each outcome.
    pub async fn add_all<I>(&self, keys: I) -> AddSummary
    where
        I: IntoIterator<Item = String>,
    {
        let mut summary = AddSummary::default();
        for key in keys {
            match self.add(&key).await {
                AddOutcome::Added => summary.added += 1,
                AddOutcome::Duplicate => summary.duplicates += 1,
                AddOutcome::InvalidFormat => summary.invalid += 1,
                AddOutcome::BindFailed(_) => summary.bind_failed += 1,
            }
        }
        summary
    }

    /// Remove a key by value.
    ///
    /// If a non-active key is removed, the active key and its bound client
    /// are untouched (only the active index is recomputed by value). If the
    /// active key is removed, the pool falls back to index 0 and rebinds;
    /// a rebind failure leaves the pool clientless rather than pointing at
    /// a stale credential.
    pub async fn remove(&self, key: &str) -> RemoveOutcome {
        let mut inner = self.inner.lock().await;
        let Some(pos) = inner.keys.iter().position(|r| r.secret == key) else {
            return RemoveOutcome::NotFound;
        };

        let active_secret = inner.keys.get(inner.active).map(|r| r.secret.clone());
        inner.keys.remove(pos);

        if inner.keys.is_empty() {
            inner.active = 0;
            inner.client = None;
            info!("all keys removed, pool is empty");
            return RemoveOutcome::Removed;
        }

        if active_secret.as_deref() != Some(key) {
            // active key unchanged; only its index may have shifted
            inner.active = active_secret
                .and_then(|s| inner.keys.iter().position(|r| r.secret == s))
                .unwrap_or(0);
            info!(active = inner.active, total = inner.keys.len(), "key removed");
            return RemoveOutcome::Removed;
        }

        inner.active = 0;
        let secret = inner.keys[0].secret.clone();
        match self.bind(&secret) {
            Ok(client) => inner.client = Some(client),
            Err(e) => {
                warn!(index = inner.active, error = %e, "rebind after removal failed");
                inner.client = None;
            }
        }
        info!(active = inner.active, total = inner.keys.len(), "key removed");
        RemoveOutcome::Removed
    }

    /// Drop every key and the bound client.
    pub async fn remove_all(&self) {
        let mut inner = self.inner.lock().await;
        inner.keys.clear();
        inner.active = 0;
        inner.client = None;
        info!("pool cleared");
    }

    /// Make the key at `index` active, binding it first. State is
    /// untouched when the bind fails.
    pub async fn set_active(&self, index: usize) -> SetActiveOutcome {
        let mut inner = self.inner.lock().await;
        if index >= inner.keys.len() {
            return SetActiveOutcome::OutOfRange;
        }
        let secret = inner.keys[index].secret.clone();
        match self.bind(&secret) {
            Ok(client) => {
                inner.active = index;
                inner.client = Some(client);
                info!(index, "active key set");
                SetActiveOutcome::Switched
            }
            Err(e) => {
                warn!(index, error = %e, "bind failed, active key unchanged");
                SetActiveOutcome::BindFailed(e.to_string())
            }
        }
    }

    /// Circularly scan for the next non-cooling, bindable key.
    ///
    /// A pool of zero or one keys has nothing to rotate to. Keys in
    /// cooldown and keys that fail to bind are skipped; if the scan wraps
    /// without a hit the active key is left unchanged.
    pub async fn rotate_next(&self) -> RotateOutcome {
        let mut inner = self.inner.lock().await;
        let n = inner.keys.len();
        if n <= 1 {
            return RotateOutcome::Exhausted;
        }

        for step in 1..n {
            let index = (inner.active + step) % n;
            let secret = inner.keys[index].secret.clone();

            if self.cooldowns.remaining(&secret).await.is_some() {
                warn!(index, "skipping key in cooldown");
                continue;
            }

            match self.bind(&secret) {
                Ok(client) => {
                    inner.active = index;
                    inner.client = Some(client);
                    info!(index, "rotated to next key");
                    return RotateOutcome::Switched { index };
                }
                Err(e) => {
                    warn!(index, error = %e, "bind failed during rotation");
                    continue;
                }
            }
        }
        RotateOutcome::Exhausted
    }

    /// Park a key after a quota error, using the upstream retry hint when
    /// present.
    pub async fn report_rate_limited(&self, key: &str, retry_after: Option<Duration>) {
        let cooldown = retry_after.unwrap_or(DEFAULT_COOLDOWN);
        warn!(cooldown_secs = cooldown.as_secs(), "key rate limited, entering cooldown");
        self.cooldowns.set(key, cooldown).await;
    }

    /// Record the tiers a probe run observed.
    pub async fn apply_report(&self, report: &ProbeReport) {
        let mut inner = self.inner.lock().await;
        let observations = report
            .paid
            .iter()
            .map(|p| (p, KeyTier::Paid))
            .chain(report.standard.iter().map(|p| (p, KeyTier::Standard)));
        for (probed, tier) in observations {
            if let Some(record) = inner.keys.iter_mut().find(|r| r.secret == probed.secret) {
                record.tier = tier;
            }
        }
    }

    /// Client bound to the current active key, if any.
    pub async fn client(&self) -> Option<Arc<dyn GenerativeClient>> {
        self.inner.lock().await.client.clone()
    }

    /// Secret of the current active key, if any. Used to attribute quota
    /// errors back to the credential that produced them.
    pub async fn active_secret(&self) -> Option<String> {
        let inner = self.inner.lock().await;
        inner.keys.get(inner.active).map(|r| r.secret.clone())
    }

    /// Active key's secret paired with its bound client, taken under a
    /// single lock acquisition. A concurrent rotation cannot tear the pair.
    pub async fn active_binding(&self) -> Option<(String, Arc<dyn GenerativeClient>)> {
        let inner = self.inner.lock().await;
        let secret = inner.keys.get(inner.active)?.secret.clone();
        let client = inner.client.clone()?;
        Some((secret, client))
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.keys.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Snapshot of raw key values in pool order (for probing).
    pub async fn secrets(&self) -> Vec<String> {
        self.inner
            .lock()
            .await
            .keys
            .iter()
            .map(|r| r.secret.clone())
            .collect()
    }

    /// Display rows with masked keys, one marked active.
    pub async fn entries(&self) -> Vec<KeyEntry> {
        let inner = self.inner.lock().await;
        let mut entries = Vec::with_capacity(inner.keys.len());
        for (index, record) in inner.keys.iter().enumerate() {
            entries.push(KeyEntry {
                index,
                masked: mask_key(&record.secret),
                tier: record.tier,
                active: index == inner.active,
                cooling: self.cooldowns.remaining(&record.secret).await,
            });
        }
        entries
    }
}

/// Keys are at least 8 chars of `[A-Za-z0-9._-]`.
pub(crate) fn valid_key_format(key: &str) -> bool {
    key.len() >= 8
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

/// Mask a key for display, keeping only the outer 4 chars of long keys.
pub fn mask_key(key: &str) -> String {
    let count = key.chars().count();
    if count < 12 {
        return "…".to_owned();
    }
    let prefix: String = key.chars().take(4).collect();
    let suffix: String = key.chars().skip(count - 4).collect();
    format!("{prefix}…{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use gemini_client::{
        ChatSession, Content, GenerateConfig, GenerateOutput, Result as ApiResult, TokenStream,
    };

    struct StubClient;

    impl GenerativeClient for StubClient {
        fn generate<'a>(
            &'a self,
            _model: &'a str,
            _contents: Vec<Content>,
            _config: &'a GenerateConfig,
        ) -> Pin<Box<dyn Future<Output = ApiResult<GenerateOutput>> + Send + 'a>> {
            Box::pin(async { Ok(GenerateOutput::default()) })
        }

        fn generate_stream<'a>(
            &'a self,
            _model: &'a str,
            _contents: Vec<Content>,
            _config: &'a GenerateConfig,
        ) -> Pin<Box<dyn Future<Output = ApiResult<TokenStream>> + Send + 'a>> {
            Box::pin(async {
                Err(gemini_client::ApiError::InvalidResponse(
                    "stub does not stream".into(),
                ))
            })
        }

        fn start_chat(&self, _model: &str, _config: GenerateConfig) -> Box<dyn ChatSession> {
            unimplemented!("not exercised by pool tests")
        }
    }

    /// Binder that always succeeds.
    fn ok_binder() -> Binder {
        Arc::new(|_key: &str| Ok(Arc::new(StubClient) as Arc<dyn GenerativeClient>))
    }

    /// Binder that succeeds exactly once, then fails every further call.
    fn bind_once_binder(calls: Arc<AtomicUsize>) -> Binder {
        Arc::new(move |_key: &str| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(Arc::new(StubClient) as Arc<dyn GenerativeClient>)
            } else {
                Err(BindError("scripted bind failure".into()))
            }
        })
    }

    /// Binder that fails for keys containing "bad" and counts bind calls.
    fn selective_binder(calls: Arc<AtomicUsize>) -> Binder {
        Arc::new(move |key: &str| {
            calls.fetch_add(1, Ordering::SeqCst);
            if key.contains("bad") {
                Err(BindError("scripted bind failure".into()))
            } else {
                Ok(Arc::new(StubClient) as Arc<dyn GenerativeClient>)
            }
        })
    }

    const K1: &str = "AIzaSyTestKey00000001";
    const K2: &str = "AIzaSyTestKey00000002";
    const K3: &str = "AIzaSyTestKey00000003";

    #[tokio::test]
    async fn add_rejects_short_keys() {
        let pool = KeyPool::new(ok_binder());
        assert_eq!(pool.add("short").await, AddOutcome::InvalidFormat);
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn add_rejects_bad_charset() {
        let pool = KeyPool::new(ok_binder());
        assert_eq!(pool.add("has space in it").await, AddOutcome::InvalidFormat);
        assert_eq!(pool.add("AIza/Sy+Key=").await, AddOutcome::InvalidFormat);
    }

    #[tokio::test]
    async fn add_trims_and_detects_duplicates() {
        let pool = KeyPool::new(ok_binder());
        assert_eq!(pool.add(K1).await, AddOutcome::Added);
        assert_eq!(pool.add(&format!("  {K1}  ")).await, AddOutcome::Duplicate);
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn first_add_binds_client() {
        let pool = KeyPool::new(ok_binder());
        assert!(pool.client().await.is_none());
        pool.add(K1).await;
        assert!(pool.client().await.is_some());
        assert_eq!(pool.active_secret().await.as_deref(), Some(K1));
    }

    #[tokio::test]
    async fn first_add_bind_failure_rolls_back() {
        let pool = KeyPool::new(selective_binder(Arc::new(AtomicUsize::new(0))));
        match pool.add("badkey-00000001").await {
            AddOutcome::BindFailed(_) => {}
            other => panic!("expected BindFailed, got {other:?}"),
        }
        assert!(pool.is_empty().await);
        assert!(pool.client().await.is_none());
    }

    #[tokio::test]
    async fn second_add_does_not_rebind() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pool = KeyPool::new(selective_binder(calls.clone()));
        pool.add(K1).await;
        pool.add(K2).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(pool.active_secret().await.as_deref(), Some(K1));
    }

    #[tokio::test]
    async fn add_all_tallies_outcomes() {
        let pool = KeyPool::new(selective_binder(Arc::new(AtomicUsize::new(0))));
        pool.add(K1).await;
        let summary = pool
            .add_all(vec![
                K2.to_owned(),
                K1.to_owned(),   // duplicate
                "nope".to_owned(), // invalid
                K3.to_owned(),
            ])
            .await;
        assert_eq!(
            summary,
            AddSummary {
                added: 2,
                duplicates: 1,
                invalid: 1,
                bind_failed: 0
            }
        );
        assert_eq!(pool.len().await, 3);
    }

    #[tokio::test]
    async fn rotate_with_one_key_is_exhausted() {
        let pool = KeyPool::new(ok_binder());
        pool.add(K1).await;
        assert_eq!(pool.rotate_next().await, RotateOutcome::Exhausted);
        assert_eq!(pool.active_secret().await.as_deref(), Some(K1));
    }

    #[tokio::test]
    async fn rotate_advances_circularly() {
        let pool = KeyPool::new(ok_binder());
        pool.add(K1).await;
        pool.add(K2).await;
        pool.add(K3).await;

        assert_eq!(pool.rotate_next().await, RotateOutcome::Switched { index: 1 });
        assert_eq!(pool.rotate_next().await, RotateOutcome::Switched { index: 2 });
        assert_eq!(pool.rotate_next().await, RotateOutcome::Switched { index: 0 });
    }

    #[tokio::test]
    async fn rotate_skips_cooling_keys() {
        let pool = KeyPool::new(ok_binder());
        pool.add(K1).await;
        pool.add(K2).await;
        pool.add(K3).await;
        pool.report_rate_limited(K2, None).await;

        assert_eq!(pool.rotate_next().await, RotateOutcome::Switched { index: 2 });
    }

    #[tokio::test]
    async fn rotate_skips_unbindable_keys() {
        let pool = KeyPool::new(selective_binder(Arc::new(AtomicUsize::new(0))));
        pool.add(K1).await;
        pool.add("badkey-00000002").await;
        pool.add(K3).await;

        assert_eq!(pool.rotate_next().await, RotateOutcome::Switched { index: 2 });
    }

    #[tokio::test]
    async fn rotate_all_cooling_is_exhausted_and_keeps_active() {
        let pool = KeyPool::new(ok_binder());
        pool.add(K1).await;
        pool.add(K2).await;
        pool.report_rate_limited(K2, None).await;

        assert_eq!(pool.rotate_next().await, RotateOutcome::Exhausted);
        assert_eq!(pool.active_secret().await.as_deref(), Some(K1));
    }

    #[tokio::test]
    async fn cooldown_expiry_makes_key_rotatable_again() {
        let pool = KeyPool::new(ok_binder());
        pool.add(K1).await;
        pool.add(K2).await;
        pool.report_rate_limited(K2, Some(Duration::from_millis(0))).await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(pool.rotate_next().await, RotateOutcome::Switched { index: 1 });
    }

    #[tokio::test]
    async fn remove_nonactive_preserves_active_key() {
        let pool = KeyPool::new(ok_binder());
        pool.add(K1).await;
        pool.add(K2).await;
        pool.add(K3).await;
        pool.set_active(2).await;

        assert_eq!(pool.remove(K1).await, RemoveOutcome::Removed);
        // K3 shifted from index 2 to 1 but stays active
        assert_eq!(pool.active_secret().await.as_deref(), Some(K3));
    }

    #[tokio::test]
    async fn remove_nonactive_keeps_bound_client() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pool = KeyPool::new(bind_once_binder(calls.clone()));
        pool.add(K1).await;
        pool.add(K2).await;

        assert_eq!(pool.remove(K2).await, RemoveOutcome::Removed);
        assert_eq!(pool.active_secret().await.as_deref(), Some(K1));
        assert!(pool.client().await.is_some());
        // the unchanged active key was not rebound
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn remove_active_falls_back_to_first() {
        let pool = KeyPool::new(ok_binder());
        pool.add(K1).await;
        pool.add(K2).await;
        pool.set_active(1).await;

        assert_eq!(pool.remove(K2).await, RemoveOutcome::Removed);
        assert_eq!(pool.active_secret().await.as_deref(), Some(K1));
        assert!(pool.client().await.is_some());
    }

    #[tokio::test]
    async fn remove_last_key_clears_client() {
        let pool = KeyPool::new(ok_binder());
        pool.add(K1).await;
        assert_eq!(pool.remove(K1).await, RemoveOutcome::Removed);
        assert!(pool.is_empty().await);
        assert!(pool.client().await.is_none());
    }

    #[tokio::test]
    async fn remove_unknown_key_is_not_found() {
        let pool = KeyPool::new(ok_binder());
        pool.add(K1).await;
        assert_eq!(pool.remove(K2).await, RemoveOutcome::NotFound);
    }

    #[tokio::test]
    async fn remove_all_empties_pool() {
        let pool = KeyPool::new(ok_binder());
        pool.add(K1).await;
        pool.add(K2).await;
        pool.remove_all().await;
        assert!(pool.is_empty().await);
        assert!(pool.client().await.is_none());
    }

    #[tokio::test]
    async fn set_active_out_of_range() {
        let pool = KeyPool::new(ok_binder());
        pool.add(K1).await;
        assert_eq!(pool.set_active(5).await, SetActiveOutcome::OutOfRange);
    }

    #[tokio::test]
    async fn set_active_bind_failure_keeps_state() {
        let pool = KeyPool::new(selective_binder(Arc::new(AtomicUsize::new(0))));
        pool.add(K1).await;
        pool.add("badkey-00000002").await;

        match pool.set_active(1).await {
            SetActiveOutcome::BindFailed(_) => {}
            other => panic!("expected BindFailed, got {other:?}"),
        }
        assert_eq!(pool.active_secret().await.as_deref(), Some(K1));
    }

    #[tokio::test]
    async fn entries_mask_keys_and_mark_active() {
        let pool = KeyPool::new(ok_binder());
        pool.add(K1).await;
        pool.add(K2).await;

        let entries = pool.entries().await;
        assert_eq!(entries.len(), 2);
        assert!(entries[0].active);
        assert!(!entries[1].active);
        assert_eq!(entries[0].masked, "AIza…0001");
        assert!(!entries[1].masked.contains(K2));
    }

    #[tokio::test]
    async fn active_binding_pairs_secret_with_client() {
        let pool = KeyPool::new(ok_binder());
        assert!(pool.active_binding().await.is_none());
        pool.add(K1).await;

        let (secret, _client) = pool.active_binding().await.unwrap();
        assert_eq!(secret, K1);
    }

    #[test]
    fn mask_short_keys_completely() {
        assert_eq!(mask_key("12345678"), "…");
        assert_eq!(mask_key("AIzaSyTestKey00000001"), "AIza…0001");
    }

    #[test]
    fn mask_handles_multibyte_keys() {
        assert_eq!(mask_key("ключ-секрет-0001"), "ключ…0001");
        assert_eq!(mask_key("ключ-001"), "…");
    }
}
