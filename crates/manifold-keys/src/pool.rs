use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

/// A credential checked out of the pool. Returned to exactly one of the
/// three buckets via `release`, `quarantine`, or `retire`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub secret: String,
}

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

/// Aggregate per-state counts for one provider (admin surface, and the
/// executor's retry bound).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProviderCounts {
    pub available: usize,
    pub quarantined: usize,
    pub retired: usize,
}

#[derive(Debug)]
struct QuarantinedKey {
    secret: String,
    until: Instant,
    reason: String,
}

#[derive(Debug)]
struct RetiredKey {
    secret: String,
    #[allow(dead_code)]
    reason: String,
}

#[derive(Debug, Default)]
struct Buckets {
    available: VecDeque<String>,
    /// Secrets currently held by an executor iteration.
    checked_out: HashSet<String>,
    quarantined: Vec<QuarantinedKey>,
    retired: Vec<RetiredKey>,
}

impl Buckets {
    fn holds(&self, secret: &str) -> bool {
        self.available.iter().any(|s| s == secret)
            || self.quarantined.iter().any(|k| k.secret == secret)
            || self.retired.iter().any(|k| k.secret == secret)
    }
}

/// Concurrency-safe three-state credential pool.
///
/// All transitions take the write lock; `snapshot` takes the read lock.
/// The pool itself never fails — exhaustion is `acquire` returning `None`.
pub struct KeyPool {
    providers: RwLock<HashMap<String, Buckets>>,
    quarantine_enabled: bool,
    quarantine_duration: Duration,
}

impl KeyPool {
    pub fn new(quarantine_enabled: bool, quarantine_duration: Duration) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            quarantine_enabled,
            quarantine_duration,
        }
    }

    /// Append secrets to a provider's available bucket in the given order.
    /// Secrets the pool already knows are skipped.
    pub fn seed(&self, provider: &str, secrets: impl IntoIterator<Item = String>) {
        let mut map = self.write();
        let buckets = map.entry(provider.to_string()).or_default();
        let mut added = 0usize;
        for secret in secrets {
            if secret.trim().is_empty() || buckets.holds(&secret) || buckets.checked_out.contains(&secret) {
                continue;
            }
            buckets.available.push_back(secret);
            added += 1;
        }
        info!(provider, added, "seeded credential pool");
    }

    /// Pop the head of the available FIFO. `None` when the provider has no
    /// available credentials.
    pub fn acquire(&self, provider: &str) -> Option<Credential> {
        let mut map = self.write();
        let buckets = map.get_mut(provider)?;
        let secret = buckets.available.pop_front()?;
        buckets.checked_out.insert(secret.clone());
        debug!(provider, "credential acquired");
        Some(Credential { secret })
    }

    /// Return a checked-out credential to the tail of the available FIFO.
    /// Defensive no-op when the pool does not hold this credential checked
    /// out (double release, or a secret it never issued).
    pub fn release(&self, provider: &str, cred: &Credential) {
        let mut map = self.write();
        let Some(buckets) = map.get_mut(provider) else {
            return;
        };
        if !buckets.checked_out.remove(&cred.secret) {
            debug!(provider, "release ignored: credential not checked out");
            return;
        }
        buckets.available.push_back(cred.secret.clone());
    }

    /// Move a checked-out credential into time-boxed isolation. With
    /// quarantine disabled this behaves exactly like `release`.
    pub fn quarantine(&self, provider: &str, cred: &Credential, reason: &str) {
        if !self.quarantine_enabled {
            self.release(provider, cred);
            return;
        }
        let mut map = self.write();
        let Some(buckets) = map.get_mut(provider) else {
            return;
        };
        if !buckets.checked_out.remove(&cred.secret) {
            debug!(provider, "quarantine ignored: credential not checked out");
            return;
        }
        warn!(provider, reason, "credential quarantined");
        buckets.quarantined.push(QuarantinedKey {
            secret: cred.secret.clone(),
            until: Instant::now() + self.quarantine_duration,
            reason: reason.to_string(),
        });
    }

    /// Permanently remove a credential from rotation. Idempotent: retiring
    /// an already-retired credential changes nothing.
    pub fn retire(&self, provider: &str, cred: &Credential, reason: &str) {
        let mut map = self.write();
        let Some(buckets) = map.get_mut(provider) else {
            return;
        };
        if buckets.retired.iter().any(|k| k.secret == cred.secret) {
            return;
        }
        // the credential may arrive from any live state
        buckets.checked_out.remove(&cred.secret);
        buckets.available.retain(|s| s != &cred.secret);
        buckets.quarantined.retain(|k| k.secret != cred.secret);
        warn!(provider, reason, "credential retired");
        buckets.retired.push(RetiredKey {
            secret: cred.secret.clone(),
            reason: reason.to_string(),
        });
    }

    /// Aggregate counts per provider per state.
    pub fn snapshot(&self) -> HashMap<String, ProviderCounts> {
        let map = self.read();
        map.iter()
            .map(|(provider, buckets)| {
                (
                    provider.clone(),
                    ProviderCounts {
                        available: buckets.available.len(),
                        quarantined: buckets.quarantined.len(),
                        retired: buckets.retired.len(),
                    },
                )
            })
            .collect()
    }

    /// Available-credential count for one provider.
    pub fn available_count(&self, provider: &str) -> usize {
        self.read()
            .get(provider)
            .map(|b| b.available.len())
            .unwrap_or(0)
    }

    pub fn quarantine_enabled(&self) -> bool {
        self.quarantine_enabled
    }

    /// Move every quarantined credential whose expiry has passed back to
    /// the available FIFO. Returns how many were restored.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let mut restored = 0usize;
        let mut map = self.write();
        for (provider, buckets) in map.iter_mut() {
            let mut remaining = Vec::with_capacity(buckets.quarantined.len());
            for key in buckets.quarantined.drain(..) {
                if key.until <= now {
                    debug!(provider, reason = %key.reason, "credential restored from quarantine");
                    buckets.available.push_back(key.secret);
                    restored += 1;
                } else {
                    remaining.push(key);
                }
            }
            buckets.quarantined = remaining;
        }
        restored
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Buckets>> {
        self.providers.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Buckets>> {
        self.providers.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> KeyPool {
        let p = KeyPool::new(true, Duration::from_secs(60));
        p.seed("openai", ["k1".to_string(), "k2".to_string(), "k3".to_string()]);
        p
    }

    #[test]
    fn acquire_is_fifo_and_release_appends_to_tail() {
        let p = pool();
        let c1 = p.acquire("openai").unwrap();
        assert_eq!(c1.secret, "k1");
        p.release("openai", &c1);

        // k1 went to the tail: next acquires are k2, k3, then k1 again
        assert_eq!(p.acquire("openai").unwrap().secret, "k2");
        assert_eq!(p.acquire("openai").unwrap().secret, "k3");
        assert_eq!(p.acquire("openai").unwrap().secret, "k1");
        assert!(p.acquire("openai").is_none());
    }

    #[test]
    fn release_preserves_order_across_multiple_keys() {
        let p = pool();
        let a = p.acquire("openai").unwrap();
        let b = p.acquire("openai").unwrap();
        let c = p.acquire("openai").unwrap();
        p.release("openai", &b);
        p.release("openai", &c);
        p.release("openai", &a);

        assert_eq!(p.acquire("openai").unwrap().secret, b.secret);
        assert_eq!(p.acquire("openai").unwrap().secret, c.secret);
        assert_eq!(p.acquire("openai").unwrap().secret, a.secret);
    }

    #[test]
    fn double_release_is_a_no_op() {
        let p = pool();
        let c = p.acquire("openai").unwrap();
        p.release("openai", &c);
        p.release("openai", &c);
        assert_eq!(p.snapshot()["openai"].available, 3);
    }

    #[test]
    fn release_of_unknown_secret_is_a_no_op() {
        let p = pool();
        p.release("openai", &Credential::new("stranger"));
        p.release("nobody", &Credential::new("stranger"));
        assert_eq!(p.snapshot()["openai"].available, 3);
    }

    #[test]
    fn quarantine_moves_to_quarantined_bucket() {
        let p = pool();
        let c = p.acquire("openai").unwrap();
        p.quarantine("openai", &c, "429");
        let counts = p.snapshot()["openai"];
        assert_eq!(counts.available, 2);
        assert_eq!(counts.quarantined, 1);
    }

    #[test]
    fn quarantine_disabled_behaves_as_release() {
        let p = KeyPool::new(false, Duration::from_secs(60));
        p.seed("openai", ["k1".to_string(), "k2".to_string()]);
        let c = p.acquire("openai").unwrap();
        p.quarantine("openai", &c, "429");
        let counts = p.snapshot()["openai"];
        assert_eq!(counts.available, 2);
        assert_eq!(counts.quarantined, 0);
        // and it went to the tail
        assert_eq!(p.acquire("openai").unwrap().secret, "k2");
        assert_eq!(p.acquire("openai").unwrap().secret, "k1");
    }

    #[test]
    fn retire_is_terminal_and_idempotent() {
        let p = pool();
        let c = p.acquire("openai").unwrap();
        p.retire("openai", &c, "401");
        p.retire("openai", &c, "401");
        let counts = p.snapshot()["openai"];
        assert_eq!(counts.retired, 1);
        assert_eq!(counts.available, 2);

        // a retired credential cannot be released back
        p.release("openai", &c);
        assert_eq!(p.snapshot()["openai"].available, 2);
    }

    #[test]
    fn sweep_restores_expired_quarantine_fifo() {
        let p = KeyPool::new(true, Duration::ZERO);
        p.seed("openai", ["k1".to_string(), "k2".to_string()]);
        let a = p.acquire("openai").unwrap();
        let b = p.acquire("openai").unwrap();
        p.quarantine("openai", &a, "500");
        p.quarantine("openai", &b, "500");

        assert_eq!(p.sweep_expired(Instant::now()), 2);
        assert_eq!(p.acquire("openai").unwrap().secret, a.secret);
        assert_eq!(p.acquire("openai").unwrap().secret, b.secret);
    }

    #[test]
    fn sweep_leaves_unexpired_entries() {
        let p = KeyPool::new(true, Duration::from_secs(3600));
        p.seed("openai", ["k1".to_string()]);
        let c = p.acquire("openai").unwrap();
        p.quarantine("openai", &c, "500");
        assert_eq!(p.sweep_expired(Instant::now()), 0);
        assert_eq!(p.snapshot()["openai"].quarantined, 1);
    }

    #[test]
    fn every_credential_is_in_exactly_one_bucket() {
        let p = pool();
        let c = p.acquire("openai").unwrap();
        p.quarantine("openai", &c, "500");
        // quarantined now; retire pulls it out of quarantine, not a copy
        p.retire("openai", &c, "401");
        let counts = p.snapshot()["openai"];
        assert_eq!(counts.available + counts.quarantined + counts.retired, 3);
        assert_eq!(counts.quarantined, 0);
        assert_eq!(counts.retired, 1);
    }
}
