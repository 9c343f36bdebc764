//! Cache warmer (spec section 4.G): a fixed worker pool that loads a
//! strategy-defined key set into the remote tier ahead of traffic on a
//! recurring interval, skipping keys already present and tagging writes
//! with a 24h TTL.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::Result;

use super::remote::DistributedCache;

#[async_trait]
pub trait WarmupStrategy: Send + Sync {
    /// Keys to ensure are populated.
    async fn keys_to_warm(&self) -> Vec<String>;
    /// Loads the value for a key from the system of record.
    async fn load(&self, key: &str) -> Result<Vec<u8>>;
    /// Whether a key is still worth warming (e.g. not already fresh).
    async fn should_warm(&self, _key: &str) -> bool {
        true
    }
}

const DEFAULT_WARM_INTERVAL_SECS: u64 = 300;

pub struct CacheWarmer {
    strategy: Arc<dyn WarmupStrategy>,
    remote: Arc<dyn DistributedCache>,
    workers: usize,
    interval: Duration,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl CacheWarmer {
    pub fn new(strategy: Arc<dyn WarmupStrategy>, remote: Arc<dyn DistributedCache>, workers: usize) -> Self {
        Self {
            strategy,
            remote,
            workers: workers.max(1),
            interval: Duration::from_secs(DEFAULT_WARM_INTERVAL_SECS),
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// How often a background [`Self::start`] fires a full pass.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Spawns a scheduler that fires a fixed-worker-pool pass over
    /// `keys_to_warm` every `interval` (spec section 4.G); idempotent —
    /// a second call while running is a no-op.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let strategy = Arc::clone(&self.strategy);
        let remote = Arc::clone(&self.remote);
        let workers = self.workers;
        let interval = self.interval;
        let running = Arc::clone(&self.running);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick fires immediately; consume it so the pool runs
            // right away rather than waiting a full interval.
            ticker.tick().await;
            while running.load(Ordering::SeqCst) {
                run_pass(Arc::clone(&strategy), Arc::clone(&remote), workers).await;
                ticker.tick().await;
            }
        });

        *self.handle.lock() = Some(handle);
    }

    /// Stops the background scheduler; any in-flight pass is aborted.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Synchronous single pass, bypassing the worker pool — useful for
    /// tests and ad hoc reindexing.
    pub async fn warmup_now(&self) -> usize {
        let keys = self.strategy.keys_to_warm().await;
        let mut warmed = 0;
        for key in keys {
            if warm_one(&key, &*self.strategy, &*self.remote).await {
                warmed += 1;
            }
        }
        warmed
    }
}

impl Drop for CacheWarmer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_pass(strategy: Arc<dyn WarmupStrategy>, remote: Arc<dyn DistributedCache>, workers: usize) {
    let keys = strategy.keys_to_warm().await;
    let (tx, rx) = mpsc::channel::<String>(keys.len().max(1));
    let rx = Arc::new(tokio::sync::Mutex::new(rx));

    for key in keys {
        if tx.send(key).await.is_err() {
            break;
        }
    }
    drop(tx);

    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let rx = Arc::clone(&rx);
        let strategy = Arc::clone(&strategy);
        let remote = Arc::clone(&remote);
        handles.push(tokio::spawn(async move {
            warm_loop(rx, strategy, remote).await;
        }));
    }
    for handle in handles {
        let _ = handle.await;
    }
}

async fn warm_loop(
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<String>>>,
    strategy: Arc<dyn WarmupStrategy>,
    remote: Arc<dyn DistributedCache>,
) {
    loop {
        let key = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        match key {
            Some(key) => {
                warm_one(&key, &*strategy, &*remote).await;
            }
            None => break,
        }
    }
}

async fn warm_one(key: &str, strategy: &dyn WarmupStrategy, remote: &dyn DistributedCache) -> bool {
    if remote.get(key).await.unwrap_or(None).is_some() {
        return false;
    }
    if !strategy.should_warm(key).await {
        return false;
    }
    match strategy.load(key).await {
        Ok(value) => remote.set(key, value, Some(Duration::from_secs(super::WARM_TTL_SECONDS))).await.is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::remote::InProcessRemoteCache;
    use std::collections::HashMap;

    struct FixedStrategy {
        data: HashMap<String, Vec<u8>>,
    }

    #[async_trait]
    impl WarmupStrategy for FixedStrategy {
        async fn keys_to_warm(&self) -> Vec<String> {
            self.data.keys().cloned().collect()
        }

        async fn load(&self, key: &str) -> Result<Vec<u8>> {
            Ok(self.data.get(key).cloned().unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn warmup_now_populates_remote() {
        let mut data = HashMap::new();
        data.insert("a".to_string(), vec![1]);
        data.insert("b".to_string(), vec![2]);
        let strategy = Arc::new(FixedStrategy { data });
        let remote = Arc::new(InProcessRemoteCache::new("ns"));
        let warmer = CacheWarmer::new(strategy, Arc::clone(&remote) as Arc<dyn DistributedCache>, 2);

        assert_eq!(warmer.warmup_now().await, 2);
        assert_eq!(remote.get("a").await.unwrap(), Some(vec![1]));
    }

    #[tokio::test]
    async fn warmup_now_skips_keys_already_present() {
        let mut data = HashMap::new();
        data.insert("a".to_string(), vec![1]);
        let strategy = Arc::new(FixedStrategy { data });
        let remote = Arc::new(InProcessRemoteCache::new("ns"));
        remote.set("a", vec![99], None).await.unwrap();
        let warmer = CacheWarmer::new(strategy, Arc::clone(&remote) as Arc<dyn DistributedCache>, 1);

        assert_eq!(warmer.warmup_now().await, 0);
        assert_eq!(remote.get("a").await.unwrap(), Some(vec![99]));
    }

    struct RefusingStrategy;

    #[async_trait]
    impl WarmupStrategy for RefusingStrategy {
        async fn keys_to_warm(&self) -> Vec<String> {
            vec!["a".to_string()]
        }
        async fn load(&self, _key: &str) -> Result<Vec<u8>> {
            Ok(vec![1])
        }
        async fn should_warm(&self, _key: &str) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn should_warm_false_skips_load() {
        let remote = Arc::new(InProcessRemoteCache::new("ns"));
        let warmer = CacheWarmer::new(Arc::new(RefusingStrategy), Arc::clone(&remote) as Arc<dyn DistributedCache>, 1);
        assert_eq!(warmer.warmup_now().await, 0);
        assert_eq!(remote.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn start_is_idempotent_and_runs_a_pass_immediately() {
        let remote = Arc::new(InProcessRemoteCache::new("ns"));
        let mut data = HashMap::new();
        data.insert("a".to_string(), vec![1]);
        let warmer = CacheWarmer::new(Arc::new(FixedStrategy { data }), Arc::clone(&remote) as Arc<dyn DistributedCache>, 1)
            .with_interval(Duration::from_millis(20));
        warmer.start();
        assert!(warmer.is_running());
        warmer.start();

        tokio::time::sleep(Duration::from_millis(15)).await;
        assert_eq!(remote.get("a").await.unwrap(), Some(vec![1]));

        warmer.stop();
        assert!(!warmer.is_running());
    }

    #[tokio::test]
    async fn start_fires_again_on_subsequent_intervals() {
        let remote = Arc::new(InProcessRemoteCache::new("ns"));
        let mut data = HashMap::new();
        data.insert("a".to_string(), vec![1]);
        let warmer = CacheWarmer::new(Arc::new(FixedStrategy { data }), Arc::clone(&remote) as Arc<dyn DistributedCache>, 1)
            .with_interval(Duration::from_millis(15));
        warmer.start();

        tokio::time::sleep(Duration::from_millis(10)).await;
        remote.delete("a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;

        assert_eq!(remote.get("a").await.unwrap(), Some(vec![1]));
        warmer.stop();
    }
}
