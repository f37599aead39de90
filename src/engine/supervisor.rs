//! Shard rebuild supervisor.
//!
//! A periodic task that sweeps the shard array and rebuilds any shard
//! whose tombstone density crossed the policy thresholds. Shards are
//! rebuilt independently with no global barrier, and a sweep never
//! fails; each rebuild is self-contained.

use crate::core::config::ShardsConfig;
use crate::engine::KvEngine;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

/// Spawn the supervisor bound to `engine`, sweeping every
/// `policy.check_freq()` until `shutdown` flips.
pub fn spawn(
    engine: Arc<KvEngine>,
    policy: ShardsConfig,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = policy.check_freq();
        let mut ticker = interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!("shard supervisor shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    let rebuilt = engine.map().rebuild_sweep(&policy);
                    if rebuilt > 0 {
                        tracing::debug!(rebuilt, "rebuilt sparse shards");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::EngineConfig;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn sweeps_on_ticks_and_stops_on_shutdown() {
        let engine = Arc::new(KvEngine::new(&EngineConfig {
            max_key_size: 64,
            max_value_size: 64,
            shards_count: 1,
        }));
        let policy = ShardsConfig {
            check_freq_ms: 50,
            sparse_ratio: 0.5,
            min_ops_until_rebuild: 6,
            min_deletes: 2,
        };

        for i in 0..4 {
            engine.put(format!("k{i}"), "v".into()).unwrap();
        }
        for i in 0..3 {
            engine.delete(&format!("k{i}")).unwrap();
        }
        assert_eq!(engine.map().shard_stats(0).puts, 4);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn(engine.clone(), policy, shutdown_rx);

        tokio::time::sleep(Duration::from_millis(120)).await;

        let stats = engine.map().shard_stats(0);
        assert_eq!(stats.puts, 0);
        assert_eq!(stats.deletes, 0);
        assert_eq!(stats.max_size, 1);
        assert_eq!(stats.len, 1);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
