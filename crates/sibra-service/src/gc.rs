//! Background sweeps.
//!
//! Temporary indexes are collected every 100 ms; the initiator's local
//! reservation records and fully expired steady entries are swept once
//! per maximum steady lifetime.

use std::{sync::Arc, time::Duration};

use sibra_core::{
    Environment, LOCAL_GC_INTERVAL_MS, LocalResvs, SibraAlgo, TEMP_GC_INTERVAL_MS,
};
use tokio::task::JoinHandle;
use tracing::trace;

/// Spawn the periodic sweeps. The returned handles abort on drop of the
/// embedding runtime; the tasks themselves run until aborted.
pub fn spawn_sweeps<E: Environment>(
    algo: Arc<SibraAlgo>,
    local_resvs: Arc<LocalResvs>,
    env: E,
) -> Vec<JoinHandle<()>> {
    let temp_env = env.clone();
    let temp_algo = Arc::clone(&algo);
    let temp = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(TEMP_GC_INTERVAL_MS));
        loop {
            interval.tick().await;
            let evicted = temp_algo.purge_temp(temp_env.now_unix_ms());
            if evicted > 0 {
                trace!(evicted, "temporary index sweep");
            }
        }
    });

    let steady = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(LOCAL_GC_INTERVAL_MS));
        loop {
            interval.tick().await;
            let now_ms = env.now_unix_ms();
            local_resvs.purge_expired(now_ms);
            let removed = algo.purge_steady(now_ms);
            trace!(removed, "steady entry sweep");
        }
    });

    vec![temp, steady]
}
