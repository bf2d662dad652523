//! Process-wide lazily constructed [`Pool`], frozen after first read (§4.5).

use std::sync::{Arc, OnceLock};

use crate::pool::{Pool, PoolConfig};

static POOL: OnceLock<Arc<Pool>> = OnceLock::new();
static SHUTDOWN_HOOK: OnceLock<()> = OnceLock::new();

/// Return the process-wide pool, constructing it on first call with
/// `config`. Every later call ignores `config` and returns the pool built
/// on the first call — configuration is frozen after first read.
///
/// Construction itself pre-warms zero sessions so the caller is never
/// blocked on browser launches; a background task is spawned to reach
/// `config.min_sessions` via [`Pool::ensure_min`]. A process-exit shutdown
/// hook is installed once, on first construction.
pub async fn shared_pool(config: PoolConfig) -> Arc<Pool> {
    if let Some(pool) = POOL.get() {
        return Arc::clone(pool);
    }

    let zero_prewarm = PoolConfig {
        min_sessions: 0,
        ..config.clone()
    };
    let pool = Pool::with_launcher(
        zero_prewarm,
        Arc::new({
            let executable = config.browser_path.clone();
            move |port| {
                let executable = executable.clone();
                Box::pin(async move { crate::session::Session::launch(&executable, port).await })
            }
        }),
    )
    .await;

    match POOL.set(Arc::clone(&pool)) {
        Ok(()) => {
            let warm_up = Arc::clone(&pool);
            let min_sessions = config.min_sessions;
            tokio::spawn(async move {
                if min_sessions > 0 {
                    warm_up.ensure_min().await;
                }
            });
            install_shutdown_hook(Arc::clone(&pool));
            pool
        }
        Err(_) => {
            // Lost the race to another caller's concurrent first call.
            pool.shutdown().await;
            Arc::clone(POOL.get().expect("set by the winning caller"))
        }
    }
}

/// Return the already-constructed shared pool, if any.
#[must_use]
pub fn try_shared_pool() -> Option<Arc<Pool>> {
    POOL.get().cloned()
}

fn install_shutdown_hook(_pool: Arc<Pool>) {
    if SHUTDOWN_HOOK.set(()).is_err() {
        return;
    }
    // `libc::atexit` cannot capture state, so the hook reaches back into
    // the same OnceLock this module owns rather than closing over `pool`.
    extern "C" fn run_shutdown() {
        if let Some(pool) = POOL.get() {
            let pool = Arc::clone(pool);
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.block_on(pool.shutdown());
            } else if let Ok(rt) = tokio::runtime::Runtime::new() {
                rt.block_on(pool.shutdown());
            }
        }
    }
    unsafe {
        libc::atexit(run_shutdown);
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;

    fn test_config() -> PoolConfig {
        PoolConfig {
            browser_path: PathBuf::from("/nonexistent/chrome"),
            base_port: 19222,
            min_sessions: 0,
            max_sessions: 2,
            idle_timeout: Duration::from_secs(300),
            acquire_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn try_shared_pool_before_construction_is_none_or_preexisting() {
        // No assertion on `None` specifically: other tests in this binary
        // may have already constructed the singleton. Just confirm the
        // call does not panic and is consistent with `shared_pool`.
        let before = try_shared_pool();
        let pool = shared_pool(test_config()).await;
        let after = try_shared_pool();
        assert!(after.is_some());
        if let Some(before) = before {
            assert!(Arc::ptr_eq(&before, &pool));
        }
    }

    #[tokio::test]
    async fn repeated_calls_return_the_same_instance() {
        let first = shared_pool(test_config()).await;
        let mut other_config = test_config();
        other_config.max_sessions = 99;
        let second = shared_pool(other_config).await;
        assert!(Arc::ptr_eq(&first, &second));
    }
}
