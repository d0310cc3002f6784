/*!
 * Maintenance scheduler
 *
 * One background thread per initialized cache. Each tick asks the engine
 * to prune and replenish the pool; transient failures are logged and
 * retried on the next interval, never surfaced to foreground callers.
 */

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::cache::CacheEngine;
use crate::error::{CacheError, CacheResult};
use crate::source::EntropySource;

struct Shutdown {
    flag: Mutex<bool>,
    signal: Condvar,
}

/// Handle to the background maintenance thread
pub struct MaintenanceScheduler {
    shutdown: Arc<Shutdown>,
    handle: Option<JoinHandle<()>>,
}

impl MaintenanceScheduler {
    /// Spawn the maintenance loop. The first tick runs immediately so a
    /// freshly initialized cache starts downloading without waiting a full
    /// interval.
    pub fn spawn(
        engine: Arc<CacheEngine>,
        source: Arc<dyn EntropySource>,
        interval: Duration,
    ) -> CacheResult<Self> {
        let shutdown = Arc::new(Shutdown {
            flag: Mutex::new(false),
            signal: Condvar::new(),
        });

        let thread_shutdown = Arc::clone(&shutdown);
        let handle = std::thread::Builder::new()
            .name("randpool-maintenance".into())
            .spawn(move || {
                log::debug!(
                    "maintenance thread started, interval {:?}, source '{}'",
                    interval,
                    source.name()
                );
                loop {
                    if let Err(e) = engine.maintain(source.as_ref()) {
                        // Retried on the next tick; the status probe exposes
                        // any lasting degradation to callers
                        log::warn!("maintenance tick failed ({}): {}", e.kind(), e);
                    }

                    let guard = thread_shutdown
                        .flag
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    let (guard, _timeout) = thread_shutdown
                        .signal
                        .wait_timeout_while(guard, interval, |stop| !*stop)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    if *guard {
                        break;
                    }
                }
                log::debug!("maintenance thread stopped");
            })
            .map_err(|e| {
                CacheError::system(format!("failed to spawn maintenance thread: {}", e))
            })?;

        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Cancel the interval wait and join the thread. Idempotent.
    pub fn shutdown(&mut self) {
        {
            let mut stop = self
                .shutdown
                .flag
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *stop = true;
        }
        self.shutdown.signal.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MaintenanceScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
