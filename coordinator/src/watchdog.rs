//! Single-shot watchdog timer
//!
//! Armed when a block is packed, disarmed on commit or explicit release.
//! Arming replaces any previously scheduled alarm; the callback runs on
//! the runtime, never under the coordinator lock.

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

pub struct Watchdog {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Watchdog {
    pub fn new() -> Self {
        Self {
            handle: Mutex::new(None),
        }
    }

    /// Schedule `on_fire` after `delay`, replacing any pending alarm
    pub fn arm<F, Fut>(&self, delay: Duration, on_fire: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire().await;
        });

        let mut handle = self.handle.lock();
        if let Some(previous) = handle.replace(task) {
            previous.abort();
        }
        debug!(delay_ms = delay.as_millis() as u64, "watchdog armed");
    }

    /// Cancel the pending alarm, if any
    pub fn disarm(&self) {
        if let Some(task) = self.handle.lock().take() {
            task.abort();
            debug!("watchdog disarmed");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}
