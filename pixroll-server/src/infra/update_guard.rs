use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
struct FailureWindow {
    count: u32,
    window_started: Instant,
}

/// Per-IP tracking of failed `/update` authorizations.
///
/// A client that keeps presenting bad tokens inside the window is answered
/// with 429 until the window expires. Stale windows are reclaimed by the
/// maintenance sweep, so the map stays bounded by the set of recently
/// misbehaving clients.
#[derive(Debug)]
pub struct UpdateGuard {
    window: Duration,
    max_failures: u32,
    failures: Mutex<HashMap<IpAddr, FailureWindow>>,
}

impl UpdateGuard {
    pub fn new(window: Duration, max_failures: u32) -> Self {
        Self {
            window,
            max_failures,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Whether this client may attempt an authorization right now.
    pub fn check(&self, ip: IpAddr) -> bool {
        let mut failures = self.failures.lock();
        match failures.get(&ip) {
            Some(entry) if entry.window_started.elapsed() >= self.window => {
                failures.remove(&ip);
                true
            }
            Some(entry) => entry.count < self.max_failures,
            None => true,
        }
    }

    pub fn record_failure(&self, ip: IpAddr) {
        let mut failures = self.failures.lock();
        let now = Instant::now();
        let entry = failures.entry(ip).or_insert(FailureWindow {
            count: 0,
            window_started: now,
        });
        if entry.window_started.elapsed() >= self.window {
            entry.count = 0;
            entry.window_started = now;
        }
        entry.count += 1;
        if entry.count >= self.max_failures {
            warn!("update token failures from {ip} hit the limit ({})", entry.count);
        }
    }

    /// Forget a client after a successful authorization.
    pub fn clear(&self, ip: IpAddr) {
        self.failures.lock().remove(&ip);
    }

    /// Drop expired windows in small batches, yielding between them so the
    /// lock is never held across the whole sweep.
    pub async fn sweep(&self) {
        const BATCH: usize = 64;

        let tracked: Vec<IpAddr> = self.failures.lock().keys().copied().collect();
        let mut removed = 0usize;

        for chunk in tracked.chunks(BATCH) {
            {
                let mut failures = self.failures.lock();
                for ip in chunk {
                    if failures
                        .get(ip)
                        .is_some_and(|entry| entry.window_started.elapsed() >= self.window)
                    {
                        failures.remove(ip);
                        removed += 1;
                    }
                }
            }
            tokio::task::yield_now().await;
        }

        if removed > 0 {
            debug!("update guard sweep removed {removed} expired windows");
        }
    }

    pub fn tracked(&self) -> usize {
        self.failures.lock().len()
    }
}
