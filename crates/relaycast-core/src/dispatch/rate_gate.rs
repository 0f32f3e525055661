//! Rate Gate - Paces outbound sends
//!
//! Two limits apply to every send: at most `global_limit` sends may start
//! inside one fixed window, and two sends to the same recipient are spaced
//! by at least `cooldown`. The window is fixed, not sliding: once it
//! expires the counter drops to zero, so up to twice the limit can start
//! around a window boundary.
//!
//! A send that waited out its cooldown is not recorded straight away: the
//! loop starts over and the global limit is checked again first, so a
//! window that filled up during the wait still holds it back.
//!
//! State is local to the process. Several worker processes each get their
//! own gate and the effective global limit multiplies accordingly.

use relaycast_common::config::RateGateConfig;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::time::{sleep, Duration, Instant};
use tracing::debug;

/// Fixed-window send gate with per-recipient cooldown
pub struct RateGate {
    global_limit: u32,
    window: Duration,
    cooldown: Duration,
    state: Mutex<GateState>,
}

struct GateState {
    /// Sends started in the current window
    count: u32,
    window_end: Instant,
    /// Last send time per recipient
    last_sent: HashMap<String, Instant>,
}

impl RateGate {
    /// Create a gate with explicit limits
    pub fn new(global_limit: u32, window: Duration, cooldown: Duration) -> Self {
        Self {
            global_limit: global_limit.max(1),
            window,
            cooldown,
            state: Mutex::new(GateState {
                count: 0,
                window_end: Instant::now(),
                last_sent: HashMap::new(),
            }),
        }
    }

    /// Create a gate from configuration
    pub fn from_config(config: &RateGateConfig) -> Self {
        Self::new(
            config.global_limit,
            Duration::from_millis(config.window_ms),
            Duration::from_millis(config.cooldown_ms),
        )
    }

    /// Wait until a send to `recipient` is allowed, then record it.
    ///
    /// Call immediately before issuing the send. The slot is taken when this
    /// returns; there is no way to give it back.
    pub async fn acquire(&self, recipient: &str) {
        loop {
            let wait = {
                let mut state = self.lock();
                let now = Instant::now();
                self.roll_window(&mut state, now);

                let since_last = state
                    .last_sent
                    .get(recipient)
                    .map(|last| now.duration_since(*last));

                if state.count >= self.global_limit {
                    Some(state.window_end.saturating_duration_since(now))
                } else if let Some(elapsed) = since_last.filter(|e| *e < self.cooldown) {
                    Some(self.cooldown - elapsed)
                } else {
                    state.count += 1;
                    state.last_sent.insert(recipient.to_string(), now);
                    None
                }
            };

            match wait {
                // Both limits are re-checked after waking.
                Some(delay) => {
                    debug!(recipient, delay_ms = delay.as_millis() as u64, "Send delayed");
                    sleep(delay).await;
                }
                None => return,
            }
        }
    }

    /// Number of recipients whose last send is still remembered
    pub fn tracked_recipients(&self) -> usize {
        self.lock().last_sent.len()
    }

    fn roll_window(&self, state: &mut GateState, now: Instant) {
        if now < state.window_end {
            return;
        }
        state.count = 0;
        state.window_end = now + self.window;

        // Entries past the cooldown can no longer delay anyone.
        let cooldown = self.cooldown;
        state
            .last_sent
            .retain(|_, last| now.duration_since(*last) < cooldown);
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        // The state stays consistent even if a holder panicked.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for RateGate {
    fn default() -> Self {
        Self::from_config(&RateGateConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn gate() -> RateGate {
        RateGate::new(30, Duration::from_millis(1000), Duration::from_millis(1100))
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_limit_within_window() {
        let gate = gate();
        let start = Instant::now();

        for i in 0..30 {
            gate.acquire(&format!("chat-{}", i)).await;
        }
        assert!(start.elapsed() < Duration::from_millis(1));

        gate.acquire("chat-30").await;
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_window_exceeds_limit() {
        let gate = gate();
        let start = Instant::now();
        let mut stamps = Vec::new();

        for i in 0..95 {
            gate.acquire(&format!("chat-{}", i)).await;
            stamps.push(start.elapsed());
        }

        for second in 0..4u64 {
            let lo = Duration::from_millis(second * 1000);
            let hi = Duration::from_millis((second + 1) * 1000);
            let in_window = stamps.iter().filter(|t| **t >= lo && **t < hi).count();
            assert!(in_window <= 30, "window {} had {} sends", second, in_window);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_recipient_cooldown() {
        let gate = gate();
        let start = Instant::now();

        gate.acquire("chat-1").await;
        gate.acquire("chat-2").await;
        assert!(start.elapsed() < Duration::from_millis(1));

        gate.acquire("chat-1").await;
        assert!(start.elapsed() >= Duration::from_millis(1100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_wake_rechecks_global_limit() {
        let gate = std::sync::Arc::new(RateGate::new(
            2,
            Duration::from_millis(1000),
            Duration::from_millis(300),
        ));
        let start = Instant::now();
        gate.acquire("chat-1").await;

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.acquire("chat-1").await;
                start.elapsed()
            })
        };

        // Fill the window while the first recipient is cooling down.
        sleep(Duration::from_millis(100)).await;
        gate.acquire("chat-2").await;

        let woke_at = waiter.await.unwrap();
        assert!(woke_at >= Duration::from_millis(1000), "sent at {:?}", woke_at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_entries_are_evicted() {
        let gate = gate();

        for i in 0..10 {
            gate.acquire(&format!("chat-{}", i)).await;
        }
        assert_eq!(gate.tracked_recipients(), 10);

        sleep(Duration::from_millis(2500)).await;
        gate.acquire("chat-late").await;
        assert_eq!(gate.tracked_recipients(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_waiters_respect_limit() {
        let gate = std::sync::Arc::new(RateGate::new(
            5,
            Duration::from_millis(1000),
            Duration::from_millis(1100),
        ));
        let start = Instant::now();

        let handles: Vec<_> = (0..12)
            .map(|i| {
                let gate = gate.clone();
                tokio::spawn(async move {
                    gate.acquire(&format!("chat-{}", i)).await;
                    start.elapsed()
                })
            })
            .collect();

        let mut stamps = Vec::new();
        for handle in handles {
            stamps.push(handle.await.unwrap());
        }

        let first = stamps.iter().filter(|t| **t < Duration::from_millis(1000)).count();
        assert_eq!(first, 5);
        assert!(stamps.iter().all(|t| *t < Duration::from_millis(3000)));
    }
}
