//! Synthetic resize pulses fired after layout-affecting transitions.
//!
//! Host frameworks size editors and canvases from viewport dimensions and
//! only recompute on a window resize. Fullscreen transitions and panel
//! toggles change the available space without always firing one, so a short
//! burst of synthetic resize events coaxes the host into relayout.

use std::sync::Arc;
use std::time::Duration;

use cdp_bridge::{CdpBridge, PageId};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

pub const RESIZE_EXPRESSION: &str =
    "window.dispatchEvent(new Event('resize', { bubbles: true, cancelable: true }))";

/// A bounded burst of pulse offsets. Timings are empirically tuned per host
/// rather than derived from a layout-completion signal.
#[derive(Clone, Debug)]
pub struct PulseSchedule {
    delays: Vec<Duration>,
}

impl Default for PulseSchedule {
    /// Six pulses over ~1.2s, covering slow fullscreen transitions.
    fn default() -> Self {
        Self {
            delays: (0..6).map(|i| Duration::from_millis(i * 200)).collect(),
        }
    }
}

impl PulseSchedule {
    /// Two-shot variant for hosts that settle quickly.
    pub fn light() -> Self {
        Self {
            delays: vec![Duration::from_millis(100), Duration::from_millis(500)],
        }
    }

    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Fire the burst in the background. Always runs to completion once
    /// scheduled; failures are logged and skipped, never propagated.
    pub fn schedule(&self, bridge: Arc<CdpBridge>, page: PageId) -> JoinHandle<()> {
        let mut delays = self.delays.clone();
        delays.sort();
        tokio::spawn(async move {
            let start = Instant::now();
            for delay in delays {
                sleep_until(start + delay).await;
                if let Err(err) = bridge.evaluate(page, RESIZE_EXPRESSION).await {
                    debug!(target: "zen-engine", %err, "resize pulse dropped");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::scripted_bridge;

    #[tokio::test(start_paused = true)]
    async fn burst_fires_once_per_delay_and_stops() {
        let (bridge, transport, page) = scripted_bridge();

        let schedule = PulseSchedule::default();
        schedule.schedule(bridge, page).await.unwrap();

        assert_eq!(transport.resize_pulse_count().await, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn light_variant_is_a_two_shot() {
        let (bridge, transport, page) = scripted_bridge();

        PulseSchedule::light()
            .schedule(bridge, page)
            .await
            .unwrap();

        assert_eq!(transport.resize_pulse_count().await, 2);
    }

    #[test]
    fn resize_event_bubbles_and_is_cancelable() {
        assert!(RESIZE_EXPRESSION.contains("bubbles: true"));
        assert!(RESIZE_EXPRESSION.contains("cancelable: true"));
    }
}
