//! Cross-vendor fullscreen with post-transition layout repair.

use std::sync::Arc;

use cdp_bridge::{CdpBridge, PageId};
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::EngineError;
use crate::pulse::PulseSchedule;

/// One vendor flavor of the fullscreen API: the document property naming the
/// active fullscreen element, and the request/exit method names.
#[derive(Clone, Copy, Debug)]
pub struct FullscreenVendor {
    pub element_prop: &'static str,
    pub request_method: &'static str,
    pub exit_method: &'static str,
}

/// Probe order: unprefixed first, then the legacy prefixes.
pub const VENDOR_TABLE: &[FullscreenVendor] = &[
    FullscreenVendor {
        element_prop: "fullscreenElement",
        request_method: "requestFullscreen",
        exit_method: "exitFullscreen",
    },
    FullscreenVendor {
        element_prop: "mozFullScreenElement",
        request_method: "mozRequestFullScreen",
        exit_method: "mozCancelFullScreen",
    },
    FullscreenVendor {
        element_prop: "webkitFullscreenElement",
        request_method: "webkitRequestFullScreen",
        exit_method: "webkitExitFullscreen",
    },
    FullscreenVendor {
        element_prop: "msFullscreenElement",
        request_method: "msRequestFullscreen",
        exit_method: "msExitFullscreen",
    },
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FullscreenOutcome {
    Entered,
    Exited,
    /// No vendor method exists in this environment; silent no-op.
    Unsupported,
    /// The browser rejected the transition (e.g. no user gesture).
    Denied { reason: String },
}

pub struct FullscreenController {
    vendors: Vec<FullscreenVendor>,
    pulse: PulseSchedule,
}

impl Default for FullscreenController {
    fn default() -> Self {
        Self {
            vendors: VENDOR_TABLE.to_vec(),
            pulse: PulseSchedule::default(),
        }
    }
}

impl FullscreenController {
    pub fn new(pulse: PulseSchedule) -> Self {
        Self {
            vendors: VENDOR_TABLE.to_vec(),
            pulse,
        }
    }

    /// Swap in a different capability table (tests inject fakes here).
    pub fn with_vendors(vendors: Vec<FullscreenVendor>, pulse: PulseSchedule) -> Self {
        Self { vendors, pulse }
    }

    /// Live query; never cached, so Esc-key exits stay coherent.
    pub async fn is_fullscreen(
        &self,
        bridge: &CdpBridge,
        page: PageId,
    ) -> Result<bool, EngineError> {
        let value = bridge
            .evaluate(page, &self.is_fullscreen_expression())
            .await
            .map_err(|err| EngineError::CdpIo(err.to_string()))?;
        Ok(value.as_bool().unwrap_or(false))
    }

    /// Enter fullscreen when out of it, exit when in it. The in-page promise
    /// is awaited and its rejection is caught there, so a denied transition
    /// degrades to a logged warning instead of an unobserved rejection.
    pub async fn toggle(
        &self,
        bridge: &Arc<CdpBridge>,
        page: PageId,
    ) -> Result<FullscreenOutcome, EngineError> {
        let value = bridge
            .evaluate(page, &self.toggle_expression())
            .await
            .map_err(|err| EngineError::CdpIo(err.to_string()))?;
        let outcome = parse_fullscreen_outcome(&value);

        match &outcome {
            FullscreenOutcome::Entered | FullscreenOutcome::Exited => {
                // The transition resized the viewport without a native
                // resize event in every browser; repair the host layout.
                self.pulse.schedule(Arc::clone(bridge), page);
            }
            FullscreenOutcome::Unsupported => {
                debug!(target: "zen-engine", "fullscreen api unavailable; skipping");
            }
            FullscreenOutcome::Denied { reason } => {
                warn!(target: "zen-engine", reason, "fullscreen transition denied");
            }
        }

        Ok(outcome)
    }

    fn vendor_table_literal(&self) -> String {
        let entries: Vec<String> = self
            .vendors
            .iter()
            .map(|v| {
                format!(
                    r#"{{ el: '{}', req: '{}', exit: '{}' }}"#,
                    v.element_prop, v.request_method, v.exit_method
                )
            })
            .collect();
        format!("[{}]", entries.join(", "))
    }

    pub fn is_fullscreen_expression(&self) -> String {
        format!(
            r#"(() => {{
    const vendors = {vendors};
    return vendors.some(v => !!document[v.el]);
}})()"#,
            vendors = self.vendor_table_literal(),
        )
    }

    pub fn toggle_expression(&self) -> String {
        format!(
            r#"(() => {{
    const vendors = {vendors};
    const doc = document;
    const root = doc.documentElement;
    const active = vendors.some(v => !!doc[v.el]);
    if (!active) {{
        const vendor = vendors.find(v => typeof root[v.req] === 'function');
        if (!vendor) {{ return {{ status: 'unsupported' }}; }}
        return Promise.resolve(root[vendor.req].call(root))
            .then(() => ({{ status: 'entered' }}))
            .catch(err => ({{ status: 'denied', reason: String(err) }}));
    }}
    const vendor = vendors.find(v => typeof doc[v.exit] === 'function');
    if (!vendor) {{ return {{ status: 'unsupported' }}; }}
    return Promise.resolve(doc[vendor.exit].call(doc))
        .then(() => ({{ status: 'exited' }}))
        .catch(err => ({{ status: 'denied', reason: String(err) }}));
}})()"#,
            vendors = self.vendor_table_literal(),
        )
    }
}

pub fn parse_fullscreen_outcome(value: &Value) -> FullscreenOutcome {
    match value.get("status").and_then(Value::as_str) {
        Some("entered") => FullscreenOutcome::Entered,
        Some("exited") => FullscreenOutcome::Exited,
        Some("denied") => FullscreenOutcome::Denied {
            reason: value
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
        },
        _ => FullscreenOutcome::Unsupported,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::scripted_bridge;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::sleep;

    #[test]
    fn vendor_table_probes_unprefixed_first() {
        let controller = FullscreenController::default();
        let expr = controller.toggle_expression();
        let unprefixed = expr.find("'requestFullscreen'").unwrap();
        let moz = expr.find("'mozRequestFullScreen'").unwrap();
        let webkit = expr.find("'webkitRequestFullScreen'").unwrap();
        assert!(unprefixed < moz && moz < webkit);
    }

    #[test]
    fn injected_capability_table_is_honored() {
        let controller = FullscreenController::with_vendors(
            vec![FullscreenVendor {
                element_prop: "fakeElement",
                request_method: "fakeRequest",
                exit_method: "fakeExit",
            }],
            PulseSchedule::light(),
        );
        let expr = controller.is_fullscreen_expression();
        assert!(expr.contains("fakeElement"));
        assert!(!expr.contains("webkitFullscreenElement"));
    }

    #[tokio::test(start_paused = true)]
    async fn round_trip_schedules_repair_pulses() {
        let (bridge, transport, page) = scripted_bridge();
        let controller = FullscreenController::new(PulseSchedule::light());

        transport.queue_result(json!({ "status": "entered" })).await;
        let outcome = controller.toggle(&bridge, page).await.unwrap();
        assert_eq!(outcome, FullscreenOutcome::Entered);

        sleep(Duration::from_secs(1)).await;
        assert!(transport.resize_pulse_count().await >= 1);

        transport.queue_result(json!({ "status": "exited" })).await;
        let outcome = controller.toggle(&bridge, page).await.unwrap();
        assert_eq!(outcome, FullscreenOutcome::Exited);

        sleep(Duration::from_secs(1)).await;
        assert_eq!(transport.resize_pulse_count().await, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn denied_transition_is_swallowed_without_pulses() {
        let (bridge, transport, page) = scripted_bridge();
        let controller = FullscreenController::new(PulseSchedule::light());

        transport
            .queue_result(json!({ "status": "denied", "reason": "not a user gesture" }))
            .await;
        let outcome = controller.toggle(&bridge, page).await.unwrap();
        assert_eq!(
            outcome,
            FullscreenOutcome::Denied {
                reason: "not a user gesture".to_string()
            }
        );

        sleep(Duration::from_secs(1)).await;
        assert_eq!(transport.resize_pulse_count().await, 0);
    }

    #[tokio::test]
    async fn missing_capability_is_a_silent_noop() {
        let (bridge, transport, page) = scripted_bridge();
        let controller = FullscreenController::new(PulseSchedule::light());

        transport
            .queue_result(json!({ "status": "unsupported" }))
            .await;
        let outcome = controller.toggle(&bridge, page).await.unwrap();
        assert_eq!(outcome, FullscreenOutcome::Unsupported);
    }

    #[tokio::test]
    async fn is_fullscreen_reads_live_state() {
        let (bridge, transport, page) = scripted_bridge();
        let controller = FullscreenController::default();

        transport.queue_result(json!(true)).await;
        assert!(controller.is_fullscreen(&bridge, page).await.unwrap());
        transport.queue_result(json!(false)).await;
        assert!(!controller.is_fullscreen(&bridge, page).await.unwrap());
    }
}
