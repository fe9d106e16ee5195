//! Toolbar injection: waits for the host's toolbar, then installs the zen
//! buttons exactly once per page lifetime.

use chrono::Utc;
use cdp_bridge::{CdpBridge, PageId};
use serde_json::json;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::errors::EngineError;
use crate::types::{ButtonDescriptor, InsertPolicy, InstallReport, SelectorTarget};
use crate::waiter::ElementWaiter;

/// Class stamped on every injected button; also the double-install guard.
pub const MARKER_CLASS: &str = "zp-zen-button";

/// Page-side function name clicks are funneled through.
pub const ACTION_BINDING: &str = "__zenpageAction";

pub struct ToolbarInjector {
    pub waiter: ElementWaiter,
    pub marker_class: String,
    pub binding: String,
}

impl Default for ToolbarInjector {
    fn default() -> Self {
        Self {
            waiter: ElementWaiter::default(),
            marker_class: MARKER_CLASS.to_string(),
            binding: ACTION_BINDING.to_string(),
        }
    }
}

impl ToolbarInjector {
    pub fn with_waiter(waiter: ElementWaiter) -> Self {
        Self {
            waiter,
            ..Self::default()
        }
    }

    /// Wait for the anchor, register the click binding, and inject one
    /// button per descriptor. Re-entrant: when marker-classed buttons are
    /// already inside the anchor the call reports `installed: false` and
    /// changes nothing (soft navigations re-run install safely).
    pub async fn install(
        &self,
        bridge: &CdpBridge,
        page: PageId,
        anchor: &SelectorTarget,
        descriptors: &[ButtonDescriptor],
        policy: &InsertPolicy,
    ) -> Result<InstallReport, EngineError> {
        let started_at = Utc::now();
        let start = Instant::now();

        self.waiter.wait_for(bridge, page, anchor).await?;
        bridge
            .add_binding(page, &self.binding)
            .await
            .map_err(|err| EngineError::CdpIo(err.to_string()))?;

        let value = bridge
            .evaluate(page, &self.install_expression(anchor, descriptors, policy))
            .await
            .map_err(|err| EngineError::CdpIo(err.to_string()))?;

        let status = value
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        let latency_ms = start.elapsed().as_millis() as u64;

        match status {
            "ok" => {
                let buttons = value.get("count").and_then(|v| v.as_u64()).unwrap_or(0);
                info!(target: "zen-engine", buttons, latency_ms, "toolbar installed");
                Ok(InstallReport {
                    installed: true,
                    buttons,
                    started_at,
                    latency_ms,
                })
            }
            "already" => {
                info!(target: "zen-engine", "toolbar already installed; skipping");
                Ok(InstallReport {
                    installed: false,
                    buttons: 0,
                    started_at,
                    latency_ms,
                })
            }
            // The anchor resolved moments ago; a host re-render can still
            // swallow it before the injection expression runs.
            other => {
                warn!(target: "zen-engine", status = other, "toolbar injection did not land");
                Ok(InstallReport {
                    installed: false,
                    buttons: 0,
                    started_at,
                    latency_ms,
                })
            }
        }
    }

    pub fn install_expression(
        &self,
        anchor: &SelectorTarget,
        descriptors: &[ButtonDescriptor],
        policy: &InsertPolicy,
    ) -> String {
        let buttons: Vec<_> = descriptors
            .iter()
            .map(|d| json!({ "id": d.id, "icon": d.icon, "title": d.title }))
            .collect();

        format!(
            r#"(() => {{
    const anchors = {anchors};
    let anchor = null;
    for (const sel of anchors) {{
        try {{ anchor = document.querySelector(sel); }} catch (err) {{}}
        if (anchor) {{ break; }}
    }}
    if (!anchor) {{ return {{ status: 'missing-anchor' }}; }}
    const marker = {marker};
    if (anchor.getElementsByClassName(marker).length > 0) {{ return {{ status: 'already' }}; }}
    const beforeSel = {before};
    let before = null;
    if (beforeSel) {{
        try {{ before = anchor.querySelector(beforeSel); }} catch (err) {{}}
    }}
    const binding = {binding};
    const buttons = {buttons};
    for (const spec of buttons) {{
        const btn = document.createElement('button');
        btn.type = 'button';
        btn.innerHTML = spec.icon;
        btn.title = spec.title;
        btn.className = marker;
        btn.dataset.zpAction = spec.id;
        btn.addEventListener('click', (ev) => {{
            ev.preventDefault();
            ev.stopPropagation();
            if (typeof window[binding] === 'function') {{ window[binding](spec.id); }}
        }});
        if (before && before.parentNode === anchor) {{
            anchor.insertBefore(btn, before);
        }} else {{
            anchor.appendChild(btn);
        }}
    }}
    return {{ status: 'ok', count: buttons.length }};
}})()"#,
            anchors = anchor.js_array(),
            marker = serde_json::to_string(&self.marker_class).unwrap(),
            before = serde_json::to_string(&policy.before).unwrap(),
            binding = serde_json::to_string(&self.binding).unwrap(),
            buttons = serde_json::to_string(&buttons).unwrap(),
        )
    }
}
