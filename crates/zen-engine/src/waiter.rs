//! Polling acquisition of elements the host has not rendered yet.

use std::time::Duration;

use cdp_bridge::{BridgeErrorKind, CdpBridge, PageId};
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::errors::EngineError;
use crate::types::SelectorTarget;

/// Polls the page until a selector resolves.
///
/// Host pages may take arbitrarily long to bootstrap, so the default is to
/// retry forever; callers wanting a bounded wait set `deadline` and treat
/// the resulting `WaitTimeout` as "give up, log". Each probe is scheduled
/// only after the previous one completed, so retries never overlap.
#[derive(Clone, Debug)]
pub struct ElementWaiter {
    pub interval: Duration,
    pub deadline: Option<Duration>,
}

impl Default for ElementWaiter {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            deadline: None,
        }
    }
}

impl ElementWaiter {
    pub fn with_deadline(deadline: Duration) -> Self {
        Self {
            deadline: Some(deadline),
            ..Self::default()
        }
    }

    /// Resolve once any selector in the fallback list matches an element.
    pub async fn wait_for(
        &self,
        bridge: &CdpBridge,
        page: PageId,
        target: &SelectorTarget,
    ) -> Result<(), EngineError> {
        let expression = presence_expression(target);
        let limit = self.deadline.map(|d| Instant::now() + d);

        loop {
            match bridge.evaluate(page, &expression).await {
                Ok(value) => {
                    if value.as_bool().unwrap_or(false) {
                        return Ok(());
                    }
                }
                // The page may be mid-reload; keep polling unless the
                // environment has no browser at all.
                Err(err) if matches!(err.kind, BridgeErrorKind::Unsupported) => {
                    return Err(EngineError::CdpIo(err.to_string()));
                }
                Err(err) => {
                    debug!(target: "zen-engine", %err, "presence probe failed; retrying");
                }
            }

            if let Some(limit) = limit {
                if Instant::now() >= limit {
                    warn!(
                        target: "zen-engine",
                        selectors = ?target.selectors(),
                        "element never appeared within deadline"
                    );
                    return Err(EngineError::WaitTimeout(format!(
                        "no element matched {:?}",
                        target.selectors()
                    )));
                }
            }

            sleep(self.interval).await;
        }
    }
}

/// True as soon as any selector in the list matches; invalid selectors are
/// swallowed in-page and count as no match.
pub fn presence_expression(target: &SelectorTarget) -> String {
    format!(
        r#"(() => {{
    const selectors = {selectors};
    for (const sel of selectors) {{
        try {{
            if (document.querySelector(sel)) {{ return true; }}
        }} catch (err) {{}}
    }}
    return false;
}})()"#,
        selectors = target.js_array(),
    )
}
