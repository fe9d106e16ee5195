//! One-shot stylesheet injection (button cosmetics, scrollbar styling).

use cdp_bridge::{CdpBridge, PageId};
use tracing::debug;

use crate::errors::EngineError;

/// Marker attribute on the injected `<style>` element; doubles as the
/// idempotency guard across repeated installs.
pub const STYLE_MARKER_ATTR: &str = "data-zp-style";

/// Append the profile's stylesheet to the document once. The CSS is an
/// opaque blob; returns true when newly injected, false when already there.
pub async fn inject_stylesheet(
    bridge: &CdpBridge,
    page: PageId,
    css: &str,
) -> Result<bool, EngineError> {
    let value = bridge
        .evaluate(page, &inject_expression(css))
        .await
        .map_err(|err| EngineError::CdpIo(err.to_string()))?;
    let injected = value
        .get("status")
        .and_then(|v| v.as_str())
        .map(|s| s == "ok")
        .unwrap_or(false);
    if !injected {
        debug!(target: "zen-engine", "stylesheet already present");
    }
    Ok(injected)
}

pub fn inject_expression(css: &str) -> String {
    format!(
        r#"(() => {{
    if (document.querySelector('style[{marker}]')) {{ return {{ status: 'already' }}; }}
    const style = document.createElement('style');
    style.setAttribute('{marker}', '1');
    style.textContent = {css};
    (document.head || document.documentElement).appendChild(style);
    return {{ status: 'ok' }};
}})()"#,
        marker = STYLE_MARKER_ATTR,
        css = serde_json::to_string(css).unwrap(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::scripted_bridge;
    use serde_json::json;

    #[test]
    fn css_is_embedded_as_an_escaped_literal() {
        let expr = inject_expression(".zp-zen-button { color: \"#555\"; }\n");
        assert!(expr.contains(STYLE_MARKER_ATTR));
        assert!(expr.contains(r##"\"#555\""##));
        assert!(expr.contains(r"\n"));
    }

    #[tokio::test]
    async fn second_injection_is_guarded() {
        let (bridge, transport, page) = scripted_bridge();
        transport.queue_result(json!({ "status": "ok" })).await;
        transport.queue_result(json!({ "status": "already" })).await;

        assert!(inject_stylesheet(&bridge, page, "body {}").await.unwrap());
        assert!(!inject_stylesheet(&bridge, page, "body {}").await.unwrap());
    }
}
