//! Visibility toggling that defeats host `!important` rules.
//!
//! State is never tracked on the Rust side: the inline `display` of each
//! matched element at call time is the only source of truth. If the host
//! re-renders a node and wipes the override, the next toggle simply treats
//! it as never hidden.

use cdp_bridge::{CdpBridge, PageId};
use serde_json::Value;
use tracing::debug;

use crate::errors::EngineError;
use crate::types::{SelectorTarget, ToggleOutcome};

/// Flip each matched element between forced-hidden and the host default.
///
/// Hidden means inline `display: none !important` (out-prioritizing host
/// stylesheet rules). Restore removes the override entirely so the host's
/// own cascade takes back over; the shown-state value is never guessed.
/// Zero matches is a silent no-op.
pub async fn toggle(
    bridge: &CdpBridge,
    page: PageId,
    target: &SelectorTarget,
) -> Result<ToggleOutcome, EngineError> {
    let value = bridge
        .evaluate(page, &toggle_expression(target))
        .await
        .map_err(|err| EngineError::CdpIo(err.to_string()))?;
    let outcome = parse_toggle_outcome(&value);
    debug!(
        target: "zen-engine",
        matched = outcome.matched,
        hidden = outcome.hidden,
        restored = outcome.restored,
        "visibility toggle"
    );
    Ok(outcome)
}

/// Hide unconditionally. Used for default-state corrections (a panel the
/// host shows but the profile wants hidden) and safe to call redundantly.
pub async fn force_hide(
    bridge: &CdpBridge,
    page: PageId,
    target: &SelectorTarget,
) -> Result<u64, EngineError> {
    let value = bridge
        .evaluate(page, &force_hide_expression(target))
        .await
        .map_err(|err| EngineError::CdpIo(err.to_string()))?;
    Ok(parse_toggle_outcome(&value).hidden)
}

/// Detach matched nodes outright (no way back until the host re-renders).
pub async fn remove_nodes(
    bridge: &CdpBridge,
    page: PageId,
    target: &SelectorTarget,
) -> Result<u64, EngineError> {
    let value = bridge
        .evaluate(page, &remove_expression(target))
        .await
        .map_err(|err| EngineError::CdpIo(err.to_string()))?;
    Ok(parse_toggle_outcome(&value).matched)
}

pub fn toggle_expression(target: &SelectorTarget) -> String {
    format!(
        r#"(() => {{
    const selectors = {selectors};
    let matched = 0, hidden = 0, restored = 0;
    for (const sel of selectors) {{
        let nodes = [];
        try {{ nodes = Array.from(document.querySelectorAll(sel)); }} catch (err) {{ continue; }}
        for (const el of nodes) {{
            matched += 1;
            if (el.style.display === 'none') {{
                el.style.removeProperty('display');
                restored += 1;
            }} else {{
                el.style.setProperty('display', 'none', 'important');
                hidden += 1;
            }}
        }}
    }}
    return {{ matched, hidden, restored }};
}})()"#,
        selectors = target.js_array(),
    )
}

pub fn force_hide_expression(target: &SelectorTarget) -> String {
    format!(
        r#"(() => {{
    const selectors = {selectors};
    let matched = 0, hidden = 0;
    for (const sel of selectors) {{
        let nodes = [];
        try {{ nodes = Array.from(document.querySelectorAll(sel)); }} catch (err) {{ continue; }}
        for (const el of nodes) {{
            matched += 1;
            el.style.setProperty('display', 'none', 'important');
            hidden += 1;
        }}
    }}
    return {{ matched, hidden, restored: 0 }};
}})()"#,
        selectors = target.js_array(),
    )
}

fn remove_expression(target: &SelectorTarget) -> String {
    format!(
        r#"(() => {{
    const selectors = {selectors};
    let matched = 0;
    for (const sel of selectors) {{
        let nodes = [];
        try {{ nodes = Array.from(document.querySelectorAll(sel)); }} catch (err) {{ continue; }}
        for (const el of nodes) {{
            matched += 1;
            el.remove();
        }}
    }}
    return {{ matched, hidden: 0, restored: 0 }};
}})()"#,
        selectors = target.js_array(),
    )
}

pub fn parse_toggle_outcome(value: &Value) -> ToggleOutcome {
    let field = |name: &str| value.get(name).and_then(Value::as_u64).unwrap_or(0);
    ToggleOutcome {
        matched: field("matched"),
        hidden: field("hidden"),
        restored: field("restored"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::scripted_bridge;
    use serde_json::json;

    #[test]
    fn hide_branch_uses_important_priority() {
        let expr = toggle_expression(&SelectorTarget::one(".cm-gutters"));
        assert!(expr.contains("setProperty('display', 'none', 'important')"));
    }

    #[test]
    fn restore_branch_removes_the_override_instead_of_guessing() {
        let expr = toggle_expression(&SelectorTarget::one(".panel"));
        assert!(expr.contains("removeProperty('display')"));
        // The shown-state display value is the host's business.
        assert!(!expr.contains("display = 'flex'"));
        assert!(!expr.contains("display = 'block'"));
    }

    #[test]
    fn force_hide_never_restores() {
        let expr = force_hide_expression(&SelectorTarget::one(".cm-gutter-lint"));
        assert!(expr.contains("setProperty('display', 'none', 'important')"));
        assert!(!expr.contains("removeProperty"));
    }

    #[test]
    fn outcome_parsing_defaults_to_zero() {
        assert_eq!(parse_toggle_outcome(&json!(null)), ToggleOutcome::default());
        let outcome = parse_toggle_outcome(&json!({ "matched": 3, "hidden": 1, "restored": 2 }));
        assert_eq!(outcome.matched, 3);
        assert_eq!(outcome.hidden, 1);
        assert_eq!(outcome.restored, 2);
    }

    #[tokio::test]
    async fn empty_match_is_a_silent_noop() {
        let (bridge, transport, page) = scripted_bridge();
        transport
            .queue_result(json!({ "matched": 0, "hidden": 0, "restored": 0 }))
            .await;

        let outcome = toggle(&bridge, page, &SelectorTarget::one(".nonexistent"))
            .await
            .unwrap();
        assert_eq!(outcome, ToggleOutcome::default());
    }

    #[tokio::test]
    async fn state_is_rederived_on_every_call() {
        let (bridge, transport, page) = scripted_bridge();
        transport
            .queue_result(json!({ "matched": 1, "hidden": 1, "restored": 0 }))
            .await;
        // Host re-render wiped the inline override between calls; second
        // toggle behaves as if the element was never hidden.
        transport
            .queue_result(json!({ "matched": 1, "hidden": 1, "restored": 0 }))
            .await;

        let target = SelectorTarget::one(".project-header");
        let first = toggle(&bridge, page, &target).await.unwrap();
        let second = toggle(&bridge, page, &target).await.unwrap();
        assert_eq!(first.hidden, 1);
        assert_eq!(second.hidden, 1);

        // No engine-side state threads between calls: both probes are the
        // identical self-contained expression.
        let expressions = transport.expressions().await;
        assert_eq!(expressions.len(), 2);
        assert_eq!(expressions[0], expressions[1]);
    }
}
