//! Shared engine types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An ordered fallback list of CSS selectors addressing zero or more live
/// DOM nodes. Supplied by configuration; never validated here, since a selector
/// that matches nothing (or is syntactically invalid) is a valid no-op.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectorTarget(Vec<String>);

impl SelectorTarget {
    pub fn new<I, S>(selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(selectors.into_iter().map(Into::into).collect())
    }

    pub fn one(selector: impl Into<String>) -> Self {
        Self(vec![selector.into()])
    }

    pub fn selectors(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// JSON array literal safe to embed in a page-side expression.
    pub fn js_array(&self) -> String {
        serde_json::to_string(&self.0).unwrap()
    }
}

impl From<&str> for SelectorTarget {
    fn from(selector: &str) -> Self {
        Self::one(selector)
    }
}

impl From<Vec<String>> for SelectorTarget {
    fn from(selectors: Vec<String>) -> Self {
        Self(selectors)
    }
}

/// Per-call counts from a visibility toggle. Elements are handled
/// independently, so a mixed region can hide some nodes and restore others
/// in the same call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleOutcome {
    pub matched: u64,
    pub hidden: u64,
    pub restored: u64,
}

/// What a toolbar button does when clicked.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ZenAction {
    /// Flip the visibility of a selector-addressed region.
    ToggleRegion {
        target: SelectorTarget,
        /// Fire a layout-repair pulse afterwards (for regions whose host
        /// recomputes canvas/editor sizes on window resize).
        #[serde(default)]
        repair_layout: bool,
    },
    /// Hide a region unconditionally; safe to call redundantly.
    ForceHide { target: SelectorTarget },
    /// Enter or leave native fullscreen.
    ToggleFullscreen,
}

/// One toolbar button: icon markup, accessible title, and the action its
/// click dispatches. Stateless; built once at injection time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ButtonDescriptor {
    pub id: String,
    pub icon: String,
    pub title: String,
    pub action: ZenAction,
}

/// Where to place injected buttons inside the anchor container.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InsertPolicy {
    /// Insert before this node when it exists and is still attached to the
    /// anchor; otherwise append at the end.
    pub before: Option<String>,
}

impl InsertPolicy {
    pub fn append() -> Self {
        Self::default()
    }

    pub fn before(selector: impl Into<String>) -> Self {
        Self {
            before: Some(selector.into()),
        }
    }
}

/// Outcome of a toolbar installation attempt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstallReport {
    /// False when the idempotency guard found buttons already present.
    pub installed: bool,
    pub buttons: u64,
    pub started_at: DateTime<Utc>,
    pub latency_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_target_js_array_escapes_quotes() {
        let target = SelectorTarget::new(["#panel-outer-main > div:nth-child(2)", ".cm\"quote"]);
        let literal = target.js_array();
        assert!(literal.starts_with('['));
        assert!(literal.contains("\\\"quote"));
        assert_eq!(
            serde_json::from_str::<Vec<String>>(&literal).unwrap(),
            target.selectors()
        );
    }

    #[test]
    fn zen_action_round_trips_through_serde() {
        let action = ZenAction::ToggleRegion {
            target: SelectorTarget::new([".cm-gutters"]),
            repair_layout: true,
        };
        let json = serde_json::to_string(&action).unwrap();
        assert!(json.contains("\"kind\":\"toggle_region\""));
        let back: ZenAction = serde_json::from_str(&json).unwrap();
        match back {
            ZenAction::ToggleRegion {
                target,
                repair_layout,
            } => {
                assert_eq!(target, SelectorTarget::one(".cm-gutters"));
                assert!(repair_layout);
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn repair_layout_defaults_to_false() {
        let action: ZenAction =
            serde_json::from_str(r#"{"kind":"toggle_region","target":[".x"]}"#).unwrap();
        assert!(matches!(
            action,
            ZenAction::ToggleRegion {
                repair_layout: false,
                ..
            }
        ));
    }
}
