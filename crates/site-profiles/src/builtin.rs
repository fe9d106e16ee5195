//! Built-in profiles for the hosts this tool grew up on.
//!
//! Selectors here track the live markup of each host and change when the
//! hosts redesign; everything else degrades to a silent no-op in the
//! meantime.

use zen_engine::{SelectorTarget, MARKER_CLASS};

use crate::model::{RegionSpec, SiteProfile};

pub const SVG_ATTRS: &str = r#"width="18" height="18" viewBox="0 0 24 24" fill="none" stroke="currentColor" stroke-width="2.5" stroke-linecap="round" stroke-linejoin="round""#;

pub const ICON_SIDEBAR: &str = r#"<svg width="18" height="18" viewBox="0 0 24 24" fill="none" stroke="currentColor" stroke-width="2.5" stroke-linecap="round" stroke-linejoin="round"><rect x="3" y="3" width="18" height="18" rx="2" ry="2"></rect><line x1="9" y1="3" x2="9" y2="21"></line></svg>"#;

pub const ICON_LINENUMS: &str = r#"<svg width="18" height="18" viewBox="0 0 24 24" fill="none" stroke="currentColor" stroke-width="2.5" stroke-linecap="round" stroke-linejoin="round"><path d="M3 6h18M3 12h18M3 18h18"/></svg>"#;

pub const ICON_HEADER: &str = r#"<svg width="18" height="18" viewBox="0 0 24 24" fill="none" stroke="currentColor" stroke-width="2.5" stroke-linecap="round" stroke-linejoin="round"><rect x="3" y="3" width="18" height="18" rx="2" ry="2"></rect><line x1="3" y1="9" x2="21" y2="9"></line></svg>"#;

pub const ICON_FULLSCREEN: &str = r#"<svg width="18" height="18" viewBox="0 0 24 24" fill="none" stroke="currentColor" stroke-width="2.5" stroke-linecap="round" stroke-linejoin="round"><path d="M8 3H5a2 2 0 0 0-2 2v3m18 0V5a2 2 0 0 0-2-2h-3m0 18h3a2 2 0 0 0 2-2v-3M3 16v3a2 2 0 0 0 2 2h3"/></svg>"#;

/// Overleaf: light toolbar, slim scrollbars, and a scroll fix for the pdfjs
/// viewer once the page goes fullscreen.
fn overleaf_css() -> String {
    format!(
        r#"
::-webkit-scrollbar {{ width: 4px; height: 6px; background-color: transparent; }}
::-webkit-scrollbar-track:hover {{ background-color: rgba(0, 0, 0, .1); }}
::-webkit-scrollbar-thumb {{ background-clip: border-box; background-color: rgba(0, 0, 0, .2); border-radius: 4px; }}
::-webkit-scrollbar-thumb:hover {{ background-color: rgba(0, 0, 0, .3); }}
.{marker} {{
    background-color: transparent !important;
    font-size: 14px;
    font-weight: bold;
    color: #555;
    width: 34px;
    height: 34px;
    border: none;
    cursor: pointer;
    display: flex;
    align-items: center;
    justify-content: center;
    transition: color 0.2s, background-color 0.2s;
}}
.{marker}:hover {{
    color: #000;
    background-color: rgba(0,0,0,0.05) !important;
    border-radius: 4px;
}}
:fullscreen .pdfjs-viewer-inner, :-webkit-full-screen .pdfjs-viewer-inner {{
    overflow-y: auto !important;
}}
"#,
        marker = MARKER_CLASS
    )
}

/// TexPage: dark toolbar, so the buttons go light-on-dark.
fn texpage_css() -> String {
    format!(
        r#"
::-webkit-scrollbar {{ width: 6px; height: 6px; background-color: transparent; }}
::-webkit-scrollbar-track:hover {{ background-color: rgba(0, 0, 0, .1); }}
::-webkit-scrollbar-thumb {{ background-clip: border-box; background-color: rgba(0, 0, 0, .2); border-radius: 4px; }}
::-webkit-scrollbar-thumb:hover {{ background-color: rgba(0, 0, 0, .3); }}
.{marker} {{
    background-color: transparent !important;
    color: #d1d5db;
    width: 34px;
    height: 34px;
    border: none;
    cursor: pointer;
    display: inline-flex;
    align-items: center;
    justify-content: center;
    transition: color 0.2s, background-color 0.2s;
    margin-left: 5px;
    border-radius: 4px;
}}
.{marker}:hover {{
    color: #ffffff;
    background-color: rgba(255,255,255,0.15) !important;
}}
:fullscreen {{ background-color: #fff; overflow-y: auto; }}
"#,
        marker = MARKER_CLASS
    )
}

pub fn overleaf() -> SiteProfile {
    SiteProfile {
        name: "overleaf".into(),
        host_patterns: vec!["overleaf.com".into()],
        toolbar: SelectorTarget::new([".toolbar-editor", ".toolbar-header"]),
        insert_before: Some(
            "#ol-cm-toolbar-wrapper > div.ol-cm-toolbar.toolbar-editor > div.ol-cm-toolbar-button-group.ol-cm-toolbar-end"
                .into(),
        ),
        regions: vec![
            RegionSpec {
                id: "sidebar".into(),
                title: "Toggle Sidebar".into(),
                icon: ICON_SIDEBAR.into(),
                target: SelectorTarget::new([
                    "#ide-root > div.ide-redesign-main > div.ide-redesign-body > div > nav",
                    "#review-panel-inner",
                ]),
                repair_layout: false,
            },
            RegionSpec {
                id: "line-numbers".into(),
                title: "Toggle Line Numbers".into(),
                icon: ICON_LINENUMS.into(),
                target: SelectorTarget::one(".cm-gutters"),
                repair_layout: false,
            },
            RegionSpec {
                id: "header".into(),
                title: "Toggle Header".into(),
                icon: ICON_HEADER.into(),
                target: SelectorTarget::one(".ide-redesign-toolbar"),
                repair_layout: false,
            },
        ],
        hide_on_load: vec![
            // Premium badge next to the toolbar button groups.
            SelectorTarget::one(
                "#ol-cm-toolbar-wrapper > div.ol-cm-toolbar.toolbar-editor > div:nth-child(3)",
            ),
            SelectorTarget::one("#panel-outer-main > div > div:nth-child(2) > div"),
        ],
        remove_on_load: vec![SelectorTarget::one(".cm-gutter-lint")],
        stylesheet: overleaf_css(),
    }
}

pub fn texpage() -> SiteProfile {
    SiteProfile {
        name: "texpage".into(),
        host_patterns: vec!["texpage.com".into()],
        toolbar: SelectorTarget::one(".editor-actions"),
        insert_before: None,
        regions: vec![
            RegionSpec {
                id: "lint-bar".into(),
                title: "Toggle Lint Bar".into(),
                icon: ICON_SIDEBAR.into(),
                target: SelectorTarget::one(".cm-gutter-lint"),
                repair_layout: true,
            },
            RegionSpec {
                id: "line-numbers".into(),
                title: "Toggle Line Numbers".into(),
                icon: ICON_LINENUMS.into(),
                target: SelectorTarget::one(".cm-gutters"),
                repair_layout: true,
            },
            RegionSpec {
                id: "header".into(),
                title: "Toggle Header".into(),
                icon: ICON_HEADER.into(),
                target: SelectorTarget::one(".project-header"),
                repair_layout: true,
            },
        ],
        // TexPage pins the lint bar with display:flex !important, so it is
        // force-hidden up front and again after every reload.
        hide_on_load: vec![SelectorTarget::one(".cm-gutter-lint")],
        remove_on_load: vec![],
        stylesheet: texpage_css(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn icons_share_the_common_attribute_set() {
        for icon in [ICON_SIDEBAR, ICON_LINENUMS, ICON_HEADER, ICON_FULLSCREEN] {
            assert!(icon.contains(SVG_ATTRS), "icon missing shared attrs: {icon}");
            assert!(icon.starts_with("<svg"));
            assert!(icon.ends_with("</svg>"));
        }
    }

    #[test]
    fn stylesheets_target_the_injected_button_class() {
        for profile in [overleaf(), texpage()] {
            assert!(
                profile.stylesheet.contains(&format!(".{MARKER_CLASS}")),
                "{} stylesheet misses the marker class",
                profile.name
            );
        }
    }

    #[test]
    fn overleaf_anchors_have_a_fallback() {
        let profile = overleaf();
        assert_eq!(profile.toolbar.selectors().len(), 2);
        assert!(profile.insert_before.is_some());
        assert_eq!(profile.remove_on_load.len(), 1);
    }

    #[test]
    fn texpage_toggles_all_repair_layout() {
        let profile = texpage();
        assert!(profile.insert_before.is_none());
        assert!(profile.regions.iter().all(|r| r.repair_layout));
        assert_eq!(
            profile.hide_on_load[0].selectors(),
            [".cm-gutter-lint".to_string()]
        );
    }
}
