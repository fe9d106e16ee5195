use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;
use zen_engine::{ButtonDescriptor, InsertPolicy, SelectorTarget, ZenAction};

use crate::builtin;
use crate::errors::ProfileError;

/// One toggleable page region and the button that controls it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegionSpec {
    /// Stable id, also the payload of the button's binding call.
    pub id: String,
    pub title: String,
    /// Inline SVG markup for the button face.
    pub icon: String,
    pub target: SelectorTarget,
    /// Hosts that recompute editor/canvas sizes on window resize need a
    /// repair pulse after every toggle.
    #[serde(default)]
    pub repair_layout: bool,
}

/// Everything the session needs to know about one host family.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SiteProfile {
    pub name: String,
    /// Bare domains; `overleaf.com` also matches `www.overleaf.com`.
    pub host_patterns: Vec<String>,
    /// Anchor fallback list for the toolbar injector.
    pub toolbar: SelectorTarget,
    /// Optional sibling to insert before inside the anchor.
    #[serde(default)]
    pub insert_before: Option<String>,
    #[serde(default)]
    pub regions: Vec<RegionSpec>,
    /// Force-hidden at install time and after every reload.
    #[serde(default)]
    pub hide_on_load: Vec<SelectorTarget>,
    /// Removed outright at install time; hosts recreate these on reload.
    #[serde(default)]
    pub remove_on_load: Vec<SelectorTarget>,
    #[serde(default)]
    pub stylesheet: String,
}

impl SiteProfile {
    pub fn matches_url(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        self.host_patterns.iter().any(|pattern| {
            host == pattern || host.ends_with(&format!(".{pattern}"))
        })
    }

    pub fn insert_policy(&self) -> InsertPolicy {
        match &self.insert_before {
            Some(selector) => InsertPolicy::before(selector.clone()),
            None => InsertPolicy::append(),
        }
    }

    /// Buttons for this profile: one per region, then the fullscreen toggle.
    pub fn button_descriptors(&self) -> Vec<ButtonDescriptor> {
        let mut buttons: Vec<ButtonDescriptor> = self
            .regions
            .iter()
            .map(|region| ButtonDescriptor {
                id: region.id.clone(),
                icon: region.icon.clone(),
                title: region.title.clone(),
                action: ZenAction::ToggleRegion {
                    target: region.target.clone(),
                    repair_layout: region.repair_layout,
                },
            })
            .collect();
        buttons.push(ButtonDescriptor {
            id: "fullscreen".into(),
            icon: builtin::ICON_FULLSCREEN.into(),
            title: "Toggle Fullscreen".into(),
            action: ZenAction::ToggleFullscreen,
        });
        buttons
    }
}

/// Ordered collection of profiles; earlier entries win URL resolution, so
/// user-supplied profiles are prepended ahead of the builtins.
#[derive(Clone, Debug, Default)]
pub struct ProfileSet {
    profiles: Vec<SiteProfile>,
}

impl ProfileSet {
    pub fn builtin() -> Self {
        Self {
            profiles: vec![builtin::overleaf(), builtin::texpage()],
        }
    }

    /// Builtins plus the profiles from a JSON file (an array of profiles).
    pub fn with_file(path: impl AsRef<Path>) -> Result<Self, ProfileError> {
        let mut set = Self::builtin();
        let mut extra = load_file(path)?;
        extra.append(&mut set.profiles);
        set.profiles = extra;
        Ok(set)
    }

    pub fn for_url(&self, url: &Url) -> Option<&SiteProfile> {
        self.profiles.iter().find(|p| p.matches_url(url))
    }

    pub fn by_name(&self, name: &str) -> Result<&SiteProfile, ProfileError> {
        self.profiles
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| ProfileError::UnknownProfile(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &SiteProfile> {
        self.profiles.iter()
    }
}

pub fn load_file(path: impl AsRef<Path>) -> Result<Vec<SiteProfile>, ProfileError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| ProfileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ProfileError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    #[test]
    fn host_matching_covers_bare_domain_and_subdomains() {
        let profile = builtin::overleaf();
        assert!(profile.matches_url(&url("https://www.overleaf.com/project/abc")));
        assert!(profile.matches_url(&url("https://overleaf.com/")));
        assert!(!profile.matches_url(&url("https://notoverleaf.com/")));
        assert!(!profile.matches_url(&url("https://www.texpage.com/")));
    }

    #[test]
    fn resolution_prefers_earlier_profiles() {
        let shadow = SiteProfile {
            name: "overleaf-custom".into(),
            host_patterns: vec!["overleaf.com".into()],
            toolbar: SelectorTarget::one(".custom-toolbar"),
            insert_before: None,
            regions: vec![],
            hide_on_load: vec![],
            remove_on_load: vec![],
            stylesheet: String::new(),
        };
        let mut set = ProfileSet::builtin();
        set.profiles.insert(0, shadow);
        let hit = set.for_url(&url("https://www.overleaf.com/project/abc")).unwrap();
        assert_eq!(hit.name, "overleaf-custom");
    }

    #[test]
    fn by_name_reports_unknown_profiles() {
        let set = ProfileSet::builtin();
        assert!(set.by_name("overleaf").is_ok());
        assert!(matches!(
            set.by_name("gitlab"),
            Err(ProfileError::UnknownProfile(_))
        ));
    }

    #[test]
    fn profiles_round_trip_through_serde() {
        let json = serde_json::to_string(&builtin::texpage()).unwrap();
        let back: SiteProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "texpage");
        assert_eq!(back.regions.len(), 3);
        assert!(back.regions.iter().all(|r| r.repair_layout));
    }

    #[test]
    fn minimal_json_profile_fills_defaults() {
        let raw = r#"{
            "name": "minimal",
            "host_patterns": ["example.com"],
            "toolbar": [".toolbar"]
        }"#;
        let profile: SiteProfile = serde_json::from_str(raw).unwrap();
        assert!(profile.insert_before.is_none());
        assert!(profile.regions.is_empty());
        assert!(profile.hide_on_load.is_empty());
        assert!(profile.remove_on_load.is_empty());
        assert!(profile.stylesheet.is_empty());
    }

    #[test]
    fn descriptors_end_with_fullscreen() {
        let buttons = builtin::overleaf().button_descriptors();
        assert_eq!(buttons.len(), 4);
        let last = buttons.last().unwrap();
        assert_eq!(last.id, "fullscreen");
        assert!(matches!(last.action, ZenAction::ToggleFullscreen));
        assert!(matches!(
            &buttons[0].action,
            ZenAction::ToggleRegion { .. }
        ));
    }
}
