//! Bookkeeping for the pages the bridge is attached to.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::ids::PageId;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TargetContext {
    pub target_id: Option<String>,
    pub cdp_session: Option<String>,
    pub recent_url: Option<String>,
    /// Binding names already registered on this page; keeps addBinding idempotent.
    pub bindings: Vec<String>,
}

/// Concurrent registry of attached pages.
pub struct Registry {
    pages: DashMap<PageId, TargetContext>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            pages: DashMap::new(),
        }
    }

    pub fn insert_page(&self, page: PageId, target_id: Option<String>, url: Option<String>) {
        let ctx = TargetContext {
            target_id,
            cdp_session: None,
            recent_url: url,
            bindings: Vec::new(),
        };
        self.pages.insert(page, ctx);
    }

    pub fn remove_page(&self, page: &PageId) {
        self.pages.remove(page);
    }

    pub fn get(&self, page: &PageId) -> Option<TargetContext> {
        self.pages.get(page).map(|entry| entry.value().clone())
    }

    pub fn iter(&self) -> Vec<(PageId, TargetContext)> {
        self.pages
            .iter()
            .map(|kv| (*kv.key(), kv.value().clone()))
            .collect()
    }

    pub fn set_recent_url(&self, page: &PageId, url: String) {
        if let Some(mut entry) = self.pages.get_mut(page) {
            entry.recent_url = Some(url);
        }
    }

    pub fn set_cdp_session(&self, page: &PageId, session: String) {
        if let Some(mut entry) = self.pages.get_mut(page) {
            entry.cdp_session = Some(session);
        }
    }

    pub fn clear_cdp_session(&self, page: &PageId) {
        if let Some(mut entry) = self.pages.get_mut(page) {
            entry.cdp_session = None;
        }
    }

    pub fn get_cdp_session(&self, page: &PageId) -> Option<String> {
        self.pages
            .get(page)
            .and_then(|entry| entry.cdp_session.clone())
    }

    /// Record a binding registration. Returns false when the name was already present.
    pub fn note_binding(&self, page: &PageId, name: &str) -> bool {
        match self.pages.get_mut(page) {
            Some(mut entry) => {
                if entry.bindings.iter().any(|b| b == name) {
                    false
                } else {
                    entry.bindings.push(name.to_string());
                    true
                }
            }
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
