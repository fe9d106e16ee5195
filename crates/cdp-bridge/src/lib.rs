//! CDP bridge for zenpage.
//!
//! Owns the websocket connection to a Chromium instance, keeps track of the
//! attached pages, and exposes the small command surface the augmentation
//! engine needs: evaluate a script in a page, register a click binding, and
//! observe page lifecycle / binding events.

use std::{env, path::PathBuf};

mod bridge;
mod registry;
mod transport;
mod util;

pub use bridge::{event_bus, CdpBridge, EventBus};
pub use registry::{Registry, TargetContext};
pub use transport::{ChromiumTransport, CommandTarget, CdpTransport, NoopTransport, TransportEvent};

pub mod ids {
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    /// Unique identifier for a page/tab managed by the bridge.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
    pub struct PageId(pub Uuid);

    impl PageId {
        pub fn new() -> Self {
            Self(Uuid::new_v4())
        }
    }

    impl Default for PageId {
        fn default() -> Self {
            Self::new()
        }
    }

    impl std::fmt::Display for PageId {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }
}

pub mod error {
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use thiserror::Error;

    /// High-level error categories surfaced by the bridge.
    #[derive(Clone, Debug, Error, Serialize, Deserialize)]
    pub enum BridgeErrorKind {
        #[error("cdp i/o failure")]
        CdpIo,
        #[error("script evaluation failed")]
        EvalFailed,
        #[error("timed out waiting for target attach")]
        AttachTimeout,
        #[error("capability not available")]
        Unsupported,
        #[error("internal error")]
        Internal,
    }

    /// Enriched error metadata passed back to the engine.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct BridgeError {
        pub kind: BridgeErrorKind,
        pub hint: Option<String>,
        pub retriable: bool,
        pub data: Option<serde_json::Value>,
    }

    impl fmt::Display for BridgeError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.kind)?;
            if let Some(hint) = &self.hint {
                write!(f, ": {}", hint)?;
            }
            Ok(())
        }
    }

    impl std::error::Error for BridgeError {}

    impl BridgeError {
        pub fn new(kind: BridgeErrorKind) -> Self {
            Self {
                kind,
                hint: None,
                retriable: false,
                data: None,
            }
        }

        pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
            self.hint = Some(hint.into());
            self
        }

        pub fn retriable(mut self, flag: bool) -> Self {
            self.retriable = flag;
            self
        }

        pub fn with_data(mut self, data: serde_json::Value) -> Self {
            self.data = Some(data);
            self
        }
    }
}

pub mod events {
    use super::ids::PageId;
    use serde::{Deserialize, Serialize};

    /// Events emitted by the bridge to its subscribers.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub enum BridgeEvent {
        /// A page target appeared (new tab or pre-existing tab on attach).
        PageOpened { page: PageId, url: Option<String> },
        /// A page target went away.
        PageClosed { page: PageId },
        /// The page fired its load event; injected state may be gone.
        PageLoaded { page: PageId },
        /// A page-side binding was invoked (toolbar button click).
        BindingCalled {
            page: PageId,
            name: String,
            payload: String,
        },
        /// Non-fatal bridge-level error worth surfacing.
        Error {
            page: Option<PageId>,
            message: String,
        },
    }
}

pub mod config {
    use crate::detect_chromium_executable;
    use serde::{Deserialize, Serialize};
    use std::{env, path::PathBuf};

    /// Configuration for launching or attaching to Chromium.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct BridgeConfig {
        pub executable: PathBuf,
        pub user_data_dir: PathBuf,
        pub headless: bool,
        pub default_deadline_ms: u64,
        /// When set, attach to a running browser instead of launching one.
        pub websocket_url: Option<String>,
    }

    impl Default for BridgeConfig {
        fn default() -> Self {
            Self {
                executable: detect_chromium_executable().unwrap_or_default(),
                user_data_dir: default_profile_dir(),
                headless: false,
                default_deadline_ms: 30_000,
                websocket_url: None,
            }
        }
    }

    fn default_profile_dir() -> PathBuf {
        if let Ok(path) = env::var("ZENPAGE_PROFILE_DIR") {
            return PathBuf::from(path);
        }
        PathBuf::from("./.zenpage-profile")
    }
}

/// Locate a Chromium-family executable, preferring the env override.
pub fn detect_chromium_executable() -> Option<PathBuf> {
    if let Ok(raw) = env::var("ZENPAGE_CHROME") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            let candidate = PathBuf::from(trimmed);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    for name in chromium_executable_names() {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    os_specific_chromium_paths()
        .into_iter()
        .find(|candidate| candidate.exists())
}

fn chromium_executable_names() -> &'static [&'static str] {
    #[cfg(target_os = "windows")]
    {
        &["chrome.exe", "chromium.exe", "msedge.exe"]
    }

    #[cfg(any(target_os = "macos", target_os = "linux", target_os = "freebsd"))]
    {
        &[
            "google-chrome-stable",
            "google-chrome",
            "chromium",
            "chromium-browser",
        ]
    }

    #[cfg(not(any(
        target_os = "windows",
        target_os = "macos",
        target_os = "linux",
        target_os = "freebsd"
    )))]
    {
        &["chrome"]
    }
}

fn os_specific_chromium_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let mut paths = Vec::new();
        for key in ["PROGRAMFILES", "PROGRAMFILES(X86)", "LOCALAPPDATA"] {
            if let Ok(value) = env::var(key) {
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    let root = PathBuf::from(trimmed);
                    paths.push(root.join("Google/Chrome/Application/chrome.exe"));
                    paths.push(root.join("Chromium/Application/chrome.exe"));
                    paths.push(root.join("Microsoft/Edge/Application/msedge.exe"));
                }
            }
        }
        paths
    }

    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
        ]
    }

    #[cfg(any(target_os = "linux", target_os = "freebsd"))]
    {
        vec![
            PathBuf::from("/usr/bin/google-chrome-stable"),
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/chromium-browser"),
            PathBuf::from("/usr/bin/chromium"),
        ]
    }

    #[cfg(not(any(
        target_os = "windows",
        target_os = "macos",
        target_os = "linux",
        target_os = "freebsd"
    )))]
    {
        Vec::new()
    }
}

pub use error::{BridgeError, BridgeErrorKind};
pub use events::BridgeEvent;
pub use ids::PageId;
