//! Composition root: routes button actions to the primitives.

use std::sync::Arc;

use cdp_bridge::{CdpBridge, PageId};
use tracing::info;

use crate::errors::EngineError;
use crate::fullscreen::FullscreenController;
use crate::pulse::PulseSchedule;
use crate::toggle;
use crate::types::ZenAction;

pub struct ZenEngine {
    bridge: Arc<CdpBridge>,
    fullscreen: FullscreenController,
    pulse: PulseSchedule,
}

impl ZenEngine {
    pub fn new(bridge: Arc<CdpBridge>) -> Self {
        Self::with_pulse(bridge, PulseSchedule::default())
    }

    pub fn with_pulse(bridge: Arc<CdpBridge>, pulse: PulseSchedule) -> Self {
        Self {
            bridge,
            fullscreen: FullscreenController::new(pulse.clone()),
            pulse,
        }
    }

    pub fn bridge(&self) -> &Arc<CdpBridge> {
        &self.bridge
    }

    /// Execute one button action. Toggles are synchronous DOM flips;
    /// fullscreen is asynchronous and chains its own repair pulse.
    pub async fn dispatch(&self, page: PageId, action: &ZenAction) -> Result<(), EngineError> {
        match action {
            ZenAction::ToggleRegion {
                target,
                repair_layout,
            } => {
                let outcome = toggle::toggle(&self.bridge, page, target).await?;
                info!(
                    target: "zen-engine",
                    matched = outcome.matched,
                    hidden = outcome.hidden,
                    restored = outcome.restored,
                    "region toggled"
                );
                if *repair_layout {
                    self.pulse.schedule(Arc::clone(&self.bridge), page);
                }
                Ok(())
            }
            ZenAction::ForceHide { target } => {
                let hidden = toggle::force_hide(&self.bridge, page, target).await?;
                info!(target: "zen-engine", hidden, "region force-hidden");
                Ok(())
            }
            ZenAction::ToggleFullscreen => {
                self.fullscreen.toggle(&self.bridge, page).await.map(|_| ())
            }
        }
    }
}
