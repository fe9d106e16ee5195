//! The long-running `zenpage run` session: one bridge, one page, one
//! profile, and an event loop that keeps the toolbar alive across reloads.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use cdp_bridge::{config::BridgeConfig, event_bus, BridgeEvent, CdpBridge, PageId};
use site_profiles::{ProfileSet, SiteProfile};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use url::Url;
use zen_engine::{
    force_hide, inject_stylesheet, remove_nodes, ButtonDescriptor, ElementWaiter, InsertPolicy,
    PulseSchedule, ToolbarInjector, ZenAction, ZenEngine, ACTION_BINDING,
};

use crate::RunArgs;

/// Upper bound on waiting for the toolbar anchor; unlike the in-page
/// engine default we do not want the CLI to hang forever on a dead page.
const ANCHOR_DEADLINE: Duration = Duration::from_secs(30);

pub async fn run(args: RunArgs, profiles: &ProfileSet) -> Result<()> {
    let url = Url::parse(&args.url).context("invalid --url")?;

    let profile = match &args.profile {
        Some(name) => profiles.by_name(name)?,
        None => profiles.for_url(&url).ok_or_else(|| {
            anyhow!(
                "no profile matches {} (see `zenpage profiles`, or force one with --profile)",
                url
            )
        })?,
    };
    info!(profile = %profile.name, %url, "starting session");

    let mut cfg = BridgeConfig {
        headless: args.headless,
        websocket_url: args.ws_url.clone(),
        ..BridgeConfig::default()
    };
    if let Some(path) = &args.chrome_path {
        cfg.executable = path.clone();
    }

    let (bus, _seed_rx) = event_bus(256);
    let bridge = Arc::new(CdpBridge::new(cfg, bus));
    bridge.start().await?;
    let mut events = bridge.subscribe();

    let page = match adopt_page(&bridge, &url).await {
        Some((page, current)) => {
            info!(%page, "adopted already-open page");
            if current.as_deref() != Some(url.as_str()) {
                bridge.navigate(page, url.as_str()).await?;
            }
            page
        }
        None => bridge.create_page(url.as_str()).await?,
    };

    let pulse = if args.light_pulse {
        PulseSchedule::light()
    } else {
        PulseSchedule::default()
    };
    let engine = ZenEngine::with_pulse(bridge.clone(), pulse);
    let injector = ToolbarInjector::with_waiter(ElementWaiter::with_deadline(ANCHOR_DEADLINE));

    let buttons = profile.button_descriptors();
    let actions: HashMap<String, ZenAction> = buttons
        .iter()
        .map(|b| (b.id.clone(), b.action.clone()))
        .collect();
    let policy = profile.insert_policy();

    apply_profile(&bridge, page, profile, &injector, &buttons, &policy).await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                break;
            }
            event = events.recv() => match event {
                Ok(BridgeEvent::BindingCalled { page: p, name, payload })
                    if p == page && name == ACTION_BINDING =>
                {
                    match actions.get(payload.as_str()) {
                        Some(action) => {
                            if let Err(err) = engine.dispatch(page, action).await {
                                warn!(button = %payload, %err, "action dispatch failed");
                            }
                        }
                        None => warn!(payload = %payload, "binding call for unknown button"),
                    }
                }
                Ok(BridgeEvent::PageLoaded { page: p }) if p == page => {
                    info!("page loaded, re-applying profile");
                    if let Err(err) =
                        apply_profile(&bridge, page, profile, &injector, &buttons, &policy).await
                    {
                        warn!(%err, "profile re-apply failed");
                    }
                }
                Ok(BridgeEvent::PageClosed { page: p }) if p == page => {
                    info!("page closed, ending session");
                    break;
                }
                Ok(BridgeEvent::Error { message, .. }) => {
                    warn!(%message, "bridge error");
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "event bus lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    bridge.shutdown().await;
    Ok(())
}

/// Stylesheet, load-time hides/removals, then the toolbar. Safe to re-run:
/// every step is either idempotent or guard-protected.
async fn apply_profile(
    bridge: &Arc<CdpBridge>,
    page: PageId,
    profile: &SiteProfile,
    injector: &ToolbarInjector,
    buttons: &[ButtonDescriptor],
    policy: &InsertPolicy,
) -> Result<()> {
    inject_stylesheet(bridge, page, &profile.stylesheet).await?;
    for target in &profile.remove_on_load {
        remove_nodes(bridge, page, target).await?;
    }
    for target in &profile.hide_on_load {
        force_hide(bridge, page, target).await?;
    }

    let report = injector
        .install(bridge, page, &profile.toolbar, buttons, policy)
        .await?;
    info!(
        installed = report.installed,
        buttons = report.buttons,
        latency_ms = report.latency_ms,
        "toolbar ready"
    );
    Ok(())
}

/// When attaching to a running browser the page may already be open; prefer
/// it over spawning a duplicate tab. Discovery is asynchronous, so give the
/// bridge a moment to hear about existing targets.
async fn adopt_page(bridge: &Arc<CdpBridge>, url: &Url) -> Option<(PageId, Option<String>)> {
    for _ in 0..10 {
        let hit = bridge.pages().into_iter().find(|(_, ctx)| {
            ctx.recent_url
                .as_deref()
                .and_then(|raw| Url::parse(raw).ok())
                .and_then(|u| u.host_str().map(str::to_string))
                == url.host_str().map(str::to_string)
        });
        if let Some((page, ctx)) = hit {
            return Some((page, ctx.recent_url));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    None
}
