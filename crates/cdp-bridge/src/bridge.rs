//! The bridge proper: page tracking, script evaluation, click bindings.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::detect_chromium_executable;
use crate::error::{BridgeError, BridgeErrorKind};
use crate::events::BridgeEvent;
use crate::ids::PageId;
use crate::registry::Registry;
use crate::transport::{CdpTransport, ChromiumTransport, CommandTarget, NoopTransport, TransportEvent};

pub type EventBus = broadcast::Sender<BridgeEvent>;

/// Build an event bus plus an initial receiver.
pub fn event_bus(buffer: usize) -> (EventBus, broadcast::Receiver<BridgeEvent>) {
    broadcast::channel(buffer)
}

pub struct CdpBridge {
    cfg: BridgeConfig,
    bus: EventBus,
    registry: Arc<Registry>,
    transport: Arc<dyn CdpTransport>,
    targets: dashmap::DashMap<String, PageId>,
    sessions: dashmap::DashMap<String, PageId>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CdpBridge {
    /// Pick a real Chromium transport when a browser is reachable, otherwise
    /// fall back to the no-op transport (features degrade, nothing crashes).
    pub fn new(mut cfg: BridgeConfig, bus: EventBus) -> Self {
        let transport: Arc<dyn CdpTransport> = if cfg.websocket_url.is_some() {
            info!(target: "cdp-bridge", "attaching to existing browser over websocket");
            Arc::new(ChromiumTransport::new(cfg.clone()))
        } else if let Some(path) = detect_chromium_executable() {
            cfg.executable = path;
            info!(target: "cdp-bridge", executable = %cfg.executable.display(), "launching chromium");
            Arc::new(ChromiumTransport::new(cfg.clone()))
        } else {
            warn!(
                target: "cdp-bridge",
                "no chromium executable found; running with a no-op transport \
                 (set ZENPAGE_CHROME or pass --ws-url)"
            );
            Arc::new(NoopTransport)
        };

        Self::with_transport(cfg, bus, transport)
    }

    pub fn with_transport(
        cfg: BridgeConfig,
        bus: EventBus,
        transport: Arc<dyn CdpTransport>,
    ) -> Self {
        Self {
            cfg,
            bus,
            registry: Arc::new(Registry::new()),
            transport,
            targets: dashmap::DashMap::new(),
            sessions: dashmap::DashMap::new(),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.bus.subscribe()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Start the transport and the event pump. Idempotent.
    pub async fn start(self: &Arc<Self>) -> Result<(), BridgeError> {
        {
            let guard = self.tasks.lock().await;
            if !guard.is_empty() {
                return Ok(());
            }
        }

        self.transport.start().await?;
        let loop_task = tokio::spawn(Self::event_loop(Arc::clone(self)));
        self.tasks.lock().await.push(loop_task);
        info!(target: "cdp-bridge", "event loop started");
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut handles = self.tasks.lock().await;
        while let Some(handle) = handles.pop() {
            handle.abort();
            let _ = handle.await;
        }
    }

    /// Pages currently known to the bridge, most recently attached last.
    pub fn pages(&self) -> Vec<(PageId, crate::registry::TargetContext)> {
        self.registry.iter()
    }

    /// Register a page directly. The event loop does this from target events;
    /// tests and adoption paths use it explicitly.
    pub fn register_page(&self, page: PageId, target_id: Option<String>, session: Option<String>) {
        self.registry.insert_page(page, target_id.clone(), None);
        if let Some(target_id) = target_id {
            self.targets.insert(target_id, page);
        }
        if let Some(session) = session {
            self.sessions.insert(session.clone(), page);
            self.registry.set_cdp_session(&page, session);
        }
    }

    /// Open a fresh tab and wait until its debug session is attached.
    pub async fn create_page(&self, url: &str) -> Result<PageId, BridgeError> {
        let response = self
            .send_browser_command("Target.createTarget", json!({ "url": url }))
            .await?;
        let target_id = response
            .get("targetId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                BridgeError::new(BridgeErrorKind::Internal)
                    .with_hint("createTarget missing targetId")
            })?
            .to_string();

        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            if let Some(entry) = self.targets.get(&target_id) {
                let page = *entry.value();
                if self
                    .registry
                    .get(&page)
                    .map(|ctx| ctx.cdp_session.is_some())
                    .unwrap_or(false)
                {
                    return Ok(page);
                }
            }

            if Instant::now() >= deadline {
                return Err(BridgeError::new(BridgeErrorKind::AttachTimeout)
                    .with_hint("timed out waiting for target attach"));
            }

            sleep(Duration::from_millis(50)).await;
        }
    }

    pub async fn navigate(&self, page: PageId, url: &str) -> Result<(), BridgeError> {
        self.send_page_command(page, "Page.navigate", json!({ "url": url }))
            .await
            .map(|_| ())
    }

    /// Evaluate a script in the page's main world. Promises are awaited and
    /// the settled value is returned by value; in-page exceptions surface as
    /// `EvalFailed` with the exception details attached.
    pub async fn evaluate(&self, page: PageId, expression: &str) -> Result<Value, BridgeError> {
        self.wait_for_page_ready(page).await?;
        let response = self
            .send_page_command(
                page,
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "awaitPromise": true,
                    "returnByValue": true,
                    "userGesture": true,
                }),
            )
            .await?;

        if let Some(details) = response.get("exceptionDetails") {
            return Err(BridgeError::new(BridgeErrorKind::EvalFailed)
                .with_hint("script raised an exception")
                .with_data(details.clone()));
        }

        Ok(response
            .get("result")
            .and_then(|res| res.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Expose a page-side function `window[name](payload)` whose invocations
    /// arrive as `BridgeEvent::BindingCalled`. Idempotent per page and name.
    pub async fn add_binding(&self, page: PageId, name: &str) -> Result<(), BridgeError> {
        self.wait_for_page_ready(page).await?;
        if !self.registry.note_binding(&page, name) {
            debug!(target: "cdp-bridge", name, "binding already registered");
            return Ok(());
        }

        self.send_page_command(page, "Runtime.addBinding", json!({ "name": name }))
            .await
            .map(|_| ())
    }

    async fn send_browser_command(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Value, BridgeError> {
        self.transport
            .send_command(CommandTarget::Browser, method, params)
            .await
    }

    async fn send_page_command(
        &self,
        page: PageId,
        method: &str,
        params: Value,
    ) -> Result<Value, BridgeError> {
        let session = self.registry.get_cdp_session(&page).ok_or_else(|| {
            BridgeError::new(BridgeErrorKind::Internal)
                .with_hint(format!("missing cdp session for page {page:?}"))
        })?;
        self.transport
            .send_command(CommandTarget::Session(session), method, params)
            .await
    }

    async fn wait_for_page_ready(&self, page: PageId) -> Result<(), BridgeError> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if self
                .registry
                .get(&page)
                .map(|ctx| ctx.cdp_session.is_some())
                .unwrap_or(false)
            {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BridgeError::new(BridgeErrorKind::AttachTimeout)
                    .with_hint(format!("page {page:?} never attached")));
            }
            sleep(Duration::from_millis(50)).await;
        }
    }

    async fn event_loop(self: Arc<Self>) {
        const MIN_BACKOFF: Duration = Duration::from_millis(250);
        const MAX_BACKOFF: Duration = Duration::from_secs(5);
        let mut backoff = MIN_BACKOFF;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = self.transport.next_event() => {
                    match event {
                        Some(event) => {
                            backoff = MIN_BACKOFF;
                            self.handle_event(event).await;
                        }
                        None => {
                            if self.shutdown.is_cancelled() {
                                break;
                            }
                            self.handle_disconnect();
                            warn!(target: "cdp-bridge", "transport stream ended; attempting restart");
                            if let Err(err) = self.transport.start().await {
                                warn!(target: "cdp-bridge", ?err, "transport restart failed");
                            }
                            sleep(backoff).await;
                            backoff = (backoff + MIN_BACKOFF).min(MAX_BACKOFF);
                        }
                    }
                }
            }
        }
        debug!(target: "cdp-bridge", "event loop exiting");
    }

    fn handle_disconnect(&self) {
        for (page, _) in self.registry.iter() {
            let _ = self.bus.send(BridgeEvent::PageClosed { page });
            self.registry.remove_page(&page);
        }
        self.targets.clear();
        self.sessions.clear();
        let _ = self.bus.send(BridgeEvent::Error {
            page: None,
            message: "cdp transport restarted; attached pages were reset".to_string(),
        });
    }

    async fn handle_event(&self, event: TransportEvent) {
        if let Err(err) = self.process_event(event).await {
            let _ = self.bus.send(BridgeEvent::Error {
                page: None,
                message: format!("cdp event handling error: {err}"),
            });
        }
    }

    async fn process_event(&self, event: TransportEvent) -> Result<(), BridgeError> {
        match event.method.as_str() {
            "Target.targetCreated" => self.on_target_created(event.params),
            "Target.targetDestroyed" => self.on_target_destroyed(event.params),
            "Target.attachedToTarget" => self.on_target_attached(event.params),
            "Target.detachedFromTarget" => self.on_target_detached(event.params),
            "Target.targetInfoChanged" => self.on_target_info_changed(event.params),
            "Page.loadEventFired" => self.on_page_loaded(event.session_id),
            "Runtime.bindingCalled" => self.on_binding_called(event),
            _ => {
                debug!(target: "cdp-bridge", method = %event.method, "unhandled cdp event");
                Ok(())
            }
        }
    }

    fn on_target_created(&self, params: Value) -> Result<(), BridgeError> {
        let payload: TargetEventParams = decode(params)?;
        if payload.target_info.target_type != "page" {
            return Ok(());
        }

        let target_id = payload.target_info.target_id;
        if self.targets.contains_key(&target_id) {
            return Ok(());
        }

        let page = PageId::new();
        self.targets.insert(target_id.clone(), page);
        let url = payload.target_info.url.filter(|u| !u.is_empty());
        self.registry
            .insert_page(page, Some(target_id), url.clone());
        let _ = self.bus.send(BridgeEvent::PageOpened { page, url });
        Ok(())
    }

    fn on_target_destroyed(&self, params: Value) -> Result<(), BridgeError> {
        let payload: TargetIdParams = decode(params)?;
        if let Some((_, page)) = self.targets.remove(&payload.target_id) {
            self.sessions.retain(|_, v| *v != page);
            self.registry.remove_page(&page);
            let _ = self.bus.send(BridgeEvent::PageClosed { page });
        }
        Ok(())
    }

    fn on_target_attached(&self, params: Value) -> Result<(), BridgeError> {
        let payload: AttachedParams = decode(params)?;
        if payload.target_info.target_type != "page" {
            return Ok(());
        }

        if let Some(entry) = self.targets.get(&payload.target_info.target_id) {
            let page = *entry.value();
            self.sessions.insert(payload.session_id.clone(), page);
            self.registry
                .set_cdp_session(&page, payload.session_id.clone());
            self.spawn_enable_domains(payload.session_id);
        }
        Ok(())
    }

    fn on_target_detached(&self, params: Value) -> Result<(), BridgeError> {
        let payload: SessionIdParams = decode(params)?;
        if let Some((_, page)) = self.sessions.remove(&payload.session_id) {
            self.registry.clear_cdp_session(&page);
        }
        Ok(())
    }

    fn on_target_info_changed(&self, params: Value) -> Result<(), BridgeError> {
        let payload: TargetEventParams = decode(params)?;
        if let Some(entry) = self.targets.get(&payload.target_info.target_id) {
            if let Some(url) = payload.target_info.url.filter(|u| !u.is_empty()) {
                self.registry.set_recent_url(entry.value(), url);
            }
        }
        Ok(())
    }

    fn on_page_loaded(&self, session_id: Option<String>) -> Result<(), BridgeError> {
        if let Some(page) = session_id.and_then(|s| self.sessions.get(&s).map(|e| *e.value())) {
            let _ = self.bus.send(BridgeEvent::PageLoaded { page });
        }
        Ok(())
    }

    fn on_binding_called(&self, event: TransportEvent) -> Result<(), BridgeError> {
        let page = event
            .session_id
            .as_ref()
            .and_then(|s| self.sessions.get(s).map(|e| *e.value()));
        let payload: BindingCalledParams = decode(event.params)?;

        match page {
            Some(page) => {
                let _ = self.bus.send(BridgeEvent::BindingCalled {
                    page,
                    name: payload.name,
                    payload: payload.payload,
                });
            }
            None => {
                debug!(target: "cdp-bridge", name = %payload.name, "binding call from unknown session");
            }
        }
        Ok(())
    }

    /// Page and Runtime domains must be enabled per session before load events
    /// and binding calls start flowing.
    fn spawn_enable_domains(&self, session: String) {
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            for method in ["Runtime.enable", "Page.enable"] {
                if let Err(err) = transport
                    .send_command(
                        CommandTarget::Session(session.clone()),
                        method,
                        json!({}),
                    )
                    .await
                {
                    warn!(target: "cdp-bridge", ?err, method, "failed to enable domain");
                }
            }
        });
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.cfg
    }
}

fn decode<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, BridgeError> {
    serde_json::from_value(params)
        .map_err(|err| BridgeError::new(BridgeErrorKind::Internal).with_hint(err.to_string()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetInfo {
    target_id: String,
    #[serde(rename = "type")]
    target_type: String,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetEventParams {
    target_info: TargetInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetIdParams {
    target_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachedParams {
    session_id: String,
    target_info: TargetInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionIdParams {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct BindingCalledParams {
    name: String,
    payload: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tokio::sync::Mutex as TokioMutex;

    /// Transport scripted from the outside: queued events, canned evaluate
    /// results, and a recording of every command sent.
    #[derive(Default)]
    struct ScriptedTransport {
        events: TokioMutex<VecDeque<TransportEvent>>,
        eval_results: TokioMutex<VecDeque<Value>>,
        calls: TokioMutex<Vec<(String, String)>>,
    }

    impl ScriptedTransport {
        async fn push_event(&self, method: &str, params: Value, session: Option<&str>) {
            self.events.lock().await.push_back(TransportEvent {
                method: method.to_string(),
                params,
                session_id: session.map(|s| s.to_string()),
            });
        }

        async fn calls_for(&self, method: &str) -> usize {
            self.calls
                .lock()
                .await
                .iter()
                .filter(|(m, _)| m == method)
                .count()
        }
    }

    #[async_trait]
    impl CdpTransport for ScriptedTransport {
        async fn start(&self) -> Result<(), BridgeError> {
            Ok(())
        }

        async fn next_event(&self) -> Option<TransportEvent> {
            loop {
                if let Some(event) = self.events.lock().await.pop_front() {
                    return Some(event);
                }
                // Stay pending instead of signalling disconnect.
                sleep(Duration::from_millis(5)).await;
            }
        }

        async fn send_command(
            &self,
            target: CommandTarget,
            method: &str,
            params: Value,
        ) -> Result<Value, BridgeError> {
            let session = match target {
                CommandTarget::Browser => String::new(),
                CommandTarget::Session(s) => s,
            };
            self.calls
                .lock()
                .await
                .push((method.to_string(), session));

            match method {
                "Runtime.evaluate" => {
                    let _ = params;
                    let value = self
                        .eval_results
                        .lock()
                        .await
                        .pop_front()
                        .unwrap_or(Value::Null);
                    Ok(value)
                }
                "Target.createTarget" => Ok(json!({ "targetId": "target-1" })),
                _ => Ok(json!({})),
            }
        }
    }

    fn bridge_with(transport: Arc<ScriptedTransport>) -> Arc<CdpBridge> {
        let (bus, _rx) = event_bus(16);
        Arc::new(CdpBridge::with_transport(
            BridgeConfig::default(),
            bus,
            transport,
        ))
    }

    async fn attach_page(transport: &ScriptedTransport) {
        transport
            .push_event(
                "Target.targetCreated",
                json!({ "targetInfo": { "targetId": "target-1", "type": "page", "url": "https://www.overleaf.com/project" } }),
                None,
            )
            .await;
        transport
            .push_event(
                "Target.attachedToTarget",
                json!({
                    "sessionId": "session-1",
                    "targetInfo": { "targetId": "target-1", "type": "page" }
                }),
                None,
            )
            .await;
    }

    #[tokio::test]
    async fn target_lifecycle_updates_registry_and_bus() {
        let transport = Arc::new(ScriptedTransport::default());
        let bridge = bridge_with(transport.clone());
        let mut rx = bridge.subscribe();

        attach_page(&transport).await;
        bridge.start().await.unwrap();

        let opened = rx.recv().await.unwrap();
        let page = match opened {
            BridgeEvent::PageOpened { page, url } => {
                assert_eq!(url.as_deref(), Some("https://www.overleaf.com/project"));
                page
            }
            other => panic!("expected PageOpened, got {other:?}"),
        };

        bridge.wait_for_page_ready(page).await.unwrap();
        let ctx = bridge.registry().get(&page).unwrap();
        assert_eq!(ctx.cdp_session.as_deref(), Some("session-1"));

        transport
            .push_event(
                "Target.targetDestroyed",
                json!({ "targetId": "target-1" }),
                None,
            )
            .await;
        loop {
            if let BridgeEvent::PageClosed { page: closed } = rx.recv().await.unwrap() {
                assert_eq!(closed, page);
                break;
            }
        }
        assert!(bridge.registry().get(&page).is_none());

        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn binding_calls_route_to_their_page() {
        let transport = Arc::new(ScriptedTransport::default());
        let bridge = bridge_with(transport.clone());
        let mut rx = bridge.subscribe();

        attach_page(&transport).await;
        bridge.start().await.unwrap();

        let page = match rx.recv().await.unwrap() {
            BridgeEvent::PageOpened { page, .. } => page,
            other => panic!("expected PageOpened, got {other:?}"),
        };
        bridge.wait_for_page_ready(page).await.unwrap();

        transport
            .push_event(
                "Runtime.bindingCalled",
                json!({ "name": "__zenpageAction", "payload": "toggle-header", "executionContextId": 1 }),
                Some("session-1"),
            )
            .await;

        loop {
            match rx.recv().await.unwrap() {
                BridgeEvent::BindingCalled {
                    page: event_page,
                    name,
                    payload,
                } => {
                    assert_eq!(event_page, page);
                    assert_eq!(name, "__zenpageAction");
                    assert_eq!(payload, "toggle-header");
                    break;
                }
                _ => continue,
            }
        }

        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn evaluate_returns_value_and_maps_exceptions() {
        let transport = Arc::new(ScriptedTransport::default());
        let bridge = bridge_with(transport.clone());

        let page = PageId::new();
        bridge.register_page(page, Some("target-9".into()), Some("session-9".into()));

        transport
            .eval_results
            .lock()
            .await
            .push_back(json!({ "result": { "value": { "matched": 2 } } }));
        let value = bridge.evaluate(page, "probe()").await.unwrap();
        assert_eq!(value["matched"], 2);

        transport
            .eval_results
            .lock()
            .await
            .push_back(json!({ "exceptionDetails": { "text": "boom" } }));
        let err = bridge.evaluate(page, "explode()").await.unwrap_err();
        assert!(matches!(err.kind, BridgeErrorKind::EvalFailed));
    }

    #[tokio::test]
    async fn add_binding_is_idempotent_per_page() {
        let transport = Arc::new(ScriptedTransport::default());
        let bridge = bridge_with(transport.clone());

        let page = PageId::new();
        bridge.register_page(page, Some("target-3".into()), Some("session-3".into()));

        bridge.add_binding(page, "__zenpageAction").await.unwrap();
        bridge.add_binding(page, "__zenpageAction").await.unwrap();

        assert_eq!(transport.calls_for("Runtime.addBinding").await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn evaluate_without_session_fails_with_attach_timeout() {
        let transport = Arc::new(ScriptedTransport::default());
        let bridge = bridge_with(transport);

        let page = PageId::new();
        bridge.register_page(page, Some("target-5".into()), None);

        let started = Instant::now();
        let err = bridge.evaluate(page, "1 + 1").await.unwrap_err();
        assert!(matches!(err.kind, BridgeErrorKind::AttachTimeout));
        assert!(started.elapsed() >= Duration::from_secs(5));
    }
}
