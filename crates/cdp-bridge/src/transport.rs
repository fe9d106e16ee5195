//! Transport layer: the raw CDP command/event wire.
//!
//! `CdpTransport` is the seam the rest of the crate (and the engine's tests)
//! program against. `ChromiumTransport` is the real implementation: it either
//! launches a Chromium process or connects to an existing DevTools websocket,
//! then pumps commands and events over a single connection task.

use std::collections::HashMap;
use std::convert::TryInto;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::async_process::Child;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::target::SessionId as CdpSessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide::error::CdpError;
use chromiumoxide_types::{CallId, CdpJsonEventMessage, Message, MethodId, Response};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeErrorKind};
use crate::util::extract_ws_url;

/// A CDP event as it arrives off the wire.
#[derive(Clone, Debug)]
pub struct TransportEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

/// Addressing for a command: the browser endpoint or a specific page session.
#[derive(Clone, Debug)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

#[async_trait]
pub trait CdpTransport: Send + Sync {
    async fn start(&self) -> Result<(), BridgeError>;
    async fn next_event(&self) -> Option<TransportEvent>;
    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, BridgeError>;
}

/// Degraded-mode transport: every command fails, no events arrive. Used when
/// no browser is reachable so the rest of the program can still run.
#[derive(Default)]
pub struct NoopTransport;

#[async_trait]
impl CdpTransport for NoopTransport {
    async fn start(&self) -> Result<(), BridgeError> {
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        None
    }

    async fn send_command(
        &self,
        _target: CommandTarget,
        method: &str,
        _params: Value,
    ) -> Result<Value, BridgeError> {
        Err(BridgeError::new(BridgeErrorKind::Unsupported)
            .with_hint(format!("no browser transport for method {method}")))
    }
}

pub struct ChromiumTransport {
    cfg: BridgeConfig,
    wire: OnceCell<Mutex<Option<Arc<Wire>>>>,
}

impl ChromiumTransport {
    pub fn new(cfg: BridgeConfig) -> Self {
        Self {
            cfg,
            wire: OnceCell::new(),
        }
    }

    /// Return the live wire, reconnecting if the previous one died.
    async fn wire(&self) -> Result<Arc<Wire>, BridgeError> {
        let cell = self.wire.get_or_init(|| async { Mutex::new(None) }).await;
        let mut guard = cell.lock().await;

        if let Some(wire) = guard.as_ref() {
            if wire.is_alive() {
                return Ok(wire.clone());
            }
        }

        let wire = Arc::new(Wire::connect(self.cfg.clone()).await?);
        *guard = Some(wire.clone());
        Ok(wire)
    }
}

#[async_trait]
impl CdpTransport for ChromiumTransport {
    async fn start(&self) -> Result<(), BridgeError> {
        let wire = self.wire().await?;
        let deadline = Duration::from_millis(self.cfg.default_deadline_ms);

        wire.send(
            CommandTarget::Browser,
            "Target.setDiscoverTargets",
            serde_json::json!({ "discover": true }),
            deadline,
        )
        .await?;

        wire.send(
            CommandTarget::Browser,
            "Target.setAutoAttach",
            serde_json::json!({
                "autoAttach": true,
                "waitForDebuggerOnStart": false,
                "flatten": true,
            }),
            deadline,
        )
        .await?;

        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        match self.wire().await {
            Ok(wire) => wire.next_event().await,
            Err(err) => {
                warn!(target: "cdp-bridge", ?err, "transport not ready");
                None
            }
        }
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, BridgeError> {
        let wire = self.wire().await?;
        wire.send(
            target,
            method,
            params,
            Duration::from_millis(self.cfg.default_deadline_ms),
        )
        .await
    }
}

struct PendingCommand {
    target: CommandTarget,
    method: String,
    params: Value,
    responder: oneshot::Sender<Result<Value, BridgeError>>,
}

/// One live websocket connection plus the task pumping it.
struct Wire {
    command_tx: mpsc::Sender<PendingCommand>,
    events_rx: Mutex<mpsc::Receiver<TransportEvent>>,
    loop_task: JoinHandle<()>,
    child: Mutex<Option<Child>>,
    alive: Arc<AtomicBool>,
}

impl Wire {
    async fn connect(cfg: BridgeConfig) -> Result<Self, BridgeError> {
        let (child, ws_url) = if let Some(url) = cfg.websocket_url.clone() {
            (None, url)
        } else {
            let browser_cfg = Self::browser_config(&cfg)?;
            Self::launch(browser_cfg).await?
        };

        let conn = Connection::<CdpEventMessage>::connect(&ws_url)
            .await
            .map_err(|err| BridgeError::new(BridgeErrorKind::CdpIo).with_hint(err.to_string()))?;

        let (command_tx, command_rx) = mpsc::channel(128);
        let (events_tx, events_rx) = mpsc::channel(512);

        let alive = Arc::new(AtomicBool::new(true));
        let loop_alive = alive.clone();
        let loop_task = tokio::spawn(async move {
            let result = Self::run_loop(conn, command_rx, events_tx).await;
            loop_alive.store(false, Ordering::Relaxed);
            if let Err(err) = result {
                error!(target: "cdp-bridge", ?err, "transport loop terminated");
            }
        });

        info!(target: "cdp-bridge", url = %ws_url, "chromium connection established");

        Ok(Self {
            command_tx,
            events_rx: Mutex::new(events_rx),
            loop_task,
            child: Mutex::new(child),
            alive,
        })
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    async fn send(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, BridgeError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        let pending = PendingCommand {
            target,
            method: method.to_string(),
            params,
            responder: resp_tx,
        };

        self.command_tx
            .send(pending)
            .await
            .map_err(|err| BridgeError::new(BridgeErrorKind::CdpIo).with_hint(err.to_string()))?;

        match tokio::time::timeout(deadline, resp_rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(_)) => Err(BridgeError::new(BridgeErrorKind::CdpIo)
                .with_hint("command response channel closed")),
            Err(_) => Err(BridgeError::new(BridgeErrorKind::CdpIo)
                .with_hint(format!("command {method} timed out"))
                .retriable(true)),
        }
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        let mut guard = self.events_rx.lock().await;
        guard.recv().await
    }

    fn browser_config(cfg: &BridgeConfig) -> Result<BrowserConfig, BridgeError> {
        let profile_dir = if cfg.user_data_dir.is_absolute() {
            cfg.user_data_dir.clone()
        } else {
            let cwd = std::env::current_dir().map_err(|err| {
                BridgeError::new(BridgeErrorKind::Internal)
                    .with_hint(format!("failed to resolve cwd for user-data-dir: {err}"))
            })?;
            cwd.join(&cfg.user_data_dir)
        };
        fs::create_dir_all(&profile_dir).map_err(|err| {
            BridgeError::new(BridgeErrorKind::Internal)
                .with_hint(format!("failed to ensure user-data-dir: {err}"))
        })?;

        let mut builder = BrowserConfig::builder()
            .request_timeout(Duration::from_millis(cfg.default_deadline_ms))
            .launch_timeout(Duration::from_secs(20));

        if !cfg.headless {
            builder = builder.with_head();
        }

        let mut args = vec![
            "--disable-background-networking",
            "--disable-background-timer-throttling",
            "--disable-breakpad",
            "--disable-component-update",
            "--disable-default-apps",
            "--disable-hang-monitor",
            "--disable-prompt-on-repost",
            "--disable-sync",
            "--no-first-run",
            "--no-default-browser-check",
            "--remote-allow-origins=*",
        ];
        if cfg.headless {
            args.push("--headless=new");
            args.push("--mute-audio");
        }
        builder = builder.args(args);

        if !cfg.executable.as_os_str().is_empty() {
            builder = builder.chrome_executable(cfg.executable.clone());
        }
        builder = builder.user_data_dir(profile_dir);

        builder.build().map_err(|err| {
            BridgeError::new(BridgeErrorKind::Internal)
                .with_hint(format!("browser config error: {err}"))
        })
    }

    async fn launch(config: BrowserConfig) -> Result<(Option<Child>, String), BridgeError> {
        let mut child = config.launch().map_err(|err| {
            BridgeError::new(BridgeErrorKind::Internal)
                .with_hint(format!("failed to launch chromium: {err}"))
        })?;

        let ws_url = extract_ws_url(&mut child)
            .await
            .map_err(|err| BridgeError::new(BridgeErrorKind::CdpIo).with_hint(err.to_string()))?;

        Ok((Some(child), ws_url))
    }

    async fn run_loop(
        mut conn: Connection<CdpEventMessage>,
        mut command_rx: mpsc::Receiver<PendingCommand>,
        event_tx: mpsc::Sender<TransportEvent>,
    ) -> Result<(), BridgeError> {
        let mut inflight: HashMap<CallId, oneshot::Sender<Result<Value, BridgeError>>> =
            HashMap::new();

        loop {
            tokio::select! {
                Some(cmd) = command_rx.recv() => {
                    let session = match cmd.target {
                        CommandTarget::Browser => None,
                        CommandTarget::Session(session_id) => Some(CdpSessionId::from(session_id)),
                    };
                    let method_id: MethodId = cmd.method.clone().into();
                    match conn.submit_command(method_id, session, cmd.params) {
                        Ok(call_id) => {
                            inflight.insert(call_id, cmd.responder);
                        }
                        Err(err) => {
                            let bridge_err = BridgeError::new(BridgeErrorKind::CdpIo)
                                .with_hint(err.to_string());
                            let _ = cmd.responder.send(Err(bridge_err));
                        }
                    }
                }
                message = conn.next() => {
                    match message {
                        Some(Ok(Message::Response(resp))) => {
                            Self::resolve_response(resp, &mut inflight);
                        }
                        Some(Ok(Message::Event(event))) => {
                            match Self::decode_event(event) {
                                Ok(payload) => {
                                    if event_tx.send(payload).await.is_err() {
                                        debug!(target: "cdp-bridge", "event subscriber gone");
                                    }
                                }
                                Err(err) => {
                                    warn!(target: "cdp-bridge", ?err, "failed to decode cdp event");
                                }
                            }
                        }
                        Some(Err(err)) => {
                            let bridge_err = Self::map_cdp_error(err);
                            for (_, sender) in inflight.drain() {
                                let _ = sender.send(Err(bridge_err.clone()));
                            }
                            return Err(bridge_err);
                        }
                        None => {
                            let err = BridgeError::new(BridgeErrorKind::CdpIo)
                                .with_hint("cdp connection closed");
                            for (_, sender) in inflight.drain() {
                                let _ = sender.send(Err(err.clone()));
                            }
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    fn resolve_response(
        resp: Response,
        inflight: &mut HashMap<CallId, oneshot::Sender<Result<Value, BridgeError>>>,
    ) {
        let entry = inflight.remove(&resp.id);
        let result = if let Some(result) = resp.result {
            Ok(result)
        } else if let Some(error) = resp.error {
            Err(BridgeError::new(BridgeErrorKind::CdpIo)
                .with_hint(format!("cdp error {}: {}", error.code, error.message)))
        } else {
            Err(BridgeError::new(BridgeErrorKind::Internal).with_hint("empty cdp response"))
        };

        if let Some(sender) = entry {
            let _ = sender.send(result);
        }
    }

    fn decode_event(event: CdpEventMessage) -> Result<TransportEvent, BridgeError> {
        let raw: CdpJsonEventMessage = event.try_into().map_err(|err| {
            BridgeError::new(BridgeErrorKind::Internal)
                .with_hint(format!("failed to decode cdp event: {err}"))
        })?;

        Ok(TransportEvent {
            method: raw.method.into_owned(),
            params: raw.params,
            session_id: raw.session_id,
        })
    }

    fn map_cdp_error(err: CdpError) -> BridgeError {
        let hint = err.to_string();
        match err {
            CdpError::Timeout => BridgeError::new(BridgeErrorKind::CdpIo)
                .with_hint(hint)
                .retriable(true),
            other => {
                let retriable = matches!(
                    other,
                    CdpError::Ws(_) | CdpError::Io(_) | CdpError::NoResponse
                );
                BridgeError::new(BridgeErrorKind::CdpIo)
                    .with_hint(hint)
                    .retriable(retriable)
            }
        }
    }
}

impl Drop for Wire {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
        self.loop_task.abort();

        if let Ok(mut guard) = self.child.try_lock() {
            if let Some(mut child) = guard.take() {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(async move {
                        if let Err(err) = child.kill().await {
                            warn!(target: "cdp-bridge", ?err, "failed to kill chromium child");
                        }
                    });
                } else {
                    debug!(target: "cdp-bridge", "no runtime available to kill chromium child");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_transport_rejects_commands() {
        let transport = NoopTransport;
        transport.start().await.unwrap();
        assert!(transport.next_event().await.is_none());

        let err = transport
            .send_command(
                CommandTarget::Browser,
                "Runtime.evaluate",
                serde_json::json!({}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err.kind, BridgeErrorKind::Unsupported));
    }
}
