//! Resilient DOM-augmentation engine.
//!
//! Everything here operates on a live third-party page through the CDP
//! bridge. The page's frameworks render asynchronously and may override
//! styles with `!important`, so the engine never caches DOM state: each
//! operation re-derives what it needs from the document at call time.

pub mod errors;
mod engine;
mod fullscreen;
mod pulse;
mod styles;
mod toggle;
mod toolbar;
pub mod types;
mod waiter;

pub use engine::*;
pub use errors::*;
pub use fullscreen::*;
pub use pulse::*;
pub use styles::*;
pub use toggle::*;
pub use toolbar::*;
pub use types::*;
pub use waiter::*;

#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;
    use cdp_bridge::{
        event_bus, config::BridgeConfig, BridgeError, CdpBridge, CdpTransport, CommandTarget,
        PageId, TransportEvent,
    };
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    /// Transport that answers `Runtime.evaluate` from a scripted queue and
    /// records every expression it saw.
    #[derive(Default)]
    pub struct ScriptedTransport {
        results: Mutex<VecDeque<Value>>,
        pub default_result: Mutex<Value>,
        expressions: Mutex<Vec<String>>,
        commands: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        pub async fn queue_result(&self, value: Value) {
            self.results.lock().await.push_back(value);
        }

        pub async fn expressions(&self) -> Vec<String> {
            self.expressions.lock().await.clone()
        }

        pub async fn command_count(&self, method: &str) -> usize {
            self.commands
                .lock()
                .await
                .iter()
                .filter(|m| m.as_str() == method)
                .count()
        }

        pub async fn resize_pulse_count(&self) -> usize {
            self.expressions
                .lock()
                .await
                .iter()
                .filter(|expr| expr.contains("new Event('resize'"))
                .count()
        }
    }

    #[async_trait]
    impl CdpTransport for ScriptedTransport {
        async fn start(&self) -> Result<(), BridgeError> {
            Ok(())
        }

        async fn next_event(&self) -> Option<TransportEvent> {
            futures_pending().await;
            None
        }

        async fn send_command(
            &self,
            _target: CommandTarget,
            method: &str,
            params: Value,
        ) -> Result<Value, BridgeError> {
            self.commands.lock().await.push(method.to_string());
            if method == "Runtime.evaluate" {
                if let Some(expr) = params.get("expression").and_then(|v| v.as_str()) {
                    self.expressions.lock().await.push(expr.to_string());
                }
                let value = match self.results.lock().await.pop_front() {
                    Some(value) => value,
                    None => self.default_result.lock().await.clone(),
                };
                return Ok(json!({ "result": { "value": value } }));
            }
            Ok(json!({}))
        }
    }

    async fn futures_pending() {
        std::future::pending::<()>().await
    }

    pub fn scripted_bridge() -> (Arc<CdpBridge>, Arc<ScriptedTransport>, PageId) {
        let (bus, _rx) = event_bus(16);
        let transport = Arc::new(ScriptedTransport::default());
        let bridge = Arc::new(CdpBridge::with_transport(
            BridgeConfig::default(),
            bus,
            transport.clone(),
        ));
        let page = PageId::new();
        bridge.register_page(page, Some("test-target".into()), Some("test-session".into()));
        (bridge, transport, page)
    }
}
