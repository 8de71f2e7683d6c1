//! Structured message-channel transport.
//!
//! The caller posts a JSON object naming its callbacks; outcomes are delivered
//! by evaluating `name(arg);` in the caller's environment.

use std::sync::Arc;

use log::{debug, warn};
use serde_json::Value;

use super::escape::callback_script;
use super::protocol::{BridgeRequest, CallbackArg, CallbackName, OutcomeChannel, ProtocolError};
use super::router::MessageRouter;
use crate::dispatch::RequestId;
use crate::session::SessionHandle;

/// Runs script text in the caller's environment (a webview, a JS engine)
pub trait ScriptEvaluator: Send + Sync + 'static {
    fn evaluate(&self, script: String);
}

/// A callback the caller registered under `name`
#[derive(Clone)]
pub struct NamedCallback {
    name: CallbackName,
    evaluator: Arc<dyn ScriptEvaluator>,
}

impl NamedCallback {
    pub fn new(name: CallbackName, evaluator: Arc<dyn ScriptEvaluator>) -> Self {
        Self { name, evaluator }
    }
}

impl OutcomeChannel for NamedCallback {
    fn fire(&self, arg: CallbackArg) {
        let script = callback_script(&self.name, &arg);
        debug!("Calling {}", self.name);
        self.evaluator.evaluate(script);
    }
}

pub struct MessageChannelBridge {
    router: MessageRouter,
    evaluator: Arc<dyn ScriptEvaluator>,
}

impl MessageChannelBridge {
    pub fn new(session: SessionHandle, evaluator: Arc<dyn ScriptEvaluator>) -> Self {
        Self {
            router: MessageRouter::new(session),
            evaluator,
        }
    }

    /// Handle one posted message. Malformed messages never reach the session.
    pub fn post_message(&self, message: Value) -> Result<RequestId, ProtocolError> {
        let request = BridgeRequest::from_message(message).inspect_err(|e| {
            warn!("Rejected bridge message: {}", e);
        })?;
        let evaluator = &self.evaluator;
        let request = request.map_channels(|name| NamedCallback::new(name, evaluator.clone()));
        Ok(self.router.route(request))
    }

    /// Handle a posted message that arrived as JSON text
    pub fn post_raw(&self, body: &str) -> Result<RequestId, ProtocolError> {
        let message: Value = serde_json::from_str(body)?;
        self.post_message(message)
    }
}
