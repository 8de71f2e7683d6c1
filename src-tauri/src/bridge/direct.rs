//! Direct scripting-engine binding: callers hand over callables instead of names.

use std::sync::Arc;

use super::protocol::{BridgeRequest, CallbackArg, OutcomeChannel};
use super::router::MessageRouter;
use crate::dispatch::RequestId;
use crate::session::SessionHandle;

/// A function value living in the caller's engine
pub trait ScriptFunction: Send + Sync + 'static {
    fn call(&self, arg: CallbackArg);
}

impl<F> ScriptFunction for F
where
    F: Fn(CallbackArg) + Send + Sync + 'static,
{
    fn call(&self, arg: CallbackArg) {
        self(arg)
    }
}

pub type Callable = Arc<dyn ScriptFunction>;

impl OutcomeChannel for Callable {
    fn fire(&self, arg: CallbackArg) {
        self.call(arg);
    }
}

/// The three bridge methods as plain functions over callables
#[derive(Clone)]
pub struct DirectBinding {
    router: MessageRouter,
}

impl DirectBinding {
    pub fn new(session: SessionHandle) -> Self {
        Self {
            router: MessageRouter::new(session),
        }
    }

    pub fn load_model(
        &self,
        model_name: &str,
        on_status: Callable,
        on_complete: Callable,
        on_error: Callable,
    ) -> RequestId {
        self.call(BridgeRequest::LoadModel {
            model_name: model_name.to_string(),
            on_status,
            on_complete,
            on_error,
        })
    }

    pub fn invoke_model(
        &self,
        model_name: &str,
        prompt: &str,
        on_complete: Callable,
        on_stream: Callable,
        on_error: Callable,
    ) -> RequestId {
        self.call(BridgeRequest::InvokeModel {
            model_name: model_name.to_string(),
            prompt: prompt.to_string(),
            on_complete,
            on_stream,
            on_error,
        })
    }

    pub fn is_model_downloaded(&self, model_name: &str, on_result: Callable) -> RequestId {
        self.call(BridgeRequest::IsModelDownloaded {
            model_name: model_name.to_string(),
            on_result,
        })
    }

    pub fn call(&self, request: BridgeRequest<Callable>) -> RequestId {
        self.router.route(request)
    }
}
