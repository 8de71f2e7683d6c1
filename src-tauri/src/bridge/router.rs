use log::{debug, warn};

use super::protocol::{BridgeRequest, CallbackArg, OutcomeChannel};
use crate::dispatch::{RequestId, ResponseSink};
use crate::models::SessionEvent;
use crate::session::SessionHandle;

/// Translates bridge requests into session calls and session events into callbacks.
///
/// No buffering or reordering happens here; each event is fired as it is delivered.
#[derive(Clone)]
pub struct MessageRouter {
    session: SessionHandle,
}

impl MessageRouter {
    pub fn new(session: SessionHandle) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn route<C: OutcomeChannel>(&self, request: BridgeRequest<C>) -> RequestId {
        debug!(
            "Routing {} for '{}'",
            request.method(),
            request.model_name()
        );
        match request {
            BridgeRequest::LoadModel {
                model_name,
                on_status,
                on_complete,
                on_error,
            } => self
                .session
                .load(model_name, load_sink(on_status, on_complete, on_error)),
            BridgeRequest::InvokeModel {
                model_name,
                prompt,
                on_complete,
                on_stream,
                on_error,
            } => self.session.invoke(
                model_name,
                prompt,
                invoke_sink(on_complete, on_stream, on_error),
            ),
            BridgeRequest::IsModelDownloaded {
                model_name,
                on_result,
            } => self
                .session
                .is_model_downloaded(model_name, downloaded_sink(on_result)),
        }
    }
}

fn load_sink<C: OutcomeChannel>(on_status: C, on_complete: C, on_error: C) -> impl ResponseSink {
    move |event: SessionEvent| match event {
        SessionEvent::Progress(fraction) => on_status.fire(CallbackArg::Number(fraction)),
        SessionEvent::Loaded(_) => on_complete.fire(CallbackArg::Bool(true)),
        SessionEvent::Failed(e) => on_error.fire(CallbackArg::Text(e.to_string())),
        other => warn!("Unexpected event for loadModel: {:?}", other),
    }
}

fn invoke_sink<C: OutcomeChannel>(on_complete: C, on_stream: C, on_error: C) -> impl ResponseSink {
    move |event: SessionEvent| match event {
        SessionEvent::Stream(text) => on_stream.fire(CallbackArg::Text(text)),
        SessionEvent::Completed(text) => on_complete.fire(CallbackArg::Text(text)),
        SessionEvent::Failed(e) => on_error.fire(CallbackArg::Text(e.to_string())),
        other => warn!("Unexpected event for invokeModel: {:?}", other),
    }
}

fn downloaded_sink<C: OutcomeChannel>(on_result: C) -> impl ResponseSink {
    move |event: SessionEvent| match event {
        SessionEvent::Downloaded(downloaded) => on_result.fire(CallbackArg::Bool(downloaded)),
        // The method has no error channel
        SessionEvent::Failed(e) => {
            warn!("isModelDownloaded failed, answering false: {}", e);
            on_result.fire(CallbackArg::Bool(false));
        }
        other => warn!("Unexpected event for isModelDownloaded: {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    struct Recorder {
        name: &'static str,
        calls: Calls,
    }

    impl OutcomeChannel for Recorder {
        fn fire(&self, arg: CallbackArg) {
            self.calls.lock().unwrap().push((self.name.to_string(), arg));
        }
    }

    type Calls = Arc<Mutex<Vec<(String, CallbackArg)>>>;

    fn recorders(names: [&'static str; 3]) -> ([Recorder; 3], Calls) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let make = |name| Recorder {
            name,
            calls: calls.clone(),
        };
        let channels = [make(names[0]), make(names[1]), make(names[2])];
        (channels, calls)
    }

    #[test]
    fn test_load_sink_maps_events_to_channels() {
        let ([status, complete, error], calls) = recorders(["status", "complete", "error"]);
        let mut sink = load_sink(status, complete, error);

        sink.deliver(SessionEvent::Progress(0.5));
        sink.deliver(SessionEvent::Failed(ModelError::ModelNotFound("x".into())));

        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                ("status".to_string(), CallbackArg::Number(0.5)),
                (
                    "error".to_string(),
                    CallbackArg::Text("Model not found in catalog: x".into())
                ),
            ]
        );
    }

    #[test]
    fn test_invoke_sink_maps_events_to_channels() {
        let ([complete, stream, error], calls) = recorders(["complete", "stream", "error"]);
        let mut sink = invoke_sink(complete, stream, error);

        sink.deliver(SessionEvent::Stream("lorem ".into()));
        sink.deliver(SessionEvent::Completed("lorem ipsum ".into()));

        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                ("stream".to_string(), CallbackArg::Text("lorem ".into())),
                ("complete".to_string(), CallbackArg::Text("lorem ipsum ".into())),
            ]
        );
    }

    #[test]
    fn test_downloaded_sink_answers_false_on_failure() {
        let ([result, _, _], calls) = recorders(["result", "unused", "unused"]);
        let mut sink = downloaded_sink(result);

        sink.deliver(SessionEvent::Failed(ModelError::SessionClosed));

        assert_eq!(
            *calls.lock().unwrap(),
            vec![("result".to_string(), CallbackArg::Bool(false))]
        );
    }
}
