use std::any::Any;
use std::sync::Arc;

use intelligence_runtime::{ModelRuntime, RuntimeError};
use log::debug;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinError;

use crate::session::commands::{Message, WorkerEvent};

/// Load `model_id` on the blocking pool, reporting progress and the result to the coordinator.
///
/// The cache limit is configured once, right before the runtime load.
pub(crate) fn spawn_load(
    rt: &Handle,
    runtime: Arc<dyn ModelRuntime>,
    tx: UnboundedSender<Message>,
    ticket: u64,
    model_id: String,
    cache_limit_bytes: usize,
) {
    let progress_tx = tx.clone();
    rt.spawn(async move {
        let result = tokio::task::spawn_blocking(move || {
            runtime.set_cache_limit(cache_limit_bytes);
            runtime.load(&model_id, &mut |fraction| {
                let _ = progress_tx.send(Message::Worker(WorkerEvent::LoadProgress {
                    ticket,
                    fraction,
                }));
            })
        })
        .await;

        let result = match result {
            Ok(result) => result,
            Err(e) => Err(RuntimeError::Panicked(panic_message(e))),
        };
        debug!("Load worker {} finished (ok: {})", ticket, result.is_ok());

        // The coordinator may already be gone; nothing is waiting then
        let _ = tx.send(Message::Worker(WorkerEvent::LoadFinished { ticket, result }));
    });
}

/// Text of a panic that ended a blocking task
pub(crate) fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload: Box<dyn Any + Send> = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
