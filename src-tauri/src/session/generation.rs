use std::time::{Instant, SystemTime, UNIX_EPOCH};

use intelligence_runtime::{ChatMessage, GenerateParameters, RuntimeError, TokenAction};
use log::debug;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use super::commands::{GenerationOutcome, Message, WorkerEvent};
use crate::models::loader::panic_message;
use crate::models::{ModelClass, ModelConfiguration, ModelHandle};

/// Per-token policy of the decode loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DisplayThrottle {
    every: usize,
    max_tokens: usize,
}

impl DisplayThrottle {
    pub fn new(every: usize, max_tokens: usize) -> Self {
        Self {
            every: every.max(1),
            max_tokens: max_tokens.max(1),
        }
    }

    /// Decode and stream at every `every`th token
    pub fn should_display(&self, token_count: usize) -> bool {
        token_count > 0 && token_count % self.every == 0
    }

    pub fn action(&self, token_count: usize, cancelled: bool) -> TokenAction {
        if token_count >= self.max_tokens || cancelled {
            TokenAction::Stop
        } else {
            TokenAction::Continue
        }
    }
}

/// Prompt history for one invocation.
///
/// Chat models take the prompt as their system turn. Reasoning distills were
/// trained without a system role, so they get it as a user turn.
pub(crate) fn prompt_history(config: &ModelConfiguration, prompt: &str) -> Vec<ChatMessage> {
    match config.class {
        ModelClass::Chat => vec![ChatMessage::system(prompt)],
        ModelClass::Reasoning => vec![ChatMessage::user(prompt)],
    }
}

/// Fresh sampler seed for each generation
pub(crate) fn generation_seed() -> Option<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_millis() as u64)
}

pub(crate) struct GenerationJob {
    pub generation: u64,
    pub model: ModelHandle,
    pub messages: Vec<ChatMessage>,
    pub params: GenerateParameters,
    pub throttle: DisplayThrottle,
    pub cancel: CancellationToken,
}

/// Run the decode loop on the blocking pool.
///
/// Streamed text and the final outcome go back to the coordinator as worker events.
pub(crate) fn spawn_generation(rt: &Handle, tx: UnboundedSender<Message>, job: GenerationJob) {
    let generation = job.generation;
    let stream_tx = tx.clone();
    rt.spawn(async move {
        let result = tokio::task::spawn_blocking(move || -> Result<GenerationOutcome, RuntimeError> {
            let GenerationJob {
                generation,
                model,
                messages,
                params,
                throttle,
                cancel,
            } = job;
            let loaded = model.model();
            let started = Instant::now();

            let output = loaded.generate(&messages, &params, &mut |tokens| {
                let count = tokens.len();
                let cancelled = cancel.is_cancelled();
                if throttle.should_display(count) {
                    let text = loaded.decode(tokens);
                    let _ = stream_tx.send(Message::Worker(WorkerEvent::Stream {
                        generation,
                        token_count: count,
                        text,
                    }));
                }
                throttle.action(count, cancelled)
            })?;

            Ok(GenerationOutcome {
                text: output.text,
                token_count: output.token_count,
                elapsed: started.elapsed(),
            })
        })
        .await;

        let result = match result {
            Ok(result) => result,
            Err(e) => Err(RuntimeError::Panicked(panic_message(e))),
        };
        debug!("Generation worker {} finished (ok: {})", generation, result.is_ok());

        let _ = tx.send(Message::Worker(WorkerEvent::GenerationFinished { generation, result }));
    });
}
