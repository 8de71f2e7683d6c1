use std::sync::Arc;
use std::time::Duration;

use intelligence_runtime::{LoadedModel, RuntimeError};
use tokio::sync::oneshot;

use crate::dispatch::{RequestId, ResponseSink};

/// Everything the coordinator thread consumes, in arrival order
pub(crate) enum Message {
    Command(Command),
    Worker(WorkerEvent),
}

/// Requests from session handles
/// These are sent through the coordinator's channel, never handled on the caller's thread
pub(crate) enum Command {
    Load {
        id: RequestId,
        model_name: String,
        sink: Box<dyn ResponseSink>,
    },
    SwitchModel {
        id: RequestId,
        model_name: String,
        sink: Box<dyn ResponseSink>,
    },
    Invoke {
        id: RequestId,
        model_name: String,
        prompt: String,
        sink: Box<dyn ResponseSink>,
    },
    Stop,
    IsModelDownloaded {
        id: RequestId,
        model_name: String,
        sink: Box<dyn ResponseSink>,
    },
    DownloadedModels {
        reply: oneshot::Sender<Vec<String>>,
    },
    Shutdown,
}

impl Command {
    /// Hand back the sink of a command that never reached the coordinator.
    pub fn into_sink(self) -> Option<Box<dyn ResponseSink>> {
        match self {
            Command::Load { sink, .. }
            | Command::SwitchModel { sink, .. }
            | Command::Invoke { sink, .. }
            | Command::IsModelDownloaded { sink, .. } => Some(sink),
            Command::Stop | Command::DownloadedModels { .. } | Command::Shutdown => None,
        }
    }
}

/// Results reported back by load and generation workers
pub(crate) enum WorkerEvent {
    LoadProgress {
        ticket: u64,
        fraction: f64,
    },
    LoadFinished {
        ticket: u64,
        result: Result<Arc<dyn LoadedModel>, RuntimeError>,
    },
    Stream {
        generation: u64,
        token_count: usize,
        text: String,
    },
    GenerationFinished {
        generation: u64,
        result: Result<GenerationOutcome, RuntimeError>,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct GenerationOutcome {
    pub text: String,
    pub token_count: usize,
    pub elapsed: Duration,
}
