//! Session state owned by the coordinator.
//!
//! ```text
//! Idle ──load──> Loading ──ok──> Loaded(handle)
//!   ^               │               │
//!   └────failed─────┘               └──load(other) / switchModel──> Loading
//! ```
//!
//! Generation entry is guarded by `running`: the check and the set happen in
//! [`GenerationState::try_begin`], never apart.

use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::dispatch::RequestId;
use crate::error::ModelError;
use crate::models::{LoadPhase, ModelConfiguration, ModelHandle};

/// Who is waiting on a load to finish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoadWaiter {
    /// A `load` / `switchModel` request
    Caller(RequestId),
    /// An accepted generation that needs the model first
    Generation(u64),
}

pub(crate) enum LoadState {
    Idle,
    Loading {
        config: ModelConfiguration,
        ticket: u64,
        waiters: Vec<LoadWaiter>,
    },
    Loaded(ModelHandle),
}

impl LoadState {
    pub fn phase(&self) -> LoadPhase {
        match self {
            LoadState::Idle => LoadPhase::Idle,
            LoadState::Loading { .. } => LoadPhase::Loading,
            LoadState::Loaded(_) => LoadPhase::Loaded,
        }
    }

    pub fn loaded(&self) -> Option<&ModelHandle> {
        match self {
            LoadState::Loaded(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn loading_model(&self) -> Option<&ModelConfiguration> {
        match self {
            LoadState::Loading { config, .. } => Some(config),
            _ => None,
        }
    }

    /// Is `ticket` the load currently in flight?
    pub fn is_current_ticket(&self, ticket: u64) -> bool {
        matches!(self, LoadState::Loading { ticket: t, .. } if *t == ticket)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GenerationPhase {
    /// Accepted, waiting for its model to load
    AwaitingModel,
    /// The runtime decode loop is running
    Decoding,
}

/// The one generation the session is working on
#[derive(Debug, Clone)]
pub(crate) struct ActiveGeneration {
    pub id: u64,
    pub request: RequestId,
    pub config: ModelConfiguration,
    pub prompt: String,
    pub phase: GenerationPhase,
}

pub(crate) struct GenerationState {
    pub running: bool,
    pub cancel: CancellationToken,
    pub output: String,
    pub progress: f64,
    pub tokens_per_second: f64,
    pub is_thinking: bool,
    pub start_time: Option<Instant>,
    active: Option<ActiveGeneration>,
    next_id: u64,
}

impl GenerationState {
    pub fn new() -> Self {
        Self {
            running: false,
            cancel: CancellationToken::new(),
            output: String::new(),
            progress: 0.0,
            tokens_per_second: 0.0,
            is_thinking: false,
            start_time: None,
            active: None,
            next_id: 0,
        }
    }

    pub fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Accept a generation if none is running. Returns its id.
    pub fn try_begin(
        &mut self,
        request: RequestId,
        config: ModelConfiguration,
        prompt: String,
    ) -> Result<u64, ModelError> {
        if self.running {
            return Err(ModelError::AlreadyRunning);
        }
        self.next_id += 1;
        self.running = true;
        self.cancel = CancellationToken::new();
        self.output.clear();
        self.start_time = Some(Instant::now());
        self.active = Some(ActiveGeneration {
            id: self.next_id,
            request,
            config,
            prompt,
            phase: GenerationPhase::AwaitingModel,
        });
        Ok(self.next_id)
    }

    pub fn active(&self) -> Option<&ActiveGeneration> {
        self.active.as_ref()
    }

    /// The active generation, if its id is `id`
    pub fn active_mut(&mut self, id: u64) -> Option<&mut ActiveGeneration> {
        self.active.as_mut().filter(|g| g.id == id)
    }

    pub fn is_decoding(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|g| g.phase == GenerationPhase::Decoding)
    }

    /// Cooperative cancel of whatever is running. No-op when idle.
    pub fn stop(&mut self) {
        if self.running {
            self.cancel.cancel();
        }
        self.is_thinking = false;
    }

    /// End generation `id`, clearing `running`. Stale ids are ignored.
    pub fn finish(&mut self, id: u64) -> Option<ActiveGeneration> {
        if self.active.as_ref().map(|g| g.id) != Some(id) {
            return None;
        }
        self.running = false;
        self.is_thinking = false;
        self.start_time = None;
        self.active.take()
    }
}
