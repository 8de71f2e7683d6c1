use std::sync::Arc;

use intelligence_runtime::{GenerateParameters, LoadedModel, ModelRuntime, RuntimeError};
use log::{debug, error, info, warn};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{UnboundedReceiver, WeakUnboundedSender};
use tokio::sync::watch;

use super::commands::{Command, GenerationOutcome, Message, WorkerEvent};
use super::generation::{
    generation_seed, prompt_history, spawn_generation, DisplayThrottle, GenerationJob,
};
use super::state::{GenerationPhase, GenerationState, LoadState, LoadWaiter};
use crate::config::SessionConfig;
use crate::dispatch::{CallbackDispatcher, RequestId};
use crate::error::ModelError;
use crate::models::loader::spawn_load;
use crate::models::{
    GenerationStats, InstalledModelSet, ModelCatalog, ModelConfiguration, ModelHandle,
    SessionEvent, SessionSnapshot,
};

/// Owns all session state. Runs on its own thread and is the only writer.
pub(crate) struct Coordinator {
    rx: UnboundedReceiver<Message>,
    tx: WeakUnboundedSender<Message>,
    rt: Handle,
    runtime: Arc<dyn ModelRuntime>,
    catalog: ModelCatalog,
    installed: InstalledModelSet,
    config: SessionConfig,
    dispatcher: CallbackDispatcher,
    snapshot: watch::Sender<SessionSnapshot>,
    load: LoadState,
    generation: GenerationState,
    model_info: String,
    last_stats: Option<GenerationStats>,
    next_ticket: u64,
    outbox: Vec<(RequestId, SessionEvent)>,
}

pub(crate) struct CoordinatorParts {
    pub rx: UnboundedReceiver<Message>,
    pub tx: WeakUnboundedSender<Message>,
    pub rt: Handle,
    pub runtime: Arc<dyn ModelRuntime>,
    pub catalog: ModelCatalog,
    pub installed: InstalledModelSet,
    pub config: SessionConfig,
    pub dispatcher: CallbackDispatcher,
    pub snapshot: watch::Sender<SessionSnapshot>,
}

impl Coordinator {
    pub fn new(parts: CoordinatorParts) -> Self {
        Self {
            rx: parts.rx,
            tx: parts.tx,
            rt: parts.rt,
            runtime: parts.runtime,
            catalog: parts.catalog,
            installed: parts.installed,
            config: parts.config,
            dispatcher: parts.dispatcher,
            snapshot: parts.snapshot,
            load: LoadState::Idle,
            generation: GenerationState::new(),
            model_info: String::new(),
            last_stats: None,
            next_ticket: 0,
            outbox: Vec::new(),
        }
    }

    /// Main loop - consumes self, runs on the coordinator thread
    pub fn run(mut self) {
        self.dispatcher.bind_to_current_thread();
        info!("Inference coordinator started");

        while let Some(message) = self.rx.blocking_recv() {
            let keep_running = match message {
                Message::Command(command) => self.handle_command(command),
                Message::Worker(event) => {
                    self.handle_worker(event);
                    true
                }
            };

            // State first, callbacks second
            self.publish();
            self.flush();

            if !keep_running {
                break;
            }
        }

        self.close();
        info!("Inference coordinator stopped");
    }

    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Load {
                id,
                model_name,
                sink,
            } => {
                self.dispatcher.register(id, sink);
                if let Err(e) = self.request_load(&model_name, LoadWaiter::Caller(id)) {
                    warn!("Load of '{}' rejected: {}", model_name, e);
                    self.push(id, SessionEvent::Failed(e));
                }
            }
            Command::SwitchModel {
                id,
                model_name,
                sink,
            } => {
                self.dispatcher.register(id, sink);
                if let Err(e) = self.switch_model(&model_name, id) {
                    warn!("Switch to '{}' rejected: {}", model_name, e);
                    self.push(id, SessionEvent::Failed(e));
                }
            }
            Command::Invoke {
                id,
                model_name,
                prompt,
                sink,
            } => {
                self.dispatcher.register(id, sink);
                self.invoke(id, &model_name, prompt);
            }
            Command::Stop => {
                if self.generation.running {
                    info!("Stopping generation");
                }
                self.generation.stop();
            }
            Command::IsModelDownloaded {
                id,
                model_name,
                sink,
            } => {
                self.dispatcher.register(id, sink);
                let downloaded = self.installed.contains(&model_name);
                self.push(id, SessionEvent::Downloaded(downloaded));
            }
            Command::DownloadedModels { reply } => {
                let _ = reply.send(self.installed.list().to_vec());
            }
            Command::Shutdown => {
                info!("Inference coordinator shutting down");
                return false;
            }
        }
        true
    }

    fn handle_worker(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::LoadProgress { ticket, fraction } => self.on_load_progress(ticket, fraction),
            WorkerEvent::LoadFinished { ticket, result } => self.on_load_finished(ticket, result),
            WorkerEvent::Stream {
                generation,
                token_count,
                text,
            } => {
                let Some(active) = self.generation.active_mut(generation) else {
                    debug!("Dropping stream of stale generation {}", generation);
                    return;
                };
                let request = active.request;
                debug!("Generation {} streamed {} tokens", generation, token_count);
                self.generation.output = text.clone();
                self.push(request, SessionEvent::Stream(text));
            }
            WorkerEvent::GenerationFinished { generation, result } => {
                self.finish_generation(generation, result.map_err(ModelError::from));
            }
        }
    }

    // ===== Load =====

    /// Resolve `waiter` with the model named `model_name`, loading it if needed.
    fn request_load(&mut self, model_name: &str, waiter: LoadWaiter) -> Result<(), ModelError> {
        let config = self
            .catalog
            .get(model_name)
            .cloned()
            .ok_or_else(|| ModelError::ModelNotFound(model_name.to_string()))?;

        if let Some(handle) = self.load.loaded().filter(|h| h.id() == model_name) {
            debug!("Model '{}' is already loaded", model_name);
            let handle = handle.clone();
            self.resolve_waiter(waiter, Ok(handle));
            return Ok(());
        }

        if let LoadState::Loading {
            config: loading,
            waiters,
            ..
        } = &mut self.load
        {
            if loading.id == model_name {
                debug!("Joining in-flight load of '{}'", model_name);
                waiters.push(waiter);
                return Ok(());
            }
            return Err(ModelError::LoadInProgress(loading.id.clone()));
        }

        // Replacing the loaded model would pull it out from under the decode loop
        if self.generation.is_decoding() {
            return Err(ModelError::AlreadyRunning);
        }

        self.start_load(config, vec![waiter]);
        Ok(())
    }

    fn switch_model(&mut self, model_name: &str, id: RequestId) -> Result<(), ModelError> {
        if self.generation.running {
            return Err(ModelError::AlreadyRunning);
        }
        let config = self
            .catalog
            .get(model_name)
            .cloned()
            .ok_or_else(|| ModelError::ModelNotFound(model_name.to_string()))?;
        if let Some(loading) = self.load.loading_model() {
            return Err(ModelError::LoadInProgress(loading.id.clone()));
        }

        info!("Switching model to '{}'", model_name);
        self.load = LoadState::Idle;
        self.generation.progress = 0.0;
        self.start_load(config, vec![LoadWaiter::Caller(id)]);
        Ok(())
    }

    fn start_load(&mut self, config: ModelConfiguration, waiters: Vec<LoadWaiter>) {
        self.next_ticket += 1;
        let ticket = self.next_ticket;

        debug!(
            ">>> LOAD START: Model '{}' - beginning async load (ticket {})",
            config.id, ticket
        );
        info!("Loading model '{}'", config.id);

        self.generation.progress = 0.0;
        self.model_info = format!("Downloading {}: 0%", config.id);
        let model_id = config.id.clone();
        self.load = LoadState::Loading {
            config,
            ticket,
            waiters,
        };

        match self.tx.upgrade() {
            Some(tx) => spawn_load(
                &self.rt,
                self.runtime.clone(),
                tx,
                ticket,
                model_id,
                self.config.cache_limit_bytes,
            ),
            None => self.fail_load(ModelError::SessionClosed),
        }
    }

    fn on_load_progress(&mut self, ticket: u64, fraction: f64) {
        if !self.load.is_current_ticket(ticket) {
            return;
        }
        let LoadState::Loading {
            config, waiters, ..
        } = &self.load
        else {
            return;
        };

        self.model_info = format!("Downloading {}: {}%", config.id, (fraction * 100.0) as i64);
        let callers: Vec<RequestId> = waiters
            .iter()
            .filter_map(|w| match w {
                LoadWaiter::Caller(id) => Some(*id),
                LoadWaiter::Generation(_) => None,
            })
            .collect();

        self.generation.progress = fraction;
        for id in callers {
            self.push(id, SessionEvent::Progress(fraction));
        }
    }

    fn on_load_finished(
        &mut self,
        ticket: u64,
        result: Result<Arc<dyn LoadedModel>, RuntimeError>,
    ) {
        if !self.load.is_current_ticket(ticket) {
            debug!("Dropping result of stale load {}", ticket);
            return;
        }
        let LoadState::Loading {
            config, waiters, ..
        } = std::mem::replace(&mut self.load, LoadState::Idle)
        else {
            return;
        };

        match result {
            Ok(model) => {
                let handle = ModelHandle::new(config, model);
                self.model_info = match handle.model().active_memory_bytes() {
                    Some(bytes) => {
                        format!("Loaded {}. Weights: {}M", handle.id(), bytes / 1024 / 1024)
                    }
                    None => format!("Loaded {}", handle.id()),
                };
                self.generation.progress = 1.0;
                self.load = LoadState::Loaded(handle.clone());

                match self.installed.insert(handle.id()) {
                    Ok(true) => info!("Recorded '{}' as installed", handle.id()),
                    Ok(false) => {}
                    Err(e) => warn!("Failed to persist installed model '{}': {}", handle.id(), e),
                }
                if let Err(e) = self.installed.set_current_model_name(handle.id()) {
                    warn!("Failed to persist current model name: {}", e);
                }

                debug!(
                    "<<< LOAD COMPLETE: Model '{}' - now in memory and ready",
                    handle.id()
                );
                info!("Model '{}' loaded successfully", handle.id());
                for waiter in waiters {
                    self.resolve_waiter(waiter, Ok(handle.clone()));
                }
            }
            Err(e) => {
                error!("Failed to load model '{}': {}", config.id, e);
                self.model_info = format!("Failed to load {}", config.id);
                self.generation.progress = 0.0;
                let err = ModelError::from(e);
                for waiter in waiters {
                    self.resolve_waiter(waiter, Err(err.clone()));
                }
            }
        }
    }

    /// Fail the in-flight load without waiting for its worker.
    fn fail_load(&mut self, err: ModelError) {
        if let LoadState::Loading { waiters, .. } = std::mem::replace(&mut self.load, LoadState::Idle)
        {
            for waiter in waiters {
                self.resolve_waiter(waiter, Err(err.clone()));
            }
        }
    }

    fn resolve_waiter(&mut self, waiter: LoadWaiter, result: Result<ModelHandle, ModelError>) {
        match waiter {
            LoadWaiter::Caller(id) => match result {
                Ok(handle) => self.push(id, SessionEvent::Loaded(handle)),
                Err(e) => self.push(id, SessionEvent::Failed(e)),
            },
            LoadWaiter::Generation(generation) => match result {
                Ok(handle) => self.begin_decoding(generation, handle),
                Err(e) => self.finish_generation(generation, Err(e)),
            },
        }
    }

    // ===== Generation =====

    fn invoke(&mut self, id: RequestId, model_name: &str, prompt: String) {
        let Some(config) = self.catalog.get(model_name).cloned() else {
            self.push(
                id,
                SessionEvent::Failed(ModelError::ModelNotFound(model_name.to_string())),
            );
            return;
        };

        let generation = match self.generation.try_begin(id, config, prompt) {
            Ok(generation) => generation,
            Err(e) => {
                warn!("Invoke rejected: {}", e);
                self.push(id, SessionEvent::Failed(e));
                return;
            }
        };
        info!("Generation {} accepted for '{}'", generation, model_name);

        if let Err(e) = self.request_load(model_name, LoadWaiter::Generation(generation)) {
            self.finish_generation(generation, Err(e));
        }
    }

    fn begin_decoding(&mut self, generation: u64, handle: ModelHandle) {
        let Some(active) = self.generation.active_mut(generation) else {
            return;
        };
        active.phase = GenerationPhase::Decoding;
        let messages = prompt_history(&active.config, &active.prompt);
        let is_reasoning = active.config.is_reasoning();

        // A stop that arrived while loading has already cleared the flag
        self.generation.is_thinking = is_reasoning && !self.generation.cancelled();

        let Some(tx) = self.tx.upgrade() else {
            self.finish_generation(generation, Err(ModelError::SessionClosed));
            return;
        };
        debug!("Generation {} decoding with '{}'", generation, handle.id());
        spawn_generation(
            &self.rt,
            tx,
            GenerationJob {
                generation,
                model: handle,
                messages,
                params: GenerateParameters {
                    temperature: self.config.temperature,
                    seed: generation_seed(),
                },
                throttle: DisplayThrottle::new(
                    self.config.display_every_n_tokens,
                    self.config.max_tokens,
                ),
                cancel: self.generation.cancel.clone(),
            },
        );
    }

    fn finish_generation(
        &mut self,
        generation: u64,
        result: Result<GenerationOutcome, ModelError>,
    ) {
        let Some(active) = self.generation.finish(generation) else {
            debug!("Dropping result of stale generation {}", generation);
            return;
        };

        match result {
            Ok(outcome) => {
                if outcome.text != self.generation.output {
                    self.generation.output = outcome.text;
                }
                let stats = GenerationStats::new(outcome.token_count, outcome.elapsed);
                self.generation.tokens_per_second = stats.tokens_per_second;
                self.last_stats = Some(stats);
                info!(
                    "Generation {} complete: {} tokens,{}",
                    generation,
                    outcome.token_count,
                    stats.stat_line()
                );
                self.push(
                    active.request,
                    SessionEvent::Completed(self.generation.output.clone()),
                );
            }
            Err(e) => {
                error!("Generation {} failed: {}", generation, e);
                self.push(active.request, SessionEvent::Failed(e));
            }
        }
    }

    // ===== Delivery =====

    fn push(&mut self, id: RequestId, event: SessionEvent) {
        self.outbox.push((id, event));
    }

    fn publish(&self) {
        let snapshot = SessionSnapshot {
            load_phase: self.load.phase(),
            current_model: self.load.loaded().map(|h| h.id().to_string()),
            loading_model: self.load.loading_model().map(|c| c.id.clone()),
            progress: self.generation.progress,
            model_info: self.model_info.clone(),
            running: self.generation.running,
            is_thinking: self.generation.is_thinking,
            output: self.generation.output.clone(),
            tokens_per_second: self.generation.tokens_per_second,
            stat: self
                .last_stats
                .map(|s| s.stat_line())
                .unwrap_or_default(),
            last_generation: self.last_stats,
            started_at: self.generation.start_time,
        };
        self.snapshot.send_replace(snapshot);
    }

    fn flush(&mut self) {
        for (id, event) in std::mem::take(&mut self.outbox) {
            self.dispatcher.dispatch(id, event);
        }
    }

    /// Cancel outstanding work and resolve every pending request with `SessionClosed`.
    fn close(&mut self) {
        self.generation.cancel.cancel();
        if let Some(active) = self.generation.active().map(|g| g.id) {
            self.generation.finish(active);
        }
        self.load = match std::mem::replace(&mut self.load, LoadState::Idle) {
            LoadState::Loaded(handle) => LoadState::Loaded(handle),
            _ => LoadState::Idle,
        };

        // Commands queued behind the shutdown never ran
        self.rx.close();
        while let Ok(message) = self.rx.try_recv() {
            if let Message::Command(command) = message {
                if let Some(sink) = command.into_sink() {
                    let id = RequestId::new();
                    self.dispatcher.register(id, sink);
                }
            }
        }

        self.publish();
        self.dispatcher.fail_all(ModelError::SessionClosed);
    }
}
