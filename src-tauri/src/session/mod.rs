//! The inference session: model lifecycle plus the single-flight generation loop.
//!
//! All state lives on one coordinator thread. [`SessionHandle`]s only send
//! commands to it; load and decode work runs on the tokio blocking pool and
//! reports back through the same queue.

pub(crate) mod commands;
mod coordinator;
mod generation;
mod state;

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use futures_util::stream::{self, Stream};
use intelligence_runtime::ModelRuntime;
use log::{error, info};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};

use crate::config::{ConfigKey, ConfigStore, KeyValueStore, MemoryStore, SessionConfig};
use crate::dispatch::{CallbackDispatcher, HostHandle, RequestId, ResponseSink};
use crate::error::{Error, ModelError};
use crate::models::{InstalledModelSet, ModelCatalog, ModelHandle, SessionEvent, SessionSnapshot};
use commands::{Command, Message};
use coordinator::{Coordinator, CoordinatorParts};

const COORDINATOR_THREAD_NAME: &str = "intelligence-coordinator";

/// Configures and starts a [`Session`]
pub struct SessionBuilder {
    runtime: Arc<dyn ModelRuntime>,
    catalog: ModelCatalog,
    store: Arc<dyn KeyValueStore>,
    config: Option<SessionConfig>,
    host: HostHandle,
    rt: Option<Handle>,
}

impl SessionBuilder {
    fn new(runtime: Arc<dyn ModelRuntime>) -> Self {
        Self {
            runtime,
            catalog: ModelCatalog::builtin(),
            store: Arc::new(MemoryStore::new()),
            config: None,
            host: HostHandle::new(),
            rt: None,
        }
    }

    pub fn catalog(mut self, catalog: ModelCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Backing store for the installed-model set and, unless overridden, the session config
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = store;
        self
    }

    /// Use `config` instead of the one saved in the store
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn host(mut self, host: HostHandle) -> Self {
        self.host = host;
        self
    }

    /// Runtime that hosts the workers. Defaults to the current one.
    pub fn runtime_handle(mut self, rt: Handle) -> Self {
        self.rt = Some(rt);
        self
    }

    pub fn start(self) -> Result<Session, Error> {
        let rt = match self.rt {
            Some(rt) => rt,
            None => Handle::try_current()?,
        };
        let config = self
            .config
            .or_else(|| self.store.get(&ConfigKey::SESSION))
            .unwrap_or_default()
            .normalized();
        info!(
            "Starting inference session: {} models, every {} tokens, max {} tokens",
            self.catalog.entries().len(),
            config.display_every_n_tokens,
            config.max_tokens
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());

        let coordinator = Coordinator::new(CoordinatorParts {
            rx,
            tx: tx.downgrade(),
            rt,
            runtime: self.runtime,
            catalog: self.catalog,
            installed: InstalledModelSet::load(self.store),
            config,
            dispatcher: CallbackDispatcher::new(self.host),
            snapshot: snapshot_tx,
        });

        let thread = thread::Builder::new()
            .name(COORDINATOR_THREAD_NAME.to_string())
            .spawn(move || coordinator.run())?;

        Ok(Session {
            handle: SessionHandle {
                tx,
                snapshot: snapshot_rx,
            },
            thread: Some(thread),
        })
    }
}

/// A running inference session.
///
/// Owned by the host; hand out [`SessionHandle`]s to callers. The coordinator
/// stops on [`Session::shutdown`] or when the `Session` is dropped. Handles that
/// outlive it get `SessionClosed`.
pub struct Session {
    handle: SessionHandle,
    thread: Option<JoinHandle<()>>,
}

impl Session {
    pub fn builder(runtime: Arc<dyn ModelRuntime>) -> SessionBuilder {
        SessionBuilder::new(runtime)
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Stop the coordinator and wait for it. Pending requests fail with `SessionClosed`.
    pub fn shutdown(mut self) {
        let _ = self.handle.tx.send(Message::Command(Command::Shutdown));
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Inference coordinator panicked during shutdown");
            }
        }
    }
}

impl Drop for Session {
    /// Same as [`Session::shutdown`] without waiting for the coordinator
    fn drop(&mut self) {
        if self.thread.take().is_some() {
            let _ = self.handle.tx.send(Message::Command(Command::Shutdown));
        }
    }
}

impl std::ops::Deref for Session {
    type Target = SessionHandle;

    fn deref(&self) -> &SessionHandle {
        &self.handle
    }
}

/// Cheap, cloneable entry point to a [`Session`]
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<Message>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    /// Load `model_name`: `Progress`* then `Loaded` or `Failed`.
    pub fn load(&self, model_name: impl Into<String>, sink: impl ResponseSink) -> RequestId {
        let model_name = model_name.into();
        self.submit(Box::new(sink), |id, sink| Command::Load {
            id,
            model_name,
            sink,
        })
    }

    /// Force a fresh load of `model_name`, discarding the current model.
    pub fn switch_model(&self, model_name: impl Into<String>, sink: impl ResponseSink) -> RequestId {
        let model_name = model_name.into();
        self.submit(Box::new(sink), |id, sink| Command::SwitchModel {
            id,
            model_name,
            sink,
        })
    }

    /// Generate with `prompt`: `Stream`* then `Completed` or `Failed`.
    pub fn invoke(
        &self,
        model_name: impl Into<String>,
        prompt: impl Into<String>,
        sink: impl ResponseSink,
    ) -> RequestId {
        let model_name = model_name.into();
        let prompt = prompt.into();
        self.submit(Box::new(sink), |id, sink| Command::Invoke {
            id,
            model_name,
            prompt,
            sink,
        })
    }

    /// Ask the running generation to stop at its next token. No-op when idle.
    pub fn stop(&self) {
        let _ = self.tx.send(Message::Command(Command::Stop));
    }

    /// Answers with a single `Downloaded`.
    pub fn is_model_downloaded(
        &self,
        model_name: impl Into<String>,
        sink: impl ResponseSink,
    ) -> RequestId {
        let model_name = model_name.into();
        self.submit(Box::new(sink), |id, sink| Command::IsModelDownloaded {
            id,
            model_name,
            sink,
        })
    }

    /// Latest published state
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// State change notifications. Drop the receiver to unsubscribe.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    pub async fn load_model<F>(
        &self,
        model_name: &str,
        mut on_progress: F,
    ) -> Result<ModelHandle, ModelError>
    where
        F: FnMut(f64) + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let mut done_tx = Some(done_tx);
        self.load(model_name, move |event: SessionEvent| match event {
            SessionEvent::Progress(p) => on_progress(p),
            SessionEvent::Loaded(handle) => {
                if let Some(tx) = done_tx.take() {
                    let _ = tx.send(Ok(handle));
                }
            }
            SessionEvent::Failed(e) => {
                if let Some(tx) = done_tx.take() {
                    let _ = tx.send(Err(e));
                }
            }
            _ => {}
        });
        done_rx.await.unwrap_or(Err(ModelError::SessionClosed))
    }

    pub async fn generate<F>(
        &self,
        model_name: &str,
        prompt: &str,
        mut on_stream: F,
    ) -> Result<String, ModelError>
    where
        F: FnMut(&str) + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let mut done_tx = Some(done_tx);
        self.invoke(model_name, prompt, move |event: SessionEvent| match event {
            SessionEvent::Stream(text) => on_stream(&text),
            SessionEvent::Completed(text) => {
                if let Some(tx) = done_tx.take() {
                    let _ = tx.send(Ok(text));
                }
            }
            SessionEvent::Failed(e) => {
                if let Some(tx) = done_tx.take() {
                    let _ = tx.send(Err(e));
                }
            }
            _ => {}
        });
        done_rx.await.unwrap_or(Err(ModelError::SessionClosed))
    }

    /// Events of one invocation as a stream that ends after the terminal event
    pub fn invoke_stream(
        &self,
        model_name: &str,
        prompt: &str,
    ) -> impl Stream<Item = SessionEvent> + Send + 'static {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        self.invoke(model_name, prompt, move |event: SessionEvent| {
            let _ = event_tx.send(event);
        });
        stream::unfold(event_rx, |mut rx| async move {
            let event = rx.recv().await?;
            Some((event, rx))
        })
    }

    pub async fn model_downloaded(&self, model_name: &str) -> Result<bool, ModelError> {
        let (done_tx, done_rx) = oneshot::channel();
        let mut done_tx = Some(done_tx);
        self.is_model_downloaded(model_name, move |event: SessionEvent| {
            let result = match event {
                SessionEvent::Downloaded(downloaded) => Ok(downloaded),
                SessionEvent::Failed(e) => Err(e),
                _ => return,
            };
            if let Some(tx) = done_tx.take() {
                let _ = tx.send(result);
            }
        });
        done_rx.await.unwrap_or(Err(ModelError::SessionClosed))
    }

    /// Every model that has loaded successfully, in first-load order
    pub async fn downloaded_models(&self) -> Result<Vec<String>, ModelError> {
        let (reply, done_rx) = oneshot::channel();
        self.tx
            .send(Message::Command(Command::DownloadedModels { reply }))
            .map_err(|_| ModelError::SessionClosed)?;
        done_rx.await.map_err(|_| ModelError::SessionClosed)
    }

    fn submit<F>(&self, sink: Box<dyn ResponseSink>, build: F) -> RequestId
    where
        F: FnOnce(RequestId, Box<dyn ResponseSink>) -> Command,
    {
        let id = RequestId::new();
        let message = Message::Command(build(id, sink));
        if let Err(mpsc::error::SendError(message)) = self.tx.send(message) {
            // Coordinator is gone; resolve on the caller's thread
            if let Message::Command(command) = message {
                if let Some(mut sink) = command.into_sink() {
                    sink.deliver(SessionEvent::Failed(ModelError::SessionClosed));
                }
            }
        }
        id
    }
}
