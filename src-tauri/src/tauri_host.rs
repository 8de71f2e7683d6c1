//! Tauri host binding.
//!
//! ```ignore
//! tauri::Builder::default()
//!     .plugin(intelligence::tauri_host::log_plugin().build())
//!     .plugin(tauri_plugin_store::Builder::default().build())
//!     .plugin(intelligence::tauri_host::init(runtime))
//!     .run(tauri::generate_context!())
//! ```
//!
//! Pages get `window.IntelligenceService` injected. It posts to the
//! `post_message` command and is answered through `WebviewWindow::eval`. The
//! channel-based commands are the direct binding, with `tauri::ipc::Channel`s as
//! callables.

use std::sync::{Arc, Mutex};

use intelligence_runtime::ModelRuntime;
use log::{error, info};
use tauri::ipc::Channel;
use tauri::plugin::{Builder, TauriPlugin};
use tauri::{AppHandle, Manager, Runtime, State, WebviewWindow};
use tauri_plugin_store::{Store, StoreExt};

use crate::bridge::{
    user_script, BridgeRequest, CallbackArg, MessageChannelBridge, MessageRouter, OutcomeChannel,
    ScriptEvaluator,
};
use crate::config::{KeyValueStore, StoreError};
use crate::dispatch::HostHandle;
use crate::session::Session;

pub const PLUGIN_NAME: &str = "intelligence";

/// Store file holding `installedModels`, `currentModelName` and `sessionConfig`
pub const STORE_FILE: &str = "intelligence.json";

/// Poster used by the injected script inside a Tauri webview
pub const TAURI_POSTER: &str = r#"(message) => window.__TAURI_INTERNALS__.invoke("plugin:intelligence|post_message", { message })"#;

/// Creates and configures the logging plugin for the host application
///
/// Logs are sent to:
/// - Stdout (console output)
/// - Log directory (persistent file storage)
/// - Webview (browser console)
///
/// Log level is Debug in development builds and Info in production builds
pub fn log_plugin() -> tauri_plugin_log::Builder {
    let level = if cfg!(debug_assertions) {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    tauri_plugin_log::Builder::new()
        .targets([
            tauri_plugin_log::Target::new(tauri_plugin_log::TargetKind::Stdout),
            tauri_plugin_log::Target::new(tauri_plugin_log::TargetKind::LogDir {
                file_name: Some("intelligence".to_string()),
            }),
            tauri_plugin_log::Target::new(tauri_plugin_log::TargetKind::Webview),
        ])
        .level(level)
        .level_for("intelligence_runtime", level)
}

/// Managed state of the plugin
pub struct IntelligenceState {
    router: MessageRouter,
    host: HostHandle,
    session: Mutex<Option<Session>>,
}

/// Evaluates callback scripts in the webview that posted the message
pub struct WebviewEvaluator<R: Runtime> {
    window: WebviewWindow<R>,
}

impl<R: Runtime> WebviewEvaluator<R> {
    pub fn new(window: WebviewWindow<R>) -> Self {
        Self { window }
    }
}

impl<R: Runtime> ScriptEvaluator for WebviewEvaluator<R> {
    fn evaluate(&self, script: String) {
        if let Err(e) = self.window.eval(&script) {
            error!("Failed to evaluate callback in '{}': {}", self.window.label(), e);
        }
    }
}

impl OutcomeChannel for Channel<CallbackArg> {
    fn fire(&self, arg: CallbackArg) {
        if let Err(e) = self.send(arg) {
            error!("Failed to send on callback channel: {}", e);
        }
    }
}

/// [`KeyValueStore`] over a `tauri-plugin-store` file, saved after every write
pub struct TauriStore<R: Runtime> {
    store: Arc<Store<R>>,
}

impl<R: Runtime> TauriStore<R> {
    pub fn new(store: Arc<Store<R>>) -> Self {
        Self { store }
    }
}

impl<R: Runtime> KeyValueStore for TauriStore<R> {
    fn get_value(&self, key: &str) -> Option<serde_json::Value> {
        self.store.get(key)
    }

    fn set_value(&self, key: &str, value: serde_json::Value) -> Result<(), StoreError> {
        self.store.set(key, value);
        self.store
            .save()
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn delete_value(&self, key: &str) -> Result<(), StoreError> {
        if self.store.delete(key) {
            self.store
                .save()
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        Ok(())
    }
}

// ===== Commands =====

#[tauri::command]
fn post_message<R: Runtime>(
    window: WebviewWindow<R>,
    state: State<'_, IntelligenceState>,
    message: serde_json::Value,
) -> Result<(), String> {
    let bridge = MessageChannelBridge::new(
        state.router.session().clone(),
        Arc::new(WebviewEvaluator::new(window)),
    );
    bridge
        .post_message(message)
        .map(|_| ())
        .map_err(|e| e.to_string())
}

#[tauri::command]
fn load_model(
    state: State<'_, IntelligenceState>,
    model_name: String,
    on_status: Channel<CallbackArg>,
    on_complete: Channel<CallbackArg>,
    on_error: Channel<CallbackArg>,
) {
    state.router.route(BridgeRequest::LoadModel {
        model_name,
        on_status,
        on_complete,
        on_error,
    });
}

#[tauri::command]
fn invoke_model(
    state: State<'_, IntelligenceState>,
    model_name: String,
    prompt: String,
    on_complete: Channel<CallbackArg>,
    on_stream: Channel<CallbackArg>,
    on_error: Channel<CallbackArg>,
) {
    state.router.route(BridgeRequest::InvokeModel {
        model_name,
        prompt,
        on_complete,
        on_stream,
        on_error,
    });
}

#[tauri::command]
fn is_model_downloaded(
    state: State<'_, IntelligenceState>,
    model_name: String,
    on_result: Channel<CallbackArg>,
) {
    state.router.route(BridgeRequest::IsModelDownloaded {
        model_name,
        on_result,
    });
}

#[tauri::command]
fn stop_generation(state: State<'_, IntelligenceState>) {
    state.router.session().stop();
}

// ===== Plugin =====

/// Build the `intelligence` plugin around `runtime`.
pub fn init<R: Runtime>(runtime: Arc<dyn ModelRuntime>) -> TauriPlugin<R> {
    Builder::new(PLUGIN_NAME)
        .js_init_script(user_script(TAURI_POSTER))
        .invoke_handler(tauri::generate_handler![
            post_message,
            load_model,
            invoke_model,
            is_model_downloaded,
            stop_generation
        ])
        .setup(move |app, _api| {
            let store = app.store(STORE_FILE)?;
            let host = HostHandle::new();
            let session = Session::builder(runtime)
                .store(Arc::new(TauriStore::new(store)))
                .host(host.clone())
                .runtime_handle(tauri::async_runtime::handle().inner().clone())
                .start()?;

            app.manage(IntelligenceState {
                router: MessageRouter::new(session.handle()),
                host,
                session: Mutex::new(Some(session)),
            });
            info!("Intelligence plugin ready");
            Ok(())
        })
        .on_drop(|app: AppHandle<R>| {
            let Some(state) = app.try_state::<IntelligenceState>() else {
                return;
            };
            state.host.revoke();
            let session = match state.session.lock() {
                Ok(mut guard) => guard.take(),
                Err(e) => {
                    error!("Failed to lock intelligence session: {}", e);
                    None
                }
            };
            if let Some(session) = session {
                session.shutdown();
            }
        })
        .build()
}
