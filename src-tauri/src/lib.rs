//! On-device text generation for host applications and their script front-ends.
//!
//! - [`Session`] owns the model lifecycle and the single-flight generation loop.
//! - [`bridge`] exposes it to a sandboxed caller over the `loadModel` /
//!   `invokeModel` / `isModelDownloaded` message contract.
//! - [`dispatch`] delivers every outcome on the session's coordinator thread.
//!
//! The model runtime itself is a collaborator, see [`intelligence_runtime`].

pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod models;
pub mod session;
#[cfg(feature = "tauri")]
pub mod tauri_host;

pub use config::{ConfigKey, ConfigStore, JsonFileStore, KeyValueStore, MemoryStore, SessionConfig};
pub use dispatch::{HostHandle, RequestId, ResponseSink};
pub use error::{CatalogError, Error, ModelError};
pub use models::{
    InstalledModelSet, LoadPhase, ModelCatalog, ModelClass, ModelConfiguration, ModelHandle,
    SessionEvent, SessionSnapshot,
};
pub use session::{Session, SessionBuilder, SessionHandle};

pub use intelligence_runtime;
