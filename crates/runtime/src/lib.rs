//! Model runtime seam for on-device text generation.
//!
//! This crate describes the external runtime that actually loads weights and
//! decodes tokens. The session layer only ever talks to it through
//! [`ModelRuntime`] and [`LoadedModel`], so any backend (MLX, llama.cpp,
//! candle, ...) can be plugged in behind the same contract.
//!
//! Both traits are blocking: callers are expected to run them on a worker
//! thread, never on the thread that coordinates session state.
//!
//! # Example
//!
//! ```
//! use intelligence_runtime::scripted::{ScriptedModel, ScriptedRuntime};
//! use intelligence_runtime::{
//!     ChatMessage, GenerateParameters, LoadedModel, ModelRuntime, TokenAction,
//! };
//!
//! let runtime = ScriptedRuntime::new().with_model("demo-model", ScriptedModel::new(8));
//! let model = runtime.load("demo-model", &mut |_| {}).unwrap();
//!
//! let output = model
//!     .generate(
//!         &[ChatMessage::system("hello")],
//!         &GenerateParameters::default(),
//!         &mut |tokens| {
//!             if tokens.len() >= 4 {
//!                 TokenAction::Stop
//!             } else {
//!                 TokenAction::Continue
//!             }
//!         },
//!     )
//!     .unwrap();
//! assert_eq!(output.token_count, 4);
//! ```

mod message;
pub mod scripted;

use std::sync::Arc;

pub use message::{ChatMessage, Role};

use thiserror::Error;

/// Identifier of a single vocabulary token.
pub type TokenId = u32;

/// Errors surfaced by a model runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum RuntimeError {
    /// Weights could not be fetched or mapped into memory.
    #[error("Failed to load model '{model}': {reason}")]
    Load { model: String, reason: String },

    /// The decode loop failed part way through.
    #[error("Generation failed: {0}")]
    Generation(String),

    /// The backend panicked; the payload is the panic message when it was a string.
    #[error("Runtime panicked: {0}")]
    Panicked(String),
}

/// What the decode loop should do after a token-arrival callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenAction {
    Continue,
    Stop,
}

/// Sampling parameters for one generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateParameters {
    pub temperature: f32,
    /// Seed for the sampler. `None` lets the backend pick.
    pub seed: Option<u64>,
}

impl Default for GenerateParameters {
    fn default() -> Self {
        Self {
            temperature: 0.5,
            seed: None,
        }
    }
}

/// Result of a finished decode loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateOutput {
    /// Full decoded text of every generated token.
    pub text: String,
    /// Total number of generated tokens.
    pub token_count: usize,
}

/// A model that has been loaded into memory and can be reused across generations.
///
/// Only one decode loop may run against a handle at a time; the session layer
/// enforces that, implementations do not have to.
pub trait LoadedModel: Send + Sync + 'static {
    /// Run the decode loop.
    ///
    /// `on_tokens` is called once per produced token with every token generated
    /// so far. Returning [`TokenAction::Stop`] ends the loop after that token.
    fn generate(
        &self,
        messages: &[ChatMessage],
        params: &GenerateParameters,
        on_tokens: &mut dyn FnMut(&[TokenId]) -> TokenAction,
    ) -> Result<GenerateOutput, RuntimeError>;

    /// Decode a token sequence to text.
    fn decode(&self, tokens: &[TokenId]) -> String;

    /// Resident memory used by the weights, if the backend can tell.
    fn active_memory_bytes(&self) -> Option<u64> {
        None
    }
}

/// Factory for [`LoadedModel`] handles.
pub trait ModelRuntime: Send + Sync + 'static {
    /// Bound the backend's compute cache. Called once before every fresh load.
    fn set_cache_limit(&self, bytes: usize);

    /// Download (if needed) and load a model, reporting fractional progress in `0.0..=1.0`.
    fn load(
        &self,
        model_id: &str,
        progress: &mut dyn FnMut(f64),
    ) -> Result<Arc<dyn LoadedModel>, RuntimeError>;
}
