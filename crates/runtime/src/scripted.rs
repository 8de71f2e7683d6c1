//! Deterministic runtime backend.
//!
//! Generates token `i` at step `i` and decodes it to `vocabulary[i % len]`, so
//! the text for any token prefix is known in advance. Progress, latency and
//! failures are all scripted, which makes it suitable for demos and for
//! exercising session behaviour without real weights.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::debug;

use crate::{
    ChatMessage, GenerateOutput, GenerateParameters, LoadedModel, ModelRuntime, RuntimeError,
    TokenAction, TokenId,
};

const DEFAULT_VOCABULARY: [&str; 5] = ["lorem ", "ipsum ", "dolor ", "sit ", "amet "];

/// Behaviour of one scripted model.
#[derive(Debug, Clone)]
pub struct ScriptedModel {
    natural_length: usize,
    token_delay: Duration,
    vocabulary: Vec<String>,
    fail_after: Option<usize>,
    panic_after: Option<usize>,
    memory_bytes: Option<u64>,
}

impl ScriptedModel {
    /// A model that stops on its own after `natural_length` tokens.
    pub fn new(natural_length: usize) -> Self {
        Self {
            natural_length,
            token_delay: Duration::ZERO,
            vocabulary: DEFAULT_VOCABULARY.iter().map(|s| s.to_string()).collect(),
            fail_after: None,
            panic_after: None,
            memory_bytes: None,
        }
    }

    /// Sleep this long before producing each token.
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }

    /// Replace the vocabulary. An empty vocabulary keeps the default one.
    pub fn with_vocabulary<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let words: Vec<String> = words.into_iter().map(Into::into).collect();
        if !words.is_empty() {
            self.vocabulary = words;
        }
        self
    }

    /// Fail the decode loop once `tokens` tokens have been produced.
    pub fn failing_after(mut self, tokens: usize) -> Self {
        self.fail_after = Some(tokens);
        self
    }

    /// Panic inside the decode loop once `tokens` tokens have been produced.
    pub fn panicking_after(mut self, tokens: usize) -> Self {
        self.panic_after = Some(tokens);
        self
    }

    pub fn with_memory_bytes(mut self, bytes: u64) -> Self {
        self.memory_bytes = Some(bytes);
        self
    }

    /// Text the model produces for the first `count` tokens.
    pub fn text_for(&self, count: usize) -> String {
        let tokens: Vec<TokenId> = (0..count as TokenId).collect();
        decode_with(&self.vocabulary, &tokens)
    }
}

fn decode_with(vocabulary: &[String], tokens: &[TokenId]) -> String {
    tokens
        .iter()
        .map(|&t| vocabulary[t as usize % vocabulary.len()].as_str())
        .collect()
}

struct ScriptedHandle {
    model: ScriptedModel,
    last_prompt: Arc<Mutex<Option<Vec<ChatMessage>>>>,
}

impl LoadedModel for ScriptedHandle {
    fn generate(
        &self,
        messages: &[ChatMessage],
        _params: &GenerateParameters,
        on_tokens: &mut dyn FnMut(&[TokenId]) -> TokenAction,
    ) -> Result<GenerateOutput, RuntimeError> {
        if let Ok(mut last) = self.last_prompt.lock() {
            *last = Some(messages.to_vec());
        }

        let mut tokens: Vec<TokenId> = Vec::new();
        for step in 0..self.model.natural_length {
            if self.model.fail_after == Some(step) {
                return Err(RuntimeError::Generation(format!(
                    "scripted failure after {} tokens",
                    step
                )));
            }
            if self.model.panic_after == Some(step) {
                panic!("scripted panic after {} tokens", step);
            }
            if !self.model.token_delay.is_zero() {
                thread::sleep(self.model.token_delay);
            }
            tokens.push(step as TokenId);
            if on_tokens(&tokens) == TokenAction::Stop {
                break;
            }
        }

        Ok(GenerateOutput {
            text: self.decode(&tokens),
            token_count: tokens.len(),
        })
    }

    fn decode(&self, tokens: &[TokenId]) -> String {
        decode_with(&self.model.vocabulary, tokens)
    }

    fn active_memory_bytes(&self) -> Option<u64> {
        self.model.memory_bytes
    }
}

/// A [`ModelRuntime`] whose models, progress and failures are scripted up front.
pub struct ScriptedRuntime {
    models: HashMap<String, ScriptedModel>,
    load_failures: HashMap<String, String>,
    load_panics: HashSet<String>,
    progress_steps: Vec<f64>,
    load_delay: Duration,
    load_count: AtomicUsize,
    cache_limit: AtomicUsize,
    last_prompt: Arc<Mutex<Option<Vec<ChatMessage>>>>,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self {
            models: HashMap::new(),
            load_failures: HashMap::new(),
            load_panics: HashSet::new(),
            progress_steps: vec![0.0, 0.25, 0.5, 0.75, 1.0],
            load_delay: Duration::ZERO,
            load_count: AtomicUsize::new(0),
            cache_limit: AtomicUsize::new(0),
            last_prompt: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_model(mut self, id: impl Into<String>, model: ScriptedModel) -> Self {
        self.models.insert(id.into(), model);
        self
    }

    /// Make every load of `id` fail with `reason` after reporting the first progress step.
    pub fn with_load_failure(mut self, id: impl Into<String>, reason: impl Into<String>) -> Self {
        self.load_failures.insert(id.into(), reason.into());
        self
    }

    /// Make every load of `id` panic after reporting the first progress step.
    pub fn with_load_panic(mut self, id: impl Into<String>) -> Self {
        self.load_panics.insert(id.into());
        self
    }

    /// Progress values reported during each load, in order.
    pub fn with_progress_steps(mut self, steps: Vec<f64>) -> Self {
        self.progress_steps = steps;
        self
    }

    /// Total time a load takes, spread evenly across the progress steps.
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    /// Number of loads that reached the backend (successful or not).
    pub fn load_count(&self) -> usize {
        self.load_count.load(Ordering::SeqCst)
    }

    /// Cache limit most recently configured through [`ModelRuntime::set_cache_limit`].
    pub fn cache_limit(&self) -> usize {
        self.cache_limit.load(Ordering::SeqCst)
    }

    /// Prompt history passed to the most recent generation.
    pub fn last_prompt(&self) -> Option<Vec<ChatMessage>> {
        self.last_prompt.lock().ok().and_then(|last| last.clone())
    }
}

impl Default for ScriptedRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRuntime for ScriptedRuntime {
    fn set_cache_limit(&self, bytes: usize) {
        self.cache_limit.store(bytes, Ordering::SeqCst);
    }

    fn load(
        &self,
        model_id: &str,
        progress: &mut dyn FnMut(f64),
    ) -> Result<Arc<dyn LoadedModel>, RuntimeError> {
        self.load_count.fetch_add(1, Ordering::SeqCst);
        debug!("Scripted load of '{}'", model_id);

        if self.load_panics.contains(model_id) {
            if let Some(&first) = self.progress_steps.first() {
                progress(first);
            }
            panic!("scripted load panic for '{}'", model_id);
        }

        if let Some(reason) = self.load_failures.get(model_id) {
            if let Some(&first) = self.progress_steps.first() {
                progress(first);
            }
            return Err(RuntimeError::Load {
                model: model_id.to_string(),
                reason: reason.clone(),
            });
        }

        let model = self
            .models
            .get(model_id)
            .cloned()
            .ok_or_else(|| RuntimeError::Load {
                model: model_id.to_string(),
                reason: "no such model in the scripted runtime".to_string(),
            })?;

        let pause = if self.progress_steps.is_empty() {
            Duration::ZERO
        } else {
            self.load_delay / self.progress_steps.len() as u32
        };
        for &step in &self.progress_steps {
            if !pause.is_zero() {
                thread::sleep(pause);
            }
            progress(step);
        }

        Ok(Arc::new(ScriptedHandle {
            model,
            last_prompt: self.last_prompt.clone(),
        }))
    }
}
