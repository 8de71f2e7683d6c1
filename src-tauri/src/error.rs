use derive_more::{Display, From};
use intelligence_runtime::RuntimeError;

/// Failures surfaced by the inference session
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("Model not found in catalog: {0}")]
    ModelNotFound(String),
    #[error("A generation is already running")]
    AlreadyRunning,
    #[error("Another model is already loading: {0}")]
    LoadInProgress(String),
    #[error(transparent)]
    RuntimeFailure(#[from] RuntimeError),
    #[error("Inference session is closed")]
    SessionClosed,
}

impl ModelError {
    /// Returns a user-friendly error message suitable for display in the UI
    pub fn user_message(&self) -> String {
        match self {
            ModelError::ModelNotFound(name) => {
                format!("Model '{}' not found. Please select a valid model.", name)
            }
            ModelError::AlreadyRunning => {
                "A response is still being generated. Wait for it or stop it first.".to_string()
            }
            ModelError::LoadInProgress(name) => {
                format!("Model '{}' is still loading. Please try again shortly.", name)
            }
            ModelError::RuntimeFailure(cause) => match cause {
                RuntimeError::Load { model, .. } => {
                    format!("Failed to load model '{}'. Please try again.", model)
                }
                other => other.to_string(),
            },
            ModelError::SessionClosed => "The model session has shut down.".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("Model catalog is empty")]
    Empty,
    #[error("Model listed twice in catalog: {0}")]
    DuplicateModel(String),
    #[error("Default model is not in the catalog: {0}")]
    UnknownDefault(String),
}

#[derive(Debug, From, Display)]
pub enum Error {
    #[from]
    #[display("{_0}")]
    Model(ModelError),

    #[from]
    #[display("{_0}")]
    Catalog(CatalogError),

    #[from]
    #[display("{_0}")]
    Store(crate::config::StoreError),

    #[from]
    #[display("Session must be started inside a tokio runtime: {_0}")]
    NoRuntime(tokio::runtime::TryCurrentError),

    #[from]
    #[display("Failed to spawn coordinator thread: {_0}")]
    Spawn(std::io::Error),
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_failure_keeps_cause_description() {
        let err = ModelError::from(RuntimeError::Generation("out of memory".into()));

        assert_eq!(err.to_string(), "Generation failed: out of memory");
        assert_eq!(err.user_message(), "Generation failed: out of memory");
    }

    #[test]
    fn test_user_messages() {
        let cases = vec![
            (
                ModelError::ModelNotFound("nope".into()),
                "Model 'nope' not found. Please select a valid model.",
            ),
            (
                ModelError::RuntimeFailure(RuntimeError::Load {
                    model: "demo-model".into(),
                    reason: "disk full".into(),
                }),
                "Failed to load model 'demo-model'. Please try again.",
            ),
            (ModelError::SessionClosed, "The model session has shut down."),
        ];

        for (err, expected) in cases {
            assert_eq!(err.user_message(), expected);
        }
    }

    #[test]
    fn test_crate_error_display_is_inner_message() {
        let err: Error = ModelError::AlreadyRunning.into();
        assert_eq!(err.to_string(), "A generation is already running");

        let err: Error = CatalogError::Empty.into();
        assert_eq!(err.to_string(), "Model catalog is empty");
    }
}
