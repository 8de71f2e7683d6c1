//! Outcomes the session delivers for one request.
//!
//! Every request sees zero or more non-terminal events (`Progress`, `Stream`)
//! followed by exactly one terminal event.

use super::ModelHandle;
use crate::error::ModelError;

#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Fractional load progress in `0.0..=1.0`
    Progress(f64),
    /// The requested model is loaded and current
    Loaded(ModelHandle),
    /// Accumulated output at a display-interval boundary
    Stream(String),
    /// Final output of a generation, including a stopped one
    Completed(String),
    /// Answer to an installed-model check
    Downloaded(bool),
    Failed(ModelError),
}

impl SessionEvent {
    /// Terminal events close the request; nothing is delivered after one.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionEvent::Loaded(_)
                | SessionEvent::Completed(_)
                | SessionEvent::Downloaded(_)
                | SessionEvent::Failed(_)
        )
    }
}
