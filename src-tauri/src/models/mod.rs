mod catalog;
pub mod events;
mod installed;
pub(crate) mod loader;
mod status;

use std::fmt;
use std::sync::Arc;

use intelligence_runtime::LoadedModel;

pub use catalog::{short_name, ModelCatalog, ModelClass, ModelConfiguration};
pub use events::SessionEvent;
pub use installed::InstalledModelSet;
pub use status::{GenerationStats, LoadPhase, SessionSnapshot};

/// Shareable reference to a model the runtime has loaded.
///
/// Clones point at the same weights; [`ModelHandle::same_model`] tells two
/// loads apart.
#[derive(Clone)]
pub struct ModelHandle {
    config: ModelConfiguration,
    model: Arc<dyn LoadedModel>,
}

impl ModelHandle {
    pub(crate) fn new(config: ModelConfiguration, model: Arc<dyn LoadedModel>) -> Self {
        Self { config, model }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn model(&self) -> &Arc<dyn LoadedModel> {
        &self.model
    }

    /// Whether both handles come from the same load
    pub fn same_model(&self, other: &ModelHandle) -> bool {
        Arc::ptr_eq(&self.model, &other.model)
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("id", &self.config.id)
            .finish_non_exhaustive()
    }
}
