use serde::{Deserialize, Serialize};

use crate::error::CatalogError;

/// Organisation prefix shared by the built-in model identifiers
const MODEL_ORG_PREFIX: &str = "mlx-community/";

/// Capability class of a model
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ModelClass {
    /// Plain instruction-following chat
    Chat,
    /// Emits a thinking phase before the answer
    Reasoning,
}

/// Static information about a model the runtime can load.
/// Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfiguration {
    /// Globally unique identifier (e.g., "mlx-community/Llama-3.2-1B-Instruct-4bit")
    pub id: String,
    /// Human-readable name (e.g., "Llama 3.2 1B")
    pub display_name: String,
    /// Capability class, drives prompt shaping and the thinking flag
    pub class: ModelClass,
}

impl ModelConfiguration {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, class: ModelClass) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            class,
        }
    }

    pub fn is_reasoning(&self) -> bool {
        self.class == ModelClass::Reasoning
    }
}

/// Short lowercase name for a model identifier, without the organisation prefix.
pub fn short_name(model_id: &str) -> String {
    model_id
        .strip_prefix(MODEL_ORG_PREFIX)
        .unwrap_or(model_id)
        .to_lowercase()
}

/// Lookup table from model identifier to configuration.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    entries: Vec<ModelConfiguration>,
    default_model: String,
}

impl ModelCatalog {
    /// Build a catalog. The default model must be one of the entries.
    pub fn new(
        entries: Vec<ModelConfiguration>,
        default_model: impl Into<String>,
    ) -> Result<Self, CatalogError> {
        let default_model = default_model.into();
        if entries.is_empty() {
            return Err(CatalogError::Empty);
        }
        if let Some(dup) = entries
            .iter()
            .enumerate()
            .find(|(i, e)| entries[..*i].iter().any(|prev| prev.id == e.id))
            .map(|(_, e)| e.id.clone())
        {
            return Err(CatalogError::DuplicateModel(dup));
        }
        if !entries.iter().any(|e| e.id == default_model) {
            return Err(CatalogError::UnknownDefault(default_model));
        }
        Ok(Self {
            entries,
            default_model,
        })
    }

    /// Look up a model. Unknown identifiers return `None`.
    pub fn get(&self, model_id: &str) -> Option<&ModelConfiguration> {
        self.entries.iter().find(|e| e.id == model_id)
    }

    pub fn contains(&self, model_id: &str) -> bool {
        self.get(model_id).is_some()
    }

    pub fn default_model(&self) -> &ModelConfiguration {
        // new() guarantees the default is present
        self.get(&self.default_model).unwrap_or(&self.entries[0])
    }

    pub fn entries(&self) -> &[ModelConfiguration] {
        &self.entries
    }

    /// Hardcoded catalog of the models the on-device runtime ships with
    pub fn builtin() -> Self {
        Self {
            entries: vec![
                ModelConfiguration::new(
                    "mlx-community/Llama-3.2-1B-Instruct-4bit",
                    "Llama 3.2 1B",
                    ModelClass::Chat,
                ),
                ModelConfiguration::new(
                    "mlx-community/Llama-3.2-3B-Instruct-4bit",
                    "Llama 3.2 3B",
                    ModelClass::Chat,
                ),
                ModelConfiguration::new(
                    "mlx-community/DeepSeek-R1-Distill-Qwen-1.5B-4bit",
                    "DeepSeek R1 Distill Qwen 1.5B (4-bit)",
                    ModelClass::Reasoning,
                ),
                ModelConfiguration::new(
                    "mlx-community/DeepSeek-R1-Distill-Qwen-1.5B-8bit",
                    "DeepSeek R1 Distill Qwen 1.5B (8-bit)",
                    ModelClass::Reasoning,
                ),
            ],
            default_model: "mlx-community/Llama-3.2-1B-Instruct-4bit".into(),
        }
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        let catalog = ModelCatalog::builtin();

        let cases = vec![
            ("mlx-community/Llama-3.2-1B-Instruct-4bit", Some(ModelClass::Chat)),
            ("mlx-community/Llama-3.2-3B-Instruct-4bit", Some(ModelClass::Chat)),
            (
                "mlx-community/DeepSeek-R1-Distill-Qwen-1.5B-4bit",
                Some(ModelClass::Reasoning),
            ),
            (
                "mlx-community/DeepSeek-R1-Distill-Qwen-1.5B-8bit",
                Some(ModelClass::Reasoning),
            ),
            ("Llama-3.2-1B-Instruct-4bit", None),
            ("", None),
        ];

        for (id, expected) in cases {
            assert_eq!(catalog.get(id).map(|m| m.class), expected, "lookup of '{}'", id);
        }
        assert_eq!(
            catalog.default_model().id,
            "mlx-community/Llama-3.2-1B-Instruct-4bit"
        );
    }

    #[test]
    fn test_short_name() {
        let cases = vec![
            ("mlx-community/Llama-3.2-1B-Instruct-4bit", "llama-3.2-1b-instruct-4bit"),
            ("demo-model", "demo-model"),
            ("Other/Model", "other/model"),
        ];

        for (id, expected) in cases {
            assert_eq!(short_name(id), expected);
        }
    }

    #[test]
    fn test_custom_catalog_validation() {
        let demo = ModelConfiguration::new("demo-model", "Demo", ModelClass::Chat);

        assert!(matches!(
            ModelCatalog::new(vec![], "demo-model"),
            Err(CatalogError::Empty)
        ));
        assert!(matches!(
            ModelCatalog::new(vec![demo.clone()], "other"),
            Err(CatalogError::UnknownDefault(id)) if id == "other"
        ));
        assert!(matches!(
            ModelCatalog::new(vec![demo.clone(), demo.clone()], "demo-model"),
            Err(CatalogError::DuplicateModel(id)) if id == "demo-model"
        ));

        let catalog = ModelCatalog::new(vec![demo], "demo-model").unwrap();
        assert!(catalog.contains("demo-model"));
        assert_eq!(catalog.default_model().display_name, "Demo");
    }

    #[test]
    fn test_model_configuration_serialization() {
        let config = ModelConfiguration::new("demo-model", "Demo", ModelClass::Reasoning);

        assert_eq!(
            serde_json::to_value(&config).unwrap(),
            serde_json::json!({
                "id": "demo-model",
                "displayName": "Demo",
                "class": "reasoning"
            })
        );
    }

    #[test]
    fn test_model_class_serialization() {
        assert_eq!(serde_json::to_string(&ModelClass::Reasoning).unwrap(), "\"reasoning\"");
        assert_eq!("chat".parse::<ModelClass>().unwrap(), ModelClass::Chat);
        assert_eq!(ModelClass::Reasoning.to_string(), "reasoning");
    }
}
