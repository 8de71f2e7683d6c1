//! Inbound message schema shared by both transports.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The exact method names callers use
pub const METHODS: [&str; 3] = ["loadModel", "invokeModel", "isModelDownloaded"];

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Bridge message is not an object with a string 'method'")]
    MissingMethod,
    #[error("Unknown bridge method: {0}")]
    UnknownMethod(String),
    #[error("Invalid callback name: {0:?}")]
    InvalidCallbackName(String),
    #[error("Malformed bridge message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// One inbound method call, generic over how outcome channels are referenced.
///
/// The message channel names callbacks ([`CallbackName`]); the direct binding
/// passes callables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum BridgeRequest<C> {
    #[serde(rename_all = "camelCase")]
    LoadModel {
        model_name: String,
        on_status: C,
        on_complete: C,
        on_error: C,
    },
    #[serde(rename_all = "camelCase")]
    InvokeModel {
        model_name: String,
        prompt: String,
        on_complete: C,
        on_stream: C,
        on_error: C,
    },
    #[serde(rename_all = "camelCase")]
    IsModelDownloaded { model_name: String, on_result: C },
}

impl<C> BridgeRequest<C> {
    pub fn method(&self) -> &'static str {
        match self {
            BridgeRequest::LoadModel { .. } => METHODS[0],
            BridgeRequest::InvokeModel { .. } => METHODS[1],
            BridgeRequest::IsModelDownloaded { .. } => METHODS[2],
        }
    }

    /// Swap every outcome-channel reference, keeping the request shape
    pub fn map_channels<D>(self, mut f: impl FnMut(C) -> D) -> BridgeRequest<D> {
        match self {
            BridgeRequest::LoadModel {
                model_name,
                on_status,
                on_complete,
                on_error,
            } => BridgeRequest::LoadModel {
                model_name,
                on_status: f(on_status),
                on_complete: f(on_complete),
                on_error: f(on_error),
            },
            BridgeRequest::InvokeModel {
                model_name,
                prompt,
                on_complete,
                on_stream,
                on_error,
            } => BridgeRequest::InvokeModel {
                model_name,
                prompt,
                on_complete: f(on_complete),
                on_stream: f(on_stream),
                on_error: f(on_error),
            },
            BridgeRequest::IsModelDownloaded {
                model_name,
                on_result,
            } => BridgeRequest::IsModelDownloaded {
                model_name,
                on_result: f(on_result),
            },
        }
    }

    pub fn model_name(&self) -> &str {
        match self {
            BridgeRequest::LoadModel { model_name, .. }
            | BridgeRequest::InvokeModel { model_name, .. }
            | BridgeRequest::IsModelDownloaded { model_name, .. } => model_name,
        }
    }
}

impl BridgeRequest<CallbackName> {
    /// Validate a message posted over the message channel.
    pub fn from_message(message: Value) -> Result<Self, ProtocolError> {
        let method = message
            .get("method")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingMethod)?;
        if !METHODS.contains(&method) {
            return Err(ProtocolError::UnknownMethod(method.to_string()));
        }
        Ok(serde_json::from_value(message)?)
    }
}

/// Name of a callback the caller registered on its global object.
///
/// Restricted to a JavaScript identifier since it is interpolated into script text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CallbackName(String);

impl CallbackName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CallbackName {
    type Error = ProtocolError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        let mut chars = name.chars();
        let valid_start = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$');
        if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$') {
            Ok(Self(name))
        } else {
            Err(ProtocolError::InvalidCallbackName(name))
        }
    }
}

impl TryFrom<&str> for CallbackName {
    type Error = ProtocolError;

    fn try_from(name: &str) -> Result<Self, Self::Error> {
        Self::try_from(name.to_string())
    }
}

impl From<CallbackName> for String {
    fn from(name: CallbackName) -> Self {
        name.0
    }
}

impl std::fmt::Display for CallbackName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Value handed to an outcome channel
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CallbackArg {
    Number(f64),
    Bool(bool),
    Text(String),
}

/// A caller-side callback the router can fire
pub trait OutcomeChannel: Send + 'static {
    fn fire(&self, arg: CallbackArg);
}
