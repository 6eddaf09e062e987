use serde::Serialize;
use thiserror::Error;
use ts_rs::TS;

/// Unified error type for inkvault operations
#[derive(Debug, Error)]
pub enum InkvaultError {
    // Mapping errors
    #[error("Cannot add mapping: {0}")]
    InvalidMapping(String),

    #[error("Failed to map identifier '{0}' into the target namespace")]
    MappingResolution(String),

    #[error("Moving '{0}' would create a containment cycle")]
    CycleDetected(String),

    // Provider errors
    #[error("Provider authentication failed: {0}")]
    ProviderAuth(String),

    #[error("Provider request failed: {0}")]
    ProviderRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // Local persistence errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Config errors
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}

/// Result type alias for inkvault operations
pub type Result<T> = std::result::Result<T, InkvaultError>;

impl InkvaultError {
    /// Whether this error invalidates cached credentials and requires
    /// re-authentication before any retry can succeed.
    pub fn is_auth(&self) -> bool {
        matches!(self, InkvaultError::ProviderAuth(_))
    }

    /// Whether retrying the same operation later can reasonably succeed
    /// without user intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(self, InkvaultError::ProviderRequest(_))
    }

    /// Convert to a serializable representation for IPC
    pub fn to_serializable(&self) -> SerializableError {
        SerializableError::from(self)
    }
}

/// A serializable representation of InkvaultError for IPC to a host UI
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SerializableError {
    /// Error kind/variant name
    pub kind: String,
    /// Human-readable error message
    pub message: String,
}

impl From<&InkvaultError> for SerializableError {
    fn from(err: &InkvaultError) -> Self {
        let kind = match err {
            InkvaultError::InvalidMapping(_) => "InvalidMapping",
            InkvaultError::MappingResolution(_) => "MappingResolution",
            InkvaultError::CycleDetected(_) => "CycleDetected",
            InkvaultError::ProviderAuth(_) => "ProviderAuth",
            InkvaultError::ProviderRequest(_) => "ProviderRequest",
            InkvaultError::NotFound(_) => "NotFound",
            InkvaultError::Storage(_) => "Storage",
            InkvaultError::Json(_) => "Json",
            InkvaultError::ConfigParse(_) => "ConfigParse",
            InkvaultError::ConfigSerialize(_) => "ConfigSerialize",
        }
        .to_string();

        Self {
            kind,
            message: err.to_string(),
        }
    }
}

impl From<InkvaultError> for SerializableError {
    fn from(err: InkvaultError) -> Self {
        SerializableError::from(&err)
    }
}
