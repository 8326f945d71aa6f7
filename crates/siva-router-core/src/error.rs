//! Error types for the SIVA router

use thiserror::Error;

/// Result type alias using the router's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Router error types.
///
/// Every variant maps to a stable reason code (see [`Error::code`]) so that no
/// failure leaves this crate without a machine-readable reason attached.
/// Policy denials and replay deviations are *not* errors; they are returned as
/// [`crate::routing::AuthorizationOutcome`] and [`crate::audit::ReplayStatus`].
#[derive(Error, Debug)]
pub enum Error {
    // Registry errors
    #[error("Model '{0}' not found. Run `siva-router admin models` to see all models.")]
    ModelNotFound(String),

    #[error("Persona '{0}' has no policy on record.")]
    PersonaNotFound(String),

    #[error("Catalog is invalid: {0}")]
    CatalogInvalid(String),

    // Routing errors
    #[error("Persona '{persona_id}' is not authorized for capability '{capability_key}' ({reason})")]
    NotAuthorized {
        persona_id: String,
        capability_key: String,
        reason: String,
    },

    #[error("No eligible model supports '{capability_key}' within the budget of persona '{persona_id}'")]
    NoEligibleModel {
        capability_key: String,
        persona_id: String,
    },

    #[error("Call timed out after {0} ms")]
    Timeout(u64),

    // Audit errors
    #[error("Interaction '{0}' has no routing decision on record.")]
    InteractionNotFound(String),

    // Admin errors
    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    // Input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Storage errors
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    // Config errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// The storage layer reports through anyhow with context chains; keep the chain
// in the message when it crosses into the typed error.
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Storage(format!("{:#}", err))
    }
}

impl Error {
    /// Stable reason code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Self::ModelNotFound(_) => "MODEL_NOT_FOUND",
            Self::PersonaNotFound(_) => "PERSONA_NOT_FOUND",
            Self::CatalogInvalid(_) => "CATALOG_INVALID",
            Self::NotAuthorized { .. } => "NOT_AUTHORIZED",
            Self::NoEligibleModel { .. } => "NO_ELIGIBLE_MODEL",
            Self::Timeout(_) => "TIMEOUT",
            Self::InteractionNotFound(_) => "INTERACTION_NOT_FOUND",
            Self::MethodNotAllowed(_) => "METHOD_NOT_ALLOWED",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::DatabaseError(_) => "DATABASE_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }

    /// Whether the caller supplied something wrong (as opposed to an
    /// operator-side or infrastructure failure)
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::ModelNotFound(_)
                | Self::PersonaNotFound(_)
                | Self::NotAuthorized { .. }
                | Self::InteractionNotFound(_)
                | Self::MethodNotAllowed(_)
                | Self::InvalidInput(_)
        )
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::ModelNotFound(_) => Some("siva-router admin models".to_string()),
            Self::NoEligibleModel { capability_key, .. } => Some(format!(
                "siva-router admin models --capability {}",
                capability_key
            )),
            Self::InteractionNotFound(_) => Some("siva-router admin decisions".to_string()),
            Self::CatalogInvalid(_) => Some("siva-router init --catalog <file>".to_string()),
            _ => None,
        }
    }
}
