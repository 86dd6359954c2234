use serde::Serialize;

/// App-wide error type. Every fallible function returns `Result<T, AppError>`.
///
/// The Configuration/Generation/Simulation/Tracking variants carry the
/// engine's propagation policy: configuration and generation failures abort
/// experiment creation, simulation failures are caught at the per-persona
/// boundary, tracking failures are always swallowed.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Simulation error: {0}")]
    Simulation(String),

    #[error("Tracking error: {0}")]
    Tracking(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl AppError {
    /// Stable snake_case tag, used as a structured log field and in the
    /// serialized error shape.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database",
            AppError::Pool(_) => "pool",
            AppError::NotFound(_) => "not_found",
            AppError::Configuration(_) => "configuration",
            AppError::Generation(_) => "generation",
            AppError::Simulation(_) => "simulation",
            AppError::Tracking(_) => "tracking",
            AppError::Http(_) => "http",
            AppError::Io(_) => "io",
            AppError::Serde(_) => "serde",
        }
    }
}

/// Serializes as `{ error: "...", kind: "..." }` so callers consuming the
/// JSON report get structured error messages.
impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("AppError", 2)?;
        s.serialize_field("error", &self.to_string())?;
        s.serialize_field("kind", self.kind())?;
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags() {
        assert_eq!(AppError::Generation("no content".into()).kind(), "generation");
        assert_eq!(AppError::Configuration("bad url".into()).kind(), "configuration");
        assert_eq!(AppError::Tracking("offline".into()).kind(), "tracking");
    }

    #[test]
    fn test_serialized_shape() {
        let err = AppError::Simulation("agent timed out".into());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "simulation");
        assert!(json["error"].as_str().unwrap().contains("agent timed out"));
    }
}
