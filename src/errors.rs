use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowshotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Decision provider error: {0}")]
    LlmProvider(String),

    /// Network-level provider failure worth retrying (429, 5xx, dropped connection).
    #[error("Decision provider transport error: {0}")]
    ProviderTransport(String),

    #[error("Decision provider timed out after {0} ms")]
    ProviderTimeout(u64),

    #[error("Perception error: {0}")]
    Perception(String),

    /// Recoverable driver failure: the session is still usable.
    #[error("Driver error: {0}")]
    Driver(String),

    /// Session crash or irrecoverable navigation. Never retried.
    #[error("Driver fatal: {0}")]
    DriverFatal(String),

    #[error("Driver call timed out after {0} ms")]
    DriverTimeout(u64),

    #[error("Browser session already has an active run")]
    SessionBusy,

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Capture store error: {0}")]
    Capture(String),

    #[error("Run already finalized")]
    RunFinalized,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl FlowshotError {
    /// Failures the decision gateway may retry. Malformed responses are never
    /// errors in the first place, they come back as a parse failure.
    pub fn is_transient(&self) -> bool {
        match self {
            FlowshotError::ProviderTransport(_) | FlowshotError::ProviderTimeout(_) => true,
            FlowshotError::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| s.as_u16() == 429 || s.is_server_error())
            }
            _ => false,
        }
    }

    /// Errors that end the run immediately with a driver-fatal reason.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FlowshotError::DriverFatal(_))
    }
}

impl serde::Serialize for FlowshotError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type FlowshotResult<T> = Result<T, FlowshotError>;
