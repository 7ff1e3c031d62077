use thiserror::Error;

/// Startup configuration failures. Any of these stops the gateway before it
/// binds a socket.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    MissingCredential(&'static str),

    #[error("capability manifest is not valid JSON: {0}")]
    MalformedManifest(#[from] serde_json::Error),

    #[error("capability manifest must be a JSON object")]
    ManifestNotObject,
}
