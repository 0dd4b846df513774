use thiserror::Error;

/// Errors that abort process startup or a single outbound call.
///
/// Per-message validation failures are never represented here — they are
/// `Verdict` values (see `validator`), since a rejected envelope is routine,
/// not exceptional.
#[derive(Debug, Error)]
pub enum FogError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("canonicalization error: {0}")]
    Canon(String),

    #[error("cloud forward failed: {0}")]
    Forward(String),

    #[error("mqtt error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("http bind error: {0}")]
    Bind(#[from] std::io::Error),
}

pub type FogResult<T> = Result<T, FogError>;
