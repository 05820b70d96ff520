use thiserror::Error;

/// Errors reported synchronously from the service facade.
///
/// Validation and admission failures happen before a submission row exists;
/// everything that goes wrong later is recorded on the row itself and never
/// surfaces here.
#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("source_code must not be empty")]
    EmptySource,
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error("{field} of {requested} exceeds the global ceiling of {ceiling}")]
    LimitExceeded {
        field: &'static str,
        requested: f64,
        ceiling: f64,
    },
    #[error("judge queue is full")]
    QueueFull,
    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),
}
