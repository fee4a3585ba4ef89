/// Errors raised while wiring the service together, before any request
/// is served.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid settings: {0}")]
    Settings(String),

    #[error("store does not guarantee read-your-writes, but the service requires it")]
    ReadYourWritesUnsupported,
}
