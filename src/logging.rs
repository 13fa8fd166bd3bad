use thiserror::Error;
use tracing_subscriber::filter::{EnvFilter, ParseError};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log level: {0}")]
    InvalidLevel(#[from] ParseError),
    #[error("failed to install subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Initialize the global subscriber from the configured level.
///
/// Development mode uses the human-readable formatter; production emits
/// one JSON object per event. `RUST_LOG` overrides the configured level.
pub fn init(level: &str, development: bool) -> Result<(), LoggingError> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(custom) => EnvFilter::try_new(custom)?,
        Err(_) => EnvFilter::try_new(format!("filament={}", level))?,
    };

    use tracing_subscriber::util::SubscriberInitExt;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if development {
        builder.pretty().finish().try_init()?;
    } else {
        builder.json().finish().try_init()?;
    }

    Ok(())
}
