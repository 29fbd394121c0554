use thiserror::Error;
use tracing::metadata::LevelFilter;
use tracing::Level;
use tracing_subscriber::fmt::format::PrettyFields;
use tracing_subscriber::EnvFilter;

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("init logging error: `{0}`")]
    TryInitError(String),
}

/// Initializes the global tracing subscriber writing to stdout.
///
/// `level` is the default directive, `RUST_LOG` directives take precedence over it.
pub fn try_init(level: Level) -> Result<(), LoggingError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::from_level(level).into())
                .from_env_lossy(),
        )
        .fmt_fields(PrettyFields::new())
        .try_init()
        .map_err(|err| LoggingError::TryInitError(err.to_string()))
}
