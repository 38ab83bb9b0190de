use thiserror::Error;

/// Startup configuration failure. The process refuses to start on any of these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Environment variable missing: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}
