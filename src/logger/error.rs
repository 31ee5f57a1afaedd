use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("At least one output (console or file) must be enabled")]
    NoOutput,

    #[error("Invalid logger configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to open log file: {0}")]
    Io(#[from] std::io::Error),
}
